//! Delay that can be stopped and started over again.
//!
//! Grounded verbatim in the teacher's `resettable_delay_for`
//! (`utils/resettable_delay.rs`); the only change is the timer primitive —
//! `tokio::time::sleep` in place of `platform::delay_for` and
//! `tokio::task::spawn_local` in place of `platform::spawn`. Used by
//! [`crate::worker`] to implement the singleton reconnect/keepalive timer
//! resource policy described in the crate's design document.

use std::{cell::RefCell, future::Future, rc::Rc, time::Duration};

use futures::{
    channel::oneshot,
    future,
    future::{AbortHandle, FutureExt},
};

type FutureResolver = Rc<RefCell<Option<oneshot::Sender<()>>>>;

/// Returns a [`Future`] that resolves after `delay` and a
/// [`ResettableDelayHandle`] that controls it.
pub fn resettable_delay_for(
    delay: Duration,
    is_stopped: bool,
) -> (impl Future<Output = ()>, ResettableDelayHandle) {
    ResettableDelayHandle::new(delay, is_stopped)
}

/// Handle to a delay which can be stopped and restarted.
#[derive(Debug)]
pub struct ResettableDelayHandle {
    /// Resolves the delay [`Future`] when sent to; `None` once already
    /// resolved.
    future_resolver: FutureResolver,

    /// Duration the delay waits before resolving.
    timeout: Duration,

    /// Handle to the currently running timer task.
    abort_handle: RefCell<AbortHandle>,
}

impl ResettableDelayHandle {
    /// Stops the delay so it never resolves, unless it already has (in
    /// which case this is a no-op).
    pub fn stop(&self) {
        self.abort_handle.borrow().abort();
    }

    /// Restarts the countdown from the beginning.
    pub fn reset(&self) {
        self.abort_handle.borrow().abort();
        self.spawn_timer();
    }

    fn new(
        timeout: Duration,
        is_stopped: bool,
    ) -> (impl Future<Output = ()>, Self) {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let (abort, _) = AbortHandle::new_pair();
        let this = Self {
            future_resolver: tx,
            abort_handle: RefCell::new(abort),
            timeout,
        };
        if !is_stopped {
            this.spawn_timer();
        }

        let delay_fut = async move {
            if rx.await.is_err() {
                future::pending::<()>().await;
            }
        };

        (delay_fut, this)
    }

    fn spawn_timer(&self) {
        let future_resolver = Rc::clone(&self.future_resolver);
        let timeout = self.timeout;
        let (fut, abort) = future::abortable(async move {
            tokio::time::sleep(timeout).await;
            if let Some(rsvr) = future_resolver.borrow_mut().take() {
                let _ = rsvr.send(());
            }
        });
        tokio::task::spawn_local(fut.map(drop));

        self.abort_handle.replace(abort);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn resolves_after_delay() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (fut, _handle) =
                    resettable_delay_for(Duration::from_millis(5), false);
                fut.await;
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_prevents_resolution() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (fut, handle) =
                    resettable_delay_for(Duration::from_millis(5), false);
                handle.stop();
                let result =
                    tokio::time::timeout(Duration::from_millis(20), fut).await;
                assert!(result.is_err());
            })
            .await;
    }
}
