//! Task spawning and bulk cancellation.
//!
//! Grounded in the teacher's `TaskHandlesStorage`/`ObservableSpawner`
//! (`utils/task_spawner.rs`): every background task is wrapped in
//! [`future::abortable`] and its [`AbortHandle`] is registered with the
//! owning component, so the whole set can be cancelled in one `dispose()`
//! call on teardown. The only change here is the spawning primitive itself
//! — `tokio::task::spawn_local` onto the worker's [`LocalSet`][1] in place
//! of `wasm_bindgen_futures::spawn_local`.
//!
//! [1]: tokio::task::LocalSet

use std::cell::RefCell;

use futures::future::{self, AbortHandle, Future};

/// Spawns `fut` on the current [`LocalSet`][1], returning an [`AbortHandle`]
/// that cancels it early.
///
/// [1]: tokio::task::LocalSet
pub fn spawn_task<F>(fut: F) -> AbortHandle
where
    F: Future<Output = ()> + 'static,
{
    let (abortable, handle) = future::abortable(fut);
    tokio::task::spawn_local(async move {
        let _ = abortable.await;
    });
    handle
}

/// Storage of the [`AbortHandle`]s used for aborting a component's
/// background listener tasks.
#[derive(Default)]
pub struct TaskHandlesStorage(RefCell<Vec<AbortHandle>>);

impl TaskHandlesStorage {
    /// Registers `handle` so it is aborted on [`Self::dispose`].
    pub fn register_handle(&self, handle: AbortHandle) {
        self.0.borrow_mut().push(handle);
    }

    /// Aborts every registered task spawned via [`spawn_task`].
    pub fn dispose(&self) {
        let handles: Vec<_> = self.0.borrow_mut().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for TaskHandlesStorage {
    fn drop(&mut self) {
        self.dispose();
    }
}
