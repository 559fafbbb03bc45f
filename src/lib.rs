//! Session-oriented RPC and pub/sub transport over a WebSocket.
//!
//! A [`Facade`] owns a dedicated worker thread that keeps a [`Session`]
//! alive across brief disconnects, reconnecting on a fixed interval up to a
//! configured budget and detecting a stale socket through a keepalive
//! ping/reply discipline. On top of that session, a [`Correlator`]
//! matches outgoing [`ClientMsg::Request`]s with their [`ServerMsg::Reply`]
//! and routes [`ServerMsg::Notification`]s to whichever subscription they
//! belong to.
//!
//! [`ClientMsg::Request`]: codec::ClientMsg::Request
//! [`ServerMsg::Reply`]: codec::ServerMsg::Reply
//! [`ServerMsg::Notification`]: codec::ServerMsg::Notification

#![allow(clippy::module_name_repetitions)]
#![deny(broken_intra_doc_links)]
#![cfg_attr(not(feature = "mockable"), warn(missing_docs))]
#![cfg_attr(feature = "mockable", allow(missing_docs))]

pub mod utils;

pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod facade;
pub mod session;
pub mod transport;
pub mod worker;

#[doc(inline)]
pub use self::{
    config::SessionConfig,
    error::SessionRpcError,
    facade::{Facade, RpcCommand, SubscriptionSpec},
    worker::{SubscriptionRegistry, SubscriptionRegistryBuilder},
};
