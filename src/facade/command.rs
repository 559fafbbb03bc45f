//! Typed wrapper around an application-level request.
//!
//! The wire itself only ever sees `(commandType: String, params: Value)`
//! (see [`crate::worker::Command::SendRequest`]); [`RpcCommand`] is a
//! purely host-side ergonomic layer pairing that pair with a concrete
//! `Output` type, so [`Facade::request`][super::Facade::request] can
//! return `Result<C::Output, _>` instead of a raw [`serde_json::Value`].

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A single application-level request/reply pair.
///
/// Implemented once per command an embedding application wants to issue,
/// analogous to one `RpcCommand` enum variant in the distilled spec's
/// source, but as an open set of types instead of a closed enum — this
/// crate doesn't know the embedding application's command taxonomy.
pub trait RpcCommand {
    /// Type the reply payload decodes into.
    type Output: DeserializeOwned;

    /// Name of the command, used by the server-side dispatcher and
    /// echoed back for diagnostics.
    fn name(&self) -> &'static str;

    /// Consumes `self`, producing the parameters sent on the wire.
    fn into_params(self) -> Value;
}
