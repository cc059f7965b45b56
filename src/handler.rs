//! Host-facing callback interface: a single trait with an associated
//! `UserData` type, invoked synchronously on the connection's worker task.

use crate::message::Message;
use crate::worker::ConnectionHandle;

/// Implemented once by the host application and supplied to [`crate::server::Server::bind`]
/// or [`crate::client::Client::connect`]. `on_open` returns the opaque value
/// that is thereafter bound to the connection and passed back into
/// `on_message`/`on_close`.
///
/// Every callback also receives the connection's [`ConnectionHandle`], so a
/// handler can e.g. reply from inside `on_message` without threading the
/// handle through separately.
pub trait Handler: Send + Sync + 'static {
    type UserData: Send + 'static;

    /// Invoked exactly once, after the opening handshake completes and
    /// before any `on_message` call for this connection.
    fn on_open(&self, handle: &ConnectionHandle) -> Self::UserData;

    /// Invoked once per completed application message, in the order the
    /// peer sent them.
    fn on_message(&self, handle: &ConnectionHandle, user_data: &mut Self::UserData, message: Message);

    /// Invoked exactly once, as the connection's final callback, whether it
    /// closed cleanly or due to a protocol/transport error.
    fn on_close(&self, handle: &ConnectionHandle, user_data: Self::UserData);
}
