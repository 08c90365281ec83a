//! Requester side of Beach ad-hoc commands.
//!
//! A [`RemoteCommand`] drives one execution on a remote owner through any
//! [`CommandTransport`]: the in-process bus or the server's HTTP binding.

mod remote;
mod transport;

pub use remote::{ClientError, CommandResult, CompletedStage, ExecutingStage, RemoteCommand};
pub use transport::{BusTransport, CommandTransport, HttpTransport, TransportError};
