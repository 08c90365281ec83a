//! Ad-hoc command session engine.
//!
//! Requests reach a [`Dispatcher`] from the bus ([`bus_ingest`]) or over HTTP
//! ([`routes`]). The dispatcher instantiates commands from the
//! [`CommandRegistry`], keeps multi-stage executions in the [`SessionTable`]
//! and lets the [`SessionSweeper`] evict the ones requesters abandoned.

pub mod builtin;
pub mod bus_ingest;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod routes;
pub mod session;
pub mod sweeper;
pub mod telemetry;

pub use config::{ConfigError, SessionConfig};
pub use discovery::{Advertiser, DiscoveryItems};
pub use dispatcher::{reject_undecodable, Dispatcher, ResponseSink, SinkError};
pub use handler::{
    CommandHandler, HandlerError, HandlerKind, HandlerState, MultiStageCommand, SessionHistory,
    SingleStageCommand, StageContext, StageReply, TransitionOutcome,
};
pub use registry::{CommandDescriptor, CommandFactory, CommandRegistry, RegisteredCommand};
pub use session::{SessionEntry, SessionSnapshot, SessionTable, SessionTableError};
pub use sweeper::SessionSweeper;
