//! Protocol value types shared by the Beach ad-hoc command server and its
//! clients. Nothing in here knows about sessions or locking; these are the
//! payloads that cross the transport.

mod action;
mod codec;
mod discovery;
mod error;
mod form;
mod payload;
mod session_id;

pub use action::{Action, AllowedAction, AllowedActions, NextStage, PreviousStage, Status};
pub use codec::{decode_request, decode_response, encode_request, encode_response, CodecError};
pub use discovery::{DiscoveredCommand, Identity, NodeInfo};
pub use error::{CommandError, ErrorCondition, ErrorType, SpecificCondition};
pub use form::{DataForm, FieldType, FormField, FormType, Note, NoteType};
pub use payload::{CommandRequest, CommandResponse};
pub use session_id::{SessionId, DEFAULT_SESSION_ID_LEN};

/// Feature namespace advertised by entities that accept ad-hoc commands.
pub const NAMESPACE: &str = "http://jabber.org/protocol/commands";

/// Feature namespace for the data forms carried by command stages.
pub const DATA_FORMS_NAMESPACE: &str = "jabber:x:data";
