use serde::{Deserialize, Serialize};

use crate::{Action, AllowedActions, CommandError, DataForm, Note, SessionId, Status};

/// An inbound command request. A request without `session_id` opens a new
/// execution of `node`; one with a session id continues it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Correlation id echoed by the response.
    #[serde(default)]
    pub id: String,
    /// Identity of the requester.
    #[serde(default)]
    pub from: String,
    /// Entity hosting the command.
    #[serde(default)]
    pub to: String,
    pub node: String,
    #[serde(default, rename = "sessionid", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<DataForm>,
}

impl CommandRequest {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            from: String::new(),
            to: String::new(),
            node: node.into(),
            session_id: None,
            action: None,
            form: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn from_requester(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn to_owner(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_form(mut self, form: DataForm) -> Self {
        self.form = Some(form);
        self
    }
}

/// Response to a [`CommandRequest`]. A response either carries a `status`
/// or an `error`; an error response for a canceled session carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub node: String,
    #[serde(default, rename = "sessionid", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<AllowedActions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<DataForm>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResponse {
    /// Empty response addressed back to the requester of `request`.
    pub fn for_request(request: &CommandRequest) -> Self {
        Self {
            id: request.id.clone(),
            from: request.to.clone(),
            to: request.from.clone(),
            node: request.node.clone(),
            session_id: request.session_id.clone(),
            status: None,
            actions: None,
            form: None,
            notes: Vec::new(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: CommandError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_executing(&self) -> bool {
        self.status == Some(Status::Executing) && self.error.is_none()
    }

    pub fn allowed_actions(&self) -> Option<&AllowedActions> {
        self.actions.as_ref()
    }
}
