use beach_commands_core::{
    Action, AllowedActions, CommandError, CommandRequest, CommandResponse, DataForm, Note,
    SessionId, Status,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::transport::{CommandTransport, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("command owner answered with {0}")]
    Remote(CommandError),
    #[error("no command session in progress")]
    NoSession,
    #[error("response carried neither a status nor an error")]
    MissingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutingStage {
    pub form: Option<DataForm>,
    pub actions: AllowedActions,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedStage {
    pub form: Option<DataForm>,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Executing(ExecutingStage),
    Completed(CompletedStage),
    Canceled,
}

/// Requester-side view of one command execution on a remote owner.
pub struct RemoteCommand<T> {
    transport: T,
    node: String,
    requester: String,
    owner: String,
    session_id: Option<SessionId>,
    last_response: Option<CommandResponse>,
}

impl<T: CommandTransport> RemoteCommand<T> {
    pub fn new(
        transport: T,
        requester: impl Into<String>,
        owner: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            node: node.into(),
            requester: requester.into(),
            owner: owner.into(),
            session_id: None,
            last_response: None,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Session id issued by the owner while the command is executing.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn last_response(&self) -> Option<&CommandResponse> {
        self.last_response.as_ref()
    }

    /// Actions the owner offered with its last stage.
    pub fn allowed_actions(&self) -> Option<&AllowedActions> {
        self.last_response
            .as_ref()
            .and_then(CommandResponse::allowed_actions)
    }

    pub async fn execute(&mut self) -> Result<CommandResult, ClientError> {
        self.session_id = None;
        let request = self.request().with_action(Action::Execute);
        self.submit(request).await
    }

    pub async fn next(&mut self, form: DataForm) -> Result<CommandResult, ClientError> {
        let request = self.continuation(Action::Next)?.with_form(form);
        self.submit(request).await
    }

    pub async fn prev(&mut self) -> Result<CommandResult, ClientError> {
        let request = self.continuation(Action::Prev)?;
        self.submit(request).await
    }

    pub async fn complete(&mut self, form: DataForm) -> Result<CommandResult, ClientError> {
        let request = self.continuation(Action::Complete)?.with_form(form);
        self.submit(request).await
    }

    pub async fn cancel(&mut self) -> Result<CommandResult, ClientError> {
        let request = self.continuation(Action::Cancel)?;
        self.submit(request).await
    }

    fn request(&self) -> CommandRequest {
        CommandRequest::new(self.node.clone())
            .with_id(Uuid::new_v4().to_string())
            .from_requester(self.requester.clone())
            .to_owner(self.owner.clone())
    }

    fn continuation(&self, action: Action) -> Result<CommandRequest, ClientError> {
        let session_id = self.session_id.clone().ok_or(ClientError::NoSession)?;
        Ok(self.request().with_session(session_id).with_action(action))
    }

    async fn submit(&mut self, request: CommandRequest) -> Result<CommandResult, ClientError> {
        let action = request.action;
        let response = self.transport.submit(request).await?;
        debug!(
            node = %self.node,
            action = ?action,
            status = ?response.status,
            "command response received"
        );
        self.last_response = Some(response.clone());

        if response.status.is_some_and(Status::is_terminal) {
            self.session_id = None;
        } else if let Some(session_id) = response.session_id.clone() {
            if response.error.is_none() {
                self.session_id = Some(session_id);
            }
        }

        if let Some(error) = response.error {
            return Err(ClientError::Remote(error));
        }
        match response.status {
            Some(Status::Executing) => Ok(CommandResult::Executing(ExecutingStage {
                form: response.form,
                actions: response.actions.unwrap_or_default(),
                notes: response.notes,
            })),
            Some(Status::Completed) => Ok(CommandResult::Completed(CompletedStage {
                form: response.form,
                notes: response.notes,
            })),
            Some(Status::Canceled) => Ok(CommandResult::Canceled),
            None => Err(ClientError::MissingStatus),
        }
    }
}
