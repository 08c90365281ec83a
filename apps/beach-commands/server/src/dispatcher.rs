//! Entry point for inbound command requests.
//!
//! The dispatcher is the only place where failures become wire errors: every
//! request produces exactly one [`CommandResponse`], whether it opened,
//! continued or was refused.

use std::sync::Arc;

use beach_commands_core::{
    encode_response, Action, CodecError, CommandError, CommandRequest, CommandResponse, DataForm,
    ErrorCondition, SessionId, SpecificCondition, Status,
};
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use transport_bus::BusError;

use crate::config::{ConfigError, SessionConfig};
use crate::handler::{StageReply, TransitionOutcome};
use crate::registry::CommandRegistry;
use crate::session::SessionTable;
use crate::sweeper::SessionSweeper;

const SESSION_ID_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("response channel closed")]
    Closed,
    #[error("failed to encode response: {0}")]
    Codec(#[from] CodecError),
    #[error("failed to deliver response: {0}")]
    Bus(#[from] BusError),
}

/// Where the dispatcher hands finished responses.
pub trait ResponseSink: Send + Sync {
    fn send(&self, response: CommandResponse) -> Result<(), SinkError>;
}

impl ResponseSink for mpsc::UnboundedSender<CommandResponse> {
    fn send(&self, response: CommandResponse) -> Result<(), SinkError> {
        mpsc::UnboundedSender::send(self, response).map_err(|_| SinkError::Closed)
    }
}

/// Encodes responses onto a byte channel, e.g. a socket writer.
impl ResponseSink for mpsc::UnboundedSender<bytes::Bytes> {
    fn send(&self, response: CommandResponse) -> Result<(), SinkError> {
        let payload = encode_response(&response)?;
        mpsc::UnboundedSender::send(self, payload).map_err(|_| SinkError::Closed)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: CommandRegistry,
    sessions: SessionTable,
    sweeper: SessionSweeper,
    config: SessionConfig,
}

impl Dispatcher {
    pub fn new(registry: CommandRegistry, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sessions = SessionTable::new();
        let sweeper =
            SessionSweeper::new(sessions.clone(), config.sweep_after(), config.sweep_interval);
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                registry,
                sessions,
                sweeper,
                config,
            }),
        })
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.inner.registry
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn ensure_sweeper(&self) -> bool {
        self.inner.sweeper.ensure_started()
    }

    pub fn sweeper_running(&self) -> bool {
        self.inner.sweeper.is_running()
    }

    /// Stops the sweeper. Live sessions stay answerable until dropped.
    pub async fn shutdown(&self) {
        self.inner.sweeper.shutdown().await;
        info!(
            live_sessions = self.inner.sessions.len(),
            "command dispatcher shut down"
        );
    }

    /// Dispatches `request` and hands the response to `sink`.
    pub async fn handle_inbound_request(
        &self,
        request: CommandRequest,
        sink: &dyn ResponseSink,
    ) -> Result<(), SinkError> {
        let response = self.dispatch(request).await;
        sink.send(response)
    }

    #[instrument(
        name = "command.dispatch",
        skip_all,
        fields(
            node = %request.node,
            requester = %request.from,
            session_id = request.session_id.as_ref().map(SessionId::as_str).unwrap_or(""),
        )
    )]
    pub async fn dispatch(&self, request: CommandRequest) -> CommandResponse {
        let response = CommandResponse::for_request(&request);
        let response = match request.session_id.clone() {
            None => self.open_session(request, response),
            Some(session_id) => self.continue_session(session_id, request, response).await,
        };

        if let Some(error) = &response.error {
            counter!(
                "beach_commands_request_errors_total",
                1,
                "condition" => error.condition.as_str(),
                "specific" => error.specific.map(SpecificCondition::as_str).unwrap_or("none")
            );
            debug!(error = %error, "command request refused");
        }
        response
    }

    fn open_session(
        &self,
        request: CommandRequest,
        mut response: CommandResponse,
    ) -> CommandResponse {
        let Some(command) = self.inner.registry.lookup(&request.node) else {
            return response.with_error(CommandError::new(ErrorCondition::ItemNotFound));
        };

        let session_id = match self.issue_session_id() {
            Ok(session_id) => session_id,
            Err(err) => return response.with_error(err),
        };
        let mut handler = command.instantiate();

        if !handler.has_permission(&request.from) {
            return response.with_error(CommandError::new(ErrorCondition::Forbidden));
        }

        match request.action {
            None | Some(Action::Execute) => {}
            Some(Action::Unknown) => {
                return response.with_error(CommandError::bad_request(
                    SpecificCondition::MalformedAction,
                ));
            }
            Some(_) => {
                return response.with_error(CommandError::bad_request(SpecificCondition::BadAction));
            }
        }

        if let Err(err) = handler.set_session_id(session_id.clone()) {
            warn!(error = %err, "fresh handler already carried a session id");
            return response.with_error(CommandError::internal("session id conflict"));
        }
        response.session_id = Some(session_id.clone());
        handler.record_request(request.clone());

        let node = request.node.clone();
        match handler.execute(&request.from) {
            TransitionOutcome::Executing(reply) => {
                let stage = handler.stage();
                apply_reply(&mut response, Status::Executing, reply);
                handler.record_result(response.clone());
                if let Err(err) = self.inner.sessions.put(handler) {
                    warn!(error = %err, "failed to publish new session");
                    return CommandResponse::for_request(&request)
                        .with_error(CommandError::internal("failed to open session"));
                }
                self.inner.sweeper.ensure_started();
                counter!("beach_commands_sessions_opened_total", 1, "node" => node);
                info!(session_id = %session_id, stage, "command session opened");
            }
            TransitionOutcome::Completed(reply) => {
                apply_reply(&mut response, Status::Completed, reply);
                counter!("beach_commands_sessions_completed_total", 1, "node" => node);
                debug!(session_id = %session_id, "command completed in one stage");
            }
            TransitionOutcome::Canceled(error) => {
                response.status = Some(Status::Canceled);
                response.error = error;
                counter!("beach_commands_sessions_canceled_total", 1, "node" => node);
            }
            TransitionOutcome::Error(error) => {
                response.error = Some(error);
            }
        }
        response
    }

    async fn continue_session(
        &self,
        session_id: SessionId,
        request: CommandRequest,
        mut response: CommandResponse,
    ) -> CommandResponse {
        let sessions = &self.inner.sessions;
        let Some(entry) = sessions.get(&session_id) else {
            return response.with_error(CommandError::bad_request(SpecificCondition::BadSessionid));
        };

        if entry.age() > self.inner.config.session_timeout {
            if sessions.remove_entry(&session_id, &entry) {
                let node = entry.node().to_string();
                counter!("beach_commands_sessions_expired_total", 1, "node" => node);
                info!(
                    session_id = %session_id,
                    age_secs = entry.age().as_secs(),
                    "command session expired"
                );
            }
            return response.with_error(
                CommandError::new(ErrorCondition::NotAllowed)
                    .with_specific(SpecificCondition::SessionExpired),
            );
        }

        let mut handler = entry.lock().await;
        // Removed by a concurrent request or the sweeper while we waited.
        if !sessions.is_current(&session_id, &entry) {
            return response.with_error(CommandError::bad_request(SpecificCondition::BadSessionid));
        }
        handler.record_request(request.clone());

        let action = match handler.resolve_action(request.action) {
            Ok(action) => action,
            Err(err) => return response.with_error(err),
        };
        if !handler.is_valid_action(action) {
            return response.with_error(CommandError::bad_request(SpecificCondition::BadAction));
        }

        let form = request.form.unwrap_or_else(DataForm::empty_submit);
        let outcome = match action {
            Action::Next => handler.next(&request.from, &form),
            Action::Prev => handler.prev(&request.from),
            Action::Complete => handler.complete(&request.from, &form),
            Action::Cancel => handler.cancel(&request.from),
            Action::Execute | Action::Unknown => TransitionOutcome::Error(
                CommandError::bad_request(SpecificCondition::BadAction),
            ),
        };
        let stage = handler.stage();
        debug!(action = %action, stage, "command transition finished");

        match outcome {
            TransitionOutcome::Executing(reply) => {
                apply_reply(&mut response, Status::Executing, reply);
            }
            TransitionOutcome::Completed(reply) => {
                apply_reply(&mut response, Status::Completed, reply);
                sessions.remove_entry(&session_id, &entry);
                let node = entry.node().to_string();
                counter!("beach_commands_sessions_completed_total", 1, "node" => node);
                info!(session_id = %session_id, stage, "command session completed");
            }
            TransitionOutcome::Canceled(error) => {
                response.status = Some(Status::Canceled);
                response.error = error;
                sessions.remove_entry(&session_id, &entry);
                let node = entry.node().to_string();
                counter!("beach_commands_sessions_canceled_total", 1, "node" => node);
                info!(session_id = %session_id, stage, "command session canceled");
            }
            TransitionOutcome::Error(error) => {
                response.error = Some(error);
            }
        }
        if response.status.is_some() {
            handler.record_result(response.clone());
        }
        drop(handler);
        response
    }

    fn issue_session_id(&self) -> Result<SessionId, CommandError> {
        for _ in 0..SESSION_ID_ATTEMPTS {
            let candidate = SessionId::generate(self.inner.config.session_id_len);
            if !self.inner.sessions.contains(&candidate) {
                return Ok(candidate);
            }
        }
        warn!(
            attempts = SESSION_ID_ATTEMPTS,
            "could not draw an unused session id"
        );
        Err(CommandError::internal("failed to allocate a session id"))
    }
}

/// Answer to a frame that never became a [`CommandRequest`]. `id`, `from`
/// and `to` come from whatever the transport knows about the frame.
pub fn reject_undecodable(
    id: impl Into<String>,
    from: impl Into<String>,
    to: impl Into<String>,
    detail: impl Into<String>,
) -> CommandResponse {
    let request = CommandRequest::new(String::new())
        .with_id(id)
        .from_requester(from)
        .to_owner(to);
    let error = CommandError::new(ErrorCondition::BadRequest).with_text(detail);
    counter!(
        "beach_commands_request_errors_total",
        1,
        "condition" => error.condition.as_str(),
        "specific" => "undecodable"
    );
    CommandResponse::for_request(&request).with_error(error)
}

fn apply_reply(response: &mut CommandResponse, status: Status, reply: StageReply) {
    response.status = Some(status);
    response.form = reply.form;
    response.notes = reply.notes;
    response.actions = (status == Status::Executing && !reply.actions.is_empty())
        .then_some(reply.actions);
}
