//! Per-invocation command state machine.
//!
//! A [`CommandHandler`] owns one instance of a command implementation and
//! walks it through `Setup -> Executing -> Completed | Canceled`. The stage
//! counter and the allowed actions live here, so command implementations only
//! see a [`StageContext`] and answer with a [`StageReply`].

use beach_commands_core::{
    Action, AllowedAction, AllowedActions, CommandError, CommandRequest, CommandResponse, DataForm,
    ErrorCondition, Note, SessionId, SpecificCondition, Status,
};
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::registry::CommandDescriptor;

/// What a command implementation sees of the invocation it is serving.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub requester: &'a str,
    pub session_id: Option<&'a SessionId>,
    /// Stage being produced, already adjusted for the requested transition.
    pub stage: u32,
    pub history: &'a SessionHistory,
}

/// Requests and results exchanged over one session, oldest first.
///
/// The request being served is already recorded when a stage runs, so
/// [`SessionHistory::last_request`] is the current request and
/// [`SessionHistory::previous_request`] the one before it.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    requests: Vec<CommandRequest>,
    results: Vec<CommandResponse>,
}

impl SessionHistory {
    pub fn requests(&self) -> &[CommandRequest] {
        &self.requests
    }

    pub fn results(&self) -> &[CommandResponse] {
        &self.results
    }

    pub fn last_request(&self) -> Option<&CommandRequest> {
        self.requests.last()
    }

    pub fn previous_request(&self) -> Option<&CommandRequest> {
        self.requests.iter().rev().nth(1)
    }

    pub fn last_result(&self) -> Option<&CommandResponse> {
        self.results.last()
    }

    /// Notes sent with the last result.
    pub fn notes(&self) -> &[Note] {
        self.last_result()
            .map(|result| result.notes.as_slice())
            .unwrap_or_default()
    }
}

/// A command's answer to one transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReply {
    pub form: Option<DataForm>,
    pub notes: Vec<Note>,
    pub actions: AllowedActions,
    pub finished: bool,
}

impl StageReply {
    /// A stage that waits for the requester, offering `actions`.
    pub fn stage(actions: AllowedActions) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    /// The command has nothing more to ask.
    pub fn finished() -> Self {
        Self {
            finished: true,
            ..Self::default()
        }
    }

    pub fn with_form(mut self, form: DataForm) -> Self {
        self.form = Some(form);
        self
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.notes.push(note);
        self
    }
}

/// A command that does all of its work in one round trip.
pub trait SingleStageCommand: Send {
    fn has_permission(&self, _requester: &str) -> bool {
        true
    }

    fn execute(&mut self, ctx: &StageContext<'_>) -> Result<StageReply, CommandError>;
}

/// A command that walks the requester through several stages.
pub trait MultiStageCommand: Send {
    fn has_permission(&self, _requester: &str) -> bool {
        true
    }

    fn execute(&mut self, ctx: &StageContext<'_>) -> Result<StageReply, CommandError>;

    fn next(&mut self, ctx: &StageContext<'_>, form: &DataForm)
        -> Result<StageReply, CommandError>;

    fn prev(&mut self, ctx: &StageContext<'_>) -> Result<StageReply, CommandError>;

    fn complete(
        &mut self,
        ctx: &StageContext<'_>,
        form: &DataForm,
    ) -> Result<StageReply, CommandError>;

    /// Releases whatever the command collected so far.
    fn cancel(&mut self, _ctx: &StageContext<'_>) {}
}

pub enum HandlerKind {
    SingleStage(Box<dyn SingleStageCommand>),
    MultiStage(Box<dyn MultiStageCommand>),
}

impl HandlerKind {
    pub fn single(command: impl SingleStageCommand + 'static) -> Self {
        HandlerKind::SingleStage(Box::new(command))
    }

    pub fn multi(command: impl MultiStageCommand + 'static) -> Self {
        HandlerKind::MultiStage(Box::new(command))
    }
}

impl std::fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::SingleStage(_) => f.write_str("SingleStage"),
            HandlerKind::MultiStage(_) => f.write_str("MultiStage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Setup,
    Executing,
    Completed,
    Canceled,
}

impl HandlerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandlerState::Completed | HandlerState::Canceled)
    }
}

#[derive(Debug)]
pub enum TransitionOutcome {
    Executing(StageReply),
    Completed(StageReply),
    /// The session is over. Carries the error when a failure forced it.
    Canceled(Option<CommandError>),
    /// The transition was refused; the handler is unchanged.
    Error(CommandError),
}

impl TransitionOutcome {
    pub fn status(&self) -> Option<Status> {
        match self {
            TransitionOutcome::Executing(_) => Some(Status::Executing),
            TransitionOutcome::Completed(_) => Some(Status::Completed),
            TransitionOutcome::Canceled(_) => Some(Status::Canceled),
            TransitionOutcome::Error(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(Status::is_terminal)
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("session id already assigned ({current})")]
    SessionIdAlreadyAssigned { current: SessionId },
}

pub struct CommandHandler {
    descriptor: CommandDescriptor,
    kind: HandlerKind,
    session_id: Option<SessionId>,
    stage: u32,
    created_at: Instant,
    state: HandlerState,
    actions: AllowedActions,
    history: SessionHistory,
}

impl CommandHandler {
    pub fn new(descriptor: CommandDescriptor, kind: HandlerKind) -> Self {
        Self {
            descriptor,
            kind,
            session_id: None,
            stage: 0,
            created_at: Instant::now(),
            state: HandlerState::Setup,
            actions: AllowedActions::new(),
            history: SessionHistory::default(),
        }
    }

    pub fn node(&self) -> &str {
        &self.descriptor.node
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Assigns the session id. Assigning the same id again is a no-op.
    pub fn set_session_id(&mut self, session_id: SessionId) -> Result<(), HandlerError> {
        match &self.session_id {
            Some(current) if *current != session_id => Err(HandlerError::SessionIdAlreadyAssigned {
                current: current.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.session_id = Some(session_id);
                Ok(())
            }
        }
    }

    pub fn stage(&self) -> u32 {
        self.stage
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn status(&self) -> Status {
        match self.state {
            HandlerState::Setup | HandlerState::Executing => Status::Executing,
            HandlerState::Completed => Status::Completed,
            HandlerState::Canceled => Status::Canceled,
        }
    }

    pub fn allowed_actions(&self) -> &AllowedActions {
        &self.actions
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn record_request(&mut self, request: CommandRequest) {
        self.history.requests.push(request);
    }

    pub fn record_result(&mut self, result: CommandResponse) {
        self.history.results.push(result);
    }

    pub fn is_single_stage(&self) -> bool {
        matches!(self.kind, HandlerKind::SingleStage(_))
    }

    pub fn has_permission(&self, requester: &str) -> bool {
        match &self.kind {
            HandlerKind::SingleStage(command) => command.has_permission(requester),
            HandlerKind::MultiStage(command) => command.has_permission(requester),
        }
    }

    /// `cancel` is always legal, `execute` only when the stage has a default
    /// action, anything else only when the stage offers it.
    pub fn is_valid_action(&self, action: Action) -> bool {
        match action {
            Action::Cancel => true,
            Action::Execute => self.actions.execute_action().is_some(),
            Action::Prev | Action::Next | Action::Complete => action
                .allowed_action()
                .is_some_and(|allowed| self.actions.contains(allowed)),
            Action::Unknown => false,
        }
    }

    /// Maps the action named by a continuation onto the transition to run.
    /// An absent action or `execute` means the stage's default.
    pub fn resolve_action(&self, requested: Option<Action>) -> Result<Action, CommandError> {
        match requested {
            None | Some(Action::Execute) => self
                .actions
                .execute_action()
                .map(Action::from)
                .ok_or_else(|| CommandError::bad_request(SpecificCondition::BadAction)),
            Some(Action::Unknown) => Err(CommandError::bad_request(
                SpecificCondition::MalformedAction,
            )),
            Some(action) => Ok(action),
        }
    }

    pub fn execute(&mut self, requester: &str) -> TransitionOutcome {
        if self.state != HandlerState::Setup {
            return TransitionOutcome::Error(bad_action("command already executed"));
        }
        let previous = self.stage;
        self.stage += 1;
        let ctx = stage_context(requester, &self.session_id, &self.history, self.stage);
        let result = match &mut self.kind {
            HandlerKind::SingleStage(command) => command
                .execute(&ctx)
                .map(|reply| StageReply {
                    finished: true,
                    ..reply
                }),
            HandlerKind::MultiStage(command) => command.execute(&ctx),
        };
        self.settle(result, previous, false, requester)
    }

    pub fn next(&mut self, requester: &str, form: &DataForm) -> TransitionOutcome {
        if let Err(err) = self.ensure_transition(AllowedAction::Next) {
            return TransitionOutcome::Error(err);
        }
        let previous = self.stage;
        self.stage += 1;
        let ctx = stage_context(requester, &self.session_id, &self.history, self.stage);
        let result = match &mut self.kind {
            HandlerKind::MultiStage(command) => command.next(&ctx, form),
            HandlerKind::SingleStage(_) => Err(single_stage_rejection()),
        };
        self.settle(result, previous, false, requester)
    }

    pub fn prev(&mut self, requester: &str) -> TransitionOutcome {
        if let Err(err) = self.ensure_transition(AllowedAction::Prev) {
            return TransitionOutcome::Error(err);
        }
        if self.stage <= 1 {
            return TransitionOutcome::Error(bad_action("no earlier stage"));
        }
        let previous = self.stage;
        self.stage -= 1;
        let ctx = stage_context(requester, &self.session_id, &self.history, self.stage);
        let result = match &mut self.kind {
            HandlerKind::MultiStage(command) => command.prev(&ctx),
            HandlerKind::SingleStage(_) => Err(single_stage_rejection()),
        };
        self.settle(result, previous, false, requester)
    }

    pub fn complete(&mut self, requester: &str, form: &DataForm) -> TransitionOutcome {
        if let Err(err) = self.ensure_transition(AllowedAction::Complete) {
            return TransitionOutcome::Error(err);
        }
        let previous = self.stage;
        self.stage += 1;
        let ctx = stage_context(requester, &self.session_id, &self.history, self.stage);
        let result = match &mut self.kind {
            HandlerKind::MultiStage(command) => command.complete(&ctx, form),
            HandlerKind::SingleStage(_) => Err(single_stage_rejection()),
        };
        self.settle(result, previous, true, requester)
    }

    pub fn cancel(&mut self, requester: &str) -> TransitionOutcome {
        if self.state.is_terminal() {
            return TransitionOutcome::Error(bad_action("command already finished"));
        }
        if let HandlerKind::MultiStage(command) = &mut self.kind {
            let ctx = stage_context(requester, &self.session_id, &self.history, self.stage);
            command.cancel(&ctx);
        }
        self.state = HandlerState::Canceled;
        self.actions = AllowedActions::new();
        debug!(node = %self.descriptor.node, stage = self.stage, "command canceled");
        TransitionOutcome::Canceled(None)
    }

    fn ensure_transition(&self, action: AllowedAction) -> Result<(), CommandError> {
        if self.is_single_stage() {
            return Err(single_stage_rejection());
        }
        if self.state != HandlerState::Executing {
            return Err(bad_action("command is not executing"));
        }
        if !self.actions.contains(action) {
            return Err(CommandError::bad_request(SpecificCondition::BadAction));
        }
        Ok(())
    }

    fn settle(
        &mut self,
        result: Result<StageReply, CommandError>,
        previous_stage: u32,
        completing: bool,
        requester: &str,
    ) -> TransitionOutcome {
        match result {
            Ok(reply) if completing || reply.finished => {
                self.state = HandlerState::Completed;
                self.actions = AllowedActions::new();
                TransitionOutcome::Completed(reply)
            }
            Ok(reply) => {
                self.state = HandlerState::Executing;
                self.actions = reply.actions.clone();
                TransitionOutcome::Executing(reply)
            }
            Err(err) if err.is_cancellation() => {
                if let HandlerKind::MultiStage(command) = &mut self.kind {
                    let ctx = stage_context(requester, &self.session_id, &self.history, self.stage);
                    command.cancel(&ctx);
                }
                self.state = HandlerState::Canceled;
                self.actions = AllowedActions::new();
                TransitionOutcome::Canceled(Some(err))
            }
            Err(err) => {
                self.stage = previous_stage;
                TransitionOutcome::Error(err)
            }
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("node", &self.descriptor.node)
            .field("kind", &self.kind)
            .field("session_id", &self.session_id)
            .field("stage", &self.stage)
            .field("state", &self.state)
            .finish()
    }
}

fn bad_action(text: &str) -> CommandError {
    CommandError::bad_request(SpecificCondition::BadAction).with_text(text)
}

fn single_stage_rejection() -> CommandError {
    CommandError::new(ErrorCondition::BadRequest)
        .with_text("single-stage command has no further stages")
}

fn stage_context<'a>(
    requester: &'a str,
    session_id: &'a Option<SessionId>,
    history: &'a SessionHistory,
    stage: u32,
) -> StageContext<'a> {
    StageContext {
        requester,
        session_id: session_id.as_ref(),
        stage,
        history,
    }
}
