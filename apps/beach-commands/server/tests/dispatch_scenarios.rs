use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beach_commands_core::{
    Action, AllowedAction, AllowedActions, CommandError, CommandRequest, CommandResponse, DataForm,
    ErrorCondition, ErrorType, NextStage, Note, PreviousStage, SessionId, SpecificCondition,
    Status,
};
use beach_commands_server::{
    builtin::register_builtins, CommandDescriptor, CommandRegistry, Dispatcher, HandlerKind,
    MultiStageCommand, SessionConfig, StageContext, StageReply,
};

fn dispatcher_with(registry: CommandRegistry) -> Dispatcher {
    register_builtins(&registry);
    Dispatcher::new(registry, SessionConfig::default()).expect("valid config")
}

fn dispatcher() -> Dispatcher {
    dispatcher_with(CommandRegistry::new())
}

fn error_of(response: &CommandResponse) -> (ErrorCondition, Option<SpecificCondition>) {
    let error = response.error.as_ref().expect("error response");
    (error.condition, error.specific)
}

async fn open(dispatcher: &Dispatcher, node: &str) -> SessionId {
    let response = dispatcher
        .dispatch(CommandRequest::new(node).from_requester("alice@example"))
        .await;
    assert_eq!(response.status, Some(Status::Executing), "{response:?}");
    response.session_id.expect("session id issued")
}

fn continuation(node: &str, session_id: &SessionId) -> CommandRequest {
    CommandRequest::new(node)
        .from_requester("alice@example")
        .with_session(session_id.clone())
}

async fn stage_of(dispatcher: &Dispatcher, session_id: &SessionId) -> u32 {
    let entry = dispatcher.sessions().get(session_id).expect("session alive");
    let stage = entry.lock().await.stage();
    stage
}

#[tokio::test]
async fn single_stage_command_completes_without_a_session() {
    let dispatcher = dispatcher();
    let response = dispatcher
        .dispatch(CommandRequest::new("ping").with_id("r1").from_requester("alice@example"))
        .await;

    assert_eq!(response.id, "r1");
    assert_eq!(response.to, "alice@example");
    assert_eq!(response.status, Some(Status::Completed));
    assert!(response.error.is_none());
    assert_eq!(response.notes[0].text, "pong");
    assert!(dispatcher.sessions().is_empty());
    assert!(!dispatcher.sweeper_running());
}

#[tokio::test]
async fn two_stage_survey_can_complete_from_the_first_stage() {
    let dispatcher = dispatcher();
    let first = dispatcher
        .dispatch(CommandRequest::new("survey").from_requester("alice@example"))
        .await;
    assert_eq!(first.status, Some(Status::Executing));
    let session_id = first.session_id.clone().expect("session id");
    assert_eq!(session_id.as_str().len(), 15);
    let actions = first.actions.expect("actions offered");
    let offered: Vec<_> = actions.iter().collect();
    assert_eq!(offered, vec![AllowedAction::Next, AllowedAction::Complete]);
    assert!(dispatcher.sessions().contains(&session_id));

    let answer = first.form.expect("question form").to_submit().with_answer("name", "Ada");
    let done = dispatcher
        .dispatch(
            continuation("survey", &session_id)
                .with_action(Action::Complete)
                .with_form(answer),
        )
        .await;
    assert_eq!(done.status, Some(Status::Completed));
    assert_eq!(done.session_id, Some(session_id.clone()));
    assert_eq!(
        done.form.as_ref().and_then(|f| f.first_value("name")),
        Some("Ada")
    );
    assert!(!dispatcher.sessions().contains(&session_id));
}

#[tokio::test]
async fn unknown_session_is_a_bad_sessionid() {
    let dispatcher = dispatcher();
    let response = dispatcher
        .dispatch(continuation("survey", &SessionId::from("nonexistent")))
        .await;
    assert_eq!(
        error_of(&response),
        (ErrorCondition::BadRequest, Some(SpecificCondition::BadSessionid))
    );
    assert!(response.status.is_none());
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_refused_and_removed() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "survey").await;

    tokio::time::advance(Duration::from_secs(121)).await;
    let response = dispatcher
        .dispatch(continuation("survey", &session_id).with_action(Action::Next))
        .await;
    assert_eq!(
        error_of(&response),
        (ErrorCondition::NotAllowed, Some(SpecificCondition::SessionExpired))
    );
    assert!(!dispatcher.sessions().contains(&session_id));

    let again = dispatcher
        .dispatch(continuation("survey", &session_id).with_action(Action::Next))
        .await;
    assert_eq!(
        error_of(&again),
        (ErrorCondition::BadRequest, Some(SpecificCondition::BadSessionid))
    );
}

#[tokio::test(start_paused = true)]
async fn swept_session_is_a_bad_sessionid() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "survey").await;
    assert!(dispatcher.sweeper_running());

    tokio::time::advance(Duration::from_secs(241)).await;
    // Let the sweeper observe the new time.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!dispatcher.sessions().contains(&session_id));

    let response = dispatcher
        .dispatch(continuation("survey", &session_id).with_action(Action::Next))
        .await;
    assert_eq!(
        error_of(&response),
        (ErrorCondition::BadRequest, Some(SpecificCondition::BadSessionid))
    );
}

#[tokio::test(start_paused = true)]
async fn session_within_timeout_survives_the_sweeper() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "arith").await;
    tokio::time::sleep(Duration::from_secs(100)).await;

    let response = dispatcher
        .dispatch(
            continuation("arith", &session_id)
                .with_form(DataForm::empty_submit().with_answer("a", 1)),
        )
        .await;
    assert_eq!(response.status, Some(Status::Executing));
}

#[tokio::test]
async fn unknown_node_is_item_not_found() {
    let dispatcher = dispatcher();
    let response = dispatcher.dispatch(CommandRequest::new("reboot")).await;
    assert_eq!(error_of(&response), (ErrorCondition::ItemNotFound, None));
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorType::Cancel));
}

struct AdminOnly;

impl MultiStageCommand for AdminOnly {
    fn has_permission(&self, requester: &str) -> bool {
        requester.starts_with("admin@")
    }

    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::stage(AllowedActions::for_stage(
            PreviousStage::None,
            NextStage::Final,
        )))
    }

    fn next(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn prev(&mut self, _: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn complete(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }
}

#[tokio::test]
async fn permission_is_checked_before_the_action() {
    let registry = CommandRegistry::new();
    registry.register("restart", "Restart", |_: &CommandDescriptor| HandlerKind::multi(AdminOnly));
    let dispatcher = dispatcher_with(registry);

    let refused = dispatcher
        .dispatch(
            CommandRequest::new("restart")
                .from_requester("mallory@example")
                .with_action(Action::Unknown),
        )
        .await;
    assert_eq!(error_of(&refused), (ErrorCondition::Forbidden, None));
    assert!(dispatcher.sessions().is_empty());

    let allowed = dispatcher
        .dispatch(CommandRequest::new("restart").from_requester("admin@example"))
        .await;
    assert_eq!(allowed.status, Some(Status::Executing));
}

#[tokio::test]
async fn first_contact_only_accepts_execute() {
    let dispatcher = dispatcher();
    let malformed = dispatcher
        .dispatch(CommandRequest::new("ping").with_action(Action::Unknown))
        .await;
    assert_eq!(
        error_of(&malformed),
        (ErrorCondition::BadRequest, Some(SpecificCondition::MalformedAction))
    );

    for action in [Action::Next, Action::Prev, Action::Complete, Action::Cancel] {
        let response = dispatcher
            .dispatch(CommandRequest::new("survey").with_action(action))
            .await;
        assert_eq!(
            error_of(&response),
            (ErrorCondition::BadRequest, Some(SpecificCondition::BadAction)),
            "{action}"
        );
    }

    let explicit = dispatcher
        .dispatch(CommandRequest::new("ping").with_action(Action::Execute))
        .await;
    assert_eq!(explicit.status, Some(Status::Completed));
    assert!(dispatcher.sessions().is_empty());
}

#[tokio::test]
async fn continuation_rejects_unknown_and_unoffered_actions() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "survey").await;

    let malformed = dispatcher
        .dispatch(continuation("survey", &session_id).with_action(Action::Unknown))
        .await;
    assert_eq!(
        error_of(&malformed),
        (ErrorCondition::BadRequest, Some(SpecificCondition::MalformedAction))
    );

    let prev = dispatcher
        .dispatch(continuation("survey", &session_id).with_action(Action::Prev))
        .await;
    assert_eq!(
        error_of(&prev),
        (ErrorCondition::BadRequest, Some(SpecificCondition::BadAction))
    );
    assert_eq!(stage_of(&dispatcher, &session_id).await, 1);
}

/// Offers next and complete but no default action.
struct NoDefault;

impl MultiStageCommand for NoDefault {
    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::stage(
            AllowedActions::new()
                .with(AllowedAction::Next)
                .with(AllowedAction::Complete),
        ))
    }

    fn next(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn prev(&mut self, _: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn complete(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }
}

#[tokio::test]
async fn missing_default_action_is_a_bad_action() {
    let registry = CommandRegistry::new();
    registry.register("picky", "Picky", |_: &CommandDescriptor| HandlerKind::multi(NoDefault));
    let dispatcher = dispatcher_with(registry);
    let session_id = open(&dispatcher, "picky").await;

    for action in [None, Some(Action::Execute)] {
        let mut request = continuation("picky", &session_id);
        request.action = action;
        let response = dispatcher.dispatch(request).await;
        assert_eq!(
            error_of(&response),
            (ErrorCondition::BadRequest, Some(SpecificCondition::BadAction))
        );
    }
    assert!(dispatcher.sessions().contains(&session_id));

    let explicit = dispatcher
        .dispatch(continuation("picky", &session_id).with_action(Action::Next))
        .await;
    assert_eq!(explicit.status, Some(Status::Completed));
    assert!(!dispatcher.sessions().contains(&session_id));
}

#[tokio::test]
async fn default_action_drives_the_session_forward() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "arith").await;

    let second = dispatcher
        .dispatch(
            continuation("arith", &session_id)
                .with_form(DataForm::empty_submit().with_answer("a", 5)),
        )
        .await;
    assert_eq!(second.status, Some(Status::Executing));
    assert_eq!(stage_of(&dispatcher, &session_id).await, 2);

    let back = dispatcher
        .dispatch(continuation("arith", &session_id).with_action(Action::Prev))
        .await;
    assert_eq!(back.status, Some(Status::Executing));
    assert_eq!(stage_of(&dispatcher, &session_id).await, 1);
    assert_eq!(
        back.form.as_ref().and_then(|f| f.first_value("a")),
        Some("5")
    );

    for (var, value) in [("a", "5"), ("b", "8")] {
        let response = dispatcher
            .dispatch(
                continuation("arith", &session_id)
                    .with_action(Action::Execute)
                    .with_form(DataForm::empty_submit().with_answer(var, value)),
            )
            .await;
        assert_eq!(response.status, Some(Status::Executing));
    }
    assert_eq!(stage_of(&dispatcher, &session_id).await, 3);

    let done = dispatcher
        .dispatch(
            continuation("arith", &session_id)
                .with_form(DataForm::empty_submit().with_answer("op", "-")),
        )
        .await;
    assert_eq!(done.status, Some(Status::Completed));
    assert_eq!(
        done.form.as_ref().and_then(|f| f.first_value("result")),
        Some("-3")
    );
    assert!(dispatcher.sessions().is_empty());
}

#[tokio::test]
async fn validation_error_leaves_the_session_alive() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "arith").await;

    let refused = dispatcher
        .dispatch(
            continuation("arith", &session_id)
                .with_action(Action::Next)
                .with_form(DataForm::empty_submit().with_answer("a", "forty")),
        )
        .await;
    assert_eq!(
        error_of(&refused),
        (ErrorCondition::BadRequest, Some(SpecificCondition::BadPayload))
    );
    assert!(refused.status.is_none());
    assert!(dispatcher.sessions().contains(&session_id));
    assert_eq!(stage_of(&dispatcher, &session_id).await, 1);

    let retried = dispatcher
        .dispatch(
            continuation("arith", &session_id)
                .with_action(Action::Next)
                .with_form(DataForm::empty_submit().with_answer("a", "40")),
        )
        .await;
    assert_eq!(retried.status, Some(Status::Executing));
}

#[tokio::test]
async fn cancel_removes_the_session() {
    let dispatcher = dispatcher();
    let session_id = open(&dispatcher, "survey").await;
    let response = dispatcher
        .dispatch(continuation("survey", &session_id).with_action(Action::Cancel))
        .await;
    assert_eq!(response.status, Some(Status::Canceled));
    assert!(response.error.is_none());
    assert!(!dispatcher.sessions().contains(&session_id));
}

/// Gives up with a cancel-type error on the second stage.
struct Fragile;

impl MultiStageCommand for Fragile {
    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::stage(AllowedActions::for_stage(
            PreviousStage::None,
            NextStage::NonFinal,
        )))
    }

    fn next(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Err(CommandError::new(ErrorCondition::ServiceUnavailable).with_text("backend gone"))
    }

    fn prev(&mut self, _: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn complete(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }
}

#[tokio::test]
async fn cancellation_class_error_cancels_the_session() {
    let registry = CommandRegistry::new();
    registry.register("fragile", "Fragile", |_: &CommandDescriptor| HandlerKind::multi(Fragile));
    let dispatcher = dispatcher_with(registry);
    let session_id = open(&dispatcher, "fragile").await;

    let response = dispatcher
        .dispatch(continuation("fragile", &session_id).with_action(Action::Next))
        .await;
    assert_eq!(response.status, Some(Status::Canceled));
    assert_eq!(error_of(&response), (ErrorCondition::ServiceUnavailable, None));
    assert!(!dispatcher.sessions().contains(&session_id));
}

#[tokio::test]
async fn re_registration_does_not_disturb_live_sessions() {
    let registry = CommandRegistry::new();
    let dispatcher = dispatcher_with(registry.clone());
    let session_id = open(&dispatcher, "survey").await;

    registry.register("survey", "Ping in disguise", |_: &CommandDescriptor| {
        HandlerKind::single(beach_commands_server::builtin::Ping)
    });
    let response = dispatcher
        .dispatch(
            continuation("survey", &session_id)
                .with_form(DataForm::empty_submit().with_answer("name", "Ada")),
        )
        .await;
    assert_eq!(response.status, Some(Status::Executing));

    let fresh = dispatcher.dispatch(CommandRequest::new("survey")).await;
    assert_eq!(fresh.status, Some(Status::Completed));
}

/// Fails its very first stage with `error`.
struct FailsToStart {
    error: CommandError,
    canceled: Arc<AtomicBool>,
}

impl MultiStageCommand for FailsToStart {
    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Err(self.error.clone())
    }

    fn next(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn prev(&mut self, _: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn complete(&mut self, _: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn cancel(&mut self, _: &StageContext<'_>) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

fn failing_dispatcher(error: CommandError) -> (Dispatcher, Arc<AtomicBool>) {
    let canceled = Arc::new(AtomicBool::new(false));
    let flag = canceled.clone();
    let registry = CommandRegistry::new();
    registry.register("doomed", "Doomed", move |_: &CommandDescriptor| {
        HandlerKind::multi(FailsToStart {
            error: error.clone(),
            canceled: flag.clone(),
        })
    });
    (dispatcher_with(registry), canceled)
}

#[tokio::test]
async fn first_stage_cancellation_error_opens_no_session() {
    let (dispatcher, canceled) = failing_dispatcher(
        CommandError::new(ErrorCondition::ServiceUnavailable).with_text("backend gone"),
    );
    let response = dispatcher
        .dispatch(CommandRequest::new("doomed").from_requester("alice@example"))
        .await;

    assert_eq!(response.status, Some(Status::Canceled));
    assert_eq!(error_of(&response), (ErrorCondition::ServiceUnavailable, None));
    assert!(canceled.load(Ordering::SeqCst));
    assert!(dispatcher.sessions().is_empty());
    assert!(!dispatcher.sweeper_running());
}

#[tokio::test]
async fn first_stage_validation_error_opens_no_session() {
    let (dispatcher, canceled) = failing_dispatcher(CommandError::bad_payload("not today"));
    let response = dispatcher
        .dispatch(CommandRequest::new("doomed").from_requester("alice@example"))
        .await;

    assert!(response.status.is_none());
    assert_eq!(
        error_of(&response),
        (ErrorCondition::BadRequest, Some(SpecificCondition::BadPayload))
    );
    assert!(!canceled.load(Ordering::SeqCst));
    assert!(dispatcher.sessions().is_empty());
    assert!(!dispatcher.sweeper_running());
}

/// Asks for a colour, then a size, and completes with both read back from
/// the session history rather than from its own fields.
struct Recap;

impl MultiStageCommand for Recap {
    fn execute(&mut self, _ctx: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::stage(AllowedActions::for_stage(
            PreviousStage::None,
            NextStage::NonFinal,
        ))
        .with_note(Note::info("pick a colour")))
    }

    fn next(&mut self, ctx: &StageContext<'_>, _: &DataForm) -> Result<StageReply, CommandError> {
        let asked = ctx.history.notes().first().map(|note| note.text.clone());
        Ok(StageReply::stage(AllowedActions::for_stage(
            PreviousStage::Exists,
            NextStage::Final,
        ))
        .with_note(Note::info(format!("answered {}", asked.unwrap_or_default()))))
    }

    fn prev(&mut self, _: &StageContext<'_>) -> Result<StageReply, CommandError> {
        Ok(StageReply::finished())
    }

    fn complete(
        &mut self,
        ctx: &StageContext<'_>,
        form: &DataForm,
    ) -> Result<StageReply, CommandError> {
        let colour = ctx
            .history
            .previous_request()
            .and_then(|request| request.form.as_ref())
            .and_then(|form| form.first_value("colour"))
            .ok_or_else(|| CommandError::bad_payload("no colour on record"))?;
        let size = form.first_value("size").unwrap_or("?");
        Ok(StageReply::finished().with_note(Note::info(format!("{size} {colour}"))))
    }
}

#[tokio::test]
async fn stages_read_earlier_submissions_from_the_history() {
    let registry = CommandRegistry::new();
    registry.register("recap", "Recap", |_: &CommandDescriptor| HandlerKind::multi(Recap));
    let dispatcher = dispatcher_with(registry);
    let session_id = open(&dispatcher, "recap").await;

    let second = dispatcher
        .dispatch(
            continuation("recap", &session_id)
                .with_action(Action::Next)
                .with_form(DataForm::empty_submit().with_answer("colour", "teal")),
        )
        .await;
    assert_eq!(second.status, Some(Status::Executing));
    assert_eq!(second.notes[0].text, "answered pick a colour");

    {
        let entry = dispatcher.sessions().get(&session_id).expect("session alive");
        let handler = entry.lock().await;
        assert_eq!(handler.history().requests().len(), 2);
        assert_eq!(handler.history().results().len(), 2);
        assert_eq!(
            handler.history().last_result().and_then(|r| r.status),
            Some(Status::Executing)
        );
    }

    let done = dispatcher
        .dispatch(
            continuation("recap", &session_id)
                .with_action(Action::Complete)
                .with_form(DataForm::empty_submit().with_answer("size", "large")),
        )
        .await;
    assert_eq!(done.status, Some(Status::Completed));
    assert_eq!(done.notes[0].text, "large teal");
}
