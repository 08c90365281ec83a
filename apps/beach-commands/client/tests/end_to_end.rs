use std::sync::Arc;

use beach_commands_client::{
    BusTransport, ClientError, CommandResult, HttpTransport, RemoteCommand,
};
use beach_commands_core::{AllowedAction, DataForm, SpecificCondition};
use beach_commands_server::{
    builtin::register_builtins,
    bus_ingest::start_bus_ingest,
    routes::{router, AppState},
    CommandRegistry, DiscoveryItems, Dispatcher, SessionConfig,
};
use transport_bus::{Bus, LocalBus};

const OWNER: &str = "bot@example/commands";

fn dispatcher(discovery: Arc<DiscoveryItems>) -> Dispatcher {
    let registry = CommandRegistry::with_advertiser(discovery);
    register_builtins(&registry);
    Dispatcher::new(registry, SessionConfig::default()).expect("valid config")
}

fn stage_form(result: CommandResult) -> DataForm {
    match result {
        CommandResult::Executing(stage) => stage.form.expect("stage form"),
        other => panic!("expected an executing stage, got {other:?}"),
    }
}

#[tokio::test]
async fn arith_over_the_bus() {
    let bus = Arc::new(LocalBus::new());
    let discovery = Arc::new(DiscoveryItems::new(OWNER));
    let ingest = start_bus_ingest(bus.clone() as Arc<dyn Bus>, OWNER, dispatcher(discovery))
        .expect("bind ok");

    let transport = BusTransport::new(bus.clone() as Arc<dyn Bus>, "alice@example/desk", OWNER);
    let mut command = RemoteCommand::new(transport, "alice@example/desk", OWNER, "arith");

    let form = stage_form(command.execute().await.expect("execute"));
    assert!(command.session_id().is_some());

    let err = command
        .next(form.to_submit().with_answer("a", "seven"))
        .await
        .unwrap_err();
    match err {
        ClientError::Remote(err) => assert_eq!(err.specific, Some(SpecificCondition::BadPayload)),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(command.session_id().is_some(), "session survives bad input");

    let form = stage_form(
        command
            .next(form.to_submit().with_answer("a", "7"))
            .await
            .expect("a accepted"),
    );
    let form = stage_form(
        command
            .next(form.to_submit().with_answer("b", "35"))
            .await
            .expect("b accepted"),
    );
    let actions = command.allowed_actions().expect("actions offered");
    assert!(actions.contains(AllowedAction::Complete));
    assert_eq!(actions.execute_action(), Some(AllowedAction::Complete));

    match command
        .complete(form.to_submit().with_answer("op", "+"))
        .await
        .expect("complete")
    {
        CommandResult::Completed(done) => {
            let result = done.form.expect("result form");
            assert_eq!(result.first_value("result"), Some("42"));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(command.session_id().is_none());
    assert_eq!(bus.pending_requests(), 0);
    ingest.abort();
}

#[tokio::test]
async fn survey_over_http() {
    let discovery = Arc::new(DiscoveryItems::new(OWNER));
    let app = router(AppState::new(dispatcher(discovery.clone()), discovery));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let transport = HttpTransport::new(format!("http://{addr}"));
    let commands = transport.discover_commands().await.expect("discover");
    assert!(commands
        .iter()
        .any(|c| c.node == "survey" && c.owner == OWNER));

    let mut command = RemoteCommand::new(transport, "alice@example/desk", OWNER, "survey");
    let form = stage_form(command.execute().await.expect("execute"));
    let form = stage_form(
        command
            .next(form.to_submit().with_answer("name", "Ada"))
            .await
            .expect("next"),
    );
    assert!(form.field("rating").is_some());

    let back = stage_form(command.prev().await.expect("prev"));
    assert_eq!(back.first_value("name"), Some("Ada"));

    match command.cancel().await.expect("cancel") {
        CommandResult::Canceled => {}
        other => panic!("unexpected result {other:?}"),
    }
    assert!(matches!(command.prev().await, Err(ClientError::NoSession)));

    server.abort();
}
