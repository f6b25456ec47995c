//! End-to-end session tests against the in-process mock backend.
//!
//! These cover the full path from builder to resolved outcome:
//! - submission serializes the descriptor and computes the request timeout
//! - resolution classifies the reply once and caches it
//! - transport failures are kept apart from backend-reported errors

use automan_client::client::OutcomeHandle;
use automan_client::server::supervisor::SupervisorState;
use automan_client::testing::{
    confident_estimate, confident_radio, over_budget, task_kind, MockBackend, MockLauncher,
    MockReply,
};
use automan_client::types::protocol::{RegistrationStatus, TaskPayload, TaskResponse};
use automan_client::{
    Client, ClientConfig, EstimateBuilder, Error, OutcomeType, RadioBuilder, RadioOption,
    ServerSupervisor, TaskKind,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn adapter() -> HashMap<String, String> {
    HashMap::from([
        ("access_id".to_string(), "id".to_string()),
        ("access_key".to_string(), "key".to_string()),
        ("type".to_string(), "MTurk".to_string()),
        ("sandbox_mode".to_string(), "true".to_string()),
    ])
}

fn in_process(mock: &MockBackend) -> Client {
    Client::from_parts(mock.connect(), Arc::new(ServerSupervisor::external(50051)))
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_until_closed(client: &Client) {
    for _ in 0..100 {
        if client.channel().is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("channel never closed");
}

#[tokio::test]
async fn test_confident_estimate_end_to_end() {
    let mock = MockBackend::new(|_| confident_estimate(10.0, 14.0, 12.0, 0.92, 1.10).into());
    let client = in_process(&mock);

    let handle = client
        .estimate(
            EstimateBuilder::new("How many cars are in this parking lot?", 1.50)
                .confidence(0.9)
                .question_timeout_multiplier(5)
                .initial_worker_timeout_secs(60),
        )
        .await
        .unwrap();

    assert!(handle.is_confident(None).await.unwrap());
    let outcome = handle.resolve(None).await.unwrap();
    assert_eq!(outcome.to_string(), "low=10.000000 high=14.000000 est=12.000000");
    assert_eq!(outcome.confidence(), 0.92);
    assert_eq!(outcome.cost(), 1.10);

    let tasks = mock.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].timeout, 300);
    let TaskPayload::Estimate(task) = &tasks[0].task else {
        panic!("expected an estimate task");
    };
    assert_eq!(task.budget, 1.50);
    assert_eq!(task.confidence, 0.9);
}

#[tokio::test]
async fn test_radio_over_budget_end_to_end() {
    let mock = MockBackend::new(|task| over_budget(task_kind(task), 2.00, 1.50).into());
    let client = in_process(&mock);

    let handle = client
        .radio(
            RadioBuilder::new("Choose the matching image", 1.50)
                .option("choice1", RadioOption::label("a"))
                .option("choice2", RadioOption::label("b"))
                .option("choice3", RadioOption::label("c"))
                .option("choice4", RadioOption::label("d")),
        )
        .await
        .unwrap();

    assert!(handle.is_over_budget(None).await.unwrap());
    assert!(!handle.is_confident(None).await.unwrap());
    assert!(!handle.is_low_confidence(None).await.unwrap());

    let outcome = handle.resolve(None).await.unwrap();
    assert_eq!(outcome.need(), 2.00);
    assert_eq!(outcome.have(), 1.50);
    assert!(outcome.answer().is_none());
    assert_eq!(outcome.to_string(), "need=2.000000 have=1.500000");
    assert_eq!(handle.outcome_type(), Some(OutcomeType::OverBudget));

    let TaskPayload::Radio(task) = &mock.tasks()[0].task else {
        panic!("expected a radio task");
    };
    assert_eq!(task.options.as_ref().unwrap().single.len(), 4);
}

#[tokio::test]
async fn test_resolution_is_memoized() {
    let mock = MockBackend::new(|_| confident_radio("choice2", 0.96, 0.60).into());
    let client = in_process(&mock);

    let handle = client
        .radio(
            RadioBuilder::new("Pick one", 1.0)
                .option("choice1", RadioOption::label("a"))
                .option("choice2", RadioOption::label("b")),
        )
        .await
        .unwrap();
    assert!(!handle.is_done());
    assert_eq!(handle.outcome_type(), None);

    let first = handle.resolve(None).await.unwrap();
    let second = handle.resolve(Some(Duration::from_millis(1))).await.unwrap();
    assert_eq!(first, second);
    assert!(handle.is_done());
    assert_eq!(mock.submissions(), 1);
    assert_eq!(client.channel().in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_resolvers_share_one_result() {
    let mock = MockBackend::new(|_| {
        MockReply::Delayed(
            Duration::from_millis(50),
            confident_estimate(1.0, 3.0, 2.0, 0.95, 0.5),
        )
    });
    let client = in_process(&mock);
    let handle = client
        .estimate(EstimateBuilder::new("How tall?", 1.0))
        .await
        .unwrap();

    let (a, b, c) = tokio::join!(
        handle.resolve(None),
        handle.resolve(None),
        handle.is_confident(None)
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert!(c.unwrap());
}

#[tokio::test]
async fn test_timeout_leaves_handle_pending() {
    let mock = MockBackend::new(|_| {
        MockReply::Delayed(
            Duration::from_millis(300),
            confident_estimate(10.0, 14.0, 12.0, 0.92, 1.10),
        )
    });
    let client = in_process(&mock);
    let handle = client
        .estimate(EstimateBuilder::new("How many cars?", 1.5))
        .await
        .unwrap();

    let err = handle
        .resolve(Some(Duration::from_millis(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_retryable());
    assert!(!handle.is_done());

    assert!(handle.is_confident(None).await.unwrap());
    assert!(handle.is_done());
}

#[tokio::test]
async fn test_backend_error_is_terminal_and_cached() {
    let mock = MockBackend::new(|_| TaskResponse::exception("worker pool crashed").into());
    let client = in_process(&mock);
    let handle = client
        .estimate(EstimateBuilder::new("How many?", 1.0))
        .await
        .unwrap();

    let err = handle.resolve(None).await.unwrap_err();
    assert_eq!(err.to_string(), "EXCEPTION: worker pool crashed");
    assert!(handle.is_done());
    assert_eq!(handle.resolve(None).await.unwrap_err(), err);

    // Resolution failures never touch the backend process.
    assert_eq!(client.supervisor().state(), SupervisorState::Ready);
}

#[tokio::test]
async fn test_closed_channel_cancels_pending_handles() {
    let mock = MockBackend::new(|_| MockReply::Withhold);
    let client = in_process(&mock);
    let handle: OutcomeHandle = client
        .estimate(EstimateBuilder::new("How many?", 1.0))
        .await
        .unwrap();

    mock.disconnect();
    let err = handle.resolve(None).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert!(!err.is_retryable());
    assert!(handle.is_done());
}

#[tokio::test]
async fn test_invalid_task_fails_before_any_submission() {
    let mock = MockBackend::new(|_| TaskResponse::error("unreachable").into());
    let client = in_process(&mock);

    let err = client
        .radio(
            RadioBuilder::new("Pick", 1.0)
                .option("a", RadioOption::label("plain"))
                .option("b", RadioOption::with_image("pic", "https://example.com/b.png")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
    assert!(err.is_local());

    let err = client
        .estimate(EstimateBuilder::new("   ", 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
    assert_eq!(mock.submissions(), 0);
}

#[tokio::test]
async fn test_connect_spawns_backend_and_registers() {
    let port = free_port().await;
    let mock = MockBackend::new(|_| confident_estimate(10.0, 14.0, 12.0, 0.92, 1.10).into());
    let launcher = Arc::new(MockLauncher::new().with_on_launch(mock.launch_hook()));
    let config = ClientConfig {
        port,
        suppress_output: "stdout".to_string(),
        retry_interval_ms: 10,
        ..ClientConfig::default()
    };

    let client = Client::connect_with_launcher(adapter(), config, launcher.clone())
        .await
        .unwrap();
    assert_eq!(launcher.launches(), 1);
    assert_eq!(
        launcher.last_output(),
        Some(automan_client::OutputPolicy::SuppressStdout)
    );
    assert_eq!(client.supervisor().state(), SupervisorState::Ready);

    let registrations = mock.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0]["adptrType"], "MTURK");
    assert_eq!(registrations[0]["accessId"], "id");
    assert_eq!(registrations[0]["adapterOptions"]["sandbox_mode"], "true");

    let handle = client
        .estimate(EstimateBuilder::new("How many cars?", 1.5))
        .await
        .unwrap();
    assert!(handle.is_confident(None).await.unwrap());

    client.close().await.unwrap();
    assert_eq!(mock.kill_requests(), 1);
    assert_eq!(launcher.graceful_exits(), 1);
    assert_eq!(launcher.kills(), 0);
}

#[tokio::test]
async fn test_connect_to_running_backend_spawns_nothing() {
    let mock = MockBackend::new(|_| TaskResponse::error("unused").into());
    let port = mock.listen(0).await.unwrap();
    let launcher = Arc::new(MockLauncher::new());
    let config = ClientConfig {
        port,
        ..ClientConfig::default()
    };

    let client = Client::connect_with_launcher(adapter(), config, launcher.clone())
        .await
        .unwrap();
    assert_eq!(launcher.launches(), 0);
    drop(client);
    assert_eq!(launcher.kills(), 0);
}

#[tokio::test]
async fn test_rejected_registration_is_adapter_error() {
    let port = free_port().await;
    let mock = MockBackend::new(|_| TaskResponse::error("unused").into())
        .with_registration(RegistrationStatus::Failed);
    let launcher = Arc::new(MockLauncher::new().with_on_launch(mock.launch_hook()));
    let config = ClientConfig {
        port,
        retry_interval_ms: 10,
        ..ClientConfig::default()
    };

    let err = Client::connect_with_launcher(adapter(), config, launcher.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter(_)));
    // The supervisor went with the failed session and took the process with it.
    assert_eq!(launcher.kills(), 1);
}

#[tokio::test]
async fn test_local_errors_do_no_io() {
    let launcher = Arc::new(MockLauncher::new());

    let config = ClientConfig {
        address: "automan.example.com".to_string(),
        ..ClientConfig::default()
    };
    let err = Client::connect_with_launcher(adapter(), config, launcher.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedServer { .. }));

    let mut incomplete = adapter();
    incomplete.remove("access_key");
    let err = Client::connect_with_launcher(incomplete, ClientConfig::default(), launcher.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter(_)));

    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_submission_failure_force_kills_backend() {
    let port = free_port().await;
    let mock = MockBackend::new(|_| TaskResponse::error("unused").into());
    let launcher = Arc::new(MockLauncher::new().with_on_launch(mock.launch_hook()));
    let config = ClientConfig {
        port,
        retry_interval_ms: 10,
        ..ClientConfig::default()
    };
    let client = Client::connect_with_launcher(adapter(), config, launcher.clone())
        .await
        .unwrap();

    mock.disconnect();
    wait_until_closed(&client).await;

    let err = client
        .estimate(EstimateBuilder::new("How many?", 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(launcher.kills(), 1);
    assert_eq!(client.supervisor().state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_dropping_client_kills_spawned_backend() {
    let port = free_port().await;
    let mock = MockBackend::new(|_| TaskResponse::error("unused").into());
    let launcher = Arc::new(MockLauncher::new().with_on_launch(mock.launch_hook()));
    let config = ClientConfig {
        port,
        retry_interval_ms: 10,
        ..ClientConfig::default()
    };
    let client = Client::connect_with_launcher(adapter(), config, launcher.clone())
        .await
        .unwrap();

    drop(client);
    assert_eq!(launcher.kills(), 1);
    assert_eq!(mock.kill_requests(), 0);
}

#[tokio::test]
async fn test_close_with_pending_handle_orphans_it() {
    let mock = MockBackend::new(|task| match task_kind(task) {
        TaskKind::Estimate => MockReply::Withhold,
        TaskKind::Radio => confident_radio("a", 0.9, 0.1).into(),
    });
    let client = in_process(&mock);
    let _pending = client
        .estimate(EstimateBuilder::new("How many?", 1.0))
        .await
        .unwrap();
    assert_eq!(client.channel().in_flight(), 1);

    let supervisor = Arc::clone(client.supervisor());
    client.close().await.unwrap();
    assert_eq!(mock.kill_requests(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}
