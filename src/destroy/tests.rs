//! Unit tests for the destruction coordinator.

use super::*;
use crate::activity::{ActivityLog, ProvisioningId};
use crate::test_support::{LogCapture, ScriptedProvider};
use rstest::{fixture, rstest};

const TEST_BACKOFF: Duration = Duration::from_millis(1);

fn handle(id: u64) -> ResourceHandle {
    ResourceHandle {
        resource_id: ResourceId::new(id),
        cloud_name: String::from("do-east"),
        api_endpoint: String::from("https://api.example.test/v2"),
        provisioning_id: ProvisioningId::generate(),
    }
}

fn token() -> Secret {
    Secret::new("dop_v1_test")
}

fn coordinator(
    provider: &ScriptedProvider,
    retry: RetryPolicy,
) -> DestructionCoordinator<ScriptedProvider> {
    DestructionCoordinator::new(
        provider.clone(),
        Handle::current(),
        CoordinatorSettings {
            retry,
            max_concurrent: 2,
        },
    )
}

#[fixture]
fn provider() -> ScriptedProvider {
    ScriptedProvider::new()
}

#[rstest]
#[case(1, Duration::from_millis(100))]
#[case(2, Duration::from_millis(200))]
#[case(4, Duration::from_millis(800))]
#[case(40, MAX_BACKOFF)]
fn backoff_doubles_and_caps(#[case] attempt: u32, #[case] expected: Duration) {
    let policy = RetryPolicy::new(5, Duration::from_millis(100), DEFAULT_CALL_TIMEOUT);
    assert_eq!(policy.backoff_after(attempt), expected);
}

#[rstest]
fn zero_attempts_means_one() {
    assert_eq!(RetryPolicy::new(0, TEST_BACKOFF, TEST_BACKOFF).max_attempts(), 1);
}

#[rstest]
#[tokio::test]
async fn destroy_async_returns_before_remote_call_completes(provider: ScriptedProvider) {
    provider.hold_calls();
    let coordinator = coordinator(&provider, RetryPolicy::no_retry(DEFAULT_CALL_TIMEOUT));

    let ticket = coordinator.destroy_async(token(), handle(42));

    assert!(!ticket.is_finished());
    assert_eq!(provider.completed(), 0);
    provider.release();
    let outcome = ticket.outcome().await;
    assert_eq!(outcome, DestroyOutcome::Destroyed { attempts: 1 });
    assert_eq!(provider.completed(), 1);
    assert_eq!(provider.tokens(), vec![String::from("dop_v1_test")]);
}

#[rstest]
fn destroy_async_is_callable_from_a_plain_thread(provider: ScriptedProvider) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .expect("runtime should build");
    provider.hold_calls();
    let coordinator = DestructionCoordinator::new(
        provider.clone(),
        runtime.handle().clone(),
        CoordinatorSettings::default(),
    );

    let ticket = std::thread::spawn(move || coordinator.destroy_async(token(), handle(9)))
        .join()
        .expect("caller thread should not panic");

    assert_eq!(provider.completed(), 0);
    provider.release();
    let outcome = runtime.block_on(ticket.outcome());
    assert!(outcome.is_success());
}

#[rstest]
fn cancelled_destroy_is_logged_and_reported_as_orphan(provider: ScriptedProvider) {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime should build");
    provider.hold_calls();
    let activity = ActivityLog::new();
    let coordinator = DestructionCoordinator::new(
        provider.clone(),
        runtime.handle().clone(),
        CoordinatorSettings::default(),
    )
    .with_activity(Arc::new(activity.clone()));

    let ticket = coordinator.destroy_async(token(), handle(42));
    runtime.block_on(async {
        while provider.calls().is_empty() {
            sleep(Duration::from_millis(1)).await;
        }
    });
    drop(runtime);

    let outcome = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build")
        .block_on(ticket.outcome());
    assert!(
        matches!(outcome, DestroyOutcome::Aborted { .. }),
        "unexpected outcome: {outcome:?}"
    );
    assert_eq!(provider.completed(), 0);
    assert!(capture.has_level("ERROR"), "logs: {}", capture.contents());
    assert!(capture.contents().contains("resource_id=42"));
    let orphans = activity.orphans();
    let [orphan] = orphans.as_slice() else {
        panic!("expected one orphan, got {orphans:?}");
    };
    assert_eq!(orphan.resource_id, Some(ResourceId::new(42)));
    assert!(matches!(orphan.kind, ActivityKind::DestroyFailed { .. }));
}

#[rstest]
fn finished_destroy_records_a_single_outcome(provider: ScriptedProvider) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime should build");
    let activity = ActivityLog::new();
    let coordinator = DestructionCoordinator::new(
        provider.clone(),
        runtime.handle().clone(),
        CoordinatorSettings::default(),
    )
    .with_activity(Arc::new(activity.clone()));

    let outcome = runtime.block_on(coordinator.destroy_async(token(), handle(7)).outcome());
    drop(runtime);

    assert_eq!(outcome, DestroyOutcome::Destroyed { attempts: 1 });
    let kinds: Vec<_> = activity.events().into_iter().map(|event| event.kind).collect();
    assert_eq!(kinds, vec![ActivityKind::Destroyed]);
}

#[rstest]
#[tokio::test]
async fn not_found_is_success_without_failure_logs(provider: ScriptedProvider) {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());
    provider.push_not_found();
    let activity = ActivityLog::new();
    let coordinator = coordinator(&provider, RetryPolicy::default())
        .with_activity(Arc::new(activity.clone()));

    let outcome = coordinator.destroy_async(token(), handle(42)).outcome().await;

    assert_eq!(outcome, DestroyOutcome::AlreadyGone { attempts: 1 });
    assert!(!capture.has_level("ERROR"), "logs: {}", capture.contents());
    assert!(!capture.has_level("WARN"), "logs: {}", capture.contents());
    assert!(activity.orphans().is_empty());
}

#[rstest]
#[tokio::test]
async fn transient_errors_are_retried_then_logged(provider: ScriptedProvider) {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());
    for _ in 0..3 {
        provider.push_error(ProviderError::Transport {
            message: String::from("connection reset"),
        });
    }
    let activity = ActivityLog::new();
    let coordinator = coordinator(
        &provider,
        RetryPolicy::new(3, TEST_BACKOFF, DEFAULT_CALL_TIMEOUT),
    )
    .with_activity(Arc::new(activity.clone()));

    let outcome = coordinator.destroy_async(token(), handle(42)).outcome().await;

    let DestroyOutcome::Failed { error, attempts } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(attempts, 3);
    assert!(error.is_transient());
    assert_eq!(provider.calls().len(), 3);
    assert!(capture.has_level("ERROR"), "logs: {}", capture.contents());
    assert!(capture.contents().contains("resource_id=42"));
    assert_eq!(activity.orphans().len(), 1);
}

#[rstest]
#[tokio::test]
async fn transient_error_then_not_found_succeeds(provider: ScriptedProvider) {
    provider.push_error(ProviderError::RateLimited {
        message: String::from("slow down"),
    });
    provider.push_not_found();
    let coordinator = coordinator(
        &provider,
        RetryPolicy::new(3, TEST_BACKOFF, DEFAULT_CALL_TIMEOUT),
    );

    let outcome = coordinator.destroy_async(token(), handle(42)).outcome().await;

    assert_eq!(outcome, DestroyOutcome::AlreadyGone { attempts: 2 });
}

#[rstest]
#[tokio::test]
async fn permanent_errors_are_not_retried(provider: ScriptedProvider) {
    provider.push_error(ProviderError::Unauthorized {
        status: 401,
        message: String::from("unable to authenticate you"),
    });
    let coordinator = coordinator(
        &provider,
        RetryPolicy::new(5, TEST_BACKOFF, DEFAULT_CALL_TIMEOUT),
    );

    let outcome = coordinator.destroy_async(token(), handle(42)).outcome().await;

    assert!(matches!(
        outcome,
        DestroyOutcome::Failed {
            error: ProviderError::Unauthorized { .. },
            attempts: 1
        }
    ));
    assert_eq!(provider.calls().len(), 1);
}

#[rstest]
#[tokio::test]
async fn slow_calls_time_out_as_transient_failures(provider: ScriptedProvider) {
    provider.set_delay(Duration::from_secs(10));
    let coordinator = coordinator(&provider, RetryPolicy::no_retry(Duration::from_millis(20)));

    let outcome = coordinator.destroy_async(token(), handle(42)).outcome().await;

    assert_eq!(
        outcome,
        DestroyOutcome::Failed {
            error: ProviderError::Timeout { millis: 20 },
            attempts: 1
        }
    );
    assert_eq!(provider.completed(), 0);
}

#[rstest]
#[tokio::test]
async fn duplicate_destroys_are_tolerated(provider: ScriptedProvider) {
    provider.push_deleted();
    provider.push_not_found();
    let coordinator = coordinator(&provider, RetryPolicy::default());

    let first = coordinator.destroy_async(token(), handle(42));
    let second = coordinator.destroy_async(token(), handle(42));

    assert!(first.outcome().await.is_success());
    assert!(second.outcome().await.is_success());
}

#[rstest]
#[tokio::test]
async fn ready_tickets_report_immediately() {
    let ticket = DestroyTicket::ready(ResourceId::new(1), DestroyOutcome::AlreadyGone { attempts: 1 });
    assert!(ticket.is_finished());
    assert_eq!(ticket.resource_id(), ResourceId::new(1));
    assert!(ticket.outcome().await.is_success());
}
