//! End-to-end flows through the resilience manager: trip, fail fast,
//! probe, recover, retry, and degrade.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helm_resilience::{
    presets, CallOptions, CircuitBreakerConfig, CircuitState, ResilienceError, ResilienceManager,
    ResilienceMonitor, ResilienceOutcome, RetryPolicyConfig, ServiceConfig,
};
use helm_types::ServiceKind;
use serde_json::json;

fn breaker_config(failure_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        success_threshold: 2,
        call_timeout: Duration::from_millis(500),
        reset_timeout: Duration::from_secs(1),
        monitoring_window: Duration::from_secs(60),
    }
}

fn no_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        max_retries: 0,
        ..Default::default()
    }
}

async fn refused() -> Result<&'static str, helm_resilience::BoxError> {
    Err("connection refused by upstream".into())
}

#[tokio::test]
async fn trip_then_fail_fast() {
    let manager = ResilienceManager::new();
    let service = manager.register_service(
        ServiceConfig::new("x", ServiceKind::Other)
            .with_circuit_breaker(breaker_config(3))
            .with_retry(no_retry()),
    );

    for expected in [CircuitState::Closed, CircuitState::Closed, CircuitState::Open] {
        let _ = manager
            .execute(&service, refused, CallOptions::<&str>::new())
            .await;
        assert_eq!(manager.service_health(service.name()).unwrap().state, expected);
    }

    // Fourth call is rejected without invoking the operation.
    let calls = Arc::new(AtomicU32::new(0));
    let result = manager
        .execute(
            &service,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, helm_resilience::BoxError>("unreachable")
                }
            },
            CallOptions::new(),
        )
        .await;
    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn probe_admitted_after_reset_timeout_and_reopens_on_failure() {
    let manager = ResilienceManager::new();
    let service = manager.register_service(
        ServiceConfig::new("x", ServiceKind::Other)
            .with_circuit_breaker(breaker_config(3))
            .with_retry(no_retry()),
    );

    for _ in 0..3 {
        let _ = manager
            .execute(&service, refused, CallOptions::<&str>::new())
            .await;
    }
    assert_eq!(
        manager.service_health(service.name()).unwrap().state,
        CircuitState::Open
    );

    tokio::time::advance(Duration::from_millis(1100)).await;

    // The probe is admitted, runs, and its failure reopens the circuit.
    let calls = Arc::new(AtomicU32::new(0));
    let result = manager
        .execute(
            &service,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<&str, helm_resilience::BoxError>("still down".into())
                }
            },
            CallOptions::new(),
        )
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        manager.service_health(service.name()).unwrap().state,
        CircuitState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn two_probe_successes_close_the_circuit() {
    let manager = ResilienceManager::new();
    let service = manager.register_service(
        ServiceConfig::new("x", ServiceKind::Other)
            .with_circuit_breaker(breaker_config(3))
            .with_retry(no_retry()),
    );

    for _ in 0..3 {
        let _ = manager
            .execute(&service, refused, CallOptions::<&str>::new())
            .await;
    }
    tokio::time::advance(Duration::from_millis(1100)).await;

    let ok = || async { Ok::<_, helm_resilience::BoxError>("back") };
    let _ = manager.execute(&service, ok, CallOptions::new()).await;
    assert_eq!(
        manager.service_health(service.name()).unwrap().state,
        CircuitState::HalfOpen
    );
    let _ = manager.execute(&service, ok, CallOptions::new()).await;
    assert_eq!(
        manager.service_health(service.name()).unwrap().state,
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn transient_errors_retried_to_success() {
    let manager = ResilienceManager::new();
    let service = manager.register_service(
        ServiceConfig::new("x", ServiceKind::Other)
            .with_circuit_breaker(breaker_config(10))
            .with_retry(RetryPolicyConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
                retryable_errors: vec!["ETIMEDOUT".to_string()],
            }),
    );

    let calls = Arc::new(AtomicU32::new(0));
    let outcome = manager
        .execute(
            &service,
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err::<&str, helm_resilience::BoxError>("ETIMEDOUT".into())
                    } else {
                        Ok("fourth time lucky")
                    }
                }
            },
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.into_value(), Some("fourth time lucky"));
    let metrics = manager.service_metrics(service.name()).unwrap();
    assert_eq!(metrics.retries_total, 3);
    assert_eq!(metrics.requests_total, 1);
}

#[tokio::test]
async fn open_circuit_serves_degraded_value() {
    let manager = Arc::new(ResilienceManager::new());
    let service = manager.register_service(
        ServiceConfig::new("mail", ServiceKind::MailProvider)
            .with_circuit_breaker(breaker_config(1))
            .with_retry(no_retry())
            .with_degradation(Arc::new(helm_resilience::FnDegradation::new(|| async {
                Ok(json!({ "success": false, "queued": true }))
            }))),
    );

    let outcome = manager
        .execute(&service, refused, CallOptions::<&str>::new())
        .await
        .unwrap();
    assert_eq!(
        outcome.degraded_value(),
        Some(&json!({ "success": false, "queued": true }))
    );
    assert_eq!(
        manager
            .service_metrics(service.name())
            .unwrap()
            .degradation_invocations,
        1
    );

    // The monitor reflects the degradation in summary and alerts.
    let monitor = ResilienceMonitor::new(manager.clone());
    let summary = monitor.health_summary();
    assert!(summary
        .alerts
        .iter()
        .any(|a| a.contains("degraded responses")));
}

#[tokio::test]
async fn default_table_round_trip() {
    let manager = Arc::new(ResilienceManager::new());
    let services = presets::register_defaults(&manager);

    let outcome = manager
        .execute(
            &services.database,
            || async { Ok::<_, helm_resilience::BoxError>(7usize) },
            CallOptions::new(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ResilienceOutcome::Success(7)));

    let monitor = ResilienceMonitor::new(manager.clone());
    let summary = monitor.health_summary();
    assert_eq!(summary.services.len(), 5);
    assert!(summary.alerts.is_empty());
}
