//! Health monitoring on top of the resilience manager.
//!
//! Wires alert callbacks to health events, runs a periodic check that
//! logs unhealthy services, and exports per-service health rows to an
//! external metrics store.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helm_types::{ServiceName, Severity};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitState;
use crate::error::BoxError;
use crate::manager::{HealthEvent, ResilienceManager, ServiceHealth};

/// Error rate (percent) above which the high-error-rate alert fires.
const HIGH_ERROR_RATE: f64 = 50.0;

/// Trip count above which the summary carries an alert line.
const TRIP_ALERT_THRESHOLD: u64 = 5;

/// Callback invoked with the service's health snapshot when an alert
/// condition is met.
pub type AlertCallback = Arc<dyn Fn(&ServiceHealth) + Send + Sync>;

/// Optional alert callbacks evaluated on every health event.
#[derive(Clone, Default)]
pub struct AlertConfig {
    /// A circuit transitioned to open.
    pub on_circuit_open: Option<AlertCallback>,

    /// A circuit transitioned back to closed.
    pub on_circuit_closed: Option<AlertCallback>,

    /// A service's error rate exceeded 50%.
    pub on_high_error_rate: Option<AlertCallback>,

    /// A degraded substitute is being served for a service.
    pub on_degradation: Option<AlertCallback>,
}

impl fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertConfig")
            .field("on_circuit_open", &self.on_circuit_open.is_some())
            .field("on_circuit_closed", &self.on_circuit_closed.is_some())
            .field("on_high_error_rate", &self.on_high_error_rate.is_some())
            .field("on_degradation", &self.on_degradation.is_some())
            .finish()
    }
}

/// Overall platform status derived from per-service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverallStatus {
    /// No unhealthy services.
    Healthy,

    /// Some services unhealthy.
    Degraded,

    /// Every registered service unhealthy.
    Critical,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Healthy => write!(f, "healthy"),
            OverallStatus::Degraded => write!(f, "degraded"),
            OverallStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Point-in-time summary of every registered service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub overall: OverallStatus,
    pub services: Vec<ServiceHealth>,
    pub alerts: Vec<String>,
}

impl HealthSummary {
    /// Severity for paging/notification consumers.
    pub fn severity(&self) -> Severity {
        match self.overall {
            OverallStatus::Healthy => Severity::Info,
            OverallStatus::Degraded => Severity::Warning,
            OverallStatus::Critical => Severity::Critical,
        }
    }
}

/// One row per service per poll, written to an external metrics table.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub service_name: ServiceName,
    pub circuit_state: CircuitState,
    pub is_healthy: bool,
    pub success_rate: f64,
    pub error_rate: f64,
    pub recent_requests: usize,
    pub degradation_active: bool,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub retries_total: u64,
    pub circuit_breaker_trips: u64,
    pub degradation_invocations: u64,
    pub timestamp: DateTime<Utc>,
}

/// External metrics store. The persistence side is a collaborator; this
/// crate only defines the boundary.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist one batch of health records.
    async fn record(&self, records: Vec<HealthRecord>) -> Result<(), BoxError>;
}

/// Metrics store that discards everything. Useful in tests and local
/// development.
pub struct NullMetricsStore;

#[async_trait]
impl MetricsStore for NullMetricsStore {
    async fn record(&self, records: Vec<HealthRecord>) -> Result<(), BoxError> {
        debug!(count = records.len(), "discarding health records");
        Ok(())
    }
}

struct MonitorTasks {
    ticker: JoinHandle<()>,
    listener: JoinHandle<()>,
}

/// Health monitor bound to one [`ResilienceManager`].
pub struct ResilienceMonitor {
    manager: Arc<ResilienceManager>,
    alerts: Arc<RwLock<AlertConfig>>,
    tasks: Mutex<Option<MonitorTasks>>,
}

impl ResilienceMonitor {
    pub fn new(manager: Arc<ResilienceManager>) -> Self {
        Self {
            manager,
            alerts: Arc::new(RwLock::new(AlertConfig::default())),
            tasks: Mutex::new(None),
        }
    }

    /// Install (or replace) the alert callbacks.
    pub fn configure(&self, config: AlertConfig) {
        *self.alerts.write().unwrap() = config;
    }

    /// Whether the background tasks are running.
    pub fn is_running(&self) -> bool {
        self.tasks.lock().unwrap().is_some()
    }

    /// Start the periodic health check and the event listener.
    ///
    /// Exactly one listener is registered no matter how often this is
    /// called; a second start while running is a no-op.
    pub fn start_health_checks(&self, interval: Duration) {
        let mut guard = self.tasks.lock().unwrap();
        if guard.is_some() {
            warn!("health checks already running");
            return;
        }

        let manager = self.manager.clone();
        let ticker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for health in manager.all_services_health() {
                    if !health.healthy {
                        let trips = manager
                            .service_metrics(&health.service)
                            .map(|m| m.circuit_breaker_trips)
                            .unwrap_or(0);
                        warn!(
                            service = %health.service,
                            state = %health.state,
                            trips,
                            "service unhealthy"
                        );
                    }
                }
            }
        });

        let manager = self.manager.clone();
        let alerts = self.alerts.clone();
        let mut rx = self.manager.subscribe();
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::evaluate_event(&manager, &alerts, event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "health event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "health checks started");
        *guard = Some(MonitorTasks { ticker, listener });
    }

    /// Stop the periodic check and detach the event listener.
    pub fn stop_health_checks(&self) {
        if let Some(tasks) = self.tasks.lock().unwrap().take() {
            tasks.ticker.abort();
            tasks.listener.abort();
            info!("health checks stopped");
        }
    }

    fn evaluate_event(
        manager: &ResilienceManager,
        alerts: &RwLock<AlertConfig>,
        event: HealthEvent,
    ) {
        match event {
            HealthEvent::StateChanged { service, to, .. } => {
                let Some(health) = manager.service_health(&service) else {
                    return;
                };
                let alerts = alerts.read().unwrap();
                match to {
                    CircuitState::Open => Self::fire(&alerts.on_circuit_open, &health),
                    CircuitState::Closed => Self::fire(&alerts.on_circuit_closed, &health),
                    CircuitState::HalfOpen => {}
                }
            }
            HealthEvent::HealthChanged { health, .. } => {
                let alerts = alerts.read().unwrap();
                if health.error_rate > HIGH_ERROR_RATE {
                    Self::fire(&alerts.on_high_error_rate, &health);
                }
                if health.degradation_active {
                    Self::fire(&alerts.on_degradation, &health);
                }
            }
            HealthEvent::ServiceRegistered(_) => {}
        }
    }

    /// Invoke one alert callback; panics are caught and logged.
    fn fire(callback: &Option<AlertCallback>, health: &ServiceHealth) {
        if let Some(callback) = callback {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(health)));
            if result.is_err() {
                error!(service = %health.service, "alert callback panicked");
            }
        }
    }

    /// Compute the overall status, per-service list, and alert strings.
    pub fn health_summary(&self) -> HealthSummary {
        let services = self.manager.all_services_health();
        let unhealthy = services.iter().filter(|h| !h.healthy).count();
        let overall = if unhealthy == 0 {
            OverallStatus::Healthy
        } else if unhealthy == services.len() {
            OverallStatus::Critical
        } else {
            OverallStatus::Degraded
        };

        let mut alerts = Vec::new();
        for health in &services {
            let trips = self
                .manager
                .service_metrics(&health.service)
                .map(|m| m.circuit_breaker_trips)
                .unwrap_or(0);
            if health.state == CircuitState::Open {
                alerts.push(format!("circuit breaker open for {}", health.service));
            }
            if health.error_rate > HIGH_ERROR_RATE {
                alerts.push(format!(
                    "{}: error rate {:.1}% exceeds {:.0}%",
                    health.service, health.error_rate, HIGH_ERROR_RATE
                ));
            }
            if health.degradation_active {
                alerts.push(format!("{} is serving degraded responses", health.service));
            }
            if trips > TRIP_ALERT_THRESHOLD {
                alerts.push(format!(
                    "{} circuit has tripped {} times",
                    health.service, trips
                ));
            }
        }

        HealthSummary {
            overall,
            services,
            alerts,
        }
    }

    /// Build one [`HealthRecord`] per service for the current instant.
    pub fn snapshot_records(&self) -> Vec<HealthRecord> {
        let timestamp = Utc::now();
        self.manager
            .all_services_health()
            .into_iter()
            .filter_map(|health| {
                let metrics = self.manager.service_metrics(&health.service)?;
                Some(HealthRecord {
                    service_name: health.service,
                    circuit_state: health.state,
                    is_healthy: health.healthy,
                    success_rate: health.success_rate,
                    error_rate: health.error_rate,
                    recent_requests: health.recent_requests,
                    degradation_active: health.degradation_active,
                    total_requests: metrics.requests_total,
                    failed_requests: metrics.requests_failed,
                    retries_total: metrics.retries_total,
                    circuit_breaker_trips: metrics.circuit_breaker_trips,
                    degradation_invocations: metrics.degradation_invocations,
                    timestamp,
                })
            })
            .collect()
    }

    /// Write the current snapshot to an external metrics store.
    pub async fn export_health(&self, store: &dyn MetricsStore) -> Result<(), BoxError> {
        let records = self.snapshot_records();
        debug!(count = records.len(), "exporting health records");
        store.record(records).await
    }
}

impl Drop for ResilienceMonitor {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.lock().unwrap().take() {
            tasks.ticker.abort();
            tasks.listener.abort();
        }
    }
}
