//! Prometheus metrics for the command and event buses.
//!
//! The buses record through the `metrics` facade, so nothing is collected
//! until a recorder is installed. [`PrometheusRecorder`] installs the Prometheus
//! recorder and renders the text exposition format on demand; embedding
//! applications decide how to serve it.
//!
//! | Metric                                     | Type      | Labels |
//! |--------------------------------------------|-----------|--------|
//! | `statebus_commands_total`                  | counter   |        |
//! | `statebus_commands_failed_total`           | counter   | `kind` |
//! | `statebus_commands_unroutable_total`       | counter   |        |
//! | `statebus_command_handler_duration_seconds`| histogram | `kind` |
//! | `statebus_events_per_command`              | histogram |        |
//! | `statebus_events_total`                    | counter   |        |
//! | `statebus_events_failed_total`             | counter   |        |
//! | `statebus_events_unroutable_total`         | counter   |        |
//! | `statebus_event_handler_duration_seconds`  | histogram |        |
//!
//! # Example
//!
//! ```rust,no_run
//! use statebus_runtime::metrics::PrometheusRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = PrometheusRecorder::new();
//! recorder.install()?;
//!
//! // ... dispatch commands ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use statebus_core::handler::HandlerKind;
use thiserror::Error;

const COMMANDS_TOTAL: &str = "statebus_commands_total";
const COMMANDS_FAILED: &str = "statebus_commands_failed_total";
const COMMANDS_UNROUTABLE: &str = "statebus_commands_unroutable_total";
const COMMAND_HANDLER_DURATION: &str = "statebus_command_handler_duration_seconds";
const EVENTS_PER_COMMAND: &str = "statebus_events_per_command";
const EVENTS_TOTAL: &str = "statebus_events_total";
const EVENTS_FAILED: &str = "statebus_events_failed_total";
const EVENTS_UNROUTABLE: &str = "statebus_events_unroutable_total";
const EVENT_HANDLER_DURATION: &str = "statebus_event_handler_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders collected metrics.
#[derive(Default)]
pub struct PrometheusRecorder {
    handle: Option<PrometheusHandle>,
}

impl PrometheusRecorder {
    /// Create a recorder that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the bus metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the histogram buckets are rejected,
    /// or [`MetricsError::Install`] if installation fails for any reason other
    /// than a recorder already being installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist per process. If one is already
    /// installed (e.g. by another test) this succeeds without a handle, and
    /// [`render`](Self::render) returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_1, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the Prometheus handle, if this recorder installed it.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Describe every bus metric to the installed recorder.
pub fn register_metrics() {
    describe_counter!(COMMANDS_TOTAL, "Total number of commands dispatched");
    describe_counter!(
        COMMANDS_FAILED,
        "Commands whose handler failed or could not be executed"
    );
    describe_counter!(COMMANDS_UNROUTABLE, "Commands with no mapped handler");
    describe_histogram!(
        COMMAND_HANDLER_DURATION,
        "Time taken by command handlers, including executor wait for async kinds"
    );
    describe_histogram!(EVENTS_PER_COMMAND, "Number of events produced per command");

    describe_counter!(EVENTS_TOTAL, "Total number of events dispatched");
    describe_counter!(EVENTS_FAILED, "Events whose handler failed");
    describe_counter!(EVENTS_UNROUTABLE, "Events with no mapped handler");
    describe_histogram!(EVENT_HANDLER_DURATION, "Time taken by event handlers");
}

/// Command bus metrics.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a dispatched command.
    pub fn record_dispatch() {
        counter!(COMMANDS_TOTAL).increment(1);
    }

    /// Record a command with no handler.
    pub fn record_unroutable() {
        counter!(COMMANDS_UNROUTABLE).increment(1);
    }

    /// Record a command handler's execution time.
    pub fn record_execution(kind: HandlerKind, duration: Duration) {
        histogram!(COMMAND_HANDLER_DURATION, "kind" => kind.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record a command whose handler failed.
    pub fn record_failure(kind: HandlerKind) {
        counter!(COMMANDS_FAILED, "kind" => kind.as_str()).increment(1);
    }

    /// Record how many events a command produced.
    pub fn record_events(count: usize) {
        // Precision loss acceptable for metrics
        #[allow(clippy::cast_precision_loss)]
        let count = count as f64;
        histogram!(EVENTS_PER_COMMAND).record(count);
    }
}

/// Event bus metrics.
pub struct EventMetrics;

impl EventMetrics {
    /// Record a dispatched event.
    pub fn record_dispatch() {
        counter!(EVENTS_TOTAL).increment(1);
    }

    /// Record an event with no handler.
    pub fn record_unroutable() {
        counter!(EVENTS_UNROUTABLE).increment(1);
    }

    /// Record an event handler's execution time.
    pub fn record_execution(duration: Duration) {
        histogram!(EVENT_HANDLER_DURATION).record(duration.as_secs_f64());
    }

    /// Record an event whose handler failed.
    pub fn record_failure() {
        counter!(EVENTS_FAILED).increment(1);
    }
}
