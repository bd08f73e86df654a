//! `navcore-runtime` – task executors for the navigation algorithms.
//!
//! Each executor owns one long-running capability: it brings its dependent
//! nodes up through the shared lifecycle manager, switches the algorithm on
//! over a service or action, and reports progress as a stream of
//! [`FeedbackCode`][navcore_types::FeedbackCode]s ending in exactly one
//! terminal result.
//!
//! # Modules
//!
//! - [`base`] – [`ExecutorCore`][base::ExecutorCore],
//!   [`RunContext`][base::RunContext] and the
//!   [`TaskExecutor`][base::TaskExecutor] trait shared by every executor.
//! - [`localization`] – laser relocalization, completed by an asynchronous
//!   result notification.
//! - [`mapping`] – laser mapping with optional realtime pose reporting.
//! - [`tracking`] – UWB target tracking driven through an action goal.
//! - [`deps`] – dependency bring-up and best-effort roll-back.
//! - [`config`] – [`RuntimeConfig`][config::RuntimeConfig] loaded from TOML
//!   with `NAVCORE_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.
//! - [`timer`] – elapsed-time measurement for run logs.

pub mod base;
pub mod config;
pub mod deps;
pub mod localization;
pub mod mapping;
pub mod telemetry;
pub mod timer;
pub mod tracking;

pub use base::{
    EventSink, ExecutorContext, ExecutorCore, RunContext, TaskCallbacks, TaskExecutor, aborted,
    canceled,
};
pub use config::{ConfigError, RuntimeConfig};
pub use localization::LaserLocalization;
pub use mapping::LaserMapping;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use timer::Timer;
pub use tracking::UwbTracking;
