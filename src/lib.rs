//! An exporter for pushing collected metric samples to the CopperEgg
//! RevealMetrics HTTP API.
//!
//! ## Basics
//!
//! `metrics-exporter-revealmetrics` takes the timestamped samples a metric
//! collection engine produces, classifies them into the account's metric
//! groups, and pushes them to the RevealMetrics ingestion endpoint.  It also
//! provisions the account: a declarative JSON document describes the metric
//! groups and dashboards the account should have, and a startup pass creates
//! or updates them idempotently over the same API.
//!
//! ## Behavior
//!
//! This exporter makes some explicit trade-offs to accomplish its task:
//!
//! - Samples are routed by their dot-delimited name into one of three
//!   destination groups (jvm, tomcat, application); names matching no rule
//!   are dropped, never raised
//! - Each destination's samples are partitioned into same-epoch-second
//!   groups and delivered one authenticated POST per group, in ascending
//!   timestamp order
//! - Provisioning runs once per process identity; re-entering with the same
//!   identity is a no-op
//! - Nothing in the export path propagates a failure to the caller: trouble
//!   is logged via `tracing` and counted on a process-wide exception counter
//!
//! ## Usage
//!
//! Using the exporter is straightforward:
//!
//! ```ignore
//! // First, create a builder.
//! //
//! // The builder can configure the endpoint, credentials, read timeout,
//! // forward proxy, source label, and the declarative provisioning
//! // document.
//! let builder = RevealMetricsBuilder::new()
//!     .set_api_token("YOUR-APIKEY")
//!     .with_provisioning_config(include_str!("revealmetrics_config.json"));
//!
//! // Most users will want to "install" the exporter, which builds the
//! // writer and runs the provisioning pass on the ambient Tokio runtime
//! // (or a new single-threaded one on a background thread):
//! let writer = builder.install().expect("failed to install exporter");
//!
//! // Then, once per collection interval, hand the collected samples over:
//! writer.write(samples).await;
//!
//! // If you want to control scheduling yourself, `build()` hands back the
//! // writer without starting anything; call `start()` where you see fit:
//! // let writer = builder.build().expect("failed to build exporter");
//! // writer.start().await;
//! ```
mod common;
pub use self::common::{BuildError, Destination, ExceptionCounter, Sample, SampleValue};

mod builder;
pub use self::builder::RevealMetricsBuilder;

mod batcher;
mod delivery;
mod provision;
mod router;

mod writer;
pub use self::writer::RevealMetricsWriter;
