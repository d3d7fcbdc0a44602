use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Errors that could occur while building or installing the exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No API token was configured.  Credentials are mandatory.
    #[error("no API token was configured")]
    MissingToken,

    /// The configured endpoint URL could not be parsed.
    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),

    /// The configured forward proxy could not be parsed.
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    FailedToBuildClient(String),

    /// Installing the exporter required a Tokio runtime and none could be
    /// created.
    #[error("failed to create Tokio runtime: {0}")]
    FailedToCreateRuntime(String),
}

/// A numeric sample value.
///
/// The value kind is fixed at the construction boundary, so the serializer
/// never has to inspect types at runtime.  Anything that is not one of these
/// four kinds is not a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl SampleValue {
    /// Converts the value into a JSON number, or `None` for non-finite
    /// floats, which the wire format cannot represent.
    pub(crate) fn as_json_number(self) -> Option<serde_json::Number> {
        match self {
            SampleValue::I32(v) => Some(serde_json::Number::from(v)),
            SampleValue::I64(v) => Some(serde_json::Number::from(v)),
            SampleValue::F32(v) => serde_json::Number::from_f64(f64::from(v)),
            SampleValue::F64(v) => serde_json::Number::from_f64(v),
        }
    }
}

impl From<i32> for SampleValue {
    fn from(v: i32) -> Self {
        SampleValue::I32(v)
    }
}

impl From<i64> for SampleValue {
    fn from(v: i64) -> Self {
        SampleValue::I64(v)
    }
}

impl From<f32> for SampleValue {
    fn from(v: f32) -> Self {
        SampleValue::F32(v)
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::F64(v)
    }
}

/// One timestamped measurement produced by the collection engine.
///
/// Samples are immutable once produced; the exporter only ever copies and
/// rewrites them during routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Dot-delimited hierarchical metric name, e.g. `tomcat.thread-pool.http-8080.currentThreadCount`.
    pub name: String,
    /// The measured value.
    pub value: SampleValue,
    /// Collection time in milliseconds since the Unix epoch.
    pub epoch_millis: i64,
}

impl Sample {
    pub fn new<N, V>(name: N, value: V, epoch_millis: i64) -> Self
    where
        N: Into<String>,
        V: Into<SampleValue>,
    {
        Sample {
            name: name.into(),
            value: value.into(),
            epoch_millis,
        }
    }
}

/// A sample after routing: name possibly rewritten, and carrying the
/// destination-qualified identity string it will be reported under.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedSample {
    pub name: String,
    pub identity: String,
    pub value: SampleValue,
    pub epoch_millis: i64,
}

impl RoutedSample {
    /// The epoch-second bucket this sample belongs to.
    pub fn epoch_seconds(&self) -> i64 {
        self.epoch_millis / 1000
    }
}

/// Logical remote bucket a routed sample is delivered to.
///
/// Each destination maps to one provisioned metric group; the mapping is
/// resolved during the provisioning pass and stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Jvm,
    Tomcat,
    Application,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Jvm => "jvm",
            Destination::Tomcat => "tomcat",
            Destination::Application => "application",
        }
    }
}

/// Process-wide count of recoverable failures, for external monitoring.
///
/// Incremented at every catch boundary, never reset.
#[derive(Debug, Clone, Default)]
pub struct ExceptionCounter(Arc<AtomicU64>);

impl ExceptionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
