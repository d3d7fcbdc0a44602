use std::sync::atomic::AtomicU32;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio::runtime;

use crate::common::{BuildError, ExceptionCounter};
use crate::provision::DestinationTable;
use crate::router::RouterConfig;
use crate::writer::RevealMetricsWriter;

const DEFAULT_ENDPOINT: &str = "https://api.copperegg.com/v2/revealmetrics";
const DEFAULT_TIMEOUT_MILLIS: u64 = 5_000;

/// Builder for creating and installing a RevealMetrics writer.
pub struct RevealMetricsBuilder {
    endpoint: String,
    token: Option<String>,
    timeout_millis: u64,
    proxy: Option<(String, u16)>,
    source: Option<String>,
    collector_namespace: Option<String>,
    application_namespaces: Vec<String>,
    config_json: Option<String>,
}

impl RevealMetricsBuilder {
    /// Creates a new [`RevealMetricsBuilder`].
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            token: None,
            timeout_millis: DEFAULT_TIMEOUT_MILLIS,
            proxy: None,
            source: None,
            collector_namespace: None,
            application_namespaces: Vec::new(),
            config_json: None,
        }
    }

    /// Sets the API token used for Basic authentication.  Mandatory.
    #[must_use]
    pub fn set_api_token<T>(mut self, token: T) -> Self
    where
        T: Into<String>,
    {
        self.token = Some(token.into());
        self
    }

    /// Overrides the API endpoint base URL.
    ///
    /// ## Errors
    ///
    /// If the given URL cannot be parsed, an error variant will be returned
    /// describing the error.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, BuildError> {
        reqwest::Url::parse(endpoint).map_err(|e| BuildError::InvalidEndpoint(e.to_string()))?;
        self.endpoint = endpoint.trim_end_matches('/').to_owned();
        Ok(self)
    }

    /// Sets the read timeout, in milliseconds, for every API call.
    ///
    /// Defaults to 5000 milliseconds.
    #[must_use]
    pub fn set_timeout_millis(mut self, timeout_millis: u64) -> Self {
        self.timeout_millis = timeout_millis;
        self
    }

    /// Routes all API calls through an HTTP forward proxy.
    #[must_use]
    pub fn with_proxy<H>(mut self, host: H, port: u16) -> Self
    where
        H: Into<String>,
    {
        self.proxy = Some((host.into(), port));
        self
    }

    /// Sets the `source` label samples are reported under.
    ///
    /// Defaults to the local hostname.  The process id is always appended,
    /// so the effective identity prefix is `<source>.<pid>`.
    #[must_use]
    pub fn set_source<S>(mut self, source: S) -> Self
    where
        S: Into<String>,
    {
        self.source = Some(source.into());
        self
    }

    /// Sets the name segment under which the collection engine reports its
    /// own health metrics; those samples are routed with the jvm group.
    ///
    /// Defaults to `collector`.
    #[must_use]
    pub fn set_collector_namespace<S>(mut self, namespace: S) -> Self
    where
        S: Into<String>,
    {
        self.collector_namespace = Some(namespace.into());
        self
    }

    /// Sets the leading name segments treated as application business
    /// metrics and routed to the application group.
    ///
    /// Empty by default, in which case nothing routes to the application
    /// group.
    #[must_use]
    pub fn set_application_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.application_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Supplies the declarative provisioning document describing the metric
    /// groups and dashboards the account should have.
    ///
    /// Without one, the provisioning pass runs with an empty set and no
    /// destination ever resolves, so supply one for any real deployment.
    #[must_use]
    pub fn with_provisioning_config<S>(mut self, json: S) -> Self
    where
        S: Into<String>,
    {
        self.config_json = Some(json.into());
        self
    }

    /// Builds the writer.
    ///
    /// ## Errors
    ///
    /// If credentials are missing, or the HTTP client cannot be constructed
    /// from the configured proxy and timeout, an error variant will be
    /// returned describing the error.
    pub fn build(self) -> Result<RevealMetricsWriter, BuildError> {
        let token = self.token.ok_or(BuildError::MissingToken)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        let mut client_builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.timeout_millis))
            .default_headers(headers);

        let proxy = self
            .proxy
            .map(|(host, port)| format!("http://{host}:{port}"));
        if let Some(proxy_url) = &proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| BuildError::InvalidProxy(e.to_string()))?;
            client_builder = client_builder.proxy(proxy);
        }

        let client = client_builder
            .build()
            .map_err(|e| BuildError::FailedToBuildClient(e.to_string()))?;

        let source = self.source.unwrap_or_else(local_hostname);
        let pid_host = format!("{source}.{}", std::process::id());

        let mut router_config = RouterConfig {
            application_namespaces: self.application_namespaces,
            ..Default::default()
        };
        if let Some(namespace) = self.collector_namespace {
            router_config.collector_namespace = namespace;
        }

        Ok(RevealMetricsWriter {
            client,
            base_url: self.endpoint,
            token,
            proxy,
            pid_host,
            router_config,
            config_json: self.config_json,
            destinations: RwLock::new(DestinationTable::default()),
            provisioned_pid: AtomicU32::new(0),
            exceptions: ExceptionCounter::new(),
        })
    }

    /// Builds the writer and runs its provisioning pass.
    ///
    /// When called from within a Tokio runtime, provisioning is spawned
    /// directly into that runtime.  Otherwise, a new single-threaded Tokio
    /// runtime is created on a background thread and provisioning runs
    /// there.  Either way the writer is returned immediately; export cycles
    /// whose destinations are not yet resolved drop their samples with a
    /// warning.
    ///
    /// ## Errors
    ///
    /// If there is an error while either building the writer or creating
    /// the runtime, an error variant will be returned describing the error.
    pub fn install(self) -> Result<Arc<RevealMetricsWriter>, BuildError> {
        let writer = Arc::new(self.build()?);

        if let Ok(handle) = runtime::Handle::try_current() {
            let task = writer.clone();
            handle.spawn(async move { task.start().await });
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let task = writer.clone();
            thread::Builder::new()
                .name("metrics-exporter-revealmetrics".to_owned())
                .spawn(move || runtime.block_on(task.start()))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;
        }

        Ok(writer)
    }
}

impl Default for RevealMetricsBuilder {
    fn default() -> Self {
        RevealMetricsBuilder::new()
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}
