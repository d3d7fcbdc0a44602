use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use tracing::{info, warn};

use crate::batcher::batch;
use crate::common::{Destination, ExceptionCounter, RoutedSample, Sample};
use crate::delivery::{deliver, serialize_group};
use crate::provision::{DestinationTable, Provisioner, ProvisioningConfig};
use crate::router::{route, RouterConfig};

/// The configured exporter.
///
/// [`start`][RevealMetricsWriter::start] runs the provisioning pass once per
/// process identity; [`write`][RevealMetricsWriter::write] performs one
/// export cycle over a batch of collected samples.  Neither ever propagates
/// a failure to the caller: recoverable trouble is logged and counted on the
/// exception counter.
pub struct RevealMetricsWriter {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) token: String,
    pub(crate) proxy: Option<String>,
    pub(crate) pid_host: String,
    pub(crate) router_config: RouterConfig,
    pub(crate) config_json: Option<String>,
    pub(crate) destinations: RwLock<DestinationTable>,
    pub(crate) provisioned_pid: AtomicU32,
    pub(crate) exceptions: ExceptionCounter,
}

impl RevealMetricsWriter {
    /// Runs the provisioning pass: loads the declarative config, reconciles
    /// metric groups and dashboards against the remote service, and records
    /// the resolved destination identifiers.
    ///
    /// Safe to re-run.  A second entrant with the same process identity is
    /// detected and no-ops rather than double-provisioning.
    pub async fn start(&self) {
        let pid = std::process::id();
        if self.provisioned_pid.swap(pid, Ordering::SeqCst) == pid {
            info!(pid, "provisioning already ran for this process identity");
            return;
        }

        let config = self.load_config();

        let provisioner = Provisioner {
            client: &self.client,
            base_url: &self.base_url,
            token: &self.token,
            exceptions: &self.exceptions,
        };
        let table = provisioner.ensure_metric_groups(&config.metric_groups).await;
        provisioner.ensure_dashboards(&config.dashboards).await;

        *write_lock(&self.destinations) = table;

        info!(
            identity = %self.pid_host,
            url = %self.base_url,
            proxy = self.proxy.as_deref().unwrap_or("none"),
            "exporter started"
        );
    }

    fn load_config(&self) -> ProvisioningConfig {
        let Some(json) = self.config_json.as_deref() else {
            warn!("no provisioning config supplied; using an empty provisioning set");
            return ProvisioningConfig::default();
        };

        match ProvisioningConfig::parse(json) {
            Ok(config) => config,
            Err(error) => {
                self.exceptions.bump();
                warn!(%error, "provisioning config rejected; using an empty provisioning set");
                ProvisioningConfig::default()
            }
        }
    }

    /// Performs one export cycle: routes every sample to its destination,
    /// partitions each destination's samples into same-epoch-second groups,
    /// and delivers the groups in ascending timestamp order.
    ///
    /// The full iterable is processed before this returns.  A destination
    /// whose metric group was never resolved has its samples dropped with a
    /// warning; it is never used for delivery without an id.
    pub async fn write<I>(&self, samples: I)
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut jvm = Vec::new();
        let mut tomcat = Vec::new();
        let mut application = Vec::new();

        for sample in samples {
            let Some((destination, routed)) = route(&sample, &self.pid_host, &self.router_config)
            else {
                continue;
            };
            match destination {
                Destination::Jvm => jvm.push(routed),
                Destination::Tomcat => tomcat.push(routed),
                Destination::Application => application.push(routed),
            }
        }

        let table = read_lock(&self.destinations).clone();

        for (destination, list) in [
            (Destination::Jvm, jvm),
            (Destination::Tomcat, tomcat),
            (Destination::Application, application),
        ] {
            self.send_destination(destination, list, &table).await;
        }
    }

    async fn send_destination(
        &self,
        destination: Destination,
        samples: Vec<RoutedSample>,
        table: &DestinationTable,
    ) {
        if samples.is_empty() {
            return;
        }

        let Some(destination_id) = table.get(destination) else {
            warn!(
                destination = destination.as_str(),
                dropped = samples.len(),
                "no metric group resolved for destination; samples dropped"
            );
            return;
        };

        for group in batch(samples) {
            if let Some(payload) = serialize_group(&group) {
                deliver(
                    &self.client,
                    &self.base_url,
                    &self.token,
                    destination_id,
                    &payload,
                    &self.exceptions,
                )
                .await;
            }
        }
    }

    /// The host/process identity prefix routed samples are reported under.
    pub fn identity(&self) -> &str {
        &self.pid_host
    }

    /// Number of recoverable failures caught since the writer was built.
    pub fn exception_count(&self) -> u64 {
        self.exceptions.get()
    }
}

// Lock poisoning means a panic elsewhere mid-write; the table is still the
// most recent complete value, so keep going with it.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
