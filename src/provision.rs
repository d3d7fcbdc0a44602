//! Idempotent provisioning of remote metric-group and dashboard objects.
//!
//! A declarative JSON document describes the objects the account should
//! have.  One provisioning pass fetches the remote object index per kind,
//! then issues exactly one create-or-update call per declared definition:
//! an update at the existing id when the remote index already holds an
//! object of the same name, a create at the collection endpoint otherwise.
//!
//! Failures are contained at two boundaries: a malformed or missing config
//! document degrades to an empty provisioning set, and a failing definition
//! is skipped without aborting the rest of the pass.  Every failure bumps
//! the shared exception counter.

use std::fmt;

use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::common::{Destination, ExceptionCounter};

/// The provisioning config document could not be understood.
///
/// Always recoverable: the caller proceeds with an empty provisioning set.
#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("malformed provisioning config: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{section} definition at index {index} has no \"name\" field")]
    MissingName { section: &'static str, index: usize },
}

/// One declared metric-group or dashboard definition.
///
/// The document is opaque to the exporter apart from its `name`; it is sent
/// to the service verbatim.
#[derive(Debug, Clone)]
pub(crate) struct Definition {
    pub(crate) name: String,
    pub(crate) document: serde_json::Value,
}

/// The declarative provisioning set: ordered metric groups, then dashboards.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProvisioningConfig {
    pub(crate) metric_groups: Vec<Definition>,
    pub(crate) dashboards: Vec<Definition>,
}

#[derive(Deserialize)]
struct ConfigFile {
    config: ConfigSections,
}

#[derive(Deserialize)]
struct ConfigSections {
    metric_groups: Vec<serde_json::Value>,
    dashboards: Vec<serde_json::Value>,
}

impl ProvisioningConfig {
    /// Parses the declarative config document.  Any structural mismatch is
    /// reported as a single [`ConfigError`].
    pub(crate) fn parse(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;

        Ok(ProvisioningConfig {
            metric_groups: collect_definitions("metric_groups", file.config.metric_groups)?,
            dashboards: collect_definitions("dashboards", file.config.dashboards)?,
        })
    }
}

fn collect_definitions(
    section: &'static str,
    documents: Vec<serde_json::Value>,
) -> Result<Vec<Definition>, ConfigError> {
    documents
        .into_iter()
        .enumerate()
        .map(|(index, document)| {
            let name = document
                .get("name")
                .and_then(serde_json::Value::as_str)
                .ok_or(ConfigError::MissingName { section, index })?
                .to_owned();
            Ok(Definition { name, document })
        })
        .collect()
}

/// The kinds of remote objects the provisioning pass manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectKind {
    MetricGroup,
    Dashboard,
}

impl ObjectKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ObjectKind::MetricGroup => "metric group",
            ObjectKind::Dashboard => "dashboard",
        }
    }

    // Hidden metric groups must stay visible to the index and update calls,
    // hence the show_hidden flag on every metric-group URL that reads state.
    fn index_path(self) -> &'static str {
        match self {
            ObjectKind::MetricGroup => "/metric_groups.json?show_hidden=1",
            ObjectKind::Dashboard => "/dashboards.json",
        }
    }

    fn create_path(self) -> &'static str {
        match self {
            ObjectKind::MetricGroup => "/metric_groups.json",
            ObjectKind::Dashboard => "/dashboards.json",
        }
    }

    fn update_path(self, id: &str) -> String {
        match self {
            ObjectKind::MetricGroup => format!("/metric_groups/{id}.json?show_hidden=1"),
            ObjectKind::Dashboard => format!("/dashboards/{id}.json"),
        }
    }
}

/// A server-assigned object id, which the service reports as an integer for
/// some kinds and a string for others.  Normalized to a string everywhere.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum ObjectId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Numeric(id) => write!(f, "{id}"),
            ObjectId::Text(id) => f.write_str(id),
        }
    }
}

/// One entry of the remote object index.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RemoteObject {
    pub(crate) name: String,
    pub(crate) id: ObjectId,
}

/// The create-or-update decision for one declared definition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReconcileAction {
    Create { path: String },
    Update { path: String },
}

/// Decides create-vs-update by exact name match against the remote index.
pub(crate) fn plan(kind: ObjectKind, name: &str, index: &[RemoteObject]) -> ReconcileAction {
    match index.iter().find(|object| object.name == name) {
        Some(object) => ReconcileAction::Update {
            path: kind.update_path(&object.id.to_string()),
        },
        None => ReconcileAction::Create {
            path: kind.create_path().to_owned(),
        },
    }
}

/// Classifies a resolved metric-group identifier into the destination slot
/// it backs.  Case-insensitive substring match, tomcat before jvm, anything
/// else is the application group.
pub(crate) fn classify(resolved: &str) -> Destination {
    let lower = resolved.to_lowercase();
    if lower.contains("tomcat") {
        Destination::Tomcat
    } else if lower.contains("jvm") {
        Destination::Jvm
    } else {
        Destination::Application
    }
}

/// Picks the string classification runs on: the resolved identifier when it
/// is name-like, the declared name when the service handed back a purely
/// numeric id.
pub(crate) fn classification_key<'a>(resolved_id: &'a str, declared_name: &'a str) -> &'a str {
    // An empty id trivially satisfies all(), which is the fallback we want.
    if resolved_id.bytes().all(|byte| byte.is_ascii_digit()) {
        declared_name
    } else {
        resolved_id
    }
}

/// Resolved destination identifiers, written once per provisioning pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DestinationTable {
    jvm: Option<String>,
    tomcat: Option<String>,
    application: Option<String>,
}

impl DestinationTable {
    pub(crate) fn get(&self, destination: Destination) -> Option<&str> {
        match destination {
            Destination::Jvm => self.jvm.as_deref(),
            Destination::Tomcat => self.tomcat.as_deref(),
            Destination::Application => self.application.as_deref(),
        }
    }

    pub(crate) fn set(&mut self, destination: Destination, id: String) {
        let slot = match destination {
            Destination::Jvm => &mut self.jvm,
            Destination::Tomcat => &mut self.tomcat,
            Destination::Application => &mut self.application,
        };
        *slot = Some(id);
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: ObjectId,
}

/// Runs one reconciliation pass against the remote service.
pub(crate) struct Provisioner<'a> {
    pub(crate) client: &'a reqwest::Client,
    pub(crate) base_url: &'a str,
    pub(crate) token: &'a str,
    pub(crate) exceptions: &'a ExceptionCounter,
}

impl Provisioner<'_> {
    /// Reconciles the declared metric groups and maps the resolved ids onto
    /// the router's destinations.
    pub(crate) async fn ensure_metric_groups(&self, definitions: &[Definition]) -> DestinationTable {
        let mut table = DestinationTable::default();
        if definitions.is_empty() {
            return table;
        }

        let index = self.fetch_index(ObjectKind::MetricGroup).await;
        for definition in definitions {
            if let Some(id) = self.reconcile(ObjectKind::MetricGroup, definition, &index).await {
                let destination = classify(classification_key(&id, &definition.name));
                table.set(destination, id);
            }
        }
        table
    }

    /// Reconciles the declared dashboards.  Dashboards are provisioned for
    /// side effect only; nothing consumes their ids.
    pub(crate) async fn ensure_dashboards(&self, definitions: &[Definition]) {
        if definitions.is_empty() {
            return;
        }

        let index = self.fetch_index(ObjectKind::Dashboard).await;
        for definition in definitions {
            let _ = self.reconcile(ObjectKind::Dashboard, definition, &index).await;
        }
    }

    /// Fetches the remote object index for `kind`.  Any failure degrades to
    /// an empty index, which forces create-not-update for the whole pass.
    async fn fetch_index(&self, kind: ObjectKind) -> Vec<RemoteObject> {
        let url = format!("{}{}", self.base_url, kind.index_path());

        let response = match self
            .client
            .get(&url)
            .basic_auth(self.token, Some("U"))
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, %error, "failed to fetch {} index", kind.label());
                return Vec::new();
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, %error, "failed to read {} index response", kind.label());
                return Vec::new();
            }
        };

        if status.as_u16() != 200 {
            self.exceptions.bump();
            warn!(%url, %status, "bad response code from {} index", kind.label());
            return Vec::new();
        }

        match parse_index(&body) {
            Ok(index) => index,
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, %error, "unparseable {} index", kind.label());
                Vec::new()
            }
        }
    }

    /// Issues the create-or-update call for one definition and returns the
    /// resolved id.  Every failure is contained here so that one bad
    /// definition never aborts the remaining reconciliation.
    async fn reconcile(
        &self,
        kind: ObjectKind,
        definition: &Definition,
        index: &[RemoteObject],
    ) -> Option<String> {
        let (method, path) = match plan(kind, &definition.name, index) {
            ReconcileAction::Update { path } => (Method::PUT, path),
            ReconcileAction::Create { path } => (Method::POST, path),
        };
        let url = format!("{}{}", self.base_url, path);

        let body = match serde_json::to_vec(&definition.document) {
            Ok(body) => body,
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, name = %definition.name, %error,
                    "failed to serialize {} definition", kind.label());
                return None;
            }
        };

        let response = match self
            .client
            .request(method.clone(), &url)
            .basic_auth(self.token, Some("U"))
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, %method, name = %definition.name, %error,
                    "failed to reconcile {}", kind.label());
                return None;
            }
        };

        let status = response.status();
        // Read the body on every path: it is either the id payload or the
        // error detail, and reading it releases the connection either way.
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, %method, name = %definition.name, %error,
                    "failed to read {} reconcile response", kind.label());
                return None;
            }
        };

        if status.as_u16() != 200 {
            self.exceptions.bump();
            warn!(%url, %method, name = %definition.name, %status, error_body = %body,
                "bad response code reconciling {}", kind.label());
            return None;
        }

        match serde_json::from_str::<IdResponse>(&body) {
            Ok(parsed) => Some(parsed.id.to_string()),
            Err(error) => {
                self.exceptions.bump();
                warn!(%url, name = %definition.name, %error,
                    "no id in {} reconcile response", kind.label());
                None
            }
        }
    }
}

/// Decodes a remote index body.  Entries missing a name or id are skipped;
/// only a body that is not a JSON array at all is an error.
fn parse_index(body: &str) -> Result<Vec<RemoteObject>, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(body)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "config": {
            "metric_groups": [
                {"name": "JVM Metrics", "frequency": 5, "metrics": []},
                {"name": "Tomcat Metrics", "frequency": 5, "metrics": []}
            ],
            "dashboards": [
                {"name": "Overview", "data": {"widgets": []}}
            ]
        }
    }"#;

    #[test]
    fn config_parses_names_and_keeps_documents_verbatim() {
        let config = ProvisioningConfig::parse(CONFIG).unwrap();
        assert_eq!(config.metric_groups.len(), 2);
        assert_eq!(config.metric_groups[0].name, "JVM Metrics");
        assert_eq!(config.metric_groups[0].document["frequency"], 5);
        assert_eq!(config.dashboards.len(), 1);
        assert_eq!(config.dashboards[0].name, "Overview");
    }

    #[test]
    fn config_with_missing_sections_is_one_error() {
        assert!(matches!(
            ProvisioningConfig::parse(r#"{"config": {"metric_groups": []}}"#),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            ProvisioningConfig::parse(r#"{"metric_groups": [], "dashboards": []}"#),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            ProvisioningConfig::parse("not json at all"),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn config_definition_without_name_is_rejected() {
        let json = r#"{"config": {"metric_groups": [{"frequency": 5}], "dashboards": []}}"#;
        assert!(matches!(
            ProvisioningConfig::parse(json),
            Err(ConfigError::MissingName {
                section: "metric_groups",
                index: 0
            })
        ));
    }

    #[test]
    fn matched_name_plans_an_update_at_the_existing_id() {
        let index = vec![RemoteObject {
            name: "JVM Metrics".to_owned(),
            id: ObjectId::Numeric(42),
        }];

        let action = plan(ObjectKind::MetricGroup, "JVM Metrics", &index);
        assert_eq!(
            action,
            ReconcileAction::Update {
                path: "/metric_groups/42.json?show_hidden=1".to_owned()
            }
        );
    }

    #[test]
    fn unmatched_name_plans_a_create_at_the_collection() {
        let index = vec![RemoteObject {
            name: "Something Else".to_owned(),
            id: ObjectId::Numeric(7),
        }];

        let action = plan(ObjectKind::MetricGroup, "JVM Metrics", &index);
        assert_eq!(
            action,
            ReconcileAction::Create {
                path: "/metric_groups.json".to_owned()
            }
        );
    }

    #[test]
    fn dashboard_paths_carry_no_show_hidden_flag() {
        let index = vec![RemoteObject {
            name: "Overview".to_owned(),
            id: ObjectId::Text("overview_1".to_owned()),
        }];

        assert_eq!(
            plan(ObjectKind::Dashboard, "Overview", &index),
            ReconcileAction::Update {
                path: "/dashboards/overview_1.json".to_owned()
            }
        );
        assert_eq!(
            plan(ObjectKind::Dashboard, "Missing", &index),
            ReconcileAction::Create {
                path: "/dashboards.json".to_owned()
            }
        );
    }

    #[test]
    fn object_ids_decode_as_integer_or_string() {
        let numeric: ObjectId = serde_json::from_str("42").unwrap();
        assert_eq!(numeric.to_string(), "42");

        let text: ObjectId = serde_json::from_str("\"jvm_metrics\"").unwrap();
        assert_eq!(text.to_string(), "jvm_metrics");
    }

    #[test]
    fn index_entries_without_name_or_id_are_skipped() {
        let body = r#"[
            {"name": "JVM Metrics", "id": 42},
            {"id": 7},
            {"name": "No Id Here"},
            {"name": "Tomcat Metrics", "id": "tomcat_metrics"}
        ]"#;
        let index = parse_index(body).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].name, "JVM Metrics");
        assert_eq!(index[1].id.to_string(), "tomcat_metrics");
    }

    #[test]
    fn non_array_index_body_is_an_error() {
        assert!(parse_index(r#"{"name": "JVM Metrics"}"#).is_err());
    }

    #[test]
    fn classification_covers_the_three_destinations() {
        assert_eq!(classify("tomcat_metrics"), Destination::Tomcat);
        assert_eq!(classify("JVM Metrics"), Destination::Jvm);
        assert_eq!(classify("shop_backend"), Destination::Application);
    }

    // Substring classification is fragile on purpose-built names; this pins
    // the current behavior so a change to it is deliberate.
    #[test]
    fn classify_ambiguous_name_is_pinned() {
        assert_eq!(classify("App JVM Stats"), Destination::Jvm);
        assert_eq!(classify("jvm_tomcat_combined"), Destination::Tomcat);
    }

    #[test]
    fn numeric_ids_classify_on_the_declared_name() {
        assert_eq!(classification_key("42", "JVM Metrics"), "JVM Metrics");
        assert_eq!(classification_key("tomcat_metrics", "Tomcat Metrics"), "tomcat_metrics");
        assert_eq!(classification_key("", "JVM Metrics"), "JVM Metrics");
    }

    #[test]
    fn destination_table_resolves_per_destination() {
        let mut table = DestinationTable::default();
        assert_eq!(table.get(Destination::Jvm), None);

        table.set(Destination::Jvm, "jvm_metrics".to_owned());
        table.set(Destination::Tomcat, "tomcat_metrics".to_owned());
        assert_eq!(table.get(Destination::Jvm), Some("jvm_metrics"));
        assert_eq!(table.get(Destination::Tomcat), Some("tomcat_metrics"));
        assert_eq!(table.get(Destination::Application), None);
    }
}
