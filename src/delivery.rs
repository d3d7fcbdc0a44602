//! Serialization and delivery of one same-epoch-second sample group.
//!
//! A group becomes a single JSON object keyed by the first sample's identity
//! and epoch-second, with one `values` field per sample.  Delivery is an
//! authenticated POST; any failure is logged and swallowed so that the next
//! group, and the next destination, still get their turn.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::common::{ExceptionCounter, RoutedSample};

/// Wire form of one delivery unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SamplePayload {
    identifier: String,
    timestamp: i64,
    values: IndexMap<String, serde_json::Number>,
}

/// Builds the payload for a group of same-epoch-second samples.
///
/// Fields accumulate in arrival order with last-write-wins semantics for
/// repeated names.  Values the wire format cannot represent (non-finite
/// floats) are skipped.  An empty group has no payload.
pub(crate) fn serialize_group(group: &[RoutedSample]) -> Option<SamplePayload> {
    let first = group.first()?;

    let mut values = IndexMap::new();
    for sample in group {
        if let Some(number) = sample.value.as_json_number() {
            values.insert(sample.name.clone(), number);
        }
    }

    Some(SamplePayload {
        identifier: first.identity.clone(),
        timestamp: first.epoch_seconds(),
        values,
    })
}

/// Posts one payload to the destination's samples endpoint.
///
/// The response body is read to completion on every path; leaving it
/// unread would strand the pooled connection under sustained export load.
pub(crate) async fn deliver(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    destination_id: &str,
    payload: &SamplePayload,
    exceptions: &ExceptionCounter,
) {
    let url = format!("{base_url}/samples/{destination_id}.json");

    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(error) => {
            exceptions.bump();
            warn!(%url, %error, "failed to serialize sample group");
            return;
        }
    };

    let response = match client
        .post(&url)
        .basic_auth(token, Some("U"))
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            exceptions.bump();
            warn!(%url, %error, "failed to send sample group");
            return;
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(error) => {
            exceptions.bump();
            warn!(%url, %error, "failed to drain sample response");
            return;
        }
    };

    if status.as_u16() != 200 {
        warn!(%url, %status, error_body = %body, "failure response sending sample group");
    } else {
        debug!(%url, fields = payload.values.len(), "delivered sample group");
    }
}
