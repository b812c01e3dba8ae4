use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};


/// One event as returned by the upstream events endpoint.
///
/// Only the fields used for rendering are typed; everything else the API
/// sends is kept in `extra` so a persisted snapshot round-trips verbatim.
/// Absent typed fields stay absent on the way back out.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventRecord {
pub id: i64,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub name: Option<String>,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub location: Option<String>,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub kind: Option<String>,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub begin_at: Option<String>,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub end_at: Option<String>,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub max_people: Option<i64>,
#[serde(default, skip_serializing_if = "Option::is_none")]
pub description: Option<String>,
#[serde(flatten)]
pub extra: serde_json::Map<String, serde_json::Value>,
}


#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CredentialSnapshot {
pub has_token: bool,
pub token_expires_at: Option<DateTime<Utc>>,
pub secret_expires_at: Option<DateTime<Utc>>,
pub secret_seconds_left: Option<i64>,
pub notified_thresholds: Vec<String>,
}
