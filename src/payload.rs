//! Groupalarm wire format
//!
//! Groupalarm addresses labels, scenarios, units and templates by numeric
//! id. The payload types here carry ids; [`TriggerRequest`] carries names.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::types::TriggerRequest;

/// Name directories of an organization, used to look up ids by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directory {
    Labels,
    Scenarios,
    Units,
    AlarmTemplates,
}

impl Directory {
    /// Endpoint path relative to the API root
    pub fn path(&self) -> &'static str {
        match self {
            Directory::Labels => "labels",
            Directory::Scenarios => "scenarios",
            Directory::Units => "units",
            Directory::AlarmTemplates => "alarms/templates",
        }
    }

    /// Name of the query parameter carrying the organization id
    pub fn organization_param(&self) -> &'static str {
        match self {
            Directory::AlarmTemplates => "organization_id",
            _ => "organization",
        }
    }
}

impl Display for Directory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Directory::Labels => write!(f, "labels"),
            Directory::Scenarios => write!(f, "scenarios"),
            Directory::Units => write!(f, "units"),
            Directory::AlarmTemplates => write!(f, "alarm templates"),
        }
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub id: u64,
    pub name: String,
}

/// A label id with the number of members that must respond
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LabelAmount {
    pub amount: u32,
    #[serde(rename = "labelID")]
    pub label_id: u64,
}

/// `alarmResources` of the alarm payload, exactly one key
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlarmResources {
    AllUsers(bool),
    Labels(Vec<LabelAmount>),
    Scenarios(Vec<u64>),
    Units(Vec<u64>),
}

/// The alarm text: literal or by template id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmContent {
    Message(String),
    TemplateId(u64),
}

/// Body of `POST /alarm` and `POST /alarm/preview`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPayload {
    pub alarm_resources: AlarmResources,
    #[serde(rename = "organizationID")]
    pub organization_id: u64,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end_time: Option<String>,
    pub event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "alarmTemplateID", skip_serializing_if = "Option::is_none")]
    pub alarm_template_id: Option<u64>,
}

impl AlarmPayload {
    /// Combine a trigger request with the ids looked up for it
    pub fn new(request: &TriggerRequest, resources: AlarmResources, content: AlarmContent) -> Self {
        let (message, alarm_template_id) = match content {
            AlarmContent::Message(text) => (Some(text), None),
            AlarmContent::TemplateId(id) => (None, Some(id)),
        };

        Self {
            alarm_resources: resources,
            organization_id: request.organization_id,
            start_time: request
                .start_time_utc()
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            scheduled_end_time: request
                .scheduled_end_time()
                .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true)),
            event_name: request.event_name(),
            message,
            alarm_template_id,
        }
    }
}

/// Successful response of `POST /alarm`
///
/// Only the id is of interest; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmResponse {
    #[serde(rename = "eventID")]
    pub event_id: Option<u64>,
    pub id: Option<u64>,
}

impl AlarmResponse {
    pub fn event_id(&self) -> Option<u64> {
        self.event_id.or(self.id)
    }
}

/// Error body returned by Groupalarm, e.g.
/// `{"success": false, "message": "...", "error": "..."}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ServerError {
    /// One-line summary of the server's explanation, if it gave one
    pub fn summary(&self) -> Option<String> {
        let details = match &self.error {
            Some(serde_json::Value::String(text)) => Some(text.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        match (&self.message, details) {
            (Some(message), Some(details)) => Some(format!("{message} ({details})")),
            (Some(message), None) => Some(message.clone()),
            (None, Some(details)) => Some(details),
            (None, None) => None,
        }
    }
}
