use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Prefix of every event name created by this tool
pub const EVENT_NAME_PREFIX: &str = "[Funkmelderalarm]";

/// Format of the alarm time inside the event name
pub const EVENT_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// The kind of resource an alarm targets
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    AllUsers,
    Labels,
    Scenarios,
    Units,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::AllUsers => write!(f, "allUsers"),
            ResourceKind::Labels => write!(f, "labels"),
            ResourceKind::Scenarios => write!(f, "scenarios"),
            ResourceKind::Units => write!(f, "units"),
        }
    }
}

/// A label that must be alerted until `amount` members have responded
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LabelRequirement {
    pub name: String,
    pub amount: u32,
}

impl LabelRequirement {
    pub fn new(name: &str, amount: u32) -> Self {
        Self {
            name: name.to_string(),
            amount,
        }
    }
}

/// The resources an alarm is sent to
///
/// Exactly one kind per alarm. Names are resolved to Groupalarm ids only
/// when the request is sent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ResourceSpec {
    AllUsers,
    Labels(Vec<LabelRequirement>),
    Scenarios(Vec<String>),
    Units(Vec<String>),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::AllUsers => ResourceKind::AllUsers,
            ResourceSpec::Labels(_) => ResourceKind::Labels,
            ResourceSpec::Scenarios(_) => ResourceKind::Scenarios,
            ResourceSpec::Units(_) => ResourceKind::Units,
        }
    }

    /// `true` if no resource is named at all
    pub fn is_empty(&self) -> bool {
        match self {
            ResourceSpec::AllUsers => false,
            ResourceSpec::Labels(labels) => labels.is_empty(),
            ResourceSpec::Scenarios(names) | ResourceSpec::Units(names) => names.is_empty(),
        }
    }
}

/// Where the alarm text comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSpec {
    /// Literal message text
    Text(String),
    /// Name of an alarm template stored at Groupalarm
    Template(String),
}

/// The alarm configured for one dispatch code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmDefinition {
    pub resources: ResourceSpec,
    pub message: MessageSpec,
    /// Close the event automatically after this many hours
    pub close_event_in_hours: Option<u32>,
}

/// The message source after resolution
///
/// Templates stay references; Groupalarm expands them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ResolvedMessage {
    Text(String),
    Template(String),
}

/// A fully resolved alarm, ready to be dispatched
///
/// Built once per invocation by [`crate::request::build`]. Both dispatch
/// modes send exactly this request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub organization_id: u64,
    pub code: String,
    pub resources: ResourceSpec,
    pub message: ResolvedMessage,
    pub alarm_type: String,
    /// The time point the alarm was received
    pub start_time: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_event_in_hours: Option<u32>,
}

impl TriggerRequest {
    /// Event name shown in Groupalarm, e.g.
    /// `[Funkmelderalarm] Schleife 09234 05.12.2021 19:51:52 (Einsatzalarmierung)`
    pub fn event_name(&self) -> String {
        format!(
            "{EVENT_NAME_PREFIX} Schleife {} {} ({})",
            self.code,
            self.start_time.format(EVENT_TIME_FORMAT),
            self.alarm_type
        )
    }

    pub fn start_time_utc(&self) -> DateTime<Utc> {
        self.start_time.with_timezone(&Utc)
    }

    /// When the event should be closed, if auto-closing is configured
    pub fn scheduled_end_time(&self) -> Option<DateTime<Utc>> {
        self.close_event_in_hours
            .map(|hours| self.start_time_utc() + Duration::hours(i64::from(hours)))
    }
}
