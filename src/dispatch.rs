use std::fmt::{Display, Formatter};

use crate::errors::GroupalarmError;

/// How an alarm is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// Create a live event
    Commit,
    /// Let Groupalarm check the alarm without creating an event
    Validate,
}

impl DispatchMode {
    /// Endpoint path relative to the API root
    pub fn path(&self) -> &'static str {
        match self {
            DispatchMode::Commit => "alarm",
            DispatchMode::Validate => "alarm/preview",
        }
    }
}

impl Display for DispatchMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Commit => write!(f, "commit"),
            DispatchMode::Validate => write!(f, "validate"),
        }
    }
}

/// Result of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A live event was created
    Triggered { event_id: Option<u64> },
    /// Groupalarm accepted the alarm in validate mode
    Validated,
    /// Groupalarm declined the alarm; resending it will not help
    Rejected(String),
    /// Groupalarm could not be reached or failed; the alarm may be resent
    TransportFailure(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Triggered { .. } | DispatchOutcome::Validated
        )
    }
}

impl From<GroupalarmError> for DispatchOutcome {
    fn from(err: GroupalarmError) -> Self {
        if err.is_retryable() {
            DispatchOutcome::TransportFailure(err.reason())
        } else {
            DispatchOutcome::Rejected(err.reason())
        }
    }
}

impl Display for DispatchOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Triggered { event_id: Some(id) } => {
                write!(f, "Alarm triggered (event {id})")
            }
            DispatchOutcome::Triggered { event_id: None } => write!(f, "Alarm triggered"),
            DispatchOutcome::Validated => write!(
                f,
                "Alarm configuration validated by Groupalarm, no alarm was emitted"
            ),
            DispatchOutcome::Rejected(reason) => {
                write!(f, "Alarm rejected by Groupalarm: {reason}")
            }
            DispatchOutcome::TransportFailure(reason) => {
                write!(f, "Could not deliver the alarm to Groupalarm: {reason}")
            }
        }
    }
}
