//! Picks the message source of an alarm.

use crate::errors::MessageError;
use crate::types::{AlarmDefinition, MessageSpec, ResolvedMessage};

/// Resolve the message of an alarm
///
/// Literal text is sent verbatim. The dispatch code, alarm type and time
/// travel in the event name, not in the message. Templates are returned as
/// references and expanded by Groupalarm.
pub fn resolve(alarm: &AlarmDefinition) -> Result<ResolvedMessage, MessageError> {
    match &alarm.message {
        MessageSpec::Text(text) if text.trim().is_empty() => {
            Err(MessageError::Empty { field: "message" })
        }
        MessageSpec::Text(text) => Ok(ResolvedMessage::Text(text.clone())),
        MessageSpec::Template(name) if name.trim().is_empty() => Err(MessageError::Empty {
            field: "messageTemplate",
        }),
        MessageSpec::Template(name) => Ok(ResolvedMessage::Template(name.trim().to_string())),
    }
}
