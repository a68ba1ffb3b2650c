//! Builds the trigger request for one invocation.
//!
//! Nothing here does I/O: the same inputs always produce the same
//! [`TriggerRequest`].

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone};
use tracing::debug;

use crate::config::{Configuration, Credentials};
use crate::errors::{RequestError, Result};
use crate::types::{AlarmDefinition, ResolvedMessage, ResourceSpec, TriggerRequest};
use crate::{message, resources};

/// Date-time formats with an explicit UTC offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Local date-time formats, tried in order
///
/// Two-digit years come before four-digit ones, since `%Y` also accepts
/// two digits.
const DATE_TIME_FORMATS: &[&str] = &[
    "%d.%m.%y %H:%M:%S",
    "%d.%m.%y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%H:%M:%S %d.%m.%Y",
    "%H:%M %d.%m.%Y",
];

/// Date-only formats, read as midnight
const DATE_FORMATS: &[&str] = &["%d.%m.%y", "%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"];

/// Interpret a caller-supplied time point
///
/// Accepts RFC 3339 and the common German and ISO notations, with or
/// without seconds. Times without an offset are wall-clock times of the
/// local time zone.
pub fn parse_time_point(input: &str) -> std::result::Result<DateTime<FixedOffset>, RequestError> {
    let normalized = input
        .replace(',', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let parse_error = || RequestError::TimeParse {
        input: input.to_string(),
    };

    if normalized.is_empty() {
        return Err(parse_error());
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(time);
    }

    for format in OFFSET_FORMATS {
        if let Ok(time) = DateTime::parse_from_str(&normalized, format) {
            return Ok(time);
        }
    }

    let naive = DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|format| {
                NaiveDate::parse_from_str(&normalized, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        })
        .ok_or_else(parse_error)?;

    // `earliest` picks the first of two ambiguous times and fails only for
    // wall-clock times skipped by a DST change
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|time| time.fixed_offset())
        .ok_or_else(parse_error)
}

/// Combine the resolved pieces of an alarm into a trigger request
pub fn build(
    credentials: &Credentials,
    code: &str,
    alarm: &AlarmDefinition,
    resources: ResourceSpec,
    message: ResolvedMessage,
    alarm_type: &str,
    time_point: &str,
) -> std::result::Result<TriggerRequest, RequestError> {
    if alarm_type.trim().is_empty() {
        return Err(RequestError::EmptyAlarmType);
    }

    let start_time = parse_time_point(time_point)?;

    Ok(TriggerRequest {
        organization_id: credentials.organization_id,
        code: code.to_string(),
        resources,
        message,
        alarm_type: alarm_type.to_string(),
        start_time,
        close_event_in_hours: alarm.close_event_in_hours,
    })
}

/// Look up the alarm for `code` and build its trigger request
pub fn prepare(
    config: &Configuration,
    code: &str,
    alarm_type: &str,
    time_point: &str,
) -> Result<TriggerRequest> {
    let alarm = config.alarm(code)?;
    let resources = resources::resolve(alarm)?;
    let message = message::resolve(alarm)?;

    let request = build(
        &config.credentials,
        code,
        alarm,
        resources,
        message,
        alarm_type,
        time_point,
    )?;

    debug!(
        code,
        resource_kind = %request.resources.kind(),
        start_time = %request.start_time,
        "Trigger request prepared"
    );

    Ok(request)
}
