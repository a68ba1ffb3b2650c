use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

use crate::payload::Directory;
use crate::types::ResourceKind;

/// Result type alias for Groupalarm operations
pub type Result<T> = std::result::Result<T, GroupalarmError>;

/// Errors raised while loading or querying the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid YAML or has fields of the wrong type
    #[error("Failed to parse configuration: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// A login field is neither configured nor set in the environment
    #[error(
        "Missing login: the Groupalarm {field} must be provided either as `login.{key}` \
         in the configuration file or in the environment variable {env}"
    )]
    MissingLogin {
        field: &'static str,
        key: &'static str,
        env: &'static str,
    },

    /// The organization id is not a non-negative integer
    #[error("Invalid organization id {value:?}: expected a non-negative integer")]
    InvalidOrganizationId { value: String },

    /// An alarm entry violates the configuration schema
    #[error("Malformed alarm configuration for code {code}: {reason}")]
    MalformedAlarm { code: String, reason: String },

    /// No alarm is configured for the requested code
    #[error("Unknown alarm code {0}: no alarm configuration for this code")]
    UnknownAlarmCode(String),

    /// Any other invalid setting outside the alarm entries
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The configured resources leave nothing to alert
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("No {kind} left to alert after normalizing the alarm resources")]
    Empty { kind: ResourceKind },
}

/// The configured message cannot be sent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("The configured {field} is empty")]
    Empty { field: &'static str },
}

/// Invalid invocation input for building a trigger request
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Cannot interpret {input:?} as a date and time")]
    TimeParse { input: String },

    #[error("The alarm type must not be empty")]
    EmptyAlarmType,
}

/// Errors that can occur when preparing or sending an alarm
#[derive(Debug, Error)]
pub enum GroupalarmError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Request(#[from] RequestError),

    /// Failed to build HTTP client
    #[error("Failed to build HTTP client: {0}")]
    BuildHttpClient(#[source] reqwest::Error),

    /// The proxy settings were rejected by the HTTP client
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(#[source] reqwest::Error),

    /// An endpoint path could not be joined onto the API URL
    #[error("Invalid API endpoint {path}: {source}")]
    Endpoint {
        path: String,
        #[source]
        source: url::ParseError,
    },

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest_middleware::Error),

    /// The response body could not be read
    #[error("Failed to read response: {0}")]
    ReadResponse(#[source] reqwest::Error),

    /// The response body is not the expected JSON
    #[error("Failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Groupalarm API returned an error response
    #[error("Groupalarm API error: HTTP {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from Groupalarm
        message: String,
    },

    /// Configured names that do not exist in the organization
    #[error(
        "Did not find the following {kind} in the Groupalarm organization {organization_id}: {}",
        names.join(", ")
    )]
    UnknownEntities {
        kind: Directory,
        organization_id: u64,
        names: Vec<String>,
    },
}

impl GroupalarmError {
    /// Check if the error is retryable
    ///
    /// Returns `true` for:
    /// - Network/connection errors
    /// - Timeout errors
    /// - Server errors (5xx status codes)
    /// - Unreadable or undecodable responses
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::ReadResponse(_) | Self::Decode(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if the error is a client-side timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Http(reqwest_middleware::Error::Reqwest(err)) | Self::ReadResponse(err) => {
                err.is_timeout()
            }
            Self::Http(reqwest_middleware::Error::Middleware(err)) => err
                .downcast_ref::<reqwest::Error>()
                .is_some_and(reqwest::Error::is_timeout),
            _ => false,
        }
    }

    /// Short, human-readable reason used for dispatch outcomes
    pub fn reason(&self) -> String {
        if self.is_timeout() {
            return "timeout".to_string();
        }

        match self {
            Self::Api { status: 401, .. } => "unauthorized".to_string(),
            Self::Api { status: 403, .. } => "forbidden".to_string(),
            Self::Api { status, message } if message.is_empty() => format!("HTTP {status}"),
            Self::Api { status, message } => format!("HTTP {status}: {message}"),
            Self::Http(reqwest_middleware::Error::Reqwest(err)) if err.is_connect() => {
                match StdError::source(err) {
                    Some(cause) => format!("connection failed: {cause}"),
                    None => "connection failed".to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_retryable_5xx() {
        for status in [500, 502, 503] {
            let error = GroupalarmError::Api {
                status,
                message: "Server error".to_string(),
            };
            assert!(error.is_retryable());
        }
    }

    #[test]
    fn test_api_error_not_retryable_4xx() {
        for status in [400, 401, 404, 422] {
            let error = GroupalarmError::Api {
                status,
                message: "Client error".to_string(),
            };
            assert!(!error.is_retryable());
        }
    }

    #[test]
    fn test_error_display() {
        let error = GroupalarmError::Api {
            status: 500,
            message: "Internal server error".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Groupalarm API error: HTTP 500 - Internal server error"
        );
    }

    #[test]
    fn test_reason_for_auth_failures() {
        let error = GroupalarmError::Api {
            status: 401,
            message: "invalid token".to_string(),
        };
        assert_eq!(error.reason(), "unauthorized");

        let error = GroupalarmError::Api {
            status: 403,
            message: String::new(),
        };
        assert_eq!(error.reason(), "forbidden");
    }

    #[test]
    fn test_reason_for_other_statuses() {
        let error = GroupalarmError::Api {
            status: 422,
            message: "labels: amount too high".to_string(),
        };
        assert_eq!(error.reason(), "HTTP 422: labels: amount too high");

        let error = GroupalarmError::Api {
            status: 502,
            message: String::new(),
        };
        assert_eq!(error.reason(), "HTTP 502");
    }

    #[test]
    fn test_decode_error_is_retryable() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let error = GroupalarmError::Decode(json_err);
        assert!(error.is_retryable());
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_local_errors_not_retryable() {
        let error = GroupalarmError::from(ConfigError::UnknownAlarmCode("99999".to_string()));
        assert!(!error.is_retryable());

        let error = GroupalarmError::UnknownEntities {
            kind: Directory::Labels,
            organization_id: 1,
            names: vec!["Kraftfahrer".to_string()],
        };
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_unknown_entities_display() {
        let error = GroupalarmError::UnknownEntities {
            kind: Directory::Scenarios,
            organization_id: 12345,
            names: vec!["Hochwasser".to_string(), "Sturm".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Did not find the following scenarios in the Groupalarm organization 12345: Hochwasser, Sturm"
        );
    }

    #[test]
    fn test_config_errors_are_transparent() {
        let error = GroupalarmError::from(ConfigError::UnknownAlarmCode("99999".to_string()));
        assert_eq!(
            error.to_string(),
            "Unknown alarm code 99999: no alarm configuration for this code"
        );
    }
}
