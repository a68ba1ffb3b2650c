//! # Groupalarm Trigger
//!
//! Trigger [Groupalarm](https://www.groupalarm.com) alarms from a paging or
//! dispatch system.
//!
//! ## Features
//!
//! - One YAML file maps dispatch codes to the resources to alert and the message to send
//! - Alarm resources by labels with required amounts, scenarios, units or all users
//! - Literal messages or Groupalarm alarm templates
//! - Optional automatic closing of the created event
//! - Validate mode: Groupalarm checks the alarm without creating an event
//!
//! ## Example
//!
//! ```rust,no_run
//! use groupalarm_trigger::{request, Configuration, DispatchMode, GroupalarmClient, LoginSources};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::from_yaml_str(
//!         r#"
//! login:
//!   organization-id: 12345
//!   api-token: my-token
//! alarms:
//!   "09234":
//!     resources:
//!       labels:
//!         - Kraftfahrer: 1
//!     message: "Einsatz für die SEG"
//! "#,
//!         LoginSources::from_env(),
//!     )?;
//!
//!     let trigger = request::prepare(&config, "09234", "Einsatzalarmierung", "05.12.2021 19:51:52")?;
//!
//!     let client = GroupalarmClient::from_settings(
//!         &config.connection,
//!         config.credentials.api_token.clone(),
//!     )?;
//!     let outcome = client.dispatch(trigger, DispatchMode::Commit).await;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod dispatch;
mod errors;
pub mod message;
mod payload;
pub mod request;
pub mod resources;
mod types;

pub use client::GroupalarmClient;
pub use config::{
    default_config_path, ApiToken, Configuration, ConnectionSettings, Credentials, LoginSources,
    ProxyConfig, API_TOKEN_ENV, DEFAULT_API_URL, DEFAULT_TIMEOUT, ORGANIZATION_ID_ENV,
};
pub use dispatch::{DispatchMode, DispatchOutcome};
pub use errors::{ConfigError, GroupalarmError, MessageError, RequestError, ResourceError, Result};
pub use payload::{AlarmContent, AlarmPayload, AlarmResources, Directory, LabelAmount};
pub use types::{
    AlarmDefinition, LabelRequirement, MessageSpec, ResolvedMessage, ResourceKind, ResourceSpec,
    TriggerRequest,
};
