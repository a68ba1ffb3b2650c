//! Configuration loading and validation
//!
//! The YAML file holds the Groupalarm login, the connection settings and
//! one alarm per dispatch code. Exclusive choices (resources, message) are
//! checked once while converting the raw document, so everything
//! downstream works with tagged enums only.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::ConfigError;
use crate::types::{AlarmDefinition, LabelRequirement, MessageSpec, ResourceSpec};

/// Groupalarm REST API root
pub const DEFAULT_API_URL: &str = "https://app.groupalarm.com/api/v1/";

/// Upper bound for every HTTP call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration file location, relative to the directory of the executable
pub const DEFAULT_CONFIG_FILE_PATH: &str = "../config/config.yaml";

/// Environment variable holding the organization id
pub const ORGANIZATION_ID_ENV: &str = "ORGANIZATION_ID";

/// Environment variable holding the API token
pub const API_TOKEN_ENV: &str = "API_TOKEN";

/// Selcall codes consist of five tones
const ALARM_CODE_LENGTH: usize = 5;

const TOP_LEVEL_KEYS: &[&str] = &["login", "proxy", "api-url", "timeout-seconds", "alarms"];
const LOGIN_KEYS: &[&str] = &["organization-id", "api-token"];
const PROXY_KEYS: &[&str] = &["address", "port", "username", "password"];
const ALARM_KEYS: &[&str] = &["resources", "message", "messageTemplate", "closeEventInHours"];
const RESOURCE_KEYS: &[&str] = &["allUsers", "labels", "scenarios", "units"];

/// Groupalarm API token, never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for ApiToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiToken(****)")
    }
}

/// The resolved login of one organization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub organization_id: u64,
    pub api_token: ApiToken,
}

/// One candidate source of login fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginSources {
    pub organization_id: Option<String>,
    pub api_token: Option<String>,
}

impl LoginSources {
    /// Read `ORGANIZATION_ID` and `API_TOKEN` from the process environment
    pub fn from_env() -> Self {
        Self {
            organization_id: std::env::var(ORGANIZATION_ID_ENV).ok(),
            api_token: std::env::var(API_TOKEN_ENV).ok(),
        }
    }
}

impl Credentials {
    /// Resolve the login field by field, the configuration file first and
    /// the environment as fallback. Blank values count as missing.
    pub fn resolve(
        configured: LoginSources,
        environment: LoginSources,
    ) -> Result<Self, ConfigError> {
        let organization_id = pick(
            ORGANIZATION_ID_ENV,
            configured.organization_id,
            environment.organization_id,
        )
        .ok_or(ConfigError::MissingLogin {
            field: "organization id",
            key: "organization-id",
            env: ORGANIZATION_ID_ENV,
        })?;

        let api_token = pick(API_TOKEN_ENV, configured.api_token, environment.api_token).ok_or(
            ConfigError::MissingLogin {
                field: "API token",
                key: "api-token",
                env: API_TOKEN_ENV,
            },
        )?;

        Ok(Self {
            organization_id: parse_organization_id(&organization_id)?,
            api_token: ApiToken::new(api_token),
        })
    }
}

fn pick(env: &str, configured: Option<String>, environment: Option<String>) -> Option<String> {
    let configured = configured.filter(|value| !value.trim().is_empty());
    let environment = environment.filter(|value| !value.trim().is_empty());

    if configured.is_some() && environment.is_some() {
        debug!(env, "Configuration file takes precedence over the environment");
    }

    configured.or(environment)
}

fn parse_organization_id(value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOrganizationId {
            value: value.to_string(),
        })
}

/// HTTPS proxy for all Groupalarm calls
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL without credentials; `http://` unless the address has a scheme
    pub fn url(&self) -> String {
        if self.address.contains("://") {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

impl Debug for ProxyConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Where and how to reach Groupalarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub api_url: Url,
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl ConnectionSettings {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url: with_trailing_slash(api_url),
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
        }
    }

    fn from_raw(
        api_url: Option<String>,
        timeout_seconds: Option<u64>,
        proxy: Option<ProxyConfig>,
    ) -> Result<Self, ConfigError> {
        let api_url = api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        let api_url = Url::parse(api_url)
            .map_err(|err| ConfigError::Invalid(format!("api-url {api_url:?}: {err}")))?;

        let timeout = match timeout_seconds {
            None => DEFAULT_TIMEOUT,
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "timeout-seconds must be greater than 0".to_string(),
                ))
            }
            Some(seconds) => Duration::from_secs(seconds),
        };

        Ok(Self {
            api_url: with_trailing_slash(api_url),
            timeout,
            proxy,
        })
    }
}

/// Relative endpoint paths are joined onto the API root, which only keeps
/// the last path segment when the root ends with `/`.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// The loaded configuration
///
/// Immutable after loading; one alarm definition per dispatch code.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub credentials: Credentials,
    pub connection: ConnectionSettings,
    alarms: BTreeMap<String, AlarmDefinition>,
}

impl Configuration {
    /// Load a configuration file, with the process environment as login fallback
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&content, LoginSources::from_env())
    }

    /// Parse and validate a YAML document
    ///
    /// Alarm entries are validated before the login is resolved, so schema
    /// errors are reported even when credentials are missing.
    pub fn from_yaml_str(yaml: &str, environment: LoginSources) -> Result<Self, ConfigError> {
        check_top_level_keys(yaml)?;
        let raw: RawConfig = serde_yaml::from_str(yaml).map_err(ConfigError::Parse)?;

        let alarms = raw
            .alarms
            .unwrap_or_default()
            .into_iter()
            .map(|(code, alarm)| {
                if code.chars().count() != ALARM_CODE_LENGTH {
                    return Err(malformed(
                        &code,
                        format!("alarm codes have exactly {ALARM_CODE_LENGTH} characters"),
                    ));
                }
                let definition = alarm.into_definition(&code)?;
                Ok((code, definition))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let proxy = raw.proxy.map(RawProxy::into_proxy_config).transpose()?;
        let connection = ConnectionSettings::from_raw(raw.api_url, raw.timeout_seconds, proxy)?;

        let configured = match raw.login {
            Some(login) => login.into_sources()?,
            None => LoginSources::default(),
        };
        let credentials = Credentials::resolve(configured, environment)?;

        debug!(
            alarm_count = alarms.len(),
            organization_id = credentials.organization_id,
            api_url = %connection.api_url,
            "Configuration loaded"
        );

        Ok(Self {
            credentials,
            connection,
            alarms,
        })
    }

    /// The alarm configured for a dispatch code
    pub fn alarm(&self, code: &str) -> Result<&AlarmDefinition, ConfigError> {
        self.alarms
            .get(code)
            .ok_or_else(|| ConfigError::UnknownAlarmCode(code.to_string()))
    }

    /// All configured alarms, ordered by code
    pub fn alarms(&self) -> impl Iterator<Item = (&str, &AlarmDefinition)> {
        self.alarms.iter().map(|(code, alarm)| (code.as_str(), alarm))
    }
}

/// `../config/config.yaml` next to the running executable
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_CONFIG_FILE_PATH)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    login: Option<RawLogin>,
    #[serde(default)]
    proxy: Option<RawProxy>,
    #[serde(default, rename = "api-url")]
    api_url: Option<String>,
    #[serde(default, rename = "timeout-seconds")]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    alarms: Option<BTreeMap<String, RawAlarm>>,
}

/// Top-level keys are checked on a generic mapping first; the typed pass
/// reads the alarm codes straight from the document.
fn check_top_level_keys(yaml: &str) -> Result<(), ConfigError> {
    let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(ConfigError::Parse)?;

    if let Some(mapping) = document.as_mapping() {
        check_collisions(
            mapping.keys().filter_map(serde_yaml::Value::as_str),
            TOP_LEVEL_KEYS,
        )
        .map_err(ConfigError::Invalid)?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawProxy {
    address: String,
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl RawProxy {
    fn into_proxy_config(self) -> Result<ProxyConfig, ConfigError> {
        check_collisions(self.extra.keys().map(String::as_str), PROXY_KEYS)
            .map_err(|reason| ConfigError::Invalid(format!("proxy: {reason}")))?;

        Ok(ProxyConfig {
            address: self.address,
            port: self.port,
            username: self.username,
            password: self.password,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawLogin {
    #[serde(default, rename = "organization-id")]
    organization_id: Option<RawOrganizationId>,
    #[serde(default, rename = "api-token")]
    api_token: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOrganizationId {
    Number(i64),
    Text(String),
}

impl RawLogin {
    fn into_sources(self) -> Result<LoginSources, ConfigError> {
        check_collisions(self.extra.keys().map(String::as_str), LOGIN_KEYS)
            .map_err(|reason| ConfigError::Invalid(format!("login: {reason}")))?;

        Ok(LoginSources {
            organization_id: self.organization_id.map(|id| match id {
                RawOrganizationId::Number(number) => number.to_string(),
                RawOrganizationId::Text(text) => text,
            }),
            api_token: self.api_token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawAlarm {
    #[serde(default)]
    resources: Option<RawResources>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "messageTemplate")]
    message_template: Option<String>,
    #[serde(default, rename = "closeEventInHours")]
    close_event_in_hours: Option<i64>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl RawAlarm {
    fn into_definition(self, code: &str) -> Result<AlarmDefinition, ConfigError> {
        check_collisions(self.extra.keys().map(String::as_str), ALARM_KEYS).map_err(|reason| malformed(code, reason))?;

        let resources = self
            .resources
            .ok_or_else(|| malformed(code, "no alarm resources configured".to_string()))?
            .into_resource_spec()
            .map_err(|reason| malformed(code, reason))?;

        let message = match (self.message, self.message_template) {
            (Some(text), None) => MessageSpec::Text(text),
            (None, Some(template)) => MessageSpec::Template(template),
            (Some(_), Some(_)) => {
                return Err(malformed(
                    code,
                    "message and messageTemplate are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(malformed(
                    code,
                    "no alarm message configured, expected message or messageTemplate".to_string(),
                ))
            }
        };

        let close_event_in_hours = match self.close_event_in_hours {
            None => None,
            Some(hours) if hours >= 1 => Some(u32::try_from(hours).map_err(|_| {
                malformed(code, format!("closeEventInHours {hours} is too large"))
            })?),
            Some(hours) => {
                return Err(malformed(
                    code,
                    format!("closeEventInHours must be a positive number of hours, got {hours}"),
                ))
            }
        };

        Ok(AlarmDefinition {
            resources,
            message,
            close_event_in_hours,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawResources {
    #[serde(default, rename = "allUsers")]
    all_users: Option<bool>,
    #[serde(default)]
    labels: Option<Vec<BTreeMap<String, i64>>>,
    #[serde(default)]
    scenarios: Option<Vec<String>>,
    #[serde(default)]
    units: Option<Vec<String>>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl RawResources {
    fn into_resource_spec(self) -> Result<ResourceSpec, String> {
        check_collisions(self.extra.keys().map(String::as_str), RESOURCE_KEYS)?;

        // `allUsers: false` is the same as leaving it out
        let all_users = self.all_users.unwrap_or(false);

        match (all_users, self.labels, self.scenarios, self.units) {
            (true, None, None, None) => Ok(ResourceSpec::AllUsers),
            (false, Some(labels), None, None) => labels
                .into_iter()
                .map(label_requirement)
                .collect::<Result<Vec<_>, _>>()
                .map(ResourceSpec::Labels),
            (false, None, Some(names), None) => Ok(ResourceSpec::Scenarios(names)),
            (false, None, None, Some(names)) => Ok(ResourceSpec::Units(names)),
            (false, None, None, None) => Err(
                "no alarm resources configured, expected one of allUsers, labels, scenarios or units"
                    .to_string(),
            ),
            (all_users, labels, scenarios, units) => {
                let populated: Vec<&str> = [
                    (all_users, "allUsers"),
                    (labels.is_some(), "labels"),
                    (scenarios.is_some(), "scenarios"),
                    (units.is_some(), "units"),
                ]
                .into_iter()
                .filter_map(|(set, key)| set.then_some(key))
                .collect();

                Err(format!(
                    "resources {} are mutually exclusive, configure exactly one",
                    populated.join(" and ")
                ))
            }
        }
    }
}

fn label_requirement(entry: BTreeMap<String, i64>) -> Result<LabelRequirement, String> {
    let mut pairs = entry.into_iter();

    match (pairs.next(), pairs.next()) {
        (Some((name, amount)), None) => {
            if amount < 1 {
                return Err(format!(
                    "label {name} needs a count of at least 1, got {amount}"
                ));
            }
            let amount =
                u32::try_from(amount).map_err(|_| format!("label {name} count {amount} is too large"))?;
            Ok(LabelRequirement { name, amount })
        }
        _ => Err("each label entry must be a single `name: count` pair".to_string()),
    }
}

fn malformed(code: &str, reason: String) -> ConfigError {
    ConfigError::MalformedAlarm {
        code: code.to_string(),
        reason,
    }
}

/// Unknown keys are ignored, except near-misses of a known key such as
/// `message_template` or `close-event-in-hours`.
fn check_collisions<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    known: &[&str],
) -> Result<(), String> {
    for key in keys.into_iter().filter(|key| !known.contains(key)) {
        let normalized = normalize_key(key);
        if let Some(known_key) = known.iter().find(|known| normalize_key(known) == normalized) {
            return Err(format!("key `{key}` collides with `{known_key}`"));
        }
    }
    Ok(())
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}
