use reqwest::{Client, Proxy, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{with_trailing_slash, ApiToken, ConnectionSettings, ProxyConfig};
use crate::dispatch::{DispatchMode, DispatchOutcome};
use crate::errors::{GroupalarmError, Result};
use crate::payload::{
    AlarmContent, AlarmPayload, AlarmResources, AlarmResponse, Directory, Entity, LabelAmount,
    ServerError,
};
use crate::types::{ResolvedMessage, ResourceSpec, TriggerRequest};

/// Header carrying the Groupalarm API token
const API_TOKEN_HEADER: &str = "API-Token";

/// Client for triggering alarms on Groupalarm
///
/// # Example
///
/// ```rust,no_run
/// use groupalarm_trigger::{request, Configuration, DispatchMode, GroupalarmClient};
/// use std::path::Path;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Configuration::load(Path::new("config/config.yaml"))?;
///     let client = GroupalarmClient::from_settings(
///         &config.connection,
///         config.credentials.api_token.clone(),
///     )?;
///
///     let trigger = request::prepare(&config, "09234", "Probealarm", "05.12.2021 19:51:52")?;
///     let outcome = client.dispatch(trigger, DispatchMode::Validate).await;
///     println!("{outcome}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct GroupalarmClient {
    client: ClientWithMiddleware,
    api_url: Url,
    api_token: ApiToken,
}

impl GroupalarmClient {
    /// Create a new Groupalarm client
    ///
    /// # Arguments
    ///
    /// * `api_url` - Root of the REST API (e.g., `https://app.groupalarm.com/api/v1`)
    /// * `api_token` - Token of the organization
    /// * `timeout` - Request timeout duration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: Url, api_token: ApiToken, timeout: Duration) -> Result<Self> {
        Self::build(api_url, api_token, timeout, None)
    }

    /// Create a client from the connection settings of the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy settings are invalid or the HTTP client
    /// cannot be built.
    pub fn from_settings(settings: &ConnectionSettings, api_token: ApiToken) -> Result<Self> {
        Self::build(
            settings.api_url.clone(),
            api_token,
            settings.timeout,
            settings.proxy.as_ref(),
        )
    }

    /// Create a new client with a custom reqwest middleware client
    ///
    /// This allows you to add custom middleware (logging, tracing, etc.)
    pub fn with_client(client: ClientWithMiddleware, api_url: Url, api_token: ApiToken) -> Self {
        Self {
            client,
            api_url: with_trailing_slash(api_url),
            api_token,
        }
    }

    fn build(
        api_url: Url,
        api_token: ApiToken,
        timeout: Duration,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);

        if let Some(proxy) = proxy {
            debug!(proxy = %proxy.url(), "Using HTTPS proxy");
            builder = builder.proxy(https_proxy(proxy)?);
        }

        let client = builder.build().map_err(GroupalarmError::BuildHttpClient)?;
        let client = ClientBuilder::new(client).build();

        Ok(Self::with_client(client, api_url, api_token))
    }

    /// Get the base API URL
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|source| GroupalarmError::Endpoint {
                path: path.to_string(),
                source,
            })
    }

    /// Look up the ids of named entities in one directory of an organization
    ///
    /// The ids are returned in the order of `names`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The HTTP request fails
    /// - Groupalarm returns a non-success status code
    /// - Any of the names does not exist in the organization
    #[instrument(
        name = "GroupalarmClient::lookup_ids",
        skip_all,
        fields(directory = %directory, name_count = names.len())
    )]
    pub async fn lookup_ids(
        &self,
        directory: Directory,
        organization_id: u64,
        names: &[String],
    ) -> Result<Vec<u64>> {
        let url = self.endpoint(directory.path())?;

        debug!(url = %url, "Looking up entity ids");

        let response = self
            .client
            .get(url)
            .query(&[(directory.organization_param(), organization_id)])
            .header(API_TOKEN_HEADER, self.api_token.expose())
            .send()
            .await
            .map_err(GroupalarmError::Http)?;

        let body = success_body(response).await?;
        let entities: Vec<Entity> = serde_json::from_str(&body).map_err(GroupalarmError::Decode)?;

        let ids_by_name: HashMap<&str, u64> = entities
            .iter()
            .map(|entity| (entity.name.as_str(), entity.id))
            .collect();

        let mut ids = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match ids_by_name.get(name.as_str()) {
                Some(id) => ids.push(*id),
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(GroupalarmError::UnknownEntities {
                kind: directory,
                organization_id,
                names: missing,
            });
        }

        Ok(ids)
    }

    async fn lookup_id(&self, directory: Directory, organization_id: u64, name: &str) -> Result<u64> {
        let names = [name.to_string()];
        self.lookup_ids(directory, organization_id, &names)
            .await?
            .pop()
            .ok_or_else(|| GroupalarmError::UnknownEntities {
                kind: directory,
                organization_id,
                names: names.to_vec(),
            })
    }

    /// Translate a trigger request into the alarm payload
    ///
    /// Only the directories the request needs are queried.
    pub async fn resolve_payload(&self, request: &TriggerRequest) -> Result<AlarmPayload> {
        let organization_id = request.organization_id;

        let resources = match &request.resources {
            ResourceSpec::AllUsers => AlarmResources::AllUsers(true),
            ResourceSpec::Labels(labels) => {
                let names: Vec<String> = labels.iter().map(|label| label.name.clone()).collect();
                let ids = self
                    .lookup_ids(Directory::Labels, organization_id, &names)
                    .await?;
                AlarmResources::Labels(
                    labels
                        .iter()
                        .zip(ids)
                        .map(|(label, label_id)| LabelAmount {
                            amount: label.amount,
                            label_id,
                        })
                        .collect(),
                )
            }
            ResourceSpec::Scenarios(names) => AlarmResources::Scenarios(
                self.lookup_ids(Directory::Scenarios, organization_id, names)
                    .await?,
            ),
            ResourceSpec::Units(names) => AlarmResources::Units(
                self.lookup_ids(Directory::Units, organization_id, names)
                    .await?,
            ),
        };

        let content = match &request.message {
            ResolvedMessage::Text(text) => AlarmContent::Message(text.clone()),
            ResolvedMessage::Template(name) => AlarmContent::TemplateId(
                self.lookup_id(Directory::AlarmTemplates, organization_id, name)
                    .await?,
            ),
        };

        Ok(AlarmPayload::new(request, resources, content))
    }

    /// Send an alarm payload
    ///
    /// Returns the id of the created event in [`DispatchMode::Commit`] when
    /// Groupalarm reports one.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The HTTP request fails
    /// - Groupalarm returns a non-success status code
    #[instrument(
        name = "GroupalarmClient::send_alarm",
        skip_all,
        fields(mode = %mode)
    )]
    pub async fn send_alarm(&self, payload: &AlarmPayload, mode: DispatchMode) -> Result<Option<u64>> {
        let url = self.endpoint(mode.path())?;

        debug!(url = %url, event_name = %payload.event_name, "Sending alarm to Groupalarm");

        let response = self
            .client
            .post(url)
            .header(API_TOKEN_HEADER, self.api_token.expose())
            .json(payload)
            .send()
            .await
            .map_err(GroupalarmError::Http)?;

        let body = success_body(response).await?;

        let event_id = serde_json::from_str::<AlarmResponse>(&body)
            .ok()
            .and_then(|response| response.event_id());

        debug!(?event_id, "Alarm accepted");
        Ok(event_id)
    }

    async fn try_dispatch(&self, request: &TriggerRequest, mode: DispatchMode) -> Result<Option<u64>> {
        let payload = self.resolve_payload(request).await?;
        self.send_alarm(&payload, mode).await
    }

    /// Dispatch a trigger request
    ///
    /// Both modes resolve the same payload; [`DispatchMode::Validate`] only
    /// posts it to the preview endpoint, which never creates an event. One
    /// attempt is made, there is no retry.
    #[instrument(
        name = "GroupalarmClient::dispatch",
        skip_all,
        fields(code = %request.code, mode = %mode)
    )]
    pub async fn dispatch(&self, request: TriggerRequest, mode: DispatchMode) -> DispatchOutcome {
        match self.try_dispatch(&request, mode).await {
            Ok(event_id) => match mode {
                DispatchMode::Commit => DispatchOutcome::Triggered { event_id },
                DispatchMode::Validate => DispatchOutcome::Validated,
            },
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "Dispatch failed");
                DispatchOutcome::from(err)
            }
        }
    }
}

fn https_proxy(config: &ProxyConfig) -> Result<Proxy> {
    let proxy = Proxy::https(config.url()).map_err(GroupalarmError::InvalidProxy)?;

    Ok(match &config.username {
        Some(username) => proxy.basic_auth(username, config.password.as_deref().unwrap_or("")),
        None => proxy,
    })
}

/// Return the body of a successful response, or the API error it carries
async fn success_body(response: Response) -> Result<String> {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        // The status alone decides a client error
        Err(err) if status.is_client_error() => {
            warn!(status = status.as_u16(), error = %err, "Could not read the error body");
            String::new()
        }
        Err(err) => return Err(GroupalarmError::ReadResponse(err)),
    };

    if status.is_success() {
        return Ok(body);
    }

    let server_error = serde_json::from_str::<ServerError>(&body).ok();
    let message = match server_error.as_ref().and_then(ServerError::summary) {
        Some(summary) => {
            warn!(status = status.as_u16(), %summary, "Groupalarm reported an error");
            summary
        }
        None => body,
    };

    Err(GroupalarmError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabelRequirement;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GroupalarmClient {
        client_with_timeout(server, Duration::from_secs(10))
    }

    fn client_with_timeout(server: &MockServer, timeout: Duration) -> GroupalarmClient {
        GroupalarmClient::new(
            Url::parse(&format!("{}/api/v1", server.uri())).unwrap(),
            ApiToken::new("test-token"),
            timeout,
        )
        .unwrap()
    }

    fn request(resources: ResourceSpec, message: ResolvedMessage) -> TriggerRequest {
        TriggerRequest {
            organization_id: 12345,
            code: "09234".to_string(),
            resources,
            message,
            alarm_type: "Einsatzalarmierung".to_string(),
            start_time: FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2021, 12, 5, 19, 51, 52)
                .unwrap(),
            close_event_in_hours: None,
        }
    }

    fn label_request() -> TriggerRequest {
        request(
            ResourceSpec::Labels(vec![LabelRequirement::new("Kraftfahrer", 1)]),
            ResolvedMessage::Text("Einsatz für die SEG".to_string()),
        )
    }

    async fn mount_labels(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1/labels"))
            .and(query_param("organization", "12345"))
            .and(header("API-Token", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 7, "name": "Kraftfahrer", "color": "#ff0000"},
                {"id": 8, "name": "Sanitäter"}
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_lookup_ids_in_requested_order() {
        let server = MockServer::start().await;
        mount_labels(&server).await;

        let ids = client(&server)
            .lookup_ids(
                Directory::Labels,
                12345,
                &["Sanitäter".to_string(), "Kraftfahrer".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(ids, vec![8, 7]);
    }

    #[tokio::test]
    async fn test_lookup_reports_every_missing_name() {
        let server = MockServer::start().await;
        mount_labels(&server).await;

        let result = client(&server)
            .lookup_ids(
                Directory::Labels,
                12345,
                &[
                    "Atemschutz".to_string(),
                    "Kraftfahrer".to_string(),
                    "Maschinist".to_string(),
                ],
            )
            .await;

        match result {
            Err(GroupalarmError::UnknownEntities { kind, names, .. }) => {
                assert_eq!(kind, Directory::Labels);
                assert_eq!(names, vec!["Atemschutz", "Maschinist"]);
            }
            other => panic!("Expected UnknownEntities error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_template_lookup_uses_organization_id_param() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/alarms/templates"))
            .and(query_param("organization_id", "12345"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": 42, "name": "Standardalarm"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let payload = client(&server)
            .resolve_payload(&request(
                ResourceSpec::AllUsers,
                ResolvedMessage::Template("Standardalarm".to_string()),
            ))
            .await
            .unwrap();

        assert_eq!(payload.alarm_template_id, Some(42));
        assert_eq!(payload.message, None);
        assert_eq!(payload.alarm_resources, AlarmResources::AllUsers(true));
    }

    #[tokio::test]
    async fn test_commit_posts_alarm() {
        let server = MockServer::start().await;
        mount_labels(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm"))
            .and(header("API-Token", "test-token"))
            .and(body_json(json!({
                "alarmResources": {"labels": [{"amount": 1, "labelID": 7}]},
                "organizationID": 12345,
                "startTime": "2021-12-05T18:51:52Z",
                "eventName": "[Funkmelderalarm] Schleife 09234 05.12.2021 19:51:52 (Einsatzalarmierung)",
                "message": "Einsatz für die SEG"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"eventID": 991})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(label_request(), DispatchMode::Commit)
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Triggered {
                event_id: Some(991)
            }
        );
    }

    #[tokio::test]
    async fn test_validate_posts_preview_only() {
        let server = MockServer::start().await;
        mount_labels(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm/preview"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(label_request(), DispatchMode::Validate)
            .await;

        assert_eq!(outcome, DispatchOutcome::Validated);
    }

    #[tokio::test]
    async fn test_unauthorized_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/labels"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "message": "unauthorized",
                "error": "invalid API token"
            })))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(label_request(), DispatchMode::Commit)
            .await;

        assert_eq!(outcome, DispatchOutcome::Rejected("unauthorized".to_string()));
    }

    #[tokio::test]
    async fn test_bad_payload_is_rejected_with_server_message() {
        let server = MockServer::start().await;
        mount_labels(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "message": "validation failed",
                "error": "startTime must not be in the past"
            })))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(label_request(), DispatchMode::Commit)
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Rejected(
                "HTTP 400: validation failed (startTime must not be in the past)".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_unknown_label_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(label_request(), DispatchMode::Commit)
            .await;

        match outcome {
            DispatchOutcome::Rejected(reason) => assert!(reason.contains("Kraftfahrer")),
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service unavailable"))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(
                request(
                    ResourceSpec::AllUsers,
                    ResolvedMessage::Text("x".to_string()),
                ),
                DispatchMode::Commit,
            )
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::TransportFailure("HTTP 503: Service unavailable".to_string())
        );
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let outcome = client_with_timeout(&server, Duration::from_millis(100))
            .dispatch(
                request(
                    ResourceSpec::AllUsers,
                    ResolvedMessage::Text("x".to_string()),
                ),
                DispatchMode::Commit,
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::TransportFailure("timeout".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_failure() {
        // Bind and release a port so nothing is listening on it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let client =
            GroupalarmClient::new(url, ApiToken::new("test-token"), Duration::from_secs(2)).unwrap();
        let outcome = client
            .dispatch(
                request(
                    ResourceSpec::AllUsers,
                    ResolvedMessage::Text("x".to_string()),
                ),
                DispatchMode::Commit,
            )
            .await;

        assert!(matches!(outcome, DispatchOutcome::TransportFailure(_)));
    }

    #[tokio::test]
    async fn test_commit_without_event_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/alarm"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .dispatch(
                request(
                    ResourceSpec::AllUsers,
                    ResolvedMessage::Text("x".to_string()),
                ),
                DispatchMode::Commit,
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::Triggered { event_id: None });
    }

    /// Serve one response whose body ends before its announced length
    fn truncated_response_server(status_line: &'static str) -> Url {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}/api/v1", listener.local_addr().unwrap())).unwrap();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = stream.read(&mut buf).unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            let response = format!("{status_line}\r\nContent-Length: 100\r\n\r\nshort");
            stream.write_all(response.as_bytes()).unwrap();
        });

        url
    }

    #[tokio::test]
    async fn test_unreadable_client_error_body_is_rejected() {
        let url = truncated_response_server("HTTP/1.1 401 Unauthorized");
        let client = GroupalarmClient::new(url, ApiToken::new("test-token"), Duration::from_secs(5))
            .unwrap();

        let err = client
            .lookup_ids(Directory::Units, 12345, &["RTW 1".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, GroupalarmError::Api { status: 401, .. }));
        assert_eq!(
            DispatchOutcome::from(err),
            DispatchOutcome::Rejected("unauthorized".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreadable_server_error_body_is_transport_failure() {
        let url = truncated_response_server("HTTP/1.1 502 Bad Gateway");
        let client = GroupalarmClient::new(url, ApiToken::new("test-token"), Duration::from_secs(5))
            .unwrap();

        let err = client
            .lookup_ids(Directory::Units, 12345, &["RTW 1".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, GroupalarmError::ReadResponse(_)));
        assert!(matches!(
            DispatchOutcome::from(err),
            DispatchOutcome::TransportFailure(_)
        ));
    }

    #[test]
    fn test_api_url_gets_trailing_slash() {
        let url = Url::parse("http://localhost:8080/api/v1").unwrap();
        let client = GroupalarmClient::new(url, ApiToken::new("t"), Duration::from_secs(10)).unwrap();
        assert_eq!(client.api_url().as_str(), "http://localhost:8080/api/v1/");
        assert_eq!(
            client.endpoint("alarm/preview").unwrap().as_str(),
            "http://localhost:8080/api/v1/alarm/preview"
        );
    }

    #[test]
    fn test_proxy_settings() {
        let mut settings = ConnectionSettings::new(Url::parse("http://localhost:8080").unwrap());
        settings.proxy = Some(ProxyConfig {
            address: "proxy.local".to_string(),
            port: 3128,
            username: Some("user".to_string()),
            password: None,
        });

        assert!(GroupalarmClient::from_settings(&settings, ApiToken::new("t")).is_ok());
    }
}
