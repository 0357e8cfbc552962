//! Authenticated client for the Control Web Panel REST API.
//!
//! Every call is a form-encoded request to `<api_url>/<version>/<endpoint>`
//! carrying the shared API key as the `key` field. The panel answers with a
//! JSON envelope `{"status": "OK", "msj": ...}`; on error `msj` holds the
//! reason as a string.
//!
//! The panel serves its API over HTTPS with a self-signed certificate, so
//! certificate verification is skipped when (and only when) the API host is
//! loopback or a private address. See [`is_public_host`].

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use crate::config::PanelConfig;
use crate::contract::AccountSource;
use crate::error::PanelError;

pub const ACCOUNT_ENDPOINT: &str = "/account";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// Error strings the panel puts in `msj`.
pub const ERR_MUST_INDICATE_USER: &str = "must indicate a user";
pub const ERR_USER_DOES_NOT_EXIST: &str = "User does not exist";
pub const ERR_ACCOUNT_DOES_NOT_EXIST: &str = "Account does not exist";
pub const ERR_MUST_INDICATE_EMAIL: &str = "You must indicate an email";
pub const ERR_NO_PACKAGE_FOUND: &str = "There is no package with this name";
pub const ERR_UPDATE_ERROR: &str = "There was an error updating";
pub const ERR_USER_IS_ROOT: &str = "User is root";

/// `action` values understood by the `/account` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountAction {
    List,
    Add,
    Update,
    Delete,
    Suspend,
    Unsuspend,
}

impl AccountAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountAction::List => "list",
            AccountAction::Add => "add",
            AccountAction::Update => "udp",
            AccountAction::Delete => "del",
            AccountAction::Suspend => "susp",
            AccountAction::Unsuspend => "unsp",
        }
    }
}

#[derive(Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    api_key: String,
    verify_tls: bool,
}

impl std::fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("verify_tls", &self.verify_tls)
            .finish_non_exhaustive()
    }
}

impl PanelClient {
    pub fn new(base_url: &str, api_version: &str, api_key: &str) -> Result<Self, PanelError> {
        Self::with_timeout(base_url, api_version, api_key, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_version: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, PanelError> {
        let parsed = Url::parse(base_url).map_err(|e| PanelError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let verify_tls = is_public_host(&parsed);
        if !verify_tls {
            tracing::warn!(
                api_url = %base_url,
                "Panel API host is not public, TLS certificate verification disabled"
            );
        }

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls);
        // A panel on this host or LAN is never reached through a proxy.
        if !verify_tls {
            builder = builder.no_proxy();
        }
        let http = builder.build().map_err(|e| client_setup_error(base_url, e))?;

        tracing::info!(
            api_url = %base_url,
            api_version,
            api_key_set = !api_key.is_empty(),
            verify_tls,
            "Initialized PanelClient"
        );

        Ok(PanelClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.trim_matches('/').to_string(),
            api_key: api_key.to_string(),
            verify_tls,
        })
    }

    pub fn from_config(config: &PanelConfig) -> Result<Self, PanelError> {
        Self::new(&config.api_url, &config.api_version, &config.api_key)
    }

    /// Whether server certificates are checked for this client's host.
    pub fn verifies_tls(&self) -> bool {
        self.verify_tls
    }

    /// `<base url>/<version>/<endpoint>`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.api_version,
            endpoint.trim_start_matches('/')
        )
    }

    /// Sends one request with the API key merged into `params`.
    ///
    /// A caller-supplied `key` is dropped; the client's credential always wins.
    /// Returns the decoded JSON body of a 2xx response.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, PanelError> {
        let url = self.endpoint_url(endpoint);

        let mut form: Vec<(&str, &str)> = params
            .iter()
            .filter(|(name, _)| *name != "key")
            .copied()
            .collect();
        form.push(("key", self.api_key.as_str()));

        tracing::debug!(%method, url = %url, fields = form.len(), "Sending panel API request");

        let response = self
            .http
            .request(method.clone(), &url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, %method, url = %url, "Panel API request failed");
                PanelError::Network {
                    url: url.clone(),
                    source: e,
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(status = status.as_u16(), url = %url, "Panel rejected credential");
            return Err(PanelError::Auth {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| PanelError::Network {
            url: url.clone(),
            source: e,
        })?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %url, "Panel returned non-success status");
            return Err(PanelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = ?e, url = %url, "Panel response is not JSON");
            PanelError::MalformedResponse {
                reason: format!("response body is not JSON: {e}"),
            }
        })
    }

    pub async fn post(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, PanelError> {
        self.request(Method::POST, endpoint, params).await
    }

    pub async fn put(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, PanelError> {
        self.request(Method::PUT, endpoint, params).await
    }

    pub async fn patch(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, PanelError> {
        self.request(Method::PATCH, endpoint, params).await
    }

    pub async fn delete(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, PanelError> {
        self.request(Method::DELETE, endpoint, params).await
    }

    async fn account_action(
        &self,
        action: AccountAction,
        params: &[(&str, &str)],
    ) -> Result<Value, PanelError> {
        let mut fields = vec![("action", action.as_str())];
        fields.extend(params.iter().filter(|(name, _)| *name != "action").copied());
        let body = self.post(ACCOUNT_ENDPOINT, &fields).await?;
        into_payload(body)
    }
}

fn client_setup_error(base_url: &str, source: reqwest::Error) -> PanelError {
    tracing::error!(error = ?source, api_url = %base_url, "Failed to build HTTP client");
    PanelError::ClientSetup {
        url: base_url.to_string(),
        source,
    }
}

/// Unwraps the `msj` payload of a successful envelope.
fn into_payload(body: Value) -> Result<Value, PanelError> {
    let Value::Object(mut envelope) = body else {
        return Err(PanelError::MalformedResponse {
            reason: "response body is not a JSON object".to_string(),
        });
    };

    let ok = matches!(envelope.get("status"), Some(Value::String(s)) if s == "OK");
    let payload = envelope.remove("msj").unwrap_or(Value::Null);
    if ok {
        return Ok(payload);
    }

    let message = match payload {
        Value::String(s) => s,
        Value::Null => "panel returned a non-OK status".to_string(),
        other => other.to_string(),
    };
    Err(PanelError::Rejected { message })
}

/// Extracts `username` from each record of an `action=list` payload.
fn usernames(payload: Value) -> Result<Vec<String>, PanelError> {
    let records = match payload {
        Value::Array(records) => records,
        Value::Null => {
            return Err(PanelError::MalformedResponse {
                reason: "missing `msj` field".to_string(),
            })
        }
        other => {
            return Err(PanelError::MalformedResponse {
                reason: format!("`msj` is not a list: {other}"),
            })
        }
    };

    let mut names = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match record.get("username").and_then(Value::as_str) {
            Some(name) => names.push(name.to_string()),
            None => tracing::warn!(index, "Skipping account record without a username"),
        }
    }
    Ok(names)
}

/// Usernames of every account on the panel, in panel order.
pub async fn list_accounts(client: &PanelClient) -> Result<Vec<String>, PanelError> {
    let payload = client.account_action(AccountAction::List, &[]).await?;
    let names = usernames(payload)?;
    tracing::info!(count = names.len(), "Enumerated panel accounts");
    Ok(names)
}

pub async fn add_account(client: &PanelClient, params: &[(&str, &str)]) -> Result<Value, PanelError> {
    client.account_action(AccountAction::Add, params).await
}

pub async fn update_account(
    client: &PanelClient,
    params: &[(&str, &str)],
) -> Result<Value, PanelError> {
    client.account_action(AccountAction::Update, params).await
}

pub async fn delete_account(
    client: &PanelClient,
    params: &[(&str, &str)],
) -> Result<Value, PanelError> {
    client.account_action(AccountAction::Delete, params).await
}

pub async fn suspend_account(client: &PanelClient, username: &str) -> Result<Value, PanelError> {
    client
        .account_action(AccountAction::Suspend, &[("user", username)])
        .await
}

pub async fn unsuspend_account(client: &PanelClient, username: &str) -> Result<Value, PanelError> {
    client
        .account_action(AccountAction::Unsuspend, &[("user", username)])
        .await
}

#[async_trait]
impl AccountSource for PanelClient {
    async fn list_accounts(&self) -> Result<Vec<String>, PanelError> {
        list_accounts(self).await
    }
}

/// False for `localhost`, loopback and private-range addresses.
pub fn is_public_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_public_ip(ip);
    }
    let domain = host.trim_end_matches('.').to_ascii_lowercase();
    !(domain == "localhost" || domain.ends_with(".localhost"))
}

fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// Same classification for a bare address.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_private()),
        IpAddr::V6(v6) => !(v6.is_loopback() || is_unique_local(&v6)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn localhost_and_private_hosts_are_not_public() {
        assert!(!is_public_host(&url("https://localhost:2304")));
        assert!(!is_public_host(&url("https://127.0.0.1:2304")));
        assert!(!is_public_host(&url("https://192.168.1.22:2304")));
        assert!(!is_public_host(&url("https://10.0.0.5:2304")));
        assert!(!is_public_host(&url("https://172.16.4.1:2304")));
        assert!(!is_public_host(&url("https://[::1]:2304")));
        assert!(!is_public_host(&url("https://[fd00::1]:2304")));
    }

    #[test]
    fn public_hosts_are_public() {
        assert!(is_public_host(&url("https://panel.example.com")));
        assert!(is_public_host(&url("https://8.8.8.8:2304")));
        assert!(is_public_host(&url("https://172.32.0.1")));
        assert!(is_public_ip("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn tls_verification_follows_host() {
        let local = PanelClient::new("https://localhost:2304", "v1", "k").unwrap();
        assert!(!local.verifies_tls());

        let public = PanelClient::new("https://panel.example.com", "v1", "k").unwrap();
        assert!(public.verifies_tls());
    }

    #[test]
    fn endpoint_url_joins_base_version_and_path() {
        let client = PanelClient::new("https://localhost:2304/", "/v1/", "k").unwrap();
        assert_eq!(
            client.endpoint_url(ACCOUNT_ENDPOINT),
            "https://localhost:2304/v1/account"
        );
        assert_eq!(
            client.endpoint_url("accountdetail"),
            "https://localhost:2304/v1/accountdetail"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = PanelClient::new("not a url", "v1", "k").unwrap_err();
        assert!(matches!(err, PanelError::InvalidUrl { .. }));
    }

    #[test]
    fn client_build_failure_is_setup_error_not_network() {
        let source = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        let err = client_setup_error("https://localhost:2304", source);
        match &err {
            PanelError::ClientSetup { url, .. } => assert_eq!(url, "https://localhost:2304"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("Failed to build HTTP client"));
    }

    #[test]
    fn usernames_keeps_panel_order() {
        let payload = json!([
            {"username": "macnated", "package_name": "Starter"},
            {"username": "alice"},
            {"username": "bob", "status": "suspended"}
        ]);
        assert_eq!(
            usernames(payload).unwrap(),
            vec!["macnated", "alice", "bob"]
        );
    }

    #[test]
    fn usernames_skips_records_without_username() {
        let payload = json!([{"username": "alice"}, {"id": "2"}, {"username": 7}]);
        assert_eq!(usernames(payload).unwrap(), vec!["alice"]);
    }

    #[test]
    fn non_list_payload_is_malformed() {
        assert!(matches!(
            usernames(json!({"username": "alice"})),
            Err(PanelError::MalformedResponse { .. })
        ));
        assert!(matches!(
            usernames(Value::Null),
            Err(PanelError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn error_envelope_is_rejected_with_message() {
        let err = into_payload(json!({"status": "Error", "msj": ERR_USER_DOES_NOT_EXIST}))
            .unwrap_err();
        match err {
            PanelError::Rejected { message } => assert_eq!(message, ERR_USER_DOES_NOT_EXIST),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn action_names_match_panel() {
        let names: Vec<_> = [
            AccountAction::List,
            AccountAction::Add,
            AccountAction::Update,
            AccountAction::Delete,
            AccountAction::Suspend,
            AccountAction::Unsuspend,
        ]
        .iter()
        .map(AccountAction::as_str)
        .collect();
        assert_eq!(names, vec!["list", "add", "udp", "del", "susp", "unsp"]);
    }
}
