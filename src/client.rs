use crate::constants::*;
use crate::csrf;
use crate::download::filename_from_disposition;
use crate::error::{Error, Result};
use crate::models::{
    CacheClearResult, Config, Download, EmailSession, HistoryEntry, MessageDetail,
    MessageSummary,
};
use async_trait::async_trait;
use reqwest::{
    cookie::Jar,
    header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE, REFERER},
    Client, ClientBuilder, Response, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Server calls the inbox session depends on.
///
/// `TempMailClient` is the HTTP implementation; tests drive the session
/// with in-memory fakes.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Fetch (or let the server create) the session's mailbox.
    async fn current_email(&self) -> Result<EmailSession>;
    /// Replace the mailbox with a random new address.
    async fn reset_email(&self) -> Result<EmailSession>;
    /// Switch the mailbox to `address`.
    async fn change_email(&self, address: &str) -> Result<EmailSession>;
    /// Recently used addresses.
    async fn email_history(&self) -> Result<Vec<HistoryEntry>>;
    /// Poll target: every message of the current mailbox.
    async fn list_messages(&self) -> Result<Vec<MessageSummary>>;
    /// Full message by id.
    async fn get_message(&self, id: u64) -> Result<MessageDetail>;
    /// Raw `.eml` of a message.
    async fn download_message(&self, id: u64) -> Result<Download>;
    /// Attachment blob.
    async fn download_attachment(&self, message_id: u64, attachment_id: &str) -> Result<Download>;
    /// Remote image referenced by a message body.
    async fn fetch_image(&self, url: &str) -> Result<Download>;
}

/// HTTP client bound to one server session (cookie jar).
pub struct TempMailClient {
    config: Config,
    base: Url,
    jar: Arc<Jar>,
    client: Client,
}

impl TempMailClient {
    pub fn new(config: Option<Config>) -> Result<Self> {
        Self::with_session(config, None)
    }

    /// Build a client, optionally resuming a server session by its cookie.
    pub fn with_session(config: Option<Config>, session_id: Option<&str>) -> Result<Self> {
        let cfg = config.unwrap_or_default();
        let base: Url = cfg.base_url.parse()?;
        let jar = Arc::new(Jar::default());
        if let Some(id) = session_id {
            jar.add_cookie_str(&format!("{SESSION_COOKIE}={id}; Path=/"), &base);
        }

        let mut builder = ClientBuilder::new()
            .cookie_provider(jar.clone())
            .timeout(cfg.timeout)
            .default_headers(default_headers());

        if let Some(proxy) = &cfg.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(Error::Http)?);
        }

        let client = builder.build().map_err(Error::Http)?;

        Ok(Self {
            config: cfg,
            base,
            jar,
            client,
        })
    }

    pub fn builder() -> TempMailClientBuilder {
        TempMailClientBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current server session cookie; pass it back via `with_session`.
    pub fn session_id(&self) -> Option<String> {
        csrf::session_id(&self.jar, &self.base)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn message_path(id: u64) -> String {
        format!("{MESSAGES_PATH}{id}/")
    }

    /// Headers for POSTs: CSRF token (fetching the landing page first when
    /// the server has not issued one yet) and a same-origin referer.
    async fn mutation_headers(&self) -> Result<HeaderMap> {
        if csrf::csrf_token(&self.jar, &self.base).is_none() {
            debug!("no csrf cookie yet, loading landing page");
            let resp = self.client.get(self.base.clone()).send().await?;
            if !resp.status().is_success() {
                warn!(status = %resp.status(), "landing page did not load");
            }
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = csrf::csrf_token(&self.jar, &self.base) {
            if let Ok(val) = HeaderValue::from_str(&token) {
                headers.insert(CSRF_HEADER, val);
            }
        }
        if let Ok(val) = HeaderValue::from_str(self.base.as_str()) {
            headers.insert(REFERER, val);
        }
        Ok(headers)
    }

    async fn get_envelope(&self, path: &str) -> Result<Value> {
        let url = self.endpoint(path)?;
        let resp = self.client.get(url).send().await?;
        read_envelope(resp).await
    }

    async fn post_envelope(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint(path)?;
        let headers = self.mutation_headers().await?;
        let resp = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;
        read_envelope(resp).await
    }

    async fn get_bytes(&self, url: Url) -> Result<Download> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        let headers = resp.headers();
        let content_type = header_str(headers, CONTENT_TYPE.as_str());
        let filename =
            header_str(headers, CONTENT_DISPOSITION.as_str()).and_then(|v| filename_from_disposition(&v));
        let bytes = resp.bytes().await?;
        Ok(Download {
            bytes: bytes.to_vec(),
            content_type,
            filename,
        })
    }

    pub async fn current_email(&self) -> Result<EmailSession> {
        let value = self.get_envelope(EMAIL_PATH).await?;
        decode(value)
    }

    pub async fn reset_email(&self) -> Result<EmailSession> {
        let value = self.post_envelope(EMAIL_PATH, &json!({})).await?;
        decode(value)
    }

    pub async fn change_email(&self, address: &str) -> Result<EmailSession> {
        let value = self
            .post_envelope(EMAIL_PATH, &json!({ "email": address }))
            .await?;
        decode(value)
    }

    pub async fn email_history(&self) -> Result<Vec<HistoryEntry>> {
        let value = self.get_envelope(EMAIL_HISTORY_PATH).await?;
        decode_field(value, "history")
    }

    pub async fn list_messages(&self) -> Result<Vec<MessageSummary>> {
        let value = self.get_envelope(MESSAGES_PATH).await?;
        decode_field(value, "messages")
    }

    pub async fn get_message(&self, id: u64) -> Result<MessageDetail> {
        let value = self.get_envelope(&Self::message_path(id)).await?;
        decode_field(value, "message")
    }

    pub async fn download_message(&self, id: u64) -> Result<Download> {
        let url = self.endpoint(&format!("{}download/", Self::message_path(id)))?;
        self.get_bytes(url).await
    }

    pub async fn download_attachment(&self, message_id: u64, attachment_id: &str) -> Result<Download> {
        let mut url = self.endpoint(&Self::message_path(message_id))?;
        url.path_segments_mut()
            .map_err(|_| Error::Parse("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["attachments", attachment_id, "download", ""]);
        self.get_bytes(url).await
    }

    pub async fn fetch_image(&self, url: &str) -> Result<Download> {
        let url = self.base.join(url)?;
        self.get_bytes(url).await
    }

    /// Admin utility: drop the server's cached domain list.
    pub async fn clear_domain_cache(&self) -> Result<CacheClearResult> {
        let url = self.endpoint(CLEAR_DOMAIN_CACHE_PATH)?;
        let headers = self.mutation_headers().await?;
        let resp = self.client.post(url).headers(headers).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        match serde_json::from_str::<CacheClearResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) if !status.is_success() => Err(status_error(status, body)),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl MailApi for TempMailClient {
    async fn current_email(&self) -> Result<EmailSession> {
        TempMailClient::current_email(self).await
    }

    async fn reset_email(&self) -> Result<EmailSession> {
        TempMailClient::reset_email(self).await
    }

    async fn change_email(&self, address: &str) -> Result<EmailSession> {
        TempMailClient::change_email(self, address).await
    }

    async fn email_history(&self) -> Result<Vec<HistoryEntry>> {
        TempMailClient::email_history(self).await
    }

    async fn list_messages(&self) -> Result<Vec<MessageSummary>> {
        TempMailClient::list_messages(self).await
    }

    async fn get_message(&self, id: u64) -> Result<MessageDetail> {
        TempMailClient::get_message(self, id).await
    }

    async fn download_message(&self, id: u64) -> Result<Download> {
        TempMailClient::download_message(self, id).await
    }

    async fn download_attachment(&self, message_id: u64, attachment_id: &str) -> Result<Download> {
        TempMailClient::download_attachment(self, message_id, attachment_id).await
    }

    async fn fetch_image(&self, url: &str) -> Result<Download> {
        TempMailClient::fetch_image(self, url).await
    }
}

/// Builder over `Config` for callers that only tweak a few fields.
#[derive(Debug, Clone, Default)]
pub struct TempMailClientBuilder {
    config: Config,
    session_id: Option<String>,
}

impl TempMailClientBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn build(self) -> Result<TempMailClient> {
        TempMailClient::with_session(Some(self.config), self.session_id.as_deref())
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn status_error(status: StatusCode, body: String) -> Error {
    if status == StatusCode::BAD_REQUEST {
        Error::SessionNotFound
    } else {
        Error::Status { status, body }
    }
}

fn names_missing_session(message: &str) -> bool {
    let lower = message.to_lowercase();
    SESSION_NOT_FOUND_MARKERS
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Turn a `{success, ...}` response into its payload or a typed error.
async fn read_envelope(resp: Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.text().await?;
    parse_envelope(status, &body)
}

fn parse_envelope(status: StatusCode, body: &str) -> Result<Value> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => return Err(status_error(status, body.to_string())),
        Err(err) => return Err(err.into()),
    };

    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(status.is_success());
    if success && status.is_success() {
        return Ok(value);
    }

    let message = value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if status == StatusCode::BAD_REQUEST || names_missing_session(&message) {
        return Err(Error::SessionNotFound);
    }
    if message.is_empty() && !status.is_success() {
        return Err(Error::Status {
            status,
            body: body.to_string(),
        });
    }
    Err(Error::Api {
        status: Some(status),
        message,
    })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn decode_field<T: DeserializeOwned>(mut value: Value, field: &str) -> Result<T> {
    let inner = value
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| Error::Parse(format!("response has no `{field}`")))?;
    decode(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_success_passes_through() {
        let value = parse_envelope(
            StatusCode::OK,
            r#"{"success":true,"email":"a@b.c","expires_in":3600}"#,
        )
        .unwrap();
        let session: EmailSession = decode(value).unwrap();
        assert_eq!(session.email, "a@b.c");
        assert_eq!(session.expires_in, 3600);
    }

    #[test]
    fn envelope_failure_with_200_is_api_error() {
        let err = parse_envelope(
            StatusCode::OK,
            r#"{"success":false,"error":"Address in use"}"#,
        )
        .unwrap_err();
        match err {
            Error::Api { message, .. } => assert_eq!(message, "Address in use"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_session_is_detected_by_status_and_text() {
        let err = parse_envelope(StatusCode::BAD_REQUEST, r#"{"success":false}"#).unwrap_err();
        assert!(err.is_session_invalid());

        let err = parse_envelope(
            StatusCode::OK,
            r#"{"success":false,"error":"Sessão não encontrada"}"#,
        )
        .unwrap_err();
        assert!(err.is_session_invalid());
    }

    #[test]
    fn html_error_page_becomes_status_error() {
        let err = parse_envelope(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn decode_field_extracts_messages() {
        let value = parse_envelope(
            StatusCode::OK,
            r#"{"success":true,"messages":[{"id":7,"from_name":"Ann","from_address":"ann@x.io","subject":"Hi","is_read":false}],"total":1}"#,
        )
        .unwrap();
        let messages: Vec<MessageSummary> = decode_field(value, "messages").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 7);
        assert!(!messages[0].is_read);
    }

    #[test]
    fn decode_field_missing_is_parse_error() {
        let value = parse_envelope(StatusCode::OK, r#"{"success":true}"#).unwrap();
        let err = decode_field::<Vec<HistoryEntry>>(value, "history").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn builder_sets_session_cookie() {
        let client = TempMailClient::builder()
            .base_url("http://localhost:8000")
            .session_id("s3ss10n")
            .build()
            .unwrap();
        assert_eq!(client.session_id().as_deref(), Some("s3ss10n"));
    }

    #[test]
    fn endpoints_join_base() {
        let client = TempMailClient::builder()
            .base_url("http://localhost:8000/")
            .build()
            .unwrap();
        assert_eq!(
            client.endpoint(&TempMailClient::message_path(12)).unwrap().as_str(),
            "http://localhost:8000/api/messages/12/"
        );
    }
}
