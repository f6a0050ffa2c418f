//! HTTP session against an AceQL gateway.
//!
//! Login happens once; every later request is addressed below the session base
//! `{server}/session/{session_id}/` (plus `connection/{connection_id}/` when the
//! gateway hands one out).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::ConnectionOptions;
use crate::error::{AceQLError, AceQLResult, ProtocolError};
use crate::protocol::action;
use crate::protocol::envelope::ResultEnvelope;
use crate::protocol::CLIENT_VERSION;
use crate::session::store::{SessionIds, SessionKey, SessionStore};

pub struct SessionTransport {
    client: reqwest::Client,
    options: ConnectionOptions,
    base: String,
    ids: SessionIds,
    key: SessionKey,
    store: Arc<dyn SessionStore>,
    closed: AtomicBool,
}

impl SessionTransport {
    /// Log in, or reuse the session cached in `store` for the same server, user and database.
    pub async fn open(options: ConnectionOptions, store: Arc<dyn SessionStore>) -> AceQLResult<Self> {
        options.validate_for_login()?;
        let server = options.server().unwrap_or_default().trim_end_matches('/').to_string();
        let database = options.database().unwrap_or_default().to_string();
        let username = options.username().unwrap_or_default().to_string();
        let key = SessionKey::new(&server, &username, &database);
        let client = build_client(&options)?;

        let ids = match store.get(&key) {
            Some(ids) => {
                debug!(target: "aceql::transport", "reusing session for {}@{}/{}", username, server, database);
                ids
            }
            None => {
                let ids = login(&client, &options, &server, &database, &username).await?;
                store.put(key.clone(), ids.clone());
                ids
            }
        };

        let base = session_base(&server, &ids);
        Ok(Self { client, options, base, ids, key, store, closed: AtomicBool::new(false) })
    }

    pub fn options(&self) -> &ConnectionOptions { &self.options }
    pub fn session_id(&self) -> &str { &self.ids.session_id }
    pub fn connection_id(&self) -> Option<&str> { self.ids.connection_id.as_deref() }
    pub fn base_url(&self) -> &str { &self.base }
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    pub fn action_url(&self, action: &str, param: Option<&str>) -> String {
        match param {
            Some(p) => format!("{}{}/{}", self.base, action, urlencoding::encode(p)),
            None => format!("{}{}", self.base, action),
        }
    }

    /// GET `{base}{action}[/{param}]`, returning the HTTP status and body text.
    pub async fn call_api_raw(&self, action: &str, param: Option<&str>) -> AceQLResult<(u16, String)> {
        self.ensure_open()?;
        let url = self.action_url(action, param);
        debug!(target: "aceql::transport", "GET {}", url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        Ok((status, text))
    }

    pub async fn call_api(&self, action: &str, param: Option<&str>) -> AceQLResult<String> {
        Ok(self.call_api_raw(action, param).await?.1)
    }

    /// As [`call_api`](Self::call_api), failing unless the envelope status is OK.
    pub async fn call_api_expect_ok(&self, action: &str, param: Option<&str>) -> AceQLResult<ResultEnvelope> {
        let (status, text) = self.call_api_raw(action, param).await?;
        ResultEnvelope::parse(&text, status).into_result()
    }

    /// URL-encoded form POST. The caller decides how to read the body.
    pub async fn post(&self, action: &str, fields: &[(String, String)]) -> AceQLResult<reqwest::Response> {
        self.ensure_open()?;
        let url = self.action_url(action, None);
        debug!(target: "aceql::transport", "POST {} ({} field(s))", url, fields.len());
        Ok(self.client.post(&url).form(fields).send().await?)
    }

    /// Form POST whose response is a result envelope.
    pub async fn post_expect_ok(&self, action: &str, fields: &[(String, String)]) -> AceQLResult<ResultEnvelope> {
        let resp = self.post(action, fields).await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        ResultEnvelope::parse(&text, status).into_result()
    }

    pub async fn post_multipart(&self, action: &str, form: reqwest::multipart::Form) -> AceQLResult<reqwest::Response> {
        self.ensure_open()?;
        let url = self.action_url(action, None);
        debug!(target: "aceql::transport", "POST multipart {}", url);
        Ok(self.client.post(&url).multipart(form).send().await?)
    }

    /// Best-effort disconnect. Only the first call talks to the gateway; failures are logged.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.store.remove(&self.key);
        let url = self.action_url(action::DISCONNECT, None);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(target: "aceql::transport", "session {} closed", self.ids.session_id);
            }
            Ok(resp) => warn!(target: "aceql::transport", "disconnect returned HTTP {}", resp.status()),
            Err(e) => warn!(target: "aceql::transport", "disconnect failed: {}", e),
        }
    }

    fn ensure_open(&self) -> AceQLResult<()> {
        if self.is_closed() {
            return Err(AceQLError::state("connection is closed"));
        }
        Ok(())
    }
}

async fn login(
    client: &reqwest::Client,
    options: &ConnectionOptions,
    server: &str,
    database: &str,
    username: &str,
) -> AceQLResult<SessionIds> {
    let url = format!(
        "{}/database/{}/username/{}/connect",
        server,
        urlencoding::encode(database),
        urlencoding::encode(username)
    );
    debug!(target: "aceql::transport", "login {}", url);
    let stateless = options.stateless().to_string();
    let query = [
        ("password", options.password().unwrap_or_default()),
        ("stateless", stateless.as_str()),
        ("client_version", CLIENT_VERSION),
    ];
    let resp = client.get(&url).query(&query).send().await?;
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    let envelope = ResultEnvelope::parse(&text, status).into_result()?;
    let session_id = envelope.get_value("session_id")?.filter(|s| !s.is_empty()).ok_or_else(|| {
        AceQLError::Protocol(ProtocolError::new(0, "login succeeded without a session_id").with_http_status(status))
    })?;
    let ids = SessionIds {
        session_id: session_id.to_string(),
        connection_id: envelope.get_value("connection_id")?.filter(|s| !s.is_empty()).map(str::to_string),
    };
    info!(target: "aceql::transport", "logged in to {} as {} (database {})", server, username, database);
    Ok(ids)
}

fn session_base(server: &str, ids: &SessionIds) -> String {
    let sid = urlencoding::encode(&ids.session_id);
    match &ids.connection_id {
        Some(cid) => format!("{}/session/{}/connection/{}/", server, sid, urlencoding::encode(cid)),
        None => format!("{}/session/{}/", server, sid),
    }
}

/// One client per session, carrying proxy, timeout and cookie settings.
pub fn build_client(options: &ConnectionOptions) -> AceQLResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().cookie_store(true);
    if let Some(timeout) = options.timeout() {
        builder = builder.timeout(timeout).connect_timeout(timeout);
    }
    let proxy = options.proxy();
    if let Some(uri) = &proxy.uri {
        Url::parse(uri).map_err(|e| AceQLError::configuration(format!("invalid ProxyUri '{}': {}", uri, e)))?;
        let mut p = reqwest::Proxy::all(uri.as_str())
            .map_err(|e| AceQLError::configuration(format!("invalid ProxyUri '{}': {}", uri, e)))?;
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            p = p.basic_auth(user, pass);
        }
        builder = builder.proxy(p);
    } else if proxy.ntlm {
        warn!(target: "aceql::transport", "NTLM proxy authentication is not available; using system proxy settings");
    }
    builder.build().map_err(|e| AceQLError::configuration(format!("cannot build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::InMemorySessionStore;

    #[test]
    fn base_without_connection_id() {
        let ids = SessionIds { session_id: "abc".into(), connection_id: None };
        assert_eq!(session_base("http://h:9090/aceql", &ids), "http://h:9090/aceql/session/abc/");
    }

    #[test]
    fn base_with_connection_id() {
        let ids = SessionIds { session_id: "abc".into(), connection_id: Some("42".into()) };
        assert_eq!(session_base("http://h/aceql", &ids), "http://h/aceql/session/abc/connection/42/");
    }

    #[test]
    fn invalid_proxy_is_configuration_error() {
        let opts = ConnectionOptions::parse("Server=http://h/aceql;ProxyUri=::not a url::").unwrap();
        assert!(matches!(build_client(&opts), Err(AceQLError::Configuration(_))));
    }

    #[tokio::test]
    async fn open_validates_before_any_request() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let opts = ConnectionOptions::parse("Server=http://127.0.0.1:1/aceql;Database=db;Username=u").unwrap();
        let err = SessionTransport::open(opts, store.clone()).await.err().expect("missing password");
        assert!(matches!(err, AceQLError::Configuration(ref m) if m.contains("Password")));

        let opts = ConnectionOptions::parse("Server=ftp://h/aceql;Database=db;Username=u;Password=p").unwrap();
        let err = SessionTransport::open(opts, store).await.err().expect("bad scheme");
        assert!(matches!(err, AceQLError::Configuration(_)));
    }

    #[tokio::test]
    async fn cached_session_skips_login() {
        let store = Arc::new(InMemorySessionStore::new());
        store.put(
            SessionKey::new("http://127.0.0.1:1/aceql", "u", "db"),
            SessionIds { session_id: "cached".into(), connection_id: None },
        );
        let opts = ConnectionOptions::parse("Server=http://127.0.0.1:1/aceql/;Database=db;Username=u;Password=p").unwrap();
        let t = SessionTransport::open(opts, store).await.unwrap();
        assert_eq!(t.session_id(), "cached");
        assert_eq!(t.action_url("get_version", None), "http://127.0.0.1:1/aceql/session/cached/get_version");
        assert_eq!(t.action_url("set_auto_commit", Some("false")), "http://127.0.0.1:1/aceql/session/cached/set_auto_commit/false");
    }
}
