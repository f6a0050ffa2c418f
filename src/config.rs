//! Connection string parsing
//! -------------------------
//! `Server=http://host:9090/aceql;Database=sampledb;Username=user1;Password=...`
//!
//! Tokens are separated by unescaped `;`. Inside a value `\;` stands for a literal
//! semicolon and `\\` for a literal backslash. Keys are matched case-insensitively.
//! Values are trimmed; a backslash before a whitespace character keeps it.

use std::time::Duration;

use tracing::warn;

use crate::error::{AceQLError, AceQLResult};

/// Proxy settings applied to every request of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyOptions {
    pub uri: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Use integrated (NTLM) proxy authentication instead of explicit credentials.
    pub ntlm: bool,
}

impl ProxyOptions {
    pub fn has_credentials(&self) -> bool { self.username.is_some() && self.password.is_some() }
}

/// Parsed and validated connection configuration.
///
/// Built either from a connection string ([`ConnectionOptions::parse`]) or with the
/// `with_*` methods starting from [`ConnectionOptions::builder`].
///
/// ```
/// use aceql_client::ConnectionOptions;
///
/// let opts = ConnectionOptions::parse(
///     "Server=http://localhost:9090/aceql; Database=sampledb; Username=user1; Password=p\\;w",
/// ).unwrap();
/// assert_eq!(opts.password(), Some("p;w"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    server: Option<String>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    stateless: bool,
    proxy: ProxyOptions,
    timeout_ms: u64,
    pretty_printing: bool,
}

impl ConnectionOptions {
    pub fn parse(connection_string: &str) -> AceQLResult<Self> {
        let mut opts = ConnectionOptions::default();
        for token in split_unescaped(connection_string) {
            if token.trim().is_empty() { continue; }
            let (raw_key, raw_value) = token
                .split_once('=')
                .ok_or_else(|| AceQLError::configuration(format!("missing '=' in connection string token: {}", unescape(token.trim()))))?;
            let key = raw_key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(AceQLError::configuration("empty key in connection string"));
            }
            let value = unescape(trim_value(raw_value));
            match key.as_str() {
                "server" => opts.server = non_empty(value),
                "database" => opts.database = non_empty(value),
                "username" => opts.username = non_empty(value),
                "password" => opts.password = Some(value),
                "stateless" => opts.stateless = parse_bool(&key, &value)?,
                "proxyuri" => opts.proxy.uri = null_as_absent(value),
                "proxyusername" => opts.proxy.username = null_as_absent(value),
                "proxypassword" => opts.proxy.password = null_as_absent(value),
                "ntlm" => opts.proxy.ntlm = parse_bool(&key, &value)?,
                "timeout" => {
                    opts.timeout_ms = value
                        .parse::<u64>()
                        .map_err(|_| AceQLError::configuration(format!("timeout must be a non-negative integer (ms), got '{}'", value)))?;
                }
                "prettyprinting" => opts.pretty_printing = parse_bool(&key, &value)?,
                other => warn!(target: "aceql::config", "ignoring unknown connection string key '{}'", other),
            }
        }
        Ok(opts)
    }

    /// Serialize back to a connection string. Parsing the output yields an equal value.
    pub fn to_connection_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut push = |k: &str, v: &str| parts.push(format!("{}={}", k, escape(v)));
        if let Some(s) = &self.server { push("Server", s); }
        if let Some(s) = &self.database { push("Database", s); }
        if let Some(s) = &self.username { push("Username", s); }
        if let Some(s) = &self.password { push("Password", s); }
        push("Stateless", if self.stateless { "true" } else { "false" });
        if let Some(s) = &self.proxy.uri { push("ProxyUri", s); }
        if let Some(s) = &self.proxy.username { push("ProxyUsername", s); }
        if let Some(s) = &self.proxy.password { push("ProxyPassword", s); }
        if self.proxy.ntlm { push("NTLM", "true"); }
        if self.timeout_ms > 0 { push("Timeout", &self.timeout_ms.to_string()); }
        if self.pretty_printing { push("PrettyPrinting", "true"); }
        parts.join(";")
    }

    /// Checks the fields a login needs. Called by the transport before any request.
    pub fn validate_for_login(&self) -> AceQLResult<()> {
        let missing: Vec<&str> = [
            ("Server", self.server.is_none()),
            ("Database", self.database.is_none()),
            ("Username", self.username.is_none()),
            ("Password", self.password.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(k, _)| *k)
        .collect();
        if !missing.is_empty() {
            return Err(AceQLError::configuration(format!("missing connection string value(s): {}", missing.join(", "))));
        }
        let server = self.server.as_deref().unwrap_or_default();
        let url = reqwest::Url::parse(server).map_err(|e| AceQLError::configuration(format!("invalid Server URL '{}': {}", server, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AceQLError::configuration(format!("Server URL must be http or https, got '{}'", url.scheme())));
        }
        Ok(())
    }

    /// Empty options to chain `with_*` calls on.
    pub fn builder() -> Self { Self::default() }

    pub fn server(&self) -> Option<&str> { self.server.as_deref() }
    pub fn database(&self) -> Option<&str> { self.database.as_deref() }
    pub fn username(&self) -> Option<&str> { self.username.as_deref() }
    pub fn password(&self) -> Option<&str> { self.password.as_deref() }
    pub fn stateless(&self) -> bool { self.stateless }
    pub fn proxy(&self) -> &ProxyOptions { &self.proxy }
    pub fn timeout_ms(&self) -> u64 { self.timeout_ms }
    pub fn pretty_printing(&self) -> bool { self.pretty_printing }

    /// `None` when no explicit timeout was configured.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 { None } else { Some(Duration::from_millis(self.timeout_ms)) }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self { self.server = non_empty(server.into()); self }
    pub fn with_database(mut self, database: impl Into<String>) -> Self { self.database = non_empty(database.into()); self }
    pub fn with_username(mut self, username: impl Into<String>) -> Self { self.username = non_empty(username.into()); self }
    pub fn with_password(mut self, password: impl Into<String>) -> Self { self.password = Some(password.into()); self }
    pub fn with_stateless(mut self, stateless: bool) -> Self { self.stateless = stateless; self }
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self { self.timeout_ms = timeout_ms; self }
    pub fn with_pretty_printing(mut self, pretty: bool) -> Self { self.pretty_printing = pretty; self }
    pub fn with_proxy(mut self, proxy: ProxyOptions) -> Self {
        self.proxy = ProxyOptions {
            uri: proxy.uri.and_then(null_as_absent),
            username: proxy.username.and_then(null_as_absent),
            password: proxy.password.and_then(null_as_absent),
            ntlm: proxy.ntlm,
        };
        self
    }
}

/// Split on `;` not preceded by a backslash escape. Returned slices are still escaped.
fn split_unescaped(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => { i += 2; continue; }
            b';' => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.push(&s[start..]);
    out
}

/// Trim surrounding whitespace, keeping a trailing whitespace character that is escaped.
fn trim_value(raw: &str) -> &str {
    let start = raw.trim_start();
    let end = start.trim_end();
    let trailing_backslashes = end.bytes().rev().take_while(|b| *b == b'\\').count();
    if trailing_backslashes % 2 == 1 {
        if let Some(c) = start[end.len()..].chars().next() {
            return &start[..end.len() + c.len_utf8()];
        }
    }
    end
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n @ (';' | '\\')) => out.push(n),
                Some(n) if n.is_whitespace() => out.push(n),
                Some(n) => { out.push('\\'); out.push(n); }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape(s: &str) -> String {
    let lead = s.len() - s.trim_start().len();
    let tail = s.trim_end().len();
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.char_indices() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            c if c.is_whitespace() && (i < lead || i >= tail) => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn parse_bool(key: &str, value: &str) -> AceQLResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        _ => Err(AceQLError::configuration(format!("{} must be true or false, got '{}'", key, value))),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn null_as_absent(value: String) -> Option<String> {
    if value.is_empty() || value.eq_ignore_ascii_case("null") { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_recognized_keys() {
        let cs = "Server=http://localhost:9090/aceql;Database=sampledb;Username=user1;Password=secret;\
                  Stateless=TRUE;ProxyUri=http://proxy:3128;ProxyUsername=pu;ProxyPassword=pp;NTLM=false;Timeout=1500";
        let o = ConnectionOptions::parse(cs).unwrap();
        assert_eq!(o.server(), Some("http://localhost:9090/aceql"));
        assert_eq!(o.database(), Some("sampledb"));
        assert_eq!(o.username(), Some("user1"));
        assert_eq!(o.password(), Some("secret"));
        assert!(o.stateless());
        assert_eq!(o.proxy().uri.as_deref(), Some("http://proxy:3128"));
        assert!(o.proxy().has_credentials());
        assert!(!o.proxy().ntlm);
        assert_eq!(o.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn keys_are_case_insensitive_and_trimmed() {
        let o = ConnectionOptions::parse("  sErVeR = http://h/aceql ;  DATABASE=db ").unwrap();
        assert_eq!(o.server(), Some("http://h/aceql"));
        assert_eq!(o.database(), Some("db"));
    }

    #[test]
    fn defaults() {
        let o = ConnectionOptions::parse("Server=http://h/aceql").unwrap();
        assert!(!o.stateless());
        assert_eq!(o.timeout_ms(), 0);
        assert_eq!(o.timeout(), None);
        assert_eq!(o.proxy(), &ProxyOptions::default());
    }

    #[test]
    fn token_without_equals_is_rejected() {
        let err = ConnectionOptions::parse("Server=http://h/aceql;Database").unwrap_err();
        assert!(matches!(err, AceQLError::Configuration(_)));
        let err = ConnectionOptions::parse("=value").unwrap_err();
        assert!(matches!(err, AceQLError::Configuration(_)));
    }

    #[test]
    fn bad_bool_and_timeout_are_rejected() {
        assert!(matches!(ConnectionOptions::parse("Stateless=maybe"), Err(AceQLError::Configuration(_))));
        assert!(matches!(ConnectionOptions::parse("Timeout=-5"), Err(AceQLError::Configuration(_))));
        assert!(matches!(ConnectionOptions::parse("Timeout=abc"), Err(AceQLError::Configuration(_))));
    }

    #[test]
    fn null_proxy_fields_are_absent() {
        let o = ConnectionOptions::parse("ProxyUri=null;ProxyUsername=NULL;ProxyPassword=").unwrap();
        assert_eq!(o.proxy().uri, None);
        assert_eq!(o.proxy().username, None);
        assert_eq!(o.proxy().password, None);
    }

    #[test]
    fn escaped_semicolon_survives_round_trip() {
        let o = ConnectionOptions::default()
            .with_server("http://localhost:9090/aceql")
            .with_database("db;one")
            .with_username("user")
            .with_password("pa;ss\\word=x")
            .with_stateless(true)
            .with_timeout_ms(250)
            .with_proxy(ProxyOptions { uri: Some("http://p:1".into()), username: Some("u".into()), password: Some("p;".into()), ntlm: true });
        let cs = o.to_connection_string();
        let back = ConnectionOptions::parse(&cs).unwrap();
        assert_eq!(back, o);
        assert_eq!(back.password(), Some("pa;ss\\word=x"));
    }

    #[test]
    fn edge_whitespace_survives_round_trip() {
        let o = ConnectionOptions::builder()
            .with_server("http://localhost:9090/aceql")
            .with_database("db")
            .with_username(" user")
            .with_password(" pw with edge space ");
        let cs = o.to_connection_string();
        let back = ConnectionOptions::parse(&cs).unwrap();
        assert_eq!(back.password(), Some(" pw with edge space "));
        assert_eq!(back.username(), Some(" user"));
        assert_eq!(back, o);

        let all_blank = ConnectionOptions::builder().with_password("  \t");
        let back = ConnectionOptions::parse(&all_blank.to_connection_string()).unwrap();
        assert_eq!(back.password(), Some("  \t"));
    }

    #[test]
    fn trailing_escaped_backslash_is_not_a_whitespace_escape() {
        let o = ConnectionOptions::parse("Password=dir\\\\ ;Database=d").unwrap();
        assert_eq!(o.password(), Some("dir\\"));
    }

    #[test]
    fn value_may_contain_equals() {
        let o = ConnectionOptions::parse("Password=a=b=c").unwrap();
        assert_eq!(o.password(), Some("a=b=c"));
    }

    #[test]
    fn validate_reports_missing_fields() {
        let err = ConnectionOptions::parse("Server=http://h/aceql;Username=u").unwrap().validate_for_login().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Database"));
        assert!(msg.contains("Password"));
        assert!(!msg.contains("Username"));
    }

    #[test]
    fn validate_rejects_non_http_server() {
        let o = ConnectionOptions::parse("Server=ftp://h/aceql;Database=d;Username=u;Password=p").unwrap();
        assert!(matches!(o.validate_for_login(), Err(AceQLError::Configuration(_))));
    }
}
