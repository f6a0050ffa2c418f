//! Result envelope returned by every non-streaming gateway call.
//!
//! `status` is authoritative: a 200 response can still carry `"status":"FAIL"`.
//! Unparsable or empty bodies produce an invalid envelope whose error message is
//! synthesized from the HTTP status so callers always get something actionable.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::{AceQLError, AceQLResult, ProtocolError};

pub const STATUS_OK: &str = "OK";

/// Top-level fields `get_value` is allowed to return.
pub const ALLOWED_VALUE_NAMES: [&str; 5] = ["session_id", "connection_id", "length", "result", "row_count"];

#[derive(Debug, Clone, Default, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i32")]
    error_type: Option<i32>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    connection_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    length: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    result: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    row_count: Option<String>,
    #[serde(default, deserialize_with = "lenient_out_map")]
    parameters_out_per_name: Option<BTreeMap<String, Option<String>>>,
}

/// Scalar that may arrive as a JSON string, number or bool.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(d)?.map(Scalar::into_string))
}

fn lenient_out_map<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BTreeMap<String, Option<String>>>, D::Error> {
    let map = Option::<BTreeMap<String, Option<Scalar>>>::deserialize(d)?;
    Ok(map.map(|m| m.into_iter().map(|(k, v)| (k, v.map(Scalar::into_string))).collect()))
}

fn lenient_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    Ok(Option::<Scalar>::deserialize(d)?.and_then(|s| s.into_string().trim().parse::<i32>().ok()))
}

#[derive(Debug, Clone)]
pub struct ResultEnvelope {
    raw: Option<RawEnvelope>,
    http_status: u16,
}

impl ResultEnvelope {
    pub fn parse(json_text: &str, http_status: u16) -> Self {
        let raw = if json_text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<RawEnvelope>(json_text).ok()
        };
        Self { raw, http_status }
    }

    /// False when the body was empty or not a JSON object.
    pub fn is_valid(&self) -> bool { self.raw.is_some() }

    pub fn is_ok(&self) -> bool {
        self.raw.as_ref().and_then(|r| r.status.as_deref()) == Some(STATUS_OK)
    }

    pub fn http_status(&self) -> u16 { self.http_status }

    pub fn status(&self) -> Option<&str> { self.raw.as_ref().and_then(|r| r.status.as_deref()) }

    /// Remote error code, 0 when the envelope carries none.
    pub fn error_type(&self) -> i32 {
        self.raw.as_ref().and_then(|r| r.error_type).unwrap_or(0)
    }

    /// Remote error message, or one synthesized from the HTTP status.
    pub fn error_message(&self) -> String {
        match self.raw.as_ref().and_then(|r| r.error_message.clone()) {
            Some(m) => m,
            None => http_failure_message(self.http_status),
        }
    }

    pub fn stack_trace(&self) -> Option<&str> { self.raw.as_ref().and_then(|r| r.stack_trace.as_deref()) }

    /// Allow-listed top-level value. Asking for any other name is a caller bug.
    pub fn get_value(&self, name: &str) -> AceQLResult<Option<&str>> {
        let raw = match &self.raw {
            Some(r) => r,
            None => {
                if ALLOWED_VALUE_NAMES.contains(&name) { return Ok(None); }
                return Err(unknown_value_name(name));
            }
        };
        let v = match name {
            "session_id" => raw.session_id.as_deref(),
            "connection_id" => raw.connection_id.as_deref(),
            "length" => raw.length.as_deref(),
            "result" => raw.result.as_deref(),
            "row_count" => raw.row_count.as_deref(),
            other => return Err(unknown_value_name(other)),
        };
        Ok(v)
    }

    /// Allow-listed value parsed as an integer.
    pub fn get_i64(&self, name: &str) -> AceQLResult<Option<i64>> {
        match self.get_value(name)? {
            None => Ok(None),
            Some(s) => s.trim().parse::<i64>().map(Some).map_err(|_| {
                AceQLError::Protocol(
                    ProtocolError::new(0, format!("envelope field '{}' is not an integer: '{}'", name, s))
                        .with_http_status(self.http_status),
                )
            }),
        }
    }

    /// OUT parameter value returned by a stored procedure call, by parameter name.
    pub fn out_parameter(&self, name: &str) -> Option<Option<&str>> {
        let map = self.raw.as_ref()?.parameters_out_per_name.as_ref()?;
        let key = name.trim_start_matches('@');
        map.get(key).or_else(|| map.get(name)).map(|v| v.as_deref())
    }

    pub fn to_protocol_error(&self) -> ProtocolError {
        ProtocolError::new(self.error_type(), self.error_message())
            .with_stack_trace(self.stack_trace().map(str::to_string))
            .with_http_status(self.http_status)
    }

    pub fn into_error(self) -> AceQLError { AceQLError::Protocol(self.to_protocol_error()) }

    /// `Ok(self)` when the status is OK, otherwise the matching [`ProtocolError`].
    pub fn into_result(self) -> AceQLResult<Self> {
        if self.is_ok() { Ok(self) } else { Err(AceQLError::Protocol(self.to_protocol_error())) }
    }
}

pub fn http_failure_message(http_status: u16) -> String {
    let reason = reqwest::StatusCode::from_u16(http_status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    format!("HTTP FAILURE {} ({})", http_status, reason)
}

fn unknown_value_name(name: &str) -> AceQLError {
    AceQLError::argument(format!(
        "'{}' is not a readable envelope field; allowed: {}",
        name,
        ALLOWED_VALUE_NAMES.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_falls_back_to_http_status() {
        let env = ResultEnvelope::parse("", 503);
        assert!(!env.is_valid());
        assert!(!env.is_ok());
        let msg = env.error_message();
        assert!(msg.contains("503"), "{}", msg);
        assert!(msg.starts_with("HTTP FAILURE"));
    }

    #[test]
    fn garbage_body_is_invalid() {
        let env = ResultEnvelope::parse("<html>bad gateway</html>", 502);
        assert!(!env.is_ok());
        assert!(env.error_message().contains("502"));
        assert_eq!(env.error_type(), 0);
    }

    #[test]
    fn http_200_with_fail_status_is_not_ok() {
        let env = ResultEnvelope::parse(
            r#"{"status":"FAIL","error_type":2,"error_message":"Table 'x' not found","stack_trace":"at Foo"}"#,
            200,
        );
        assert!(env.is_valid());
        assert!(!env.is_ok());
        assert_eq!(env.error_type(), 2);
        assert_eq!(env.error_message(), "Table 'x' not found");
        let p = env.to_protocol_error();
        assert_eq!(p.remote_stack_trace.as_deref(), Some("at Foo"));
        assert_eq!(p.http_status, Some(200));
    }

    #[test]
    fn ok_envelope_exposes_allowed_values() {
        let env = ResultEnvelope::parse(r#"{"status":"OK","session_id":"abc123","row_count":3,"length":"1024"}"#, 200);
        assert!(env.is_ok());
        assert_eq!(env.get_value("session_id").unwrap(), Some("abc123"));
        assert_eq!(env.get_i64("row_count").unwrap(), Some(3));
        assert_eq!(env.get_i64("length").unwrap(), Some(1024));
        assert_eq!(env.get_value("result").unwrap(), None);
    }

    #[test]
    fn unknown_value_name_is_argument_error() {
        let env = ResultEnvelope::parse(r#"{"status":"OK","secret":"x"}"#, 200);
        assert!(matches!(env.get_value("secret"), Err(AceQLError::Argument(_))));
        let invalid = ResultEnvelope::parse("", 500);
        assert!(matches!(invalid.get_value("status"), Err(AceQLError::Argument(_))));
    }

    #[test]
    fn error_type_as_string_is_accepted() {
        let env = ResultEnvelope::parse(r#"{"status":"FAIL","error_type":"4","error_message":"m"}"#, 200);
        assert_eq!(env.error_type(), 4);
    }

    #[test]
    fn out_parameters_by_name() {
        let env = ResultEnvelope::parse(
            r#"{"status":"OK","row_count":0,"parameters_out_per_name":{"total":"42","missing":null}}"#,
            200,
        );
        assert_eq!(env.out_parameter("@total"), Some(Some("42")));
        assert_eq!(env.out_parameter("missing"), Some(None));
        assert_eq!(env.out_parameter("other"), None);
    }

    #[test]
    fn numeric_out_values_keep_the_envelope_valid() {
        let env = ResultEnvelope::parse(
            r#"{"status":"OK","row_count":0,"parameters_out_per_name":{"total":42,"ratio":0.5,"flag":true}}"#,
            200,
        );
        assert!(env.is_ok());
        assert_eq!(env.out_parameter("total"), Some(Some("42")));
        assert_eq!(env.out_parameter("@ratio"), Some(Some("0.5")));
        assert_eq!(env.out_parameter("flag"), Some(Some("true")));
    }

    #[test]
    fn into_result_maps_failures() {
        let err = ResultEnvelope::parse(r#"{"status":"FAIL","error_message":"nope"}"#, 200).into_result().unwrap_err();
        assert_eq!(err.as_protocol().unwrap().message, "nope");
    }
}
