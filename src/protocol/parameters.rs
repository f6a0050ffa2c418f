//! Bound statement parameters: values, SQL type tags and call direction.

use std::any::Any;
use std::fmt::{Debug, Formatter};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio::io::AsyncRead;

use crate::error::{AceQLError, AceQLResult};

/// SQL types the gateway understands, with their `java.sql.Types` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Numeric,
    Char,
    VarChar,
    LongVarChar,
    Date,
    Time,
    Timestamp,
    Binary,
    Blob,
    Clob,
}

impl SqlType {
    pub fn code(self) -> i32 {
        match self {
            SqlType::Bit => -7,
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Real => 7,
            SqlType::Double => 8,
            SqlType::Decimal => 3,
            SqlType::Numeric => 2,
            SqlType::Char => 1,
            SqlType::VarChar => 12,
            SqlType::LongVarChar => -1,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
            SqlType::Binary => -2,
            SqlType::Blob => 2004,
            SqlType::Clob => 2005,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            SqlType::Bit => "BIT",
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE_PRECISION",
            SqlType::Decimal => "DECIMAL",
            SqlType::Numeric => "NUMERIC",
            SqlType::Char => "CHAR",
            SqlType::VarChar => "VARCHAR",
            SqlType::LongVarChar => "LONGVARCHAR",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Binary => "BINARY",
            SqlType::Blob => "BLOB",
            SqlType::Clob => "CLOB",
        }
    }

    /// Wire tag for a NULL of this type, e.g. `TYPE_NULL12` for VARCHAR.
    pub fn null_tag(self) -> String { format!("TYPE_NULL{}", self.code()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterDirection {
    #[default]
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    pub fn wire_name(self) -> &'static str {
        match self {
            ParameterDirection::In => "in",
            ParameterDirection::Out => "out",
            ParameterDirection::InOut => "inout",
        }
    }

    pub fn returns_value(self) -> bool { !matches!(self, ParameterDirection::In) }
}

/// Binary content bound as a BLOB. Read exactly once, by the upload.
pub struct BlobStream {
    reader: Option<Box<dyn AsyncRead + Send + Sync + Unpin>>,
    length: u64,
}

impl BlobStream {
    pub fn new<R: AsyncRead + Send + Sync + Unpin + 'static>(reader: R, length: u64) -> Self {
        Self { reader: Some(Box::new(reader)), length }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::new(std::io::Cursor::new(bytes), len)
    }

    pub(crate) fn from_boxed(reader: Box<dyn AsyncRead + Send + Sync + Unpin>, length: u64) -> Self {
        Self { reader: Some(reader), length }
    }

    pub fn length(&self) -> u64 { self.length }

    pub fn is_consumed(&self) -> bool { self.reader.is_none() }

    pub(crate) fn take_reader(&mut self) -> Option<Box<dyn AsyncRead + Send + Sync + Unpin>> { self.reader.take() }
}

impl Debug for BlobStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream").field("length", &self.length).field("consumed", &self.is_consumed()).finish()
    }
}

#[derive(Debug)]
pub enum ParameterValue {
    Null(SqlType),
    String(String),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Blob(BlobStream),
}

impl ParameterValue {
    /// Classify a value by its runtime type. Types without a wire mapping are rejected.
    pub fn classify<T: Any + Debug>(value: T) -> AceQLResult<ParameterValue> {
        let shown = format!("{:?}", value);
        let type_name = std::any::type_name::<T>();
        let any: Box<dyn Any> = Box::new(value);

        macro_rules! try_as {
            ($any:ident, $t:ty, $wrap:expr) => {
                let $any = match $any.downcast::<$t>() {
                    Ok(v) => return Ok($wrap(*v)),
                    Err(other) => other,
                };
            };
        }

        try_as!(any, String, ParameterValue::String);
        try_as!(any, &'static str, |s: &str| ParameterValue::String(s.to_string()));
        try_as!(any, i8, ParameterValue::TinyInt);
        try_as!(any, i16, ParameterValue::SmallInt);
        try_as!(any, i32, ParameterValue::Integer);
        try_as!(any, i64, ParameterValue::BigInt);
        try_as!(any, f32, ParameterValue::Real);
        try_as!(any, f64, ParameterValue::Double);
        try_as!(any, bool, ParameterValue::Bool);
        try_as!(any, DateTime<Utc>, ParameterValue::Timestamp);
        try_as!(any, NaiveDateTime, |d: NaiveDateTime| ParameterValue::Timestamp(d.and_utc()));
        try_as!(any, NaiveDate, ParameterValue::Date);
        try_as!(any, NaiveTime, ParameterValue::Time);
        try_as!(any, BlobStream, ParameterValue::Blob);
        try_as!(any, SqlType, ParameterValue::Null);
        let _ = any;
        Err(AceQLError::unsupported_type(shown, type_name))
    }

    /// Classify a JSON value; arrays and objects have no wire mapping.
    pub fn from_json(value: serde_json::Value) -> AceQLResult<ParameterValue> {
        use serde_json::Value;
        match value {
            Value::Null => Ok(ParameterValue::Null(SqlType::VarChar)),
            Value::Bool(b) => Ok(ParameterValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParameterValue::BigInt(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ParameterValue::Double(f))
                } else {
                    Err(AceQLError::unsupported_type(n.to_string(), "serde_json::Number"))
                }
            }
            Value::String(s) => Ok(ParameterValue::String(s)),
            other @ (Value::Array(_) | Value::Object(_)) => {
                let kind = if other.is_array() { "json array" } else { "json object" };
                Err(AceQLError::unsupported_type(other.to_string(), kind))
            }
        }
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            ParameterValue::Null(t) => *t,
            ParameterValue::String(_) => SqlType::VarChar,
            ParameterValue::TinyInt(_) => SqlType::TinyInt,
            ParameterValue::SmallInt(_) => SqlType::SmallInt,
            ParameterValue::Integer(_) => SqlType::Integer,
            ParameterValue::BigInt(_) => SqlType::BigInt,
            ParameterValue::Real(_) => SqlType::Real,
            ParameterValue::Double(_) => SqlType::Double,
            ParameterValue::Bool(_) => SqlType::Bit,
            ParameterValue::Timestamp(_) => SqlType::Timestamp,
            ParameterValue::Date(_) => SqlType::Date,
            ParameterValue::Time(_) => SqlType::Time,
            ParameterValue::Blob(_) => SqlType::Blob,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, ParameterValue::Null(_)) }
}

macro_rules! impl_from_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for ParameterValue {
            fn from(v: $t) -> Self { ParameterValue::$variant(v) }
        })*
    };
}

impl_from_value!(
    String => String,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Integer,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    bool => Bool,
    DateTime<Utc> => Timestamp,
    NaiveDate => Date,
    NaiveTime => Time,
    BlobStream => Blob,
);

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self { ParameterValue::String(v.to_string()) }
}

impl From<NaiveDateTime> for ParameterValue {
    fn from(v: NaiveDateTime) -> Self { ParameterValue::Timestamp(v.and_utc()) }
}

#[derive(Debug)]
pub struct AceQLParameter {
    name: String,
    value: ParameterValue,
    direction: ParameterDirection,
    out_value: Option<Option<String>>,
}

impl AceQLParameter {
    pub fn new(name: &str, value: impl Into<ParameterValue>) -> Self {
        Self { name: normalize_name(name), value: value.into(), direction: ParameterDirection::In, out_value: None }
    }

    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Name including the leading `@`.
    pub fn name(&self) -> &str { &self.name }
    pub fn value(&self) -> &ParameterValue { &self.value }
    pub(crate) fn value_mut(&mut self) -> &mut ParameterValue { &mut self.value }
    pub fn direction(&self) -> ParameterDirection { self.direction }

    /// Value returned by the server for an OUT/INOUT parameter after execution.
    /// Outer `None`: nothing returned; inner `None`: SQL NULL.
    pub fn out_value(&self) -> Option<Option<&str>> { self.out_value.as_ref().map(|v| v.as_deref()) }
    pub(crate) fn set_out_value(&mut self, v: Option<String>) { self.out_value = Some(v); }
}

/// Ordered parameter set of a command; names are unique.
#[derive(Debug, Default)]
pub struct AceQLParameterCollection {
    params: Vec<AceQLParameter>,
}

impl AceQLParameterCollection {
    pub fn new() -> Self { Self::default() }

    pub fn add_with_value(&mut self, name: &str, value: impl Into<ParameterValue>) -> AceQLResult<&mut AceQLParameter> {
        self.add(AceQLParameter::new(name, value))
    }

    /// Adds a typed NULL.
    pub fn add_null(&mut self, name: &str, sql_type: SqlType) -> AceQLResult<&mut AceQLParameter> {
        self.add(AceQLParameter::new(name, ParameterValue::Null(sql_type)))
    }

    pub fn add(&mut self, param: AceQLParameter) -> AceQLResult<&mut AceQLParameter> {
        if self.params.iter().any(|p| p.name == param.name) {
            return Err(AceQLError::binding(format!("parameter {} is already bound", param.name)));
        }
        self.params.push(param);
        let last = self.params.len() - 1;
        Ok(&mut self.params[last])
    }

    pub fn get(&self, name: &str) -> Option<&AceQLParameter> {
        let key = normalize_name(name);
        self.params.iter().find(|p| p.name == key)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AceQLParameter> {
        let key = normalize_name(name);
        self.params.iter_mut().find(|p| p.name == key)
    }

    pub fn remove(&mut self, name: &str) -> Option<AceQLParameter> {
        let key = normalize_name(name);
        let pos = self.params.iter().position(|p| p.name == key)?;
        Some(self.params.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AceQLParameter> { self.params.iter() }
    pub fn len(&self) -> usize { self.params.len() }
    pub fn is_empty(&self) -> bool { self.params.is_empty() }
    pub fn clear(&mut self) { self.params.clear(); }
}

pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('@') { trimmed.to_string() } else { format!("@{}", trimmed) }
}
