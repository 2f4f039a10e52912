use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RecordError;

/// The closed set of names a structural pattern may capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Ip,
    Datetime,
    Method,
    Path,
    HttpVersion,
    StatusCode,
    ContentSize,
    Referrer,
    UserAgent,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Ip,
        Field::Datetime,
        Field::Method,
        Field::Path,
        Field::HttpVersion,
        Field::StatusCode,
        Field::ContentSize,
        Field::Referrer,
        Field::UserAgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Ip => "ip",
            Field::Datetime => "datetime",
            Field::Method => "method",
            Field::Path => "path",
            Field::HttpVersion => "http_version",
            Field::StatusCode => "status_code",
            Field::ContentSize => "content_size",
            Field::Referrer => "referrer",
            Field::UserAgent => "user_agent",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed log line. Members a pattern did not capture stay `None` and are
/// left out of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// UTC seconds since the epoch, derived from `datetime`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl LogRecord {
    /// Store a captured value, converting the numeric fields.
    pub fn set(&mut self, field: Field, value: &str) -> Result<(), RecordError> {
        let text = Some(value.to_string());
        match field {
            Field::Ip => self.ip = text,
            Field::Datetime => self.datetime = text,
            Field::Method => self.method = text,
            Field::Path => self.path = text,
            Field::HttpVersion => self.http_version = text,
            Field::Referrer => self.referrer = text,
            Field::UserAgent => self.user_agent = text,
            Field::StatusCode => self.status_code = Some(parse_number(field, value)?),
            // common log format writes "-" when no body was sent
            Field::ContentSize if value == "-" => self.content_size = None,
            Field::ContentSize => self.content_size = Some(parse_number(field, value)?),
        }
        Ok(())
    }

    /// Text form of a field, as written to CSV/TSV.
    pub fn get(&self, field: Field) -> Option<String> {
        match field {
            Field::Ip => self.ip.clone(),
            Field::Datetime => self.datetime.clone(),
            Field::Method => self.method.clone(),
            Field::Path => self.path.clone(),
            Field::HttpVersion => self.http_version.clone(),
            Field::StatusCode => self.status_code.map(|n| n.to_string()),
            Field::ContentSize => self.content_size.map(|n| n.to_string()),
            Field::Referrer => self.referrer.clone(),
            Field::UserAgent => self.user_agent.clone(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(field: Field, value: &str) -> Result<T, RecordError> {
    value.parse().map_err(|_| RecordError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
