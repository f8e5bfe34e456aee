//! Request validation helpers.
//!
//! Handlers collect every field problem into a `Validator` and fail once,
//! so a form gets all of its errors in a single 400 response.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::errors::{FieldError, PmoError};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
});

/// Current time in the canonical stored format.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalize an ISO 8601 date or date-time to an RFC 3339 UTC timestamp.
/// Date-only values are taken as midnight UTC.
pub fn normalize_date(value: &str) -> Option<String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let dt = date.and_hms_opt(0, 0, 0)?.and_utc();
    Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_uuid(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reject a path id that is not a UUID.
pub fn path_uuid(value: &str, field: &str, message: &str) -> Result<(), PmoError> {
    if is_uuid(value) {
        Ok(())
    } else {
        Err(PmoError::invalid(field, message))
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in partial updates.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Required, non-blank string. Returns the trimmed value.
    pub fn required(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<String> {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ => {
                self.error(field, message);
                None
            }
        }
    }

    /// Optional string that must not be blank when present.
    pub fn not_blank(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<String> {
        let value = value?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.error(field, message);
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn email(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<String> {
        match value.map(str::trim) {
            Some(v) if is_valid_email(v) => Some(v.to_lowercase()),
            _ => {
                self.error(field, message);
                None
            }
        }
    }

    pub fn min_len(&mut self, field: &str, value: Option<&str>, min: usize, message: &str) -> Option<String> {
        match value {
            Some(v) if v.chars().count() >= min => Some(v.to_string()),
            _ => {
                self.error(field, message);
                None
            }
        }
    }

    /// Optional enum value; a present but unknown value is an error.
    pub fn parse_enum<E: FromStr<Err = String>>(
        &mut self,
        field: &str,
        value: Option<&str>,
    ) -> Option<E> {
        let value = value?;
        match E::from_str(value) {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                self.error(field, &message);
                None
            }
        }
    }

    pub fn required_enum<E: FromStr<Err = String>>(
        &mut self,
        field: &str,
        value: Option<&str>,
        message: &str,
    ) -> Option<E> {
        if value.is_none() {
            self.error(field, message);
            return None;
        }
        self.parse_enum(field, value)
    }

    /// Optional ISO 8601 date, normalized.
    pub fn date(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<String> {
        let value = value?;
        match normalize_date(value) {
            Some(normalized) => Some(normalized),
            None => {
                self.error(field, message);
                None
            }
        }
    }

    pub fn required_date(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<String> {
        if value.is_none() {
            self.error(field, message);
            return None;
        }
        self.date(field, value, message)
    }

    pub fn uuid(&mut self, field: &str, value: Option<&str>, message: &str) -> Option<String> {
        match value {
            Some(v) if is_uuid(v) => Some(v.to_string()),
            _ => {
                self.error(field, message);
                None
            }
        }
    }

    /// Fail with every collected error, if any.
    pub fn finish(self) -> Result<(), PmoError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(PmoError::Validation(self.errors))
        }
    }
}
