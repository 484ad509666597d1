//! JSON parsing/serialization helpers with consistent warning logs.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub enum JsonContext<'a> {
    UserField {
        user_id: &'a str,
        field: &'static str,
    },
    PostponedPayload {
        user_id: &'a str,
        uniqueness: &'a str,
    },
}

fn warn_parse_error(
    raw_len: usize,
    error: serde_json::Error,
    ctx: JsonContext<'_>,
    msg: &'static str,
) {
    match ctx {
        JsonContext::UserField { user_id, field } => {
            warn!(
                user_id = %user_id,
                field,
                raw_len,
                error = %error,
                "{msg}"
            );
        }
        JsonContext::PostponedPayload {
            user_id,
            uniqueness,
        } => {
            warn!(
                user_id = %user_id,
                uniqueness = %uniqueness,
                raw_len,
                error = %error,
                "{msg}"
            );
        }
    }
}

fn warn_serialize_error(error: serde_json::Error, ctx: JsonContext<'_>, msg: &'static str) {
    match ctx {
        JsonContext::UserField { user_id, field } => {
            warn!(user_id = %user_id, field, error = %error, "{msg}");
        }
        JsonContext::PostponedPayload {
            user_id,
            uniqueness,
        } => {
            warn!(user_id = %user_id, uniqueness = %uniqueness, error = %error, "{msg}");
        }
    }
}

/// Parse an optional JSON column, falling back to the default on absence or error.
pub fn parse_optional_or_default<T: DeserializeOwned + Default>(
    raw: Option<&str>,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> T {
    let Some(raw) = raw else {
        return T::default();
    };
    // Treat empty string as "no value" - return default without warning
    if raw.is_empty() {
        return T::default();
    }
    match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn_parse_error(raw.len(), error, ctx, msg);
            T::default()
        }
    }
}

/// Parse a required JSON document, logging and returning `None` on error.
pub fn parse_or_none<T: DeserializeOwned>(
    raw: &str,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn_parse_error(raw.len(), error, ctx, msg);
            None
        }
    }
}

pub fn to_string_or_fallback<T: Serialize + ?Sized>(
    value: &T,
    fallback: &'static str,
    ctx: JsonContext<'_>,
    msg: &'static str,
) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(error) => {
            warn_serialize_error(error, ctx, msg);
            fallback.to_string()
        }
    }
}
