use rusqlite::Connection;

use crate::error::{RecoveryError, Result};
use crate::ipc::types::{AppState, Request};
use crate::model::Actor;

pub fn no_workspace() -> RecoveryError {
    RecoveryError::validation("select a workspace first")
}

pub fn require_db(state: &AppState) -> Result<&Connection> {
    state.db.as_ref().ok_or_else(no_workspace)
}

pub fn get_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn require_str(req: &Request, key: &str) -> Result<String> {
    match get_str(req, key).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(RecoveryError::validation(format!("missing {}", key))),
    }
}

pub fn opt_string(req: &Request, key: &str) -> Option<String> {
    get_str(req, key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accepts JSON numbers and numeric strings (query-string style callers).
pub fn opt_i64(req: &Request, key: &str) -> Result<Option<i64>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Some)
            .ok_or_else(|| RecoveryError::validation(format!("{} must be an integer", key))),
    }
}

/// Accepts booleans and "true"/"false" strings.
pub fn opt_bool(req: &Request, key: &str) -> Result<Option<bool>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(serde_json::Value::String(s)) if s == "true" => Ok(Some(true)),
        Some(serde_json::Value::String(s)) if s == "false" => Ok(Some(false)),
        Some(_) => Err(RecoveryError::validation(format!(
            "{} must be a boolean",
            key
        ))),
    }
}

/// Strict number: strings are rejected.
pub fn require_number(req: &Request, key: &str) -> Result<f64> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            RecoveryError::validation("Latitude and longitude are required and must be numbers.")
        })
}

/// Caller identity; requests without one run as the local admin.
pub fn actor(req: &Request) -> Result<Actor> {
    match req.params.get("actor") {
        None | Some(serde_json::Value::Null) => Ok(Actor::local_admin()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| RecoveryError::validation(format!("invalid actor: {}", e))),
    }
}

/// Optional coordinate; absent means 0, present must be a JSON number.
pub fn opt_number(req: &Request, key: &str) -> Result<f64> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(0.0),
        Some(_) => require_number(req, key),
    }
}
