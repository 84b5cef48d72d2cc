use serde_json::json;

use crate::error::RecoveryError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error envelope for a domain error; details carry the HTTP-like status.
pub fn fail(id: &str, e: &RecoveryError) -> serde_json::Value {
    let kind = e.kind();
    err(
        id,
        kind.code(),
        e.to_string(),
        Some(json!({ "status": kind.status() })),
    )
}

pub fn respond(id: &str, res: Result<serde_json::Value, RecoveryError>) -> serde_json::Value {
    match res {
        Ok(v) => ok(id, v),
        Err(e) => fail(id, &e),
    }
}
