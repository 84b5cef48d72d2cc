use serde_json::json;

use crate::error::{RecoveryError, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, opt_bool, opt_string, require_db, require_str};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::owners;

fn owners_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    actor(req)?.require(&[Role::Admin])?;
    let username = require_str(req, "username")?;
    let role_raw = require_str(req, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RecoveryError::validation(format!("unknown role: {}", role_raw)))?;
    let branch = opt_string(req, "branch").unwrap_or_default();
    let owner = owners::create_owner(conn, &username, role, &branch)?;
    Ok(json!({ "owner": owner }))
}

fn owners_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    actor(req)?.require(&[Role::Admin, Role::Manager])?;
    let include_admins = opt_bool(req, "includeAdmins")?.unwrap_or(false);
    let owners = owners::list_owners(conn, include_admins)?;
    Ok(json!({ "owners": owners }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "owners.create" => owners_create(state, req),
        "owners.list" => owners_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
