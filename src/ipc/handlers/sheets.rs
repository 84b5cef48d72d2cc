use std::path::PathBuf;

use serde_json::json;

use crate::error::{RecoveryError, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, no_workspace, opt_string};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::sheet::{self, ColumnMap};

const DEFAULT_LAYOUT: &str = "annexure";

fn sheet_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    actor(req)?.require(&[Role::Admin, Role::Manager])?;
    if state.db.is_none() {
        return Err(no_workspace());
    }
    let layout = opt_string(req, "layout").unwrap_or_else(|| DEFAULT_LAYOUT.to_string());
    let map = ColumnMap::by_name(&layout)
        .ok_or_else(|| RecoveryError::validation(format!("unknown layout: {}", layout)))?;

    let raw = match (req.params.get("rows"), opt_string(req, "csvPath")) {
        (Some(rows), None) => sheet::rows_from_json(rows)?,
        (None, Some(path)) => sheet::rows_from_csv(&PathBuf::from(path))?,
        (Some(_), Some(_)) => {
            return Err(RecoveryError::validation(
                "provide either rows or csvPath, not both",
            ))
        }
        (None, None) => return Err(RecoveryError::validation("missing rows or csvPath")),
    };
    let drafts = sheet::normalize_rows(&raw, &map)?;

    let AppState { db, sheets, .. } = state;
    let conn = db.as_ref().ok_or_else(no_workspace)?;
    sheets.replace(conn, map.name, drafts)?;
    Ok(json!({
        "layout": sheets.layout(),
        "importedAt": sheets.imported_at(),
        "stagedRows": sheets.rows().len(),
    }))
}

fn sheet_unassigned(state: &mut AppState, _req: &Request) -> Result<serde_json::Value> {
    let AppState { db, sheets, .. } = state;
    let conn = db.as_ref().ok_or_else(no_workspace)?;
    let layout = sheets.layout().to_string();
    let imported_at = sheets.imported_at().to_string();
    let view = sheets.unassigned(conn)?;
    Ok(json!({
        "customers": view.customers,
        "branches": view.branches,
        "layout": layout,
        "importedAt": imported_at,
    }))
}

fn sheet_clear(state: &mut AppState, _req: &Request) -> Result<serde_json::Value> {
    let AppState { db, sheets, .. } = state;
    let conn = db.as_ref().ok_or_else(no_workspace)?;
    sheets.clear(conn)?;
    Ok(json!({ "cleared": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "sheet.import" => sheet_import(state, req),
        "sheet.unassigned" => sheet_unassigned(state, req),
        "sheet.clear" => sheet_clear(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
