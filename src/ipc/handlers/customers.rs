use serde_json::json;
use tracing::info;

use crate::assign::RefreshObserver;
use crate::customers::{self, CustomerPatch, ListQuery};
use crate::error::{RecoveryError, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, opt_bool, opt_i64, opt_string, require_db, require_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Actor, CustomerDraft, CustomerRecord, Role};
use crate::upsert;

/// Users only see records they hold; managers only their branch.
fn check_visible(actor: &Actor, rec: &CustomerRecord) -> Result<()> {
    if actor.role == Role::User
        && (actor.owner_id.is_none() || rec.assigned_owner_id != actor.owner_id)
    {
        return Err(RecoveryError::Unauthorized(
            "customer is not assigned to you".into(),
        ));
    }
    actor.require_branch(&rec.branch)
}

fn customers_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    let cfg = &state.config;
    let limit = opt_i64(req, "limit")?
        .unwrap_or(cfg.default_page_size)
        .clamp(1, cfg.max_page_size);
    let descending = match opt_string(req, "sortOrder").as_deref() {
        None | Some("desc") => true,
        Some("asc") => false,
        Some(other) => {
            return Err(RecoveryError::validation(format!(
                "sortOrder must be asc or desc, got {}",
                other
            )))
        }
    };
    let q = ListQuery {
        page: opt_i64(req, "page")?.unwrap_or(1),
        limit,
        branch: opt_string(req, "branch"),
        is_recovered: opt_bool(req, "isRecovered")?,
        search: opt_string(req, "search"),
        sort_by: opt_string(req, "sortBy"),
        descending,
        date_from: opt_string(req, "dateFrom"),
        date_to: opt_string(req, "dateTo"),
        owner_id: opt_string(req, "ownerId"),
    };
    let page = customers::list_customers(conn, &q, &actor)?;
    Ok(serde_json::to_value(page)?)
}

fn customers_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    let id = require_str(req, "customerId")?;
    let rec = customers::require_customer(conn, &id)?;
    check_visible(&actor, &rec)?;
    Ok(json!({ "customer": rec.to_json() }))
}

fn customers_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    actor.require(&[Role::Admin, Role::Manager])?;
    let raw = req
        .params
        .get("customer")
        .cloned()
        .ok_or_else(|| RecoveryError::validation("missing customer"))?;
    let draft: CustomerDraft = serde_json::from_value(raw)
        .map_err(|e| RecoveryError::validation(format!("malformed customer: {}", e)))?;
    actor.require_branch(draft.branch.trim())?;
    let rec = customers::create_customer(conn, &draft)?;
    state.sheets.assignments_changed();
    Ok(json!({ "message": "Customer created", "customer": rec.to_json() }))
}

fn customers_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    actor.require(&[Role::Admin, Role::Manager])?;
    let id = require_str(req, "customerId")?;
    let raw = req
        .params
        .get("patch")
        .cloned()
        .ok_or_else(|| RecoveryError::validation("missing patch"))?;
    let patch: CustomerPatch = serde_json::from_value(raw)
        .map_err(|e| RecoveryError::validation(format!("invalid patch: {}", e)))?;
    let rec = customers::update_customer(conn, &id, &patch, &actor)?;
    Ok(json!({ "message": "Customer updated", "customer": rec.to_json() }))
}

fn customers_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    actor(req)?.require(&[Role::Admin])?;
    let id = require_str(req, "customerId")?;
    customers::delete_customer(conn, &id)?;
    state.sheets.assignments_changed();
    Ok(json!({ "message": "Customer deleted", "customerId": id }))
}

fn customers_stats(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    actor.require(&[Role::Admin, Role::Manager])?;
    let branch = match actor.role {
        Role::Admin => opt_string(req, "branch"),
        _ => Some(actor.branch.clone()),
    };
    let stats = customers::stats(conn, branch.as_deref())?;
    Ok(serde_json::to_value(stats)?)
}

fn customers_bulk_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    actor(req)?.require(&[Role::Admin, Role::Manager])?;
    let items = req
        .params
        .get("customers")
        .and_then(|v| v.as_array())
        .ok_or_else(|| RecoveryError::validation("customers must be an array"))?;
    if items.is_empty() {
        return Err(RecoveryError::validation("No customers provided"));
    }
    if items.len() > state.config.max_batch {
        return Err(RecoveryError::validation(format!(
            "batch of {} exceeds the limit of {} records",
            items.len(),
            state.config.max_batch
        )));
    }
    let outcome = upsert::bulk_upsert_json(conn, items);
    info!(
        inserted = outcome.inserted_count,
        updated = outcome.updated_count,
        failed = outcome.failed_count(),
        "bulk upsert finished"
    );
    let mut result = outcome.to_json();
    result["statusCode"] = json!(if outcome.is_partial() { 207 } else { 201 });
    Ok(result)
}

fn customers_assign(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    actor(req)?.require(&[Role::Admin])?;
    let owner_id = require_str(req, "userId")?;
    let ids: Vec<String> = req
        .params
        .get("customerIds")
        .and_then(|v| v.as_array())
        .ok_or_else(|| RecoveryError::validation("customerIds must be an array"))?
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(RecoveryError::validation("No customers selected"));
    }
    let summary = customers::assign_ids(conn, &owner_id, &ids)?;
    state.sheets.assignments_changed();
    let mut result = serde_json::to_value(&summary)?;
    result["message"] = json!(format!(
        "{} customers assigned successfully",
        summary.modified_count
    ));
    Ok(result)
}

fn customers_assign_branch(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    actor(req)?.require(&[Role::Admin])?;
    let owner_id = require_str(req, "userId")?;
    let branch = require_str(req, "branch")?;
    let modified = customers::assign_branch(conn, &owner_id, &branch)?;
    state.sheets.assignments_changed();
    Ok(json!({
        "message": format!("Assigned {} customers of branch {}", modified, branch),
        "modifiedCount": modified,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "customers.list" => customers_list(state, req),
        "customers.get" => customers_get(state, req),
        "customers.create" => customers_create(state, req),
        "customers.update" => customers_update(state, req),
        "customers.delete" => customers_delete(state, req),
        "customers.stats" => customers_stats(state, req),
        "customers.bulkUpsert" => customers_bulk_upsert(state, req),
        "customers.assign" => customers_assign(state, req),
        "customers.assignBranch" => customers_assign_branch(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
