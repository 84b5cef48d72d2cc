use serde_json::json;

use crate::assign::{self, AssignmentOutcome, LocalService, RefreshObserver, Selection};
use crate::error::{RecoveryError, Result};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{actor, no_workspace, opt_string};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;

fn owner_param(req: &Request) -> Result<String> {
    opt_string(req, "ownerId")
        .or_else(|| opt_string(req, "userId"))
        .ok_or_else(|| RecoveryError::validation("select an owner first"))
}

fn string_list(req: &Request, key: &str) -> Option<Vec<String>> {
    req.params.get(key).and_then(|v| v.as_array()).map(|a| {
        a.iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn selection(req: &Request) -> Result<Selection> {
    match (string_list(req, "accountNumbers"), opt_string(req, "branch")) {
        (Some(accounts), None) => Ok(Selection::Accounts(accounts)),
        (None, Some(branch)) => Ok(Selection::Branch(branch)),
        (Some(_), Some(_)) => Err(RecoveryError::validation(
            "select either accountNumbers or a branch, not both",
        )),
        (None, None) => Err(RecoveryError::validation("No customers selected")),
    }
}

/// Completed runs are `ok`; the two failure phases get their own codes so
/// callers can tell "nothing assigned" from "created but unassigned".
fn outcome_response(id: &str, outcome: AssignmentOutcome) -> serde_json::Value {
    let phase = json!(outcome.phase());
    match outcome {
        AssignmentOutcome::Completed { created, assigned } => ok(
            id,
            json!({
                "phase": phase,
                "message": format!(
                    "{} customers created and assigned",
                    assigned.modified_count
                ),
                "created": created.to_json(),
                "assigned": assigned,
            }),
        ),
        AssignmentOutcome::PartialCreateFailure { created } => {
            let mut details = created.to_json();
            details["status"] = json!(207);
            details["phase"] = phase;
            err(
                id,
                "create_failed",
                "Some customers could not be created; nothing was assigned",
                Some(details),
            )
        }
        AssignmentOutcome::AssignFailed { created, reason } => err(
            id,
            "assignment_failed",
            reason,
            Some(json!({
                "status": 502,
                "phase": phase,
                "customerIds": created.customer_ids,
                "retryable": true,
            })),
        ),
    }
}

fn assignment_run(state: &mut AppState, req: &Request) -> Result<AssignmentOutcome> {
    actor(req)?.require(&[Role::Admin])?;
    let owner_id = owner_param(req)?;
    let selection = selection(req)?;

    let AppState { db, sheets, .. } = state;
    let conn = db.as_ref().ok_or_else(no_workspace)?;
    // Records may have been bound since the view was last built.
    sheets.assignments_changed();
    let staged = sheets.unassigned(conn)?.customers.clone();
    let mut service = LocalService::new(conn);
    assign::run(&mut service, sheets, &staged, &selection, &owner_id)
}

fn assignment_retry(state: &mut AppState, req: &Request) -> Result<AssignmentOutcome> {
    actor(req)?.require(&[Role::Admin])?;
    let owner_id = owner_param(req)?;
    let ids = string_list(req, "customerIds").unwrap_or_default();

    let AppState { db, sheets, .. } = state;
    let conn = db.as_ref().ok_or_else(no_workspace)?;
    let mut service = LocalService::new(conn);
    assign::retry_assign(&mut service, sheets, ids, &owner_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "assignment.run" => assignment_run(state, req),
        "assignment.retryAssign" => assignment_retry(state, req),
        _ => return None,
    };
    Some(match res {
        Ok(outcome) => outcome_response(&req.id, outcome),
        Err(e) => fail(&req.id, &e),
    })
}
