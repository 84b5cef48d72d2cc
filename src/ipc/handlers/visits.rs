use serde_json::json;

use crate::error::{RecoveryError, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, opt_number, opt_string, require_db};
use crate::ipc::types::{AppState, Request};
use crate::visits::{self, NewVisit, VisitScope};

fn visits_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    let visit = NewVisit {
        record_id: opt_string(req, "customerId").unwrap_or_default(),
        owner_id: actor.owner_id.clone(),
        feedback_text: opt_string(req, "feedbackText").unwrap_or_default(),
        image_url: opt_string(req, "imageUrl"),
        lat: opt_number(req, "lat")?,
        lng: opt_number(req, "lng")?,
    };
    let visit = visits::create_visit(conn, &visit)?;
    Ok(json!({ "message": "Visit recorded", "visit": visit }))
}

fn visits_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    let scope = match (opt_string(req, "customerId"), opt_string(req, "ownerId")) {
        (Some(c), _) => VisitScope::Customer(c),
        (None, Some(o)) => VisitScope::Owner(o),
        (None, None) => match actor.owner_id.clone() {
            Some(o) => VisitScope::Owner(o),
            None => {
                return Err(RecoveryError::validation(
                    "provide customerId or ownerId",
                ))
            }
        },
    };
    let start = opt_string(req, "startDate");
    let end = opt_string(req, "endDate");
    let visits = visits::list_visits(conn, &scope, start.as_deref(), end.as_deref())?;
    Ok(json!({ "visits": visits }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "visits.create" => visits_create(state, req),
        "visits.list" => visits_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
