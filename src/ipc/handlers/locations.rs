use serde_json::json;

use crate::customers;
use crate::error::Result;
use crate::ipc::error::respond;
use crate::ipc::helpers::{actor, require_db, require_number, require_str};
use crate::ipc::types::{AppState, Request};

fn location_append(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let actor = actor(req)?;
    let id = require_str(req, "customerId")?;
    let lat = require_number(req, "lat")?;
    let lng = require_number(req, "lng")?;
    let point = customers::append_location(conn, &id, lat, lng, actor.owner_id.as_deref())?;
    Ok(json!({
        "message": "Location added successfully",
        "location": point,
    }))
}

fn location_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = require_db(state)?;
    let id = require_str(req, "customerId")?;
    customers::require_customer(conn, &id)?;
    let points = customers::locations(conn, &id)?;
    Ok(json!({ "customerId": id, "locationHistory": points }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "customers.location.append" => location_append(state, req),
        "customers.location.list" => location_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
