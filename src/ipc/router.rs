use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::owners::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::customers::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::locations::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::sheets::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::assignment::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::visits::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
