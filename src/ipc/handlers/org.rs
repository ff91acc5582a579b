use rusqlite::Connection;
use serde_json::json;

use super::{parse_params, with_caller, HandlerResult};
use crate::error::EngineError;
use crate::ipc::types::{AppState, Request};
use crate::org::{self, OrgSnapshot};
use crate::principal::{Actor, Principal};

fn org_import(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    if principal.actor()? != Actor::AdminOverride {
        return Err(EngineError::forbidden("only admin may import the reference hierarchy").into());
    }
    let snapshot: OrgSnapshot = parse_params(params)?;
    let counts = org::import(conn, &snapshot)?;
    Ok(json!({ "imported": counts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "org.import" => Some(with_caller(state, req, |conn, p| org_import(conn, p, &req.params))),
        _ => None,
    }
}
