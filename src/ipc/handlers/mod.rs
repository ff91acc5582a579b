pub mod core;
pub mod org;
pub mod reports;
pub mod summaries;

use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::principal::Principal;

pub(crate) type HandlerResult = Result<serde_json::Value, HandlerErr>;

/// Run `f` against the open workspace on behalf of the request's principal.
pub(crate) fn with_caller<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Principal) -> HandlerResult,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(principal) = req.principal.as_ref() else {
        return err(&req.id, "unauthenticated", "request carries no principal", None);
    };
    match f(conn, principal) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            warn!(
                id = %req.id,
                method = %req.method,
                principal = principal.id,
                code = e.code,
                message = %e.message,
                "request failed"
            );
            e.response(&req.id)
        }
    }
}

pub(crate) fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    let value = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// The as-of date for a request; the server's local date when omitted.
pub(crate) fn as_of(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Local::now().date_naive())
}
