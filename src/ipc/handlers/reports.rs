use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use super::{as_of, parse_params, with_caller, HandlerResult};
use crate::error::EngineError;
use crate::history;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::model::{AbsenceEntry, UnitKind, UnitRef, UnitReport};
use crate::org;
use crate::principal::Principal;
use crate::store::{self, ReportSubmission};
use crate::visibility::can_view;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    #[serde(default)]
    unit: Option<UnitRef>,
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(alias = "total_count")]
    total_count: i64,
    #[serde(alias = "present_count")]
    present_count: i64,
    #[serde(default)]
    absences: Vec<AbsenceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportIdParams {
    #[serde(alias = "report_id")]
    report_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HistoryParams {
    unit: Option<UnitRef>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AggregatorDateParams {
    aggregator: Option<UnitRef>,
    date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MissingParams {
    aggregator: Option<UnitRef>,
    date: Option<NaiveDate>,
    kind: Option<UnitKind>,
}

pub(crate) fn report_json(report: &UnitReport) -> serde_json::Value {
    let mut v = json!(report);
    v["absentCount"] = json!(report.absent_count());
    v
}

fn reports_submit(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: SubmitParams = parse_params(params)?;
    let unit = principal.actor()?.submission_target(p.unit)?;
    let handle = store::submit(
        conn,
        &ReportSubmission {
            unit,
            date: as_of(p.date),
            total_count: p.total_count,
            present_count: p.present_count,
            absences: p.absences,
            submitted_by: principal.id,
        },
    )?;
    Ok(json!({
        "reportId": handle.report_id,
        "created": handle.created,
        "wasUpdated": !handle.created,
    }))
}

fn reports_get(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: ReportIdParams = parse_params(params)?;
    let report = store::get_by_id(conn, p.report_id)?;
    if !can_view(principal, &report) {
        return Err(EngineError::forbidden(format!("report {} is not visible to you", p.report_id)).into());
    }
    Ok(report_json(&report))
}

/// Unit named in params, else the caller's own unit.
fn unit_or_own(principal: &Principal, requested: Option<UnitRef>, what: &str) -> Result<UnitRef, HandlerErr> {
    if let Some(unit) = requested {
        return Ok(unit);
    }
    principal
        .actor()?
        .own_unit()
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{}", what)))
}

fn reports_history(
    conn: &Connection,
    principal: &Principal,
    params: &serde_json::Value,
    page_size: usize,
) -> HandlerResult {
    let p: HistoryParams = parse_params(params)?;
    let unit = unit_or_own(principal, p.unit, "unit")?;
    if !unit.kind.is_reporting() {
        return Err(EngineError::validation(format!("{} does not submit reports", unit)).into());
    }
    let reports: Vec<UnitReport> = match (p.from, p.to) {
        (None, None) => {
            let rows = history::list_for_unit(conn, unit, principal, page_size);
            match p.limit {
                Some(n) => rows.take(n).collect::<Result<_, _>>()?,
                None => rows.collect::<Result<_, _>>()?,
            }
        }
        (from, to) => {
            let from = from.unwrap_or(NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN));
            let to = to.unwrap_or(NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX));
            store::get_by_unit_and_date_range(conn, unit, from, to)?
                .into_iter()
                .filter(|r| can_view(principal, r))
                .take(p.limit.unwrap_or(usize::MAX))
                .collect()
        }
    };
    Ok(json!({ "reports": reports.iter().map(report_json).collect::<Vec<_>>() }))
}

fn reports_by_aggregator(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: AggregatorDateParams = parse_params(params)?;
    let aggregator = unit_or_own(principal, p.aggregator, "aggregator")?;
    if !aggregator.kind.is_aggregator() {
        return Err(EngineError::validation(format!("{} is not an aggregator", aggregator)).into());
    }
    org::resolve(conn, aggregator)?;
    let date = as_of(p.date);
    let reports: Vec<serde_json::Value> = store::child_reports(conn, aggregator, date)?
        .iter()
        .filter(|r| can_view(principal, *r))
        .map(report_json)
        .collect();
    Ok(json!({ "date": date, "reports": reports }))
}

fn reports_missing(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: MissingParams = parse_params(params)?;
    let aggregator = principal.actor()?.aggregation_target(p.aggregator)?;
    let date = as_of(p.date);
    let missing = org::pending_units(conn, aggregator, p.kind, date)?;
    Ok(json!({ "date": date, "missing": missing }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let page_size = state.history_page_size;
    let params = &req.params;
    match req.method.as_str() {
        "reports.submit" => Some(with_caller(state, req, |c, p| reports_submit(c, p, params))),
        "reports.get" => Some(with_caller(state, req, |c, p| reports_get(c, p, params))),
        "reports.history" => Some(with_caller(state, req, |c, p| {
            reports_history(c, p, params, page_size)
        })),
        "reports.byAggregator" => Some(with_caller(state, req, |c, p| {
            reports_by_aggregator(c, p, params)
        })),
        "reports.missing" => Some(with_caller(state, req, |c, p| reports_missing(c, p, params))),
        _ => None,
    }
}
