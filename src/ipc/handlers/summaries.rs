use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use super::{as_of, parse_params, with_caller, HandlerResult};
use crate::aggregate::{self, OfficerBlock, SummaryRequest};
use crate::error::EngineError;
use crate::history;
use crate::org;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::model::{AbsenceEntry, Summary, UnitRef};
use crate::principal::Principal;
use crate::visibility::can_view;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateParams {
    aggregator: Option<UnitRef>,
    date: Option<NaiveDate>,
    officers: Option<OfficerBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryIdParams {
    #[serde(alias = "summary_id")]
    summary_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ByAggregatorParams {
    aggregator: Option<UnitRef>,
    date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HistoryParams {
    aggregator: Option<UnitRef>,
    limit: Option<usize>,
}

fn summary_json(summary: &Summary) -> serde_json::Value {
    let mut v = json!(summary);
    v["absentCount"] = json!(summary.absent_count());
    v
}

fn visible_summary(
    conn: &Connection,
    principal: &Principal,
    summary_id: i64,
) -> Result<(Summary, Vec<AbsenceEntry>), HandlerErr> {
    let (summary, absences) = aggregate::get_summary_with_absences(conn, summary_id)?;
    if !can_view(principal, &summary) {
        return Err(EngineError::forbidden(format!("summary {} is not visible to you", summary_id)).into());
    }
    Ok((summary, absences))
}

fn summaries_generate(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: GenerateParams = parse_params(params)?;
    let aggregator = principal.actor()?.aggregation_target(p.aggregator)?;
    let handle = aggregate::generate_summary(
        conn,
        &SummaryRequest {
            aggregator,
            date: as_of(p.date),
            submitted_by: principal.id,
            officers: p.officers,
        },
    )?;
    Ok(json!(handle))
}

fn summaries_get(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: SummaryIdParams = parse_params(params)?;
    let (summary, absences) = visible_summary(conn, principal, p.summary_id)?;
    let mut v = summary_json(&summary);
    v["absences"] = json!(absences);
    Ok(v)
}

fn summaries_absences(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: SummaryIdParams = parse_params(params)?;
    let (summary, absences) = visible_summary(conn, principal, p.summary_id)?;
    Ok(json!({ "summaryId": summary.id, "absences": absences }))
}

fn summaries_by_aggregator(conn: &Connection, principal: &Principal, params: &serde_json::Value) -> HandlerResult {
    let p: ByAggregatorParams = parse_params(params)?;
    let aggregator = match p.aggregator {
        Some(unit) => unit,
        None => principal
            .actor()?
            .own_unit()
            .ok_or_else(|| HandlerErr::bad_params("missing params.aggregator"))?,
    };
    org::resolve(conn, aggregator)?;
    let date = as_of(p.date);
    let summaries: Vec<serde_json::Value> = aggregate::child_summaries(conn, aggregator, date)?
        .iter()
        .filter(|s| can_view(principal, *s))
        .map(summary_json)
        .collect();
    Ok(json!({ "date": date, "summaries": summaries }))
}

fn summaries_history(
    conn: &Connection,
    principal: &Principal,
    params: &serde_json::Value,
    page_size: usize,
) -> HandlerResult {
    let p: HistoryParams = parse_params(params)?;
    let aggregator = match p.aggregator {
        Some(unit) => unit,
        None => principal
            .actor()?
            .own_unit()
            .ok_or_else(|| HandlerErr::bad_params("missing params.aggregator"))?,
    };
    if !aggregator.kind.is_aggregator() {
        return Err(EngineError::validation(format!("{} is not an aggregator", aggregator)).into());
    }
    let rows = history::list_summaries_for_aggregator(conn, aggregator, principal, page_size);
    let summaries: Vec<Summary> = match p.limit {
        Some(n) => rows.take(n).collect::<Result<_, _>>()?,
        None => rows.collect::<Result<_, _>>()?,
    };
    Ok(json!({ "summaries": summaries.iter().map(summary_json).collect::<Vec<_>>() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let page_size = state.history_page_size;
    let params = &req.params;
    match req.method.as_str() {
        "summaries.generate" => Some(with_caller(state, req, |c, p| {
            summaries_generate(c, p, params)
        })),
        "summaries.get" => Some(with_caller(state, req, |c, p| summaries_get(c, p, params))),
        "summaries.absences" => Some(with_caller(state, req, |c, p| {
            summaries_absences(c, p, params)
        })),
        "summaries.byAggregator" => Some(with_caller(state, req, |c, p| {
            summaries_by_aggregator(c, p, params)
        })),
        "summaries.history" => Some(with_caller(state, req, |c, p| {
            summaries_history(c, p, params, page_size)
        })),
        _ => None,
    }
}
