use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::model::{AbsenceEntry, Hierarchy, ReasonTally, Summary, UnitKind, UnitRef, UnitReport};
use crate::org;
use crate::store::{self, AbsenceOwner};

const SUMMARY_COLUMNS: &str = "s.id, s.aggregator_kind, s.aggregator_id, s.course_id, s.faculty_id,
     s.location_id, s.summary_date, s.total_count, s.present_count, s.reasons,
     s.submitted_by, s.created_at, s.updated_at, s.was_updated";

/// One line of the manual officer block: a reason, how many officers are away
/// for it, and their names as a comma-delimited list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerAbsence {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub names: String,
}

/// Officers are not represented by any child report, so a faculty summary
/// takes them as a separate caller-supplied block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerBlock {
    #[serde(default, alias = "present_count", alias = "presentOfficersCount")]
    pub present_count: i64,
    #[serde(default, alias = "absencesOfficers")]
    pub absences: Vec<OfficerAbsence>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OfficerLine {
    reason: String,
    count: u32,
    names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Officers {
    present: u32,
    lines: Vec<OfficerLine>,
}

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub aggregator: UnitRef,
    pub date: NaiveDate,
    pub submitted_by: i64,
    pub officers: Option<OfficerBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryHandle {
    pub summary_id: i64,
    pub created: bool,
    pub total: u32,
    pub present: u32,
    pub absent: u32,
    pub reasons: ReasonTally,
}

/// Computed content of a summary before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollup {
    pub total: u32,
    pub present: u32,
    pub reasons: ReasonTally,
    pub absences: Vec<AbsenceEntry>,
}

/// Group absence entries by reason and count them.
pub fn tally_reasons<'a, I>(entries: I) -> ReasonTally
where
    I: IntoIterator<Item = &'a AbsenceEntry>,
{
    entries.into_iter().fold(ReasonTally::new(), |mut acc, a| {
        *acc.entry(a.reason.clone()).or_insert(0) += 1;
        acc
    })
}

fn validate_officers(block: &OfficerBlock) -> EngineResult<Officers> {
    let present = u32::try_from(block.present_count).map_err(|_| {
        EngineError::validation(format!(
            "officer present_count must be non-negative, got {}",
            block.present_count
        ))
    })?;
    let mut lines = Vec::with_capacity(block.absences.len());
    for (i, line) in block.absences.iter().enumerate() {
        let reason = line.reason.trim();
        if reason.is_empty() {
            return Err(EngineError::validation(format!(
                "officer absence #{} has no reason",
                i + 1
            )));
        }
        let names: Vec<String> = line
            .names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        let count = u32::try_from(line.count).map_err(|_| {
            EngineError::validation(format!(
                "officer absence {:?} has negative count {}",
                reason, line.count
            ))
        })?;
        match (count, names.len()) {
            (0, 0) => {
                return Err(EngineError::validation(format!(
                    "officer absence {:?} has neither a count nor names",
                    reason
                )))
            }
            (0, _) => {
                return Err(EngineError::validation(format!(
                    "officer absence {:?} lists names but no positive count",
                    reason
                )))
            }
            (_, 0) => {
                return Err(EngineError::validation(format!(
                    "officer absence {:?} has count {} but no names",
                    reason, count
                )))
            }
            (c, n) if c as usize != n => {
                return Err(EngineError::validation(format!(
                    "officer absence {:?} count {} does not match {} names",
                    reason, c, n
                )))
            }
            _ => {}
        }
        lines.push(OfficerLine {
            reason: reason.to_string(),
            count,
            names,
        });
    }
    Ok(Officers { present, lines })
}

fn checked_u32(value: u64, what: &str) -> EngineResult<u32> {
    u32::try_from(value)
        .map_err(|_| EngineError::validation(format!("{} overflows ({})", what, value)))
}

/// Pure roll-up of child reports plus optional officers.
fn roll_up(children: &[UnitReport], officers: &Officers) -> EngineResult<Rollup> {
    let officer_absent: u64 = officers.lines.iter().map(|l| u64::from(l.count)).sum();
    let total = children
        .iter()
        .map(|c| u64::from(c.total_count))
        .sum::<u64>()
        + u64::from(officers.present)
        + officer_absent;
    let present = children
        .iter()
        .map(|c| u64::from(c.present_count))
        .sum::<u64>()
        + u64::from(officers.present);

    let absences: Vec<AbsenceEntry> = children
        .iter()
        .flat_map(|c| c.absences.iter().cloned())
        .collect();
    let reasons = officers
        .lines
        .iter()
        .fold(tally_reasons(&absences), |mut acc, line| {
            *acc.entry(line.reason.clone()).or_insert(0) += line.count;
            acc
        });
    let absences = absences
        .into_iter()
        .chain(officers.lines.iter().flat_map(|line| {
            line.names
                .iter()
                .map(move |n| AbsenceEntry::new(n.clone(), line.reason.clone()))
        }))
        .collect();

    Ok(Rollup {
        total: checked_u32(total, "summary total_count")?,
        present: checked_u32(present, "summary present_count")?,
        reasons,
        absences,
    })
}

/// Recompute the summary for (aggregator, date) from scratch and upsert it.
/// Refuses with `NoChildReports` rather than storing an empty summary.
pub fn generate_summary(conn: &Connection, req: &SummaryRequest) -> EngineResult<SummaryHandle> {
    if !req.aggregator.kind.is_aggregator() {
        return Err(EngineError::forbidden(format!(
            "{} units do not aggregate",
            req.aggregator.kind.as_str()
        )));
    }
    let officers = match (&req.officers, req.aggregator.kind) {
        (None, _) => Officers::default(),
        (Some(block), UnitKind::Faculty) => validate_officers(block)?,
        (Some(_), kind) => {
            return Err(EngineError::validation(format!(
                "officer block is only accepted for faculty summaries, not {}",
                kind.as_str()
            )))
        }
    };

    let key = format!("summary of {} on {}", req.aggregator, req.date);
    let tx = db::write_tx(conn).map_err(|e| EngineError::from(e).on_write(&key))?;
    let handle = upsert_summary(&tx, req, &officers).map_err(|e| e.on_write(&key))?;
    tx.commit()
        .map_err(|e| EngineError::from(e).on_write(&key))?;

    info!(
        summary_id = handle.summary_id,
        aggregator = %req.aggregator,
        date = %req.date,
        created = handle.created,
        total = handle.total,
        present = handle.present,
        "summary stored"
    );
    Ok(handle)
}

fn upsert_summary(
    conn: &Connection,
    req: &SummaryRequest,
    officers: &Officers,
) -> EngineResult<SummaryHandle> {
    let h = org::resolve(conn, req.aggregator)?;
    let children = store::child_reports(conn, req.aggregator, req.date)?;
    if children.is_empty() {
        return Err(EngineError::NoChildReports {
            aggregator: req.aggregator,
            date: req.date,
        });
    }
    let rollup = roll_up(&children, officers)?;
    let absent = rollup.total - rollup.present;
    let reasons_json = serde_json::to_string(&rollup.reasons)
        .map_err(|e| EngineError::validation(format!("reasons not serializable: {e}")))?;
    let now = Utc::now().to_rfc3339();

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM summaries WHERE aggregator_kind = ? AND aggregator_id = ? AND summary_date = ?",
            (req.aggregator.kind.as_str(), req.aggregator.id, req.date),
            |r| r.get(0),
        )
        .optional()?;

    let (summary_id, created) = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE summaries
                 SET course_id = ?, faculty_id = ?, location_id = ?,
                     total_count = ?, present_count = ?, absent_count = ?, reasons = ?,
                     submitted_by = ?, updated_at = ?, was_updated = 1
                 WHERE id = ?",
                rusqlite::params![
                    h.course_id,
                    h.faculty_id,
                    h.location_id,
                    rollup.total,
                    rollup.present,
                    absent,
                    reasons_json,
                    req.submitted_by,
                    now,
                    id
                ],
            )?;
            (id, false)
        }
        None => {
            conn.execute(
                "INSERT INTO summaries(
                    aggregator_kind, aggregator_id, course_id, faculty_id, location_id, summary_date,
                    total_count, present_count, absent_count, reasons, submitted_by, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    req.aggregator.kind.as_str(),
                    req.aggregator.id,
                    h.course_id,
                    h.faculty_id,
                    h.location_id,
                    req.date,
                    rollup.total,
                    rollup.present,
                    absent,
                    reasons_json,
                    req.submitted_by,
                    now
                ],
            )?;
            (conn.last_insert_rowid(), true)
        }
    };

    store::replace_absences(conn, AbsenceOwner::Summary, summary_id, &rollup.absences)?;

    Ok(SummaryHandle {
        summary_id,
        created,
        total: rollup.total,
        present: rollup.present,
        absent,
        reasons: rollup.reasons,
    })
}

fn summary_from_row(r: &Row<'_>) -> rusqlite::Result<Summary> {
    let reasons_raw: String = r.get(9)?;
    let reasons: ReasonTally = serde_json::from_str(&reasons_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let kind = store::unit_kind_at(r, 1)?;
    Ok(Summary {
        id: r.get(0)?,
        aggregator: UnitRef::new(kind, r.get(2)?),
        hierarchy: Hierarchy {
            course_id: r.get(3)?,
            faculty_id: r.get(4)?,
            location_id: r.get(5)?,
            ..Hierarchy::default()
        },
        summary_date: r.get(6)?,
        total_count: r.get(7)?,
        present_count: r.get(8)?,
        reasons,
        submitted_by: r.get(10)?,
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
        was_updated: r.get::<_, i64>(13)? != 0,
    })
}

fn query_summaries<P: rusqlite::Params + Clone>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> EngineResult<Vec<Summary>> {
    db::with_read_retry(|| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params.clone(), summary_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
    })
}

/// A summary and its absence rows, read from one snapshot.
pub fn get_summary_with_absences(
    conn: &Connection,
    summary_id: i64,
) -> EngineResult<(Summary, Vec<AbsenceEntry>)> {
    let sql = format!("SELECT {SUMMARY_COLUMNS} FROM summaries s WHERE s.id = ?");
    let found = db::read_snapshot(conn, |c| {
        let Some(summary) = c.query_row(&sql, [summary_id], summary_from_row).optional()? else {
            return Ok(None);
        };
        let absences = store::absences_of(c, AbsenceOwner::Summary, summary.id)?;
        Ok(Some((summary, absences)))
    })?;
    found.ok_or_else(|| EngineError::not_found(format!("summary {}", summary_id)))
}

/// Course summaries of a faculty for one day, ordered by course number.
pub fn child_summaries(
    conn: &Connection,
    aggregator: UnitRef,
    date: NaiveDate,
) -> EngineResult<Vec<Summary>> {
    if aggregator.kind != UnitKind::Faculty {
        return Err(EngineError::validation(format!(
            "{} has no child summaries",
            aggregator
        )));
    }
    let sql = format!(
        "SELECT {SUMMARY_COLUMNS} FROM summaries s
         JOIN courses c ON c.id = s.aggregator_id
         WHERE s.aggregator_kind = 'course' AND c.faculty_id = ?1 AND s.summary_date = ?2
         ORDER BY c.number, s.id"
    );
    query_summaries(conn, &sql, (aggregator.id, date))
}

/// One page of an aggregator's summaries strictly older than `before`, newest first.
pub fn summary_page(
    conn: &Connection,
    aggregator: UnitRef,
    before: Option<(NaiveDate, i64)>,
    limit: usize,
) -> EngineResult<Vec<Summary>> {
    let limit = limit as i64;
    match before {
        None => {
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries s
                 WHERE s.aggregator_kind = ?1 AND s.aggregator_id = ?2
                 ORDER BY s.summary_date DESC, s.id DESC LIMIT ?3"
            );
            query_summaries(conn, &sql, (aggregator.kind.as_str(), aggregator.id, limit))
        }
        Some((date, id)) => {
            let sql = format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries s
                 WHERE s.aggregator_kind = ?1 AND s.aggregator_id = ?2
                   AND (s.summary_date < ?3 OR (s.summary_date = ?3 AND s.id < ?4))
                 ORDER BY s.summary_date DESC, s.id DESC LIMIT ?5"
            );
            query_summaries(
                conn,
                &sql,
                (aggregator.kind.as_str(), aggregator.id, date, id, limit),
            )
        }
    }
}
