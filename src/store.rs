use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::model::{AbsenceEntry, Hierarchy, UnitKind, UnitRef, UnitReport};
use crate::org;

const REPORT_COLUMNS: &str = "r.id, r.unit_kind, r.unit_id, r.group_id, r.department_id, r.course_id,
     r.faculty_id, r.location_id, r.report_date, r.total_count, r.present_count,
     r.submitted_by, r.created_at, r.updated_at, r.was_updated";

#[derive(Debug, Clone)]
pub struct ReportSubmission {
    pub unit: UnitRef,
    pub date: NaiveDate,
    pub total_count: i64,
    pub present_count: i64,
    pub absences: Vec<AbsenceEntry>,
    pub submitted_by: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportHandle {
    pub report_id: i64,
    /// False when an existing report for the same unit and day was replaced.
    pub created: bool,
}

/// Which parent an absence row hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceOwner {
    Report,
    Summary,
}

impl AbsenceOwner {
    fn table(self) -> &'static str {
        match self {
            AbsenceOwner::Report => "unit_report_absences",
            AbsenceOwner::Summary => "summary_absences",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            AbsenceOwner::Report => "report_id",
            AbsenceOwner::Summary => "summary_id",
        }
    }
}

pub fn validate_counts(total_count: i64, present_count: i64) -> EngineResult<(u32, u32)> {
    let total = u32::try_from(total_count).map_err(|_| {
        EngineError::validation(format!(
            "total_count must be a non-negative integer, got {}",
            total_count
        ))
    })?;
    let present = u32::try_from(present_count).map_err(|_| {
        EngineError::validation(format!(
            "present_count must be a non-negative integer, got {}",
            present_count
        ))
    })?;
    if present > total {
        return Err(EngineError::validation(format!(
            "present_count exceeds total_count ({} > {})",
            present, total
        )));
    }
    Ok((total, present))
}

/// Names and reasons are trimmed once on intake; the trimmed entries are what
/// gets stored and returned, so a resubmission of a stored list is byte-equal.
fn normalize_absences(absences: &[AbsenceEntry]) -> EngineResult<Vec<AbsenceEntry>> {
    absences
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let full_name = a.full_name.trim();
            let reason = a.reason.trim();
            if full_name.is_empty() {
                return Err(EngineError::validation(format!(
                    "absence #{} has an empty full_name",
                    i + 1
                )));
            }
            if reason.is_empty() {
                return Err(EngineError::validation(format!(
                    "absence #{} ({}) has an empty reason",
                    i + 1,
                    full_name
                )));
            }
            Ok(AbsenceEntry::new(full_name, reason))
        })
        .collect()
}

/// Insert the report for (unit, date), or fully replace the existing one.
/// Runs as a single write transaction: lookup, parent upsert and absence
/// replacement commit together or not at all.
pub fn submit(conn: &Connection, sub: &ReportSubmission) -> EngineResult<ReportHandle> {
    if !sub.unit.kind.is_reporting() {
        return Err(EngineError::forbidden(format!(
            "{} units do not submit reports",
            sub.unit.kind.as_str()
        )));
    }
    let (total, present) = validate_counts(sub.total_count, sub.present_count)?;
    let absences = normalize_absences(&sub.absences)?;

    let key = format!("report of {} on {}", sub.unit, sub.date);
    let tx = db::write_tx(conn).map_err(|e| EngineError::from(e).on_write(&key))?;
    let handle = upsert_report(&tx, sub, total, present, &absences).map_err(|e| e.on_write(&key))?;
    tx.commit()
        .map_err(|e| EngineError::from(e).on_write(&key))?;

    info!(
        report_id = handle.report_id,
        unit = %sub.unit,
        date = %sub.date,
        created = handle.created,
        total,
        present,
        absences = absences.len(),
        "unit report stored"
    );
    Ok(handle)
}

fn upsert_report(
    conn: &Connection,
    sub: &ReportSubmission,
    total: u32,
    present: u32,
    absences: &[AbsenceEntry],
) -> EngineResult<ReportHandle> {
    let h = org::resolve(conn, sub.unit)?;
    let now = Utc::now().to_rfc3339();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM unit_reports WHERE unit_kind = ? AND unit_id = ? AND report_date = ?",
            (sub.unit.kind.as_str(), sub.unit.id, sub.date),
            |r| r.get(0),
        )
        .optional()?;

    let handle = match existing {
        Some(report_id) => {
            conn.execute(
                "UPDATE unit_reports
                 SET group_id = ?, department_id = ?, course_id = ?, faculty_id = ?, location_id = ?,
                     total_count = ?, present_count = ?, submitted_by = ?,
                     updated_at = ?, was_updated = 1
                 WHERE id = ?",
                rusqlite::params![
                    h.group_id,
                    h.department_id,
                    h.course_id,
                    h.faculty_id,
                    h.location_id,
                    total,
                    present,
                    sub.submitted_by,
                    now,
                    report_id
                ],
            )?;
            ReportHandle {
                report_id,
                created: false,
            }
        }
        None => {
            conn.execute(
                "INSERT INTO unit_reports(
                    unit_kind, unit_id, group_id, department_id, course_id, faculty_id, location_id,
                    report_date, total_count, present_count, submitted_by, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    sub.unit.kind.as_str(),
                    sub.unit.id,
                    h.group_id,
                    h.department_id,
                    h.course_id,
                    h.faculty_id,
                    h.location_id,
                    sub.date,
                    total,
                    present,
                    sub.submitted_by,
                    now
                ],
            )?;
            ReportHandle {
                report_id: conn.last_insert_rowid(),
                created: true,
            }
        }
    };

    replace_absences(conn, AbsenceOwner::Report, handle.report_id, absences)?;
    Ok(handle)
}

/// Full replace of an owner's absence rows, stored exactly as given. Callers
/// run this inside the same transaction as the parent upsert.
pub fn replace_absences(
    conn: &Connection,
    owner: AbsenceOwner,
    parent_id: i64,
    entries: &[AbsenceEntry],
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} = ?",
            owner.table(),
            owner.parent_column()
        ),
        [parent_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {}({}, sort_order, full_name, reason) VALUES(?, ?, ?, ?)",
        owner.table(),
        owner.parent_column()
    ))?;
    for (i, a) in entries.iter().enumerate() {
        stmt.execute((parent_id, i as i64, &a.full_name, &a.reason))?;
    }
    Ok(())
}

/// Absence rows of one parent, read on the caller's connection or transaction.
pub(crate) fn absences_of(
    conn: &Connection,
    owner: AbsenceOwner,
    parent_id: i64,
) -> rusqlite::Result<Vec<AbsenceEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT full_name, reason FROM {} WHERE {} = ? ORDER BY sort_order, id",
        owner.table(),
        owner.parent_column()
    ))?;
    let rows = stmt.query_map([parent_id], |r| {
        Ok(AbsenceEntry {
            full_name: r.get(0)?,
            reason: r.get(1)?,
        })
    })?;
    rows.collect()
}

pub(crate) fn unit_kind_at(r: &Row<'_>, idx: usize) -> rusqlite::Result<UnitKind> {
    let raw: String = r.get(idx)?;
    UnitKind::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown unit kind {raw:?}").into(),
        )
    })
}

fn report_from_row(r: &Row<'_>) -> rusqlite::Result<UnitReport> {
    Ok(UnitReport {
        id: r.get(0)?,
        unit: UnitRef::new(unit_kind_at(r, 1)?, r.get(2)?),
        hierarchy: Hierarchy {
            group_id: r.get(3)?,
            department_id: r.get(4)?,
            course_id: r.get(5)?,
            faculty_id: r.get(6)?,
            location_id: r.get(7)?,
        },
        report_date: r.get(8)?,
        total_count: r.get(9)?,
        present_count: r.get(10)?,
        absences: Vec::new(),
        submitted_by: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
        was_updated: r.get::<_, i64>(14)? != 0,
    })
}

fn query_reports<P: rusqlite::Params + Clone>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> EngineResult<Vec<UnitReport>> {
    db::read_snapshot(conn, |c| {
        let mut reports = {
            let mut stmt = c.prepare(sql)?;
            let rows = stmt.query_map(params.clone(), report_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for report in &mut reports {
            report.absences = absences_of(c, AbsenceOwner::Report, report.id)?;
        }
        Ok(reports)
    })
}

pub fn get_by_id(conn: &Connection, report_id: i64) -> EngineResult<UnitReport> {
    let sql = format!("SELECT {REPORT_COLUMNS} FROM unit_reports r WHERE r.id = ?");
    query_reports(conn, &sql, [report_id])?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::not_found(format!("report {}", report_id)))
}

/// Reports of one unit with `from <= report_date <= to`, newest first.
pub fn get_by_unit_and_date_range(
    conn: &Connection,
    unit: UnitRef,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Vec<UnitReport>> {
    if from > to {
        return Err(EngineError::validation(format!(
            "date range is inverted ({} > {})",
            from, to
        )));
    }
    let sql = format!(
        "SELECT {REPORT_COLUMNS} FROM unit_reports r
         WHERE r.unit_kind = ?1 AND r.unit_id = ?2 AND r.report_date >= ?3 AND r.report_date <= ?4
         ORDER BY r.report_date DESC, r.id DESC"
    );
    query_reports(conn, &sql, (unit.kind.as_str(), unit.id, from, to))
}

/// One page of a unit's history strictly older than `before`, newest first.
pub fn report_page(
    conn: &Connection,
    unit: UnitRef,
    before: Option<(NaiveDate, i64)>,
    limit: usize,
) -> EngineResult<Vec<UnitReport>> {
    let limit = limit as i64;
    match before {
        None => {
            let sql = format!(
                "SELECT {REPORT_COLUMNS} FROM unit_reports r
                 WHERE r.unit_kind = ?1 AND r.unit_id = ?2
                 ORDER BY r.report_date DESC, r.id DESC LIMIT ?3"
            );
            query_reports(conn, &sql, (unit.kind.as_str(), unit.id, limit))
        }
        Some((date, id)) => {
            let sql = format!(
                "SELECT {REPORT_COLUMNS} FROM unit_reports r
                 WHERE r.unit_kind = ?1 AND r.unit_id = ?2
                   AND (r.report_date < ?3 OR (r.report_date = ?3 AND r.id < ?4))
                 ORDER BY r.report_date DESC, r.id DESC LIMIT ?5"
            );
            query_reports(conn, &sql, (unit.kind.as_str(), unit.id, date, id, limit))
        }
    }
}

/// Child reports feeding `aggregator` on `date`, selected through the live
/// reference tables.
pub fn child_reports(
    conn: &Connection,
    aggregator: UnitRef,
    date: NaiveDate,
) -> EngineResult<Vec<UnitReport>> {
    let sql = match aggregator.kind {
        UnitKind::Course => format!(
            "SELECT {REPORT_COLUMNS} FROM unit_reports r
             JOIN study_groups g ON g.id = r.unit_id
             WHERE r.unit_kind = 'group' AND g.course_id = ?1 AND r.report_date = ?2
             ORDER BY g.group_number"
        ),
        // Location identity is the leading digit of the group designator.
        UnitKind::Location => format!(
            "SELECT {REPORT_COLUMNS} FROM unit_reports r
             JOIN study_groups g ON g.id = r.unit_id
             WHERE r.unit_kind = 'group'
               AND substr(CAST(g.group_number AS TEXT), 1, 1) = CAST(?1 AS TEXT)
               AND r.report_date = ?2
             ORDER BY g.group_number"
        ),
        UnitKind::Faculty => format!(
            "SELECT {REPORT_COLUMNS} FROM unit_reports r
             JOIN departments d ON d.id = r.unit_id
             WHERE r.unit_kind = 'department' AND d.faculty_id = ?1 AND r.report_date = ?2
             ORDER BY d.name"
        ),
        UnitKind::Group | UnitKind::Department => {
            return Err(EngineError::validation(format!(
                "{} is not an aggregator",
                aggregator
            )))
        }
    };
    query_reports(conn, &sql, (aggregator.id, date))
}
