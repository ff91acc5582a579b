use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::model::{location_of_group_number, Hierarchy, UnitKind, UnitRef};

#[derive(Debug, Clone, Deserialize)]
pub struct FacultyRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRow {
    pub id: i64,
    #[serde(alias = "faculty_id")]
    pub faculty_id: i64,
    pub number: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRow {
    pub id: i64,
    #[serde(alias = "course_id")]
    pub course_id: i64,
    #[serde(alias = "group_number")]
    pub group_number: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRow {
    pub id: i64,
    #[serde(alias = "faculty_id")]
    pub faculty_id: i64,
    pub name: String,
}

/// Reference hierarchy snapshot handed over by the directory collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrgSnapshot {
    pub faculties: Vec<FacultyRow>,
    pub courses: Vec<CourseRow>,
    pub locations: Vec<LocationRow>,
    pub groups: Vec<GroupRow>,
    pub departments: Vec<DepartmentRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub faculties: usize,
    pub courses: usize,
    pub locations: usize,
    pub groups: usize,
    pub departments: usize,
}

/// Upsert the whole snapshot in one transaction. Existing rows are updated in
/// place; nothing is deleted.
pub fn import(conn: &Connection, snapshot: &OrgSnapshot) -> EngineResult<ImportCounts> {
    let tx = db::write_tx(conn).map_err(|e| EngineError::from(e).on_write("org"))?;
    let counts = import_rows(&tx, snapshot).map_err(|e| e.on_write("org"))?;
    tx.commit().map_err(|e| EngineError::from(e).on_write("org"))?;
    Ok(counts)
}

fn import_rows(conn: &Connection, s: &OrgSnapshot) -> EngineResult<ImportCounts> {
    for f in &s.faculties {
        conn.execute(
            "INSERT INTO faculties(id, name) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            (f.id, &f.name),
        )?;
    }
    for l in &s.locations {
        conn.execute(
            "INSERT INTO locations(id, name) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            (l.id, &l.name),
        )?;
    }
    for c in &s.courses {
        ensure_exists(conn, UnitRef::new(UnitKind::Faculty, c.faculty_id))?;
        conn.execute(
            "INSERT INTO courses(id, faculty_id, number) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET faculty_id = excluded.faculty_id, number = excluded.number",
            (c.id, c.faculty_id, c.number),
        )?;
    }
    for g in &s.groups {
        if g.group_number <= 0 {
            return Err(EngineError::validation(format!(
                "group {} has non-positive group_number {}",
                g.id, g.group_number
            )));
        }
        ensure_exists(conn, UnitRef::new(UnitKind::Course, g.course_id))?;
        conn.execute(
            "INSERT INTO study_groups(id, course_id, group_number) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET course_id = excluded.course_id, group_number = excluded.group_number",
            (g.id, g.course_id, g.group_number),
        )?;
    }
    for d in &s.departments {
        ensure_exists(conn, UnitRef::new(UnitKind::Faculty, d.faculty_id))?;
        conn.execute(
            "INSERT INTO departments(id, faculty_id, name) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET faculty_id = excluded.faculty_id, name = excluded.name",
            (d.id, d.faculty_id, &d.name),
        )?;
    }
    refresh_stored_hierarchy(conn)?;
    Ok(ImportCounts {
        faculties: s.faculties.len(),
        courses: s.courses.len(),
        locations: s.locations.len(),
        groups: s.groups.len(),
        departments: s.departments.len(),
    })
}

/// Re-stamp the hierarchy columns of stored reports and course summaries from
/// the reference tables, so a unit moved by an import is read under its new
/// parents.
fn refresh_stored_hierarchy(conn: &Connection) -> rusqlite::Result<()> {
    let groups = conn.execute(
        "UPDATE unit_reports SET
            course_id = (SELECT g.course_id FROM study_groups g WHERE g.id = unit_reports.unit_id),
            faculty_id = (SELECT c.faculty_id FROM study_groups g JOIN courses c ON c.id = g.course_id
                          WHERE g.id = unit_reports.unit_id),
            location_id = (SELECT CAST(substr(CAST(g.group_number AS TEXT), 1, 1) AS INTEGER)
                           FROM study_groups g WHERE g.id = unit_reports.unit_id)
         WHERE unit_kind = 'group' AND unit_id IN (SELECT id FROM study_groups)",
        [],
    )?;
    let departments = conn.execute(
        "UPDATE unit_reports SET
            faculty_id = (SELECT d.faculty_id FROM departments d WHERE d.id = unit_reports.unit_id)
         WHERE unit_kind = 'department' AND unit_id IN (SELECT id FROM departments)",
        [],
    )?;
    let summaries = conn.execute(
        "UPDATE summaries SET
            faculty_id = (SELECT c.faculty_id FROM courses c WHERE c.id = summaries.aggregator_id)
         WHERE aggregator_kind = 'course' AND aggregator_id IN (SELECT id FROM courses)",
        [],
    )?;
    tracing::debug!(groups, departments, summaries, "stored hierarchy refreshed");
    Ok(())
}

fn ensure_exists(conn: &Connection, unit: UnitRef) -> EngineResult<()> {
    let table = match unit.kind {
        UnitKind::Group => "study_groups",
        UnitKind::Department => "departments",
        UnitKind::Location => "locations",
        UnitKind::Course => "courses",
        UnitKind::Faculty => "faculties",
    };
    let found = conn
        .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?"), [unit.id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if found {
        Ok(())
    } else {
        Err(EngineError::not_found(unit.to_string()))
    }
}

/// Hierarchy coordinates of a unit, read from the live reference tables.
pub fn resolve(conn: &Connection, unit: UnitRef) -> EngineResult<Hierarchy> {
    let found = match unit.kind {
        UnitKind::Group => db::with_read_retry(|| {
            conn.query_row(
                "SELECT g.course_id, c.faculty_id, g.group_number
                 FROM study_groups g JOIN courses c ON c.id = g.course_id
                 WHERE g.id = ?",
                [unit.id],
                |r| {
                    Ok(Hierarchy {
                        group_id: Some(unit.id),
                        course_id: Some(r.get(0)?),
                        faculty_id: Some(r.get(1)?),
                        location_id: location_of_group_number(r.get(2)?),
                        department_id: None,
                    })
                },
            )
            .optional()
        })?,
        UnitKind::Department => db::with_read_retry(|| {
            conn.query_row(
                "SELECT faculty_id FROM departments WHERE id = ?",
                [unit.id],
                |r| {
                    Ok(Hierarchy {
                        department_id: Some(unit.id),
                        faculty_id: Some(r.get(0)?),
                        ..Hierarchy::default()
                    })
                },
            )
            .optional()
        })?,
        UnitKind::Course => db::with_read_retry(|| {
            conn.query_row(
                "SELECT faculty_id FROM courses WHERE id = ?",
                [unit.id],
                |r| {
                    Ok(Hierarchy {
                        course_id: Some(unit.id),
                        faculty_id: Some(r.get(0)?),
                        ..Hierarchy::default()
                    })
                },
            )
            .optional()
        })?,
        UnitKind::Faculty => db::with_read_retry(|| {
            conn.query_row("SELECT 1 FROM faculties WHERE id = ?", [unit.id], |_| {
                Ok(Hierarchy {
                    faculty_id: Some(unit.id),
                    ..Hierarchy::default()
                })
            })
            .optional()
        })?,
        UnitKind::Location => db::with_read_retry(|| {
            conn.query_row("SELECT 1 FROM locations WHERE id = ?", [unit.id], |_| {
                Ok(Hierarchy {
                    location_id: Some(unit.id),
                    ..Hierarchy::default()
                })
            })
            .optional()
        })?,
    };
    found.ok_or_else(|| EngineError::not_found(unit.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUnit {
    pub unit: UnitRef,
    pub label: String,
}

/// Child units of `aggregator` with no report on `date`. A faculty can list
/// its departments (the default), the groups of its courses, or its courses
/// with no group report at all; courses and locations list groups only.
pub fn pending_units(
    conn: &Connection,
    aggregator: UnitRef,
    child_kind: Option<UnitKind>,
    date: NaiveDate,
) -> EngineResult<Vec<PendingUnit>> {
    resolve(conn, aggregator)?;
    let (sql, kind) = match (aggregator.kind, child_kind) {
        (UnitKind::Course, None | Some(UnitKind::Group)) => (
            "SELECT g.id, CAST(g.group_number AS TEXT) FROM study_groups g
             WHERE g.course_id = ?1
               AND NOT EXISTS (SELECT 1 FROM unit_reports r
                               WHERE r.unit_kind = 'group' AND r.unit_id = g.id AND r.report_date = ?2)
             ORDER BY g.group_number",
            UnitKind::Group,
        ),
        (UnitKind::Location, None | Some(UnitKind::Group)) => (
            "SELECT g.id, CAST(g.group_number AS TEXT) FROM study_groups g
             WHERE substr(CAST(g.group_number AS TEXT), 1, 1) = CAST(?1 AS TEXT)
               AND NOT EXISTS (SELECT 1 FROM unit_reports r
                               WHERE r.unit_kind = 'group' AND r.unit_id = g.id AND r.report_date = ?2)
             ORDER BY g.group_number",
            UnitKind::Group,
        ),
        (UnitKind::Faculty, None | Some(UnitKind::Department)) => (
            "SELECT d.id, d.name FROM departments d
             WHERE d.faculty_id = ?1
               AND NOT EXISTS (SELECT 1 FROM unit_reports r
                               WHERE r.unit_kind = 'department' AND r.unit_id = d.id AND r.report_date = ?2)
             ORDER BY d.name",
            UnitKind::Department,
        ),
        (UnitKind::Faculty, Some(UnitKind::Group)) => (
            "SELECT g.id, CAST(g.group_number AS TEXT) FROM study_groups g
             JOIN courses c ON c.id = g.course_id
             WHERE c.faculty_id = ?1
               AND NOT EXISTS (SELECT 1 FROM unit_reports r
                               WHERE r.unit_kind = 'group' AND r.unit_id = g.id AND r.report_date = ?2)
             ORDER BY c.number, g.group_number",
            UnitKind::Group,
        ),
        (UnitKind::Faculty, Some(UnitKind::Course)) => (
            "SELECT c.id, CAST(c.number AS TEXT) FROM courses c
             WHERE c.faculty_id = ?1
               AND NOT EXISTS (SELECT 1 FROM unit_reports r
                               JOIN study_groups g ON r.unit_kind = 'group' AND r.unit_id = g.id
                               WHERE g.course_id = c.id AND r.report_date = ?2)
             ORDER BY c.number, c.id",
            UnitKind::Course,
        ),
        (UnitKind::Group | UnitKind::Department, _) => {
            return Err(EngineError::validation(format!(
                "{} is not an aggregator",
                aggregator
            )))
        }
        (_, Some(other)) => {
            return Err(EngineError::validation(format!(
                "{} has no pending {} units",
                aggregator,
                other.as_str()
            )))
        }
    };
    db::with_read_retry(|| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map((aggregator.id, date), |r| {
            Ok(PendingUnit {
                unit: UnitRef::new(kind, r.get(0)?),
                label: r.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
    })
}

#[cfg(test)]
pub(crate) fn sample_snapshot() -> OrgSnapshot {
    serde_json::from_value(serde_json::json!({
        "faculties": [{ "id": 1, "name": "Engineering" }, { "id": 2, "name": "Medicine" }],
        "courses": [
            { "id": 1, "facultyId": 1, "number": 1 },
            { "id": 2, "facultyId": 1, "number": 2 },
            { "id": 3, "facultyId": 2, "number": 1 }
        ],
        "locations": [{ "id": 1, "name": "North" }, { "id": 2, "name": "South" }],
        "groups": [
            { "id": 101, "courseId": 1, "groupNumber": 101 },
            { "id": 102, "courseId": 1, "groupNumber": 102 },
            { "id": 201, "courseId": 2, "groupNumber": 201 },
            { "id": 301, "courseId": 3, "groupNumber": 111 }
        ],
        "departments": [
            { "id": 11, "facultyId": 1, "name": "Mechanics" },
            { "id": 12, "facultyId": 1, "name": "Optics" },
            { "id": 21, "facultyId": 2, "name": "Surgery" }
        ]
    }))
    .expect("sample snapshot")
}
