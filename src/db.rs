use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::{is_transient, EngineResult};

pub const DB_FILE_NAME: &str = "rollcall.sqlite3";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const READ_ATTEMPTS: u32 = 3;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // WAL lets readers proceed while another process holds the write lock.
    conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0))?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    init_schema(&conn).expect("schema");
    conn
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculties(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            faculty_id INTEGER NOT NULL,
            number INTEGER NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculties(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_faculty ON courses(faculty_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS locations(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_groups(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            group_number INTEGER NOT NULL UNIQUE,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_study_groups_course ON study_groups(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id INTEGER PRIMARY KEY,
            faculty_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculties(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_departments_faculty ON departments(faculty_id)",
        [],
    )?;

    // One report per reporting unit per day. Hierarchy columns are captured at
    // submission time so visibility checks need no joins.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS unit_reports(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_kind TEXT NOT NULL,
            unit_id INTEGER NOT NULL,
            group_id INTEGER,
            department_id INTEGER,
            course_id INTEGER,
            faculty_id INTEGER,
            location_id INTEGER,
            report_date TEXT NOT NULL,
            total_count INTEGER NOT NULL CHECK(total_count >= 0),
            present_count INTEGER NOT NULL CHECK(present_count >= 0 AND present_count <= total_count),
            submitted_by INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            was_updated INTEGER NOT NULL DEFAULT 0,
            UNIQUE(unit_kind, unit_id, report_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_unit_reports_date ON unit_reports(report_date)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS unit_report_absences(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_id INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            full_name TEXT NOT NULL,
            reason TEXT NOT NULL,
            FOREIGN KEY(report_id) REFERENCES unit_reports(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_unit_report_absences_report ON unit_report_absences(report_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS summaries(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregator_kind TEXT NOT NULL,
            aggregator_id INTEGER NOT NULL,
            course_id INTEGER,
            faculty_id INTEGER,
            location_id INTEGER,
            summary_date TEXT NOT NULL,
            total_count INTEGER NOT NULL CHECK(total_count >= 0),
            present_count INTEGER NOT NULL CHECK(present_count >= 0 AND present_count <= total_count),
            absent_count INTEGER NOT NULL,
            reasons TEXT NOT NULL,
            submitted_by INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            was_updated INTEGER NOT NULL DEFAULT 0,
            UNIQUE(aggregator_kind, aggregator_id, summary_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS summary_absences(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            summary_id INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            full_name TEXT NOT NULL,
            reason TEXT NOT NULL,
            FOREIGN KEY(summary_id) REFERENCES summaries(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_summary_absences_summary ON summary_absences(summary_id)",
        [],
    )?;

    Ok(())
}

/// Open a write transaction that takes the store's write lock up front, so a
/// concurrent writer on the same key waits instead of interleaving.
pub fn write_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

/// Run a multi-statement read against one consistent view of the store. Under
/// WAL a deferred transaction pins its snapshot at the first read, so a parent
/// row and its child rows can never come from two different commits. Inside an
/// already open transaction the statements simply join it.
pub fn read_snapshot<T, F>(conn: &Connection, mut read: F) -> EngineResult<T>
where
    F: FnMut(&Connection) -> rusqlite::Result<T>,
{
    with_read_retry(|| {
        if !conn.is_autocommit() {
            return read(conn);
        }
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
        let value = read(&tx)?;
        tx.commit()?;
        Ok(value)
    })
}

/// Run a read, retrying a bounded number of times while the store is busy.
/// Never use this for writes.
pub fn with_read_retry<T, F>(mut read: F) -> EngineResult<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    let mut attempt = 1;
    loop {
        match read() {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt < READ_ATTEMPTS => {
                tracing::debug!(attempt, error = %e, "store busy, retrying read");
                std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
