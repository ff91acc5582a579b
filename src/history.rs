use std::collections::VecDeque;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::aggregate;
use crate::error::EngineResult;
use crate::model::{Scoped, Summary, UnitRef, UnitReport};
use crate::principal::Principal;
use crate::store;
use crate::visibility::can_view;

/// A date-descending record source that can be read one keyset page at a time.
pub trait PageSource {
    type Item: Scoped;

    fn fetch(&self, before: Option<(NaiveDate, i64)>, limit: usize) -> EngineResult<Vec<Self::Item>>;

    /// Keyset position of an item: (date, id).
    fn position(item: &Self::Item) -> (NaiveDate, i64);
}

pub struct ReportPages<'c> {
    conn: &'c Connection,
    unit: UnitRef,
}

impl PageSource for ReportPages<'_> {
    type Item = UnitReport;

    fn fetch(&self, before: Option<(NaiveDate, i64)>, limit: usize) -> EngineResult<Vec<UnitReport>> {
        store::report_page(self.conn, self.unit, before, limit)
    }

    fn position(item: &UnitReport) -> (NaiveDate, i64) {
        (item.report_date, item.id)
    }
}

pub struct SummaryPages<'c> {
    conn: &'c Connection,
    aggregator: UnitRef,
}

impl PageSource for SummaryPages<'_> {
    type Item = Summary;

    fn fetch(&self, before: Option<(NaiveDate, i64)>, limit: usize) -> EngineResult<Vec<Summary>> {
        aggregate::summary_page(self.conn, self.aggregator, before, limit)
    }

    fn position(item: &Summary) -> (NaiveDate, i64) {
        (item.summary_date, item.id)
    }
}

/// Lazy, finite, restartable history. Pages are fetched on demand and every
/// item passes through `can_view` before it is yielded.
pub struct History<'p, S: PageSource> {
    source: S,
    principal: &'p Principal,
    page_size: usize,
    buffer: VecDeque<S::Item>,
    cursor: Option<(NaiveDate, i64)>,
    exhausted: bool,
}

impl<'p, S: PageSource> History<'p, S> {
    pub fn new(source: S, principal: &'p Principal, page_size: usize) -> Self {
        Self {
            source,
            principal,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Start again from the newest record.
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.cursor = None;
        self.exhausted = false;
    }

    fn refill(&mut self) -> EngineResult<()> {
        let principal = self.principal;
        while self.buffer.is_empty() && !self.exhausted {
            let page = self.source.fetch(self.cursor, self.page_size)?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = Some(S::position(last));
            }
            self.buffer
                .extend(page.into_iter().filter(|item| can_view(principal, item)));
        }
        Ok(())
    }
}

impl<S: PageSource> Iterator for History<'_, S> {
    type Item = EngineResult<S::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.refill() {
            // A failed page ends the sequence; `rewind` starts it over.
            self.exhausted = true;
            self.buffer.clear();
            return Some(Err(e));
        }
        self.buffer.pop_front().map(Ok)
    }
}

pub fn list_for_unit<'c, 'p>(
    conn: &'c Connection,
    unit: UnitRef,
    caller: &'p Principal,
    page_size: usize,
) -> History<'p, ReportPages<'c>> {
    History::new(ReportPages { conn, unit }, caller, page_size)
}

pub fn list_summaries_for_aggregator<'c, 'p>(
    conn: &'c Connection,
    aggregator: UnitRef,
    caller: &'p Principal,
    page_size: usize,
) -> History<'p, SummaryPages<'c>> {
    History::new(SummaryPages { conn, aggregator }, caller, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{generate_summary, SummaryRequest};
    use crate::db;
    use crate::model::UnitKind;
    use crate::org::{import, sample_snapshot};
    use crate::principal::Role;
    use crate::store::{submit, ReportSubmission};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).expect("date")
    }

    fn principal(id: i64, role: Role) -> Principal {
        Principal {
            id,
            role,
            group_id: None,
            department_id: None,
            course_id: None,
            faculty_id: None,
            location_id: None,
        }
    }

    fn seeded_with_days(days: u32) -> Connection {
        let conn = db::open_in_memory();
        import(&conn, &sample_snapshot()).expect("import");
        for d in 1..=days {
            submit(
                &conn,
                &ReportSubmission {
                    unit: UnitRef::new(UnitKind::Group, 101),
                    date: day(d),
                    total_count: 20,
                    present_count: 20,
                    absences: Vec::new(),
                    submitted_by: 7,
                },
            )
            .expect("submit");
        }
        conn
    }

    #[test]
    fn unit_history_spans_pages_newest_first() {
        let conn = seeded_with_days(5);
        let mut p = principal(7, Role::GroupCommander);
        p.group_id = Some(101);
        let dates: Vec<NaiveDate> = list_for_unit(&conn, UnitRef::new(UnitKind::Group, 101), &p, 2)
            .map(|r| r.expect("row").report_date)
            .collect();
        assert_eq!(dates, vec![day(5), day(4), day(3), day(2), day(1)]);
    }

    #[test]
    fn history_is_restartable() {
        let conn = seeded_with_days(3);
        let mut p = principal(7, Role::GroupCommander);
        p.group_id = Some(101);
        let mut history = list_for_unit(&conn, UnitRef::new(UnitKind::Group, 101), &p, 2);
        assert_eq!(history.next().expect("first").expect("ok").report_date, day(3));
        assert_eq!(history.by_ref().count(), 2);
        assert!(history.next().is_none());
        history.rewind();
        assert_eq!(history.count(), 3);
    }

    #[test]
    fn hidden_records_are_filtered_out() {
        let conn = seeded_with_days(3);
        let mut stranger = principal(99, Role::GroupCommander);
        stranger.group_id = Some(102);
        let seen = list_for_unit(&conn, UnitRef::new(UnitKind::Group, 101), &stranger, 1).count();
        assert_eq!(seen, 0);
    }

    #[test]
    fn summary_history_respects_visibility() {
        let conn = seeded_with_days(2);
        for d in 1..=2 {
            generate_summary(
                &conn,
                &SummaryRequest {
                    aggregator: UnitRef::new(UnitKind::Course, 1),
                    date: day(d),
                    submitted_by: 20,
                    officers: None,
                },
            )
            .expect("summary");
        }
        let course = UnitRef::new(UnitKind::Course, 1);

        let mut dean = principal(30, Role::FacultyHead);
        dean.faculty_id = Some(1);
        let seen: Vec<NaiveDate> = list_summaries_for_aggregator(&conn, course, &dean, 10)
            .map(|s| s.expect("row").summary_date)
            .collect();
        assert_eq!(seen, vec![day(2), day(1)]);

        let mut other_dean = principal(31, Role::FacultyHead);
        other_dean.faculty_id = Some(2);
        assert_eq!(list_summaries_for_aggregator(&conn, course, &other_dean, 10).count(), 0);
    }
}
