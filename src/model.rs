use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Group,
    Department,
    Location,
    Course,
    Faculty,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Group => "group",
            UnitKind::Department => "department",
            UnitKind::Location => "location",
            UnitKind::Course => "course",
            UnitKind::Faculty => "faculty",
        }
    }

    pub fn parse(raw: &str) -> Option<UnitKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "group" => Some(UnitKind::Group),
            "department" => Some(UnitKind::Department),
            "location" => Some(UnitKind::Location),
            "course" => Some(UnitKind::Course),
            "faculty" => Some(UnitKind::Faculty),
            _ => None,
        }
    }

    /// Kinds that submit their own daily report.
    pub fn is_reporting(self) -> bool {
        matches!(self, UnitKind::Group | UnitKind::Department)
    }

    /// Kinds that roll child reports up into a summary.
    pub fn is_aggregator(self) -> bool {
        matches!(
            self,
            UnitKind::Course | UnitKind::Faculty | UnitKind::Location
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub id: i64,
}

impl UnitRef {
    pub fn new(kind: UnitKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for UnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// Denormalized hierarchy coordinates carried by every stored record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    pub group_id: Option<i64>,
    pub department_id: Option<i64>,
    pub course_id: Option<i64>,
    pub faculty_id: Option<i64>,
    pub location_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceEntry {
    #[serde(alias = "full_name")]
    pub full_name: String,
    pub reason: String,
}

impl AbsenceEntry {
    pub fn new(full_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub id: i64,
    pub unit: UnitRef,
    pub hierarchy: Hierarchy,
    pub report_date: NaiveDate,
    pub total_count: u32,
    pub present_count: u32,
    pub absences: Vec<AbsenceEntry>,
    pub submitted_by: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub was_updated: bool,
}

impl UnitReport {
    pub fn absent_count(&self) -> u32 {
        self.total_count.saturating_sub(self.present_count)
    }
}

/// Mapping from absence reason to the number of entries carrying it.
pub type ReasonTally = BTreeMap<String, u32>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: i64,
    pub aggregator: UnitRef,
    pub hierarchy: Hierarchy,
    pub summary_date: NaiveDate,
    pub total_count: u32,
    pub present_count: u32,
    pub reasons: ReasonTally,
    pub submitted_by: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub was_updated: bool,
}

impl Summary {
    pub fn absent_count(&self) -> u32 {
        self.total_count.saturating_sub(self.present_count)
    }
}

/// Anything the visibility rules can be evaluated against.
pub trait Scoped {
    fn unit(&self) -> UnitRef;
    fn hierarchy(&self) -> &Hierarchy;
    fn submitted_by(&self) -> i64;
}

impl Scoped for UnitReport {
    fn unit(&self) -> UnitRef {
        self.unit
    }
    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }
    fn submitted_by(&self) -> i64 {
        self.submitted_by
    }
}

impl Scoped for Summary {
    fn unit(&self) -> UnitRef {
        self.aggregator
    }
    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }
    fn submitted_by(&self) -> i64 {
        self.submitted_by
    }
}

/// Location encoded by a group's numeric designator: its leading decimal digit.
pub fn location_of_group_number(group_number: i64) -> Option<i64> {
    group_number
        .abs()
        .to_string()
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .map(i64::from)
}
