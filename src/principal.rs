use serde::Deserialize;

use crate::error::{EngineError, EngineResult};
use crate::model::{UnitKind, UnitRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[serde(alias = "kg")]
    GroupCommander,
    #[serde(alias = "nkf")]
    DepartmentHead,
    #[serde(alias = "nk")]
    CourseHead,
    #[serde(alias = "nf")]
    FacultyHead,
    #[serde(alias = "cl")]
    LocationDutyOfficer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::GroupCommander => "group-commander",
            Role::DepartmentHead => "department-head",
            Role::CourseHead => "course-head",
            Role::FacultyHead => "faculty-head",
            Role::LocationDutyOfficer => "location-duty-officer",
            Role::Admin => "admin",
        }
    }
}

/// Authenticated caller as handed over by the auth layer. Trusted as given.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: i64,
    pub role: Role,
    #[serde(default, alias = "group_id")]
    pub group_id: Option<i64>,
    #[serde(default, alias = "department_id")]
    pub department_id: Option<i64>,
    #[serde(default, alias = "course_id")]
    pub course_id: Option<i64>,
    #[serde(default, alias = "faculty_id")]
    pub faculty_id: Option<i64>,
    #[serde(default, alias = "location_id")]
    pub location_id: Option<i64>,
}

/// What a principal may act on, keyed by the exact hierarchy id it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    GroupSubmitter { group_id: i64 },
    DepartmentSubmitter { department_id: i64 },
    CourseAggregator { course_id: i64 },
    FacultyAggregator { faculty_id: i64 },
    LocationAggregator { location_id: i64 },
    AdminOverride,
}

impl Principal {
    pub fn actor(&self) -> EngineResult<Actor> {
        let required = |value: Option<i64>, key: &str| {
            value.ok_or_else(|| {
                EngineError::forbidden(format!(
                    "{} principal {} carries no {}",
                    self.role.as_str(),
                    self.id,
                    key
                ))
            })
        };
        Ok(match self.role {
            Role::GroupCommander => Actor::GroupSubmitter {
                group_id: required(self.group_id, "group_id")?,
            },
            Role::DepartmentHead => Actor::DepartmentSubmitter {
                department_id: required(self.department_id, "department_id")?,
            },
            Role::CourseHead => Actor::CourseAggregator {
                course_id: required(self.course_id, "course_id")?,
            },
            Role::FacultyHead => Actor::FacultyAggregator {
                faculty_id: required(self.faculty_id, "faculty_id")?,
            },
            Role::LocationDutyOfficer => Actor::LocationAggregator {
                location_id: required(self.location_id, "location_id")?,
            },
            Role::Admin => Actor::AdminOverride,
        })
    }
}

impl Actor {
    /// The unit this actor reports for or aggregates over. Admin owns none.
    pub fn own_unit(self) -> Option<UnitRef> {
        match self {
            Actor::GroupSubmitter { group_id } => Some(UnitRef::new(UnitKind::Group, group_id)),
            Actor::DepartmentSubmitter { department_id } => {
                Some(UnitRef::new(UnitKind::Department, department_id))
            }
            Actor::CourseAggregator { course_id } => Some(UnitRef::new(UnitKind::Course, course_id)),
            Actor::FacultyAggregator { faculty_id } => {
                Some(UnitRef::new(UnitKind::Faculty, faculty_id))
            }
            Actor::LocationAggregator { location_id } => {
                Some(UnitRef::new(UnitKind::Location, location_id))
            }
            Actor::AdminOverride => None,
        }
    }

    /// Resolve the reporting unit a submission targets. Submitters are pinned to
    /// their own unit; admin must name one explicitly.
    pub fn submission_target(self, requested: Option<UnitRef>) -> EngineResult<UnitRef> {
        match self {
            Actor::GroupSubmitter { .. } | Actor::DepartmentSubmitter { .. } => {
                let own = self.own_unit().ok_or_else(|| {
                    EngineError::forbidden("submitter resolved without a unit")
                })?;
                match requested {
                    Some(unit) if unit != own => Err(EngineError::forbidden(format!(
                        "may submit only for {}, not {}",
                        own, unit
                    ))),
                    _ => Ok(own),
                }
            }
            Actor::AdminOverride => {
                let unit = requested.ok_or_else(|| {
                    EngineError::validation("admin submission must name the target unit")
                })?;
                if !unit.kind.is_reporting() {
                    return Err(EngineError::forbidden(format!(
                        "{} units do not submit reports",
                        unit.kind.as_str()
                    )));
                }
                Ok(unit)
            }
            _ => Err(EngineError::forbidden(
                "aggregator roles cannot submit unit reports",
            )),
        }
    }

    /// Resolve the aggregator a summary request targets.
    pub fn aggregation_target(self, requested: Option<UnitRef>) -> EngineResult<UnitRef> {
        match self {
            Actor::CourseAggregator { .. }
            | Actor::FacultyAggregator { .. }
            | Actor::LocationAggregator { .. } => {
                let own = self.own_unit().ok_or_else(|| {
                    EngineError::forbidden("aggregator resolved without a unit")
                })?;
                match requested {
                    Some(unit) if unit != own => Err(EngineError::forbidden(format!(
                        "may aggregate only for {}, not {}",
                        own, unit
                    ))),
                    _ => Ok(own),
                }
            }
            Actor::AdminOverride => {
                let unit = requested.ok_or_else(|| {
                    EngineError::validation("admin aggregation must name the aggregator")
                })?;
                if !unit.kind.is_aggregator() {
                    return Err(EngineError::forbidden(format!(
                        "{} units do not aggregate",
                        unit.kind.as_str()
                    )));
                }
                Ok(unit)
            }
            Actor::GroupSubmitter { .. } | Actor::DepartmentSubmitter { .. } => Err(
                EngineError::forbidden("reporting roles cannot generate summaries"),
            ),
        }
    }
}
