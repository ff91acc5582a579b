use crate::model::{Scoped, UnitKind};
use crate::principal::{Actor, Principal};

/// Read access check for reports and summaries. Pure: it looks only at the
/// hierarchy fields already carried by the principal and the record.
///
/// First match wins: own unit, direct structural child of the principal's
/// aggregator unit, authored by the principal. Admin reads everything.
pub fn can_view<R: Scoped + ?Sized>(principal: &Principal, record: &R) -> bool {
    let actor = match principal.actor() {
        Ok(actor) => actor,
        // An unresolvable principal still owns what it authored.
        Err(_) => return record.submitted_by() == principal.id,
    };
    if actor == Actor::AdminOverride {
        return true;
    }

    let unit = record.unit();
    if actor.own_unit() == Some(unit) {
        return true;
    }
    if is_direct_child(actor, record) {
        return true;
    }
    record.submitted_by() == principal.id
}

fn is_direct_child<R: Scoped + ?Sized>(actor: Actor, record: &R) -> bool {
    let unit = record.unit();
    let h = record.hierarchy();
    match actor {
        Actor::CourseAggregator { course_id } => {
            unit.kind == UnitKind::Group && h.course_id == Some(course_id)
        }
        Actor::FacultyAggregator { faculty_id } => {
            matches!(unit.kind, UnitKind::Department | UnitKind::Course)
                && h.faculty_id == Some(faculty_id)
        }
        Actor::LocationAggregator { location_id } => {
            unit.kind == UnitKind::Group && h.location_id == Some(location_id)
        }
        Actor::GroupSubmitter { .. } | Actor::DepartmentSubmitter { .. } | Actor::AdminOverride => {
            false
        }
    }
}
