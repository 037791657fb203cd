//! Finding a free (period, teacher, room) slot for a new section.

use crate::config::OptimizerConfig;
use crate::models::{CourseId, Layout, PeriodId, Problem, RoomId, TeacherId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub teacher: TeacherId,
    pub period: PeriodId,
    pub room: RoomId,
    /// Seats the room can offer this course, after special seat caps.
    pub seat_cap: u32,
}

/// Deterministic search for a slot that keeps every hard constraint.
///
/// Periods where the course runs fewest sections come first, then the
/// preferred teacher, then the remaining qualified teachers by id. Within a
/// slot the smallest room holding `desired_seats` wins, else the largest room.
pub fn find_placement(
    problem: &Problem,
    layout: &Layout,
    config: &OptimizerConfig,
    course_id: &CourseId,
    preferred_teacher: Option<&TeacherId>,
    desired_seats: u32,
) -> Option<Placement> {
    let course = problem.courses.get(course_id)?;
    let policy = config.policy_for(course_id);
    let global_cap = config.constraints.max_teacher_sections;

    let mut teachers: Vec<_> = problem
        .teachers
        .values()
        .filter(|t| t.can_teach(course_id))
        .filter(|t| !policy.requires_dedicated_teacher() || t.dedicated_course)
        .filter(|t| layout.teacher_load(&t.id) < t.section_cap(global_cap))
        .collect();
    teachers.sort_by_key(|t| (Some(&t.id) != preferred_teacher, t.id.clone()));

    let mut periods: Vec<&PeriodId> = problem
        .periods
        .keys()
        .filter(|p| policy.allows_period(p))
        .filter(|p| {
            policy
                .max_sections_per_period()
                .map_or(true, |cap| layout.course_sections_in_period(course_id, p) < cap)
        })
        .collect();
    periods.sort_by_key(|p| (layout.course_sections_in_period(course_id, p), (*p).clone()));

    for period in periods {
        for teacher in &teachers {
            if !teacher.is_available(period) || layout.teacher_busy(&teacher.id, period) {
                continue;
            }
            let rooms = problem
                .rooms
                .values()
                .filter(|r| r.supports(course) && !layout.room_busy(&r.id, period))
                .map(|r| (r, policy.seat_cap(r.capacity)))
                .filter(|(_, seats)| *seats > 0);
            let fitting = rooms
                .clone()
                .filter(|(_, seats)| *seats >= desired_seats)
                .min_by_key(|(r, seats)| (*seats, r.id.clone()));
            let best = fitting.or_else(|| {
                rooms.max_by_key(|(r, seats)| (*seats, std::cmp::Reverse(r.id.clone())))
            });
            if let Some((room, seat_cap)) = best {
                return Some(Placement {
                    teacher: teacher.id.clone(),
                    period: period.clone(),
                    room: room.id.clone(),
                    seat_cap,
                });
            }
        }
    }
    None
}
