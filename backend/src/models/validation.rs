//! Hard placement constraints over a section layout.
//!
//! The same checks guard the initial layout, every planner proposal and every
//! applied action batch.

use std::collections::BTreeMap;

use super::domain::{CourseId, PeriodId, Problem, RoomId, SectionId, TeacherId};
use super::layout::Layout;
use crate::config::OptimizerConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutViolation {
    #[error("section {section} references unknown {entity} '{id}'")]
    UnknownReference {
        section: SectionId,
        entity: &'static str,
        id: String,
    },
    #[error("section {section} capacity {capacity} exceeds room {room} capacity {room_capacity}")]
    RoomTooSmall {
        section: SectionId,
        room: RoomId,
        capacity: u32,
        room_capacity: u32,
    },
    #[error("room {room} lacks features required by {course}")]
    MissingRoomFeatures { room: RoomId, course: CourseId },
    #[error("teacher {teacher} is not qualified for {course}")]
    TeacherNotQualified { teacher: TeacherId, course: CourseId },
    #[error("teacher {teacher} is unavailable in period {period}")]
    TeacherUnavailable { teacher: TeacherId, period: PeriodId },
    #[error("teacher {teacher} is double-booked in period {period}")]
    TeacherDoubleBooked { teacher: TeacherId, period: PeriodId },
    #[error("room {room} is double-booked in period {period}")]
    RoomDoubleBooked { room: RoomId, period: PeriodId },
    #[error("teacher {teacher} has {sections} sections over cap {cap}")]
    TeacherOverloaded {
        teacher: TeacherId,
        sections: usize,
        cap: usize,
    },
    #[error("course {course} may not be scheduled in period {period}")]
    PeriodNotAllowed { course: CourseId, period: PeriodId },
    #[error("section {section} capacity {capacity} exceeds seat cap {max_seats}")]
    SeatCapExceeded {
        section: SectionId,
        capacity: u32,
        max_seats: u32,
    },
    #[error("course {course} requires a dedicated teacher, {teacher} is not")]
    DedicatedTeacherRequired { course: CourseId, teacher: TeacherId },
    #[error("course {course} has {sections} sections in period {period} over cap {cap}")]
    PeriodSectionCapExceeded {
        course: CourseId,
        period: PeriodId,
        sections: usize,
        cap: usize,
    },
    #[error("course {course} has {sections} sections over cap {cap}")]
    CourseSectionCapExceeded {
        course: CourseId,
        sections: usize,
        cap: usize,
    },
}

/// Check every hard placement constraint, returning all violations found.
pub fn layout_violations(
    problem: &Problem,
    layout: &Layout,
    config: &OptimizerConfig,
) -> Vec<LayoutViolation> {
    let mut violations = Vec::new();
    let mut teacher_slots: BTreeMap<(&TeacherId, &PeriodId), usize> = BTreeMap::new();
    let mut room_slots: BTreeMap<(&RoomId, &PeriodId), usize> = BTreeMap::new();
    let mut teacher_loads: BTreeMap<&TeacherId, usize> = BTreeMap::new();
    let mut course_periods: BTreeMap<(&CourseId, &PeriodId), usize> = BTreeMap::new();
    let mut course_totals: BTreeMap<&CourseId, usize> = BTreeMap::new();

    for section in layout.sections() {
        let course = problem.courses.get(&section.course);
        let teacher = problem.teachers.get(&section.teacher);
        let room = problem.rooms.get(&section.room);
        let period_known = problem.periods.contains_key(&section.period);

        let missing = [
            ("course", course.is_none(), section.course.to_string()),
            ("teacher", teacher.is_none(), section.teacher.to_string()),
            ("room", room.is_none(), section.room.to_string()),
            ("period", !period_known, section.period.to_string()),
        ];
        let mut broken = false;
        for (entity, absent, id) in missing {
            if absent {
                broken = true;
                violations.push(LayoutViolation::UnknownReference {
                    section: section.id.clone(),
                    entity,
                    id,
                });
            }
        }
        let (Some(course), Some(teacher), Some(room)) = (course, teacher, room) else {
            continue;
        };
        if broken {
            continue;
        }

        if section.capacity > room.capacity {
            violations.push(LayoutViolation::RoomTooSmall {
                section: section.id.clone(),
                room: room.id.clone(),
                capacity: section.capacity,
                room_capacity: room.capacity,
            });
        }
        if !room.supports(course) {
            violations.push(LayoutViolation::MissingRoomFeatures {
                room: room.id.clone(),
                course: course.id.clone(),
            });
        }
        if !teacher.can_teach(&course.id) {
            violations.push(LayoutViolation::TeacherNotQualified {
                teacher: teacher.id.clone(),
                course: course.id.clone(),
            });
        }
        if !teacher.is_available(&section.period) {
            violations.push(LayoutViolation::TeacherUnavailable {
                teacher: teacher.id.clone(),
                period: section.period.clone(),
            });
        }

        let policy = config.policy_for(&course.id);
        if !policy.allows_period(&section.period) {
            violations.push(LayoutViolation::PeriodNotAllowed {
                course: course.id.clone(),
                period: section.period.clone(),
            });
        }
        let seat_cap = policy.seat_cap(u32::MAX);
        if section.capacity > seat_cap {
            violations.push(LayoutViolation::SeatCapExceeded {
                section: section.id.clone(),
                capacity: section.capacity,
                max_seats: seat_cap,
            });
        }
        if policy.requires_dedicated_teacher() && !teacher.dedicated_course {
            violations.push(LayoutViolation::DedicatedTeacherRequired {
                course: course.id.clone(),
                teacher: teacher.id.clone(),
            });
        }

        *teacher_slots.entry((&section.teacher, &section.period)).or_default() += 1;
        *room_slots.entry((&section.room, &section.period)).or_default() += 1;
        *teacher_loads.entry(&section.teacher).or_default() += 1;
        *course_periods.entry((&section.course, &section.period)).or_default() += 1;
        *course_totals.entry(&section.course).or_default() += 1;
    }

    for ((teacher, period), count) in teacher_slots {
        if count > 1 {
            violations.push(LayoutViolation::TeacherDoubleBooked {
                teacher: teacher.clone(),
                period: period.clone(),
            });
        }
    }
    for ((room, period), count) in room_slots {
        if count > 1 {
            violations.push(LayoutViolation::RoomDoubleBooked {
                room: room.clone(),
                period: period.clone(),
            });
        }
    }
    for (teacher_id, sections) in teacher_loads {
        let cap = problem
            .teachers
            .get(teacher_id)
            .map_or(config.constraints.max_teacher_sections, |t| {
                t.section_cap(config.constraints.max_teacher_sections)
            });
        if sections > cap {
            violations.push(LayoutViolation::TeacherOverloaded {
                teacher: teacher_id.clone(),
                sections,
                cap,
            });
        }
    }
    for ((course, period), sections) in course_periods {
        if let Some(cap) = config.policy_for(course).max_sections_per_period() {
            if sections > cap {
                violations.push(LayoutViolation::PeriodSectionCapExceeded {
                    course: course.clone(),
                    period: period.clone(),
                    sections,
                    cap,
                });
            }
        }
    }
    for (course, sections) in course_totals {
        if let Some(cap) = config.policy_for(course).max_sections() {
            if sections > cap {
                violations.push(LayoutViolation::CourseSectionCapExceeded {
                    course: course.clone(),
                    sections,
                    cap,
                });
            }
        }
    }

    violations
}

/// Convenience wrapper returning the first violation as an error.
pub fn validate_layout(
    problem: &Problem,
    layout: &Layout,
    config: &OptimizerConfig,
) -> Result<(), LayoutViolation> {
    match layout_violations(problem, layout, config).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecialCourseRule;
    use crate::models::{Course, Period, ProblemInput, Room, Section, Teacher};
    use std::collections::BTreeSet;

    fn problem() -> Problem {
        let input = ProblemInput {
            teachers: vec![
                Teacher {
                    id: "t1".into(),
                    max_sections: Some(1),
                    qualified_courses: BTreeSet::new(),
                    dedicated_course: false,
                    unavailable_periods: BTreeSet::from(["P3".into()]),
                },
                Teacher {
                    id: "t2".into(),
                    max_sections: None,
                    qualified_courses: BTreeSet::from(["ALG".into()]),
                    dedicated_course: true,
                    unavailable_periods: BTreeSet::new(),
                },
            ],
            courses: vec![
                Course {
                    id: "ALG".into(),
                    required: true,
                    required_features: BTreeSet::new(),
                },
                Course {
                    id: "CHEM".into(),
                    required: true,
                    required_features: BTreeSet::from(["lab".to_string()]),
                },
            ],
            rooms: vec![
                Room {
                    id: "r1".into(),
                    capacity: 30,
                    features: BTreeSet::new(),
                },
                Room {
                    id: "lab".into(),
                    capacity: 24,
                    features: BTreeSet::from(["lab".to_string()]),
                },
            ],
            periods: ["P1", "P2", "P3"]
                .iter()
                .map(|p| Period { id: (*p).into() })
                .collect(),
            ..Default::default()
        };
        Problem::from_input(input).unwrap().0
    }

    fn section(id: &str, course: &str, teacher: &str, period: &str, room: &str, cap: u32) -> Section {
        Section {
            id: id.into(),
            course: course.into(),
            teacher: teacher.into(),
            period: period.into(),
            room: room.into(),
            capacity: cap,
        }
    }

    #[test]
    fn test_valid_layout() {
        let layout = Layout::new(vec![
            section("A1", "ALG", "t2", "P1", "r1", 30),
            section("C1", "CHEM", "t1", "P1", "lab", 24),
        ]);
        assert!(validate_layout(&problem(), &layout, &OptimizerConfig::default()).is_ok());
    }

    #[test]
    fn test_detects_placement_violations() {
        let layout = Layout::new(vec![
            section("A1", "ALG", "t2", "P1", "r1", 35),
            section("C1", "CHEM", "t2", "P1", "r1", 20),
            section("C2", "CHEM", "t1", "P3", "lab", 20),
        ]);
        let violations = layout_violations(&problem(), &layout, &OptimizerConfig::default());
        assert!(violations.iter().any(|v| matches!(v, LayoutViolation::RoomTooSmall { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, LayoutViolation::MissingRoomFeatures { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, LayoutViolation::TeacherNotQualified { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, LayoutViolation::TeacherUnavailable { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, LayoutViolation::TeacherDoubleBooked { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, LayoutViolation::RoomDoubleBooked { .. })));
    }

    #[test]
    fn test_teacher_cap_and_special_rules() {
        let mut config = OptimizerConfig::default();
        config.special_courses.insert(
            "ALG".into(),
            SpecialCourseRule {
                allowed_periods: BTreeSet::from(["P1".into()]),
                max_seats: Some(20),
                requires_dedicated_teacher: true,
                max_sections_per_period: Some(1),
                max_sections: Some(1),
            },
        );
        let layout = Layout::new(vec![
            section("A1", "ALG", "t1", "P1", "r1", 25),
            section("A2", "ALG", "t1", "P2", "lab", 10),
        ]);
        let violations = layout_violations(&problem(), &layout, &config);
        let has = |pred: fn(&LayoutViolation) -> bool| violations.iter().any(pred);
        assert!(has(|v| matches!(v, LayoutViolation::TeacherOverloaded { .. })));
        assert!(has(|v| matches!(v, LayoutViolation::PeriodNotAllowed { .. })));
        assert!(has(|v| matches!(v, LayoutViolation::SeatCapExceeded { .. })));
        assert!(has(|v| matches!(v, LayoutViolation::DedicatedTeacherRequired { .. })));
        assert!(has(|v| matches!(v, LayoutViolation::CourseSectionCapExceeded { .. })));
    }

    #[test]
    fn test_unknown_references() {
        let layout = Layout::new(vec![section("X1", "GHOST", "t9", "P1", "r1", 10)]);
        let violations = layout_violations(&problem(), &layout, &OptimizerConfig::default());
        assert_eq!(violations.len(), 2);
    }
}
