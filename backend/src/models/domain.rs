//! Core domain entities: students, teachers, courses, rooms, periods and sections.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::define_key_type;
use crate::error::{ErrorContext, OptimizerError, OptimizerResult};

define_key_type!(StudentId);
define_key_type!(TeacherId);
define_key_type!(CourseId);
define_key_type!(RoomId);
define_key_type!(PeriodId);
define_key_type!(SectionId);

fn default_true() -> bool {
    true
}

/// A student and the courses they asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    #[serde(default)]
    pub requested_courses: Vec<CourseId>,
    /// Special-education flag, subject to a per-section concentration cap.
    #[serde(default)]
    pub sped: bool,
}

impl Student {
    /// Requested courses with duplicates collapsed, in sorted order.
    pub fn requests(&self) -> BTreeSet<&CourseId> {
        self.requested_courses.iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    /// Personal section cap; the global cap applies when absent.
    #[serde(default)]
    pub max_sections: Option<usize>,
    /// Courses this teacher may teach. Empty means unrestricted.
    #[serde(default)]
    pub qualified_courses: BTreeSet<CourseId>,
    /// Eligible for courses that require a dedicated teacher.
    #[serde(default)]
    pub dedicated_course: bool,
    #[serde(default)]
    pub unavailable_periods: BTreeSet<PeriodId>,
}

impl Teacher {
    pub fn can_teach(&self, course: &CourseId) -> bool {
        self.qualified_courses.is_empty() || self.qualified_courses.contains(course)
    }

    pub fn is_available(&self, period: &PeriodId) -> bool {
        !self.unavailable_periods.contains(period)
    }

    /// Effective section cap given the global `max_teacher_sections`.
    pub fn section_cap(&self, global_cap: usize) -> usize {
        self.max_sections.map_or(global_cap, |cap| cap.min(global_cap))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    /// A required course never loses its last section.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Feature tags every hosting room must carry (e.g. "lab").
    #[serde(default)]
    pub required_features: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub capacity: u32,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

impl Room {
    pub fn supports(&self, course: &Course) -> bool {
        course.required_features.is_subset(&self.features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
}

/// One scheduled offering of a course.
///
/// Enrollment is not stored here: it belongs to the assignment of the
/// iteration that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub course: CourseId,
    pub teacher: TeacherId,
    pub period: PeriodId,
    pub room: RoomId,
    pub capacity: u32,
}

/// Raw problem input as loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemInput {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub periods: Vec<Period>,
    /// Initial section layout.
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// Immutable, indexed domain data for one run.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub students: BTreeMap<StudentId, Student>,
    pub teachers: BTreeMap<TeacherId, Teacher>,
    pub courses: BTreeMap<CourseId, Course>,
    pub rooms: BTreeMap<RoomId, Room>,
    pub periods: BTreeMap<PeriodId, Period>,
}

fn index_unique<K, V>(
    items: Vec<V>,
    entity: &str,
    key: impl Fn(&V) -> K,
) -> OptimizerResult<BTreeMap<K, V>>
where
    K: Ord + ToString,
{
    let mut map = BTreeMap::new();
    for item in items {
        let id = key(&item);
        if map.contains_key(&id) {
            return Err(OptimizerError::configuration_with_context(
                format!("duplicate {} id", entity),
                ErrorContext::new("load_problem")
                    .with_entity(entity)
                    .with_entity_id(id.to_string()),
            ));
        }
        map.insert(id, item);
    }
    Ok(map)
}

impl Problem {
    /// Index the raw input, rejecting duplicate identifiers.
    ///
    /// Returns the problem together with the sections of the initial layout.
    pub fn from_input(input: ProblemInput) -> OptimizerResult<(Self, Vec<Section>)> {
        let problem = Self {
            students: index_unique(input.students, "student", |s| s.id.clone())?,
            teachers: index_unique(input.teachers, "teacher", |t| t.id.clone())?,
            courses: index_unique(input.courses, "course", |c| c.id.clone())?,
            rooms: index_unique(input.rooms, "room", |r| r.id.clone())?,
            periods: index_unique(input.periods, "period", |p| p.id.clone())?,
        };
        let mut seen = BTreeSet::new();
        for section in &input.sections {
            if !seen.insert(section.id.clone()) {
                return Err(OptimizerError::configuration_with_context(
                    "duplicate section id",
                    ErrorContext::new("load_problem")
                        .with_entity("section")
                        .with_entity_id(&section.id),
                ));
            }
        }
        Ok((problem, input.sections))
    }

    /// Check that every course referenced by a student exists.
    pub fn check_references(&self) -> OptimizerResult<()> {
        for student in self.students.values() {
            for course in &student.requested_courses {
                if !self.courses.contains_key(course) {
                    return Err(OptimizerError::configuration_with_context(
                        format!("student requests unknown course '{}'", course),
                        ErrorContext::new("initialize")
                            .with_entity("student")
                            .with_entity_id(&student.id),
                    ));
                }
            }
        }
        for teacher in self.teachers.values() {
            for course in &teacher.qualified_courses {
                if !self.courses.contains_key(course) {
                    return Err(OptimizerError::configuration_with_context(
                        format!("teacher qualified for unknown course '{}'", course),
                        ErrorContext::new("initialize")
                            .with_entity("teacher")
                            .with_entity_id(&teacher.id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Number of distinct students requesting each course.
    pub fn demand_by_course(&self) -> BTreeMap<CourseId, usize> {
        let mut demand: BTreeMap<CourseId, usize> = BTreeMap::new();
        for student in self.students.values() {
            for course in student.requests() {
                *demand.entry(course.clone()).or_default() += 1;
            }
        }
        demand
    }

    pub fn total_requests(&self) -> usize {
        self.students.values().map(|s| s.requests().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, courses: &[&str]) -> Student {
        Student {
            id: id.into(),
            requested_courses: courses.iter().map(|c| CourseId::from(*c)).collect(),
            sped: false,
        }
    }

    #[test]
    fn test_requests_are_deduplicated() {
        let s = student("s1", &["ALG", "BIO", "ALG"]);
        assert_eq!(s.requests().len(), 2);
    }

    #[test]
    fn test_teacher_cap_and_qualification() {
        let teacher = Teacher {
            id: "t1".into(),
            max_sections: Some(4),
            qualified_courses: BTreeSet::from([CourseId::from("ALG")]),
            dedicated_course: false,
            unavailable_periods: BTreeSet::from([PeriodId::from("P1")]),
        };
        assert_eq!(teacher.section_cap(6), 4);
        assert_eq!(teacher.section_cap(3), 3);
        assert!(teacher.can_teach(&"ALG".into()));
        assert!(!teacher.can_teach(&"BIO".into()));
        assert!(!teacher.is_available(&"P1".into()));
        assert!(teacher.is_available(&"P2".into()));
    }

    #[test]
    fn test_from_input_rejects_duplicates() {
        let input = ProblemInput {
            students: vec![student("s1", &[]), student("s1", &[])],
            ..Default::default()
        };
        let err = Problem::from_input(input).unwrap_err();
        assert!(matches!(err, OptimizerError::ConfigurationError { .. }));
        assert_eq!(err.context().entity_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_check_references_unknown_course() {
        let input = ProblemInput {
            students: vec![student("s1", &["GHOST"])],
            ..Default::default()
        };
        let (problem, _) = Problem::from_input(input).unwrap();
        assert!(problem.check_references().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let course: Course = serde_json::from_str(r#"{"id": "ALG"}"#).unwrap();
        assert!(course.required);
        assert!(course.required_features.is_empty());

        let teacher: Teacher = serde_json::from_str(r#"{"id": "t1"}"#).unwrap();
        assert!(teacher.max_sections.is_none());
        assert!(teacher.can_teach(&"ANY".into()));
    }
}
