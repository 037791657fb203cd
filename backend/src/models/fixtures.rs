//! Small builder for unit-test problems.

use std::collections::BTreeSet;

use super::domain::{Course, Period, Problem, ProblemInput, Room, Section, Student, Teacher};
use super::layout::Layout;

#[derive(Default)]
pub(crate) struct Fixture {
    input: ProblemInput,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn periods(mut self, ids: &[&str]) -> Self {
        self.input
            .periods
            .extend(ids.iter().map(|id| Period { id: (*id).into() }));
        self
    }

    pub(crate) fn room(mut self, id: &str, capacity: u32) -> Self {
        self.input.rooms.push(Room {
            id: id.into(),
            capacity,
            features: BTreeSet::new(),
        });
        self
    }

    pub(crate) fn teacher(mut self, id: &str) -> Self {
        self.input.teachers.push(Teacher {
            id: id.into(),
            max_sections: None,
            qualified_courses: BTreeSet::new(),
            dedicated_course: false,
            unavailable_periods: BTreeSet::new(),
        });
        self
    }

    pub(crate) fn course(mut self, id: &str) -> Self {
        self.input.courses.push(Course {
            id: id.into(),
            required: true,
            required_features: BTreeSet::new(),
        });
        self
    }

    pub(crate) fn elective(mut self, id: &str) -> Self {
        self.input.courses.push(Course {
            id: id.into(),
            required: false,
            required_features: BTreeSet::new(),
        });
        self
    }

    pub(crate) fn section(
        mut self,
        id: &str,
        course: &str,
        teacher: &str,
        period: &str,
        room: &str,
        capacity: u32,
    ) -> Self {
        self.input.sections.push(Section {
            id: id.into(),
            course: course.into(),
            teacher: teacher.into(),
            period: period.into(),
            room: room.into(),
            capacity,
        });
        self
    }

    /// Add `count` students named `{prefix}{n}` requesting `courses`.
    pub(crate) fn students(self, prefix: &str, count: usize, courses: &[&str]) -> Self {
        self.students_with_flag(prefix, count, courses, false)
    }

    pub(crate) fn sped_students(self, prefix: &str, count: usize, courses: &[&str]) -> Self {
        self.students_with_flag(prefix, count, courses, true)
    }

    fn students_with_flag(
        mut self,
        prefix: &str,
        count: usize,
        courses: &[&str],
        sped: bool,
    ) -> Self {
        for n in 0..count {
            self.input.students.push(Student {
                id: format!("{}{:03}", prefix, n).into(),
                requested_courses: courses.iter().map(|c| (*c).into()).collect(),
                sped,
            });
        }
        self
    }

    pub(crate) fn build(self) -> (Problem, Layout) {
        let (problem, sections) = Problem::from_input(self.input).expect("fixture ids are unique");
        (problem, Layout::new(sections))
    }
}
