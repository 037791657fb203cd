//! Solved student-to-section mapping for one layout.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::domain::{CourseId, PeriodId, Problem, SectionId, StudentId};
use super::layout::Layout;
use crate::config::OptimizerConfig;

/// A request the solver could not place.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnmetRequest {
    pub student: StudentId,
    pub course: CourseId,
}

/// Result of one solve. Always rebuilt from scratch for a layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Enrolled students per section. Every layout section has an entry.
    pub enrollments: BTreeMap<SectionId, BTreeSet<StudentId>>,
    pub unmet: Vec<UnmetRequest>,
}

impl Assignment {
    /// An assignment where nothing is placed, used when a layout is infeasible.
    pub fn unplaced(problem: &Problem, layout: &Layout) -> Self {
        let enrollments = layout
            .sections()
            .map(|s| (s.id.clone(), BTreeSet::new()))
            .collect();
        let unmet = problem
            .students
            .values()
            .flat_map(|student| {
                student.requests().into_iter().map(|course| UnmetRequest {
                    student: student.id.clone(),
                    course: course.clone(),
                })
            })
            .collect();
        Self { enrollments, unmet }
    }

    pub fn enrolled(&self, section: &SectionId) -> usize {
        self.enrollments.get(section).map_or(0, BTreeSet::len)
    }

    pub fn satisfied_requests(&self) -> usize {
        self.enrollments.values().map(BTreeSet::len).sum()
    }

    pub fn unmet_for_course(&self, course: &CourseId) -> usize {
        self.unmet.iter().filter(|u| &u.course == course).count()
    }

    /// List every hard-constraint violation of this assignment over `layout`.
    ///
    /// Checks seat capacity, the SPED concentration cap, one section per
    /// requested course and one section per period for each student.
    pub fn violations(
        &self,
        problem: &Problem,
        layout: &Layout,
        config: &OptimizerConfig,
    ) -> Vec<String> {
        let mut violations = Vec::new();
        let mut per_course: BTreeMap<(&StudentId, &CourseId), usize> = BTreeMap::new();
        let mut per_period: BTreeMap<(&StudentId, &PeriodId), usize> = BTreeMap::new();

        for (section_id, students) in &self.enrollments {
            let Some(section) = layout.get(section_id) else {
                if !students.is_empty() {
                    violations.push(format!("students enrolled in unknown section {}", section_id));
                }
                continue;
            };
            if students.len() > section.capacity as usize {
                violations.push(format!(
                    "section {} holds {} students over capacity {}",
                    section_id,
                    students.len(),
                    section.capacity
                ));
            }
            let sped = students
                .iter()
                .filter(|id| problem.students.get(*id).is_some_and(|s| s.sped))
                .count();
            if sped > config.constraints.max_sped_per_section {
                violations.push(format!(
                    "section {} holds {} SPED students over cap {}",
                    section_id, sped, config.constraints.max_sped_per_section
                ));
            }
            for student_id in students {
                let requested = problem
                    .students
                    .get(student_id)
                    .is_some_and(|s| s.requested_courses.contains(&section.course));
                if !requested {
                    violations.push(format!(
                        "student {} placed in {} without requesting {}",
                        student_id, section_id, section.course
                    ));
                }
                *per_course.entry((student_id, &section.course)).or_default() += 1;
                *per_period.entry((student_id, &section.period)).or_default() += 1;
            }
        }

        for ((student, course), count) in per_course {
            if count > 1 {
                violations.push(format!(
                    "student {} holds {} sections of {}",
                    student, count, course
                ));
            }
        }
        for ((student, period), count) in per_period {
            if count > 1 {
                violations.push(format!(
                    "student {} has {} sections in period {}",
                    student, count, period
                ));
            }
        }
        violations
    }
}
