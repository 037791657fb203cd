//! Per-section and aggregate utilization of a solved layout.
//!
//! Everything here is a pure function of (problem, layout, assignment,
//! thresholds); results are recomputed every iteration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::UtilizationThresholds;
use crate::models::{Assignment, CourseId, Layout, Problem, SectionId, TeacherId};

/// Where a section sits relative to the configured bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationBand {
    /// Capacity is zero; no ratio exists.
    ZeroCapacity,
    /// At or below `remove_threshold`.
    RemoveCandidate,
    /// Below `min_acceptable`.
    Critical,
    /// Below `min_target`.
    Under,
    /// Inside the target band but outside the optimal band.
    Acceptable,
    Optimal,
    /// Demand exceeds `max_target`.
    Over,
}

impl UtilizationBand {
    pub fn is_below_target(self) -> bool {
        matches!(self, Self::RemoveCandidate | Self::Critical | Self::Under)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationMetric {
    pub section: SectionId,
    pub course: CourseId,
    pub capacity: u32,
    pub enrolled: usize,
    pub sped_enrolled: usize,
    /// enrolled / capacity, absent for zero-capacity sections.
    pub utilization: Option<f64>,
    /// (enrolled + this section's share of unmet course demand) / capacity.
    pub demand_ratio: Option<f64>,
    pub band: UtilizationBand,
}

/// Registrar view of one course. Contains no student identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub course: CourseId,
    pub sections: usize,
    pub capacity: u64,
    pub enrolled: usize,
    pub requested: usize,
    pub unmet: usize,
    /// Seats left after enrollment.
    pub buffer: i64,
    pub teachers: BTreeSet<TeacherId>,
}

impl CourseSummary {
    pub fn remaining_capacity(&self) -> u64 {
        self.capacity.saturating_sub(self.enrolled as u64)
    }

    pub fn demand_ratio(&self) -> Option<f64> {
        (self.capacity > 0).then(|| (self.enrolled + self.unmet) as f64 / self.capacity as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateUtilization {
    pub sections: usize,
    /// Mean of per-section ratios over sections with capacity.
    pub mean: f64,
    /// Total enrolled over total capacity.
    pub weighted: f64,
    pub below_target: usize,
    pub above_target: usize,
    pub within_optimal: usize,
    pub zero_capacity: usize,
    pub total_enrolled: usize,
    pub total_capacity: u64,
    pub unmet_requests: usize,
    /// Lower is better.
    pub score: f64,
    pub min_section: Option<(SectionId, f64)>,
    pub max_section: Option<(SectionId, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtilizationAnalysis {
    pub metrics: BTreeMap<SectionId, UtilizationMetric>,
    pub courses: BTreeMap<CourseId, CourseSummary>,
    pub aggregate: AggregateUtilization,
    pub zero_capacity_sections: Vec<SectionId>,
}

impl UtilizationAnalysis {
    pub fn metric(&self, section: &SectionId) -> Option<&UtilizationMetric> {
        self.metrics.get(section)
    }

    /// True when there is at least one section and every section is optimal.
    pub fn all_optimal(&self) -> bool {
        !self.metrics.is_empty()
            && self
                .metrics
                .values()
                .all(|m| m.band == UtilizationBand::Optimal)
    }
}

/// Classify one section. Low bands use utilization, the high band uses demand.
pub fn classify(
    utilization: Option<f64>,
    demand_ratio: Option<f64>,
    thresholds: &UtilizationThresholds,
) -> UtilizationBand {
    let (Some(u), Some(demand)) = (utilization, demand_ratio) else {
        return UtilizationBand::ZeroCapacity;
    };
    if u <= thresholds.remove_threshold {
        UtilizationBand::RemoveCandidate
    } else if u < thresholds.min_acceptable {
        UtilizationBand::Critical
    } else if u < thresholds.min_target {
        UtilizationBand::Under
    } else if demand > thresholds.max_target {
        UtilizationBand::Over
    } else if u >= thresholds.optimal_min && demand <= thresholds.optimal_max {
        UtilizationBand::Optimal
    } else {
        UtilizationBand::Acceptable
    }
}

/// Compute per-section metrics, per-course summaries and aggregates.
pub fn analyze(
    problem: &Problem,
    layout: &Layout,
    assignment: &Assignment,
    thresholds: &UtilizationThresholds,
) -> UtilizationAnalysis {
    let demand = problem.demand_by_course();
    let mut courses: BTreeMap<CourseId, CourseSummary> = BTreeMap::new();

    let summary_for = |courses: &mut BTreeMap<CourseId, CourseSummary>, course: &CourseId| {
        if !courses.contains_key(course) {
            courses.insert(
                course.clone(),
                CourseSummary {
                    course: course.clone(),
                    sections: 0,
                    capacity: 0,
                    enrolled: 0,
                    requested: demand.get(course).copied().unwrap_or(0),
                    unmet: assignment.unmet_for_course(course),
                    buffer: 0,
                    teachers: BTreeSet::new(),
                },
            );
        }
    };

    for section in layout.sections() {
        summary_for(&mut courses, &section.course);
        if let Some(summary) = courses.get_mut(&section.course) {
            summary.sections += 1;
            summary.capacity += u64::from(section.capacity);
            summary.enrolled += assignment.enrolled(&section.id);
            summary.teachers.insert(section.teacher.clone());
        }
    }
    for course in demand.keys() {
        summary_for(&mut courses, course);
    }
    for summary in courses.values_mut() {
        summary.buffer = summary.capacity as i64 - summary.enrolled as i64;
    }

    let mut metrics = BTreeMap::new();
    let mut zero_capacity_sections = Vec::new();
    for section in layout.sections() {
        let enrolled = assignment.enrolled(&section.id);
        let sped_enrolled = assignment
            .enrollments
            .get(&section.id)
            .map_or(0, |students| {
                students
                    .iter()
                    .filter(|id| problem.students.get(*id).is_some_and(|s| s.sped))
                    .count()
            });
        let (utilization, demand_ratio) = if section.capacity == 0 {
            zero_capacity_sections.push(section.id.clone());
            (None, None)
        } else {
            let capacity = f64::from(section.capacity);
            let unmet_share = courses.get(&section.course).map_or(0.0, |c| {
                if c.capacity == 0 {
                    0.0
                } else {
                    c.unmet as f64 * capacity / c.capacity as f64
                }
            });
            (
                Some(enrolled as f64 / capacity),
                Some((enrolled as f64 + unmet_share) / capacity),
            )
        };
        metrics.insert(
            section.id.clone(),
            UtilizationMetric {
                section: section.id.clone(),
                course: section.course.clone(),
                capacity: section.capacity,
                enrolled,
                sped_enrolled,
                utilization,
                demand_ratio,
                band: classify(utilization, demand_ratio, thresholds),
            },
        );
    }

    let aggregate = aggregate(&metrics, assignment);
    UtilizationAnalysis {
        metrics,
        courses,
        aggregate,
        zero_capacity_sections,
    }
}

fn aggregate(
    metrics: &BTreeMap<SectionId, UtilizationMetric>,
    assignment: &Assignment,
) -> AggregateUtilization {
    let mut agg = AggregateUtilization {
        sections: metrics.len(),
        unmet_requests: assignment.unmet.len(),
        ..Default::default()
    };
    let mut ratio_sum = 0.0;
    let mut rated = 0usize;
    for metric in metrics.values() {
        agg.total_enrolled += metric.enrolled;
        agg.total_capacity += u64::from(metric.capacity);
        match metric.band {
            UtilizationBand::ZeroCapacity => agg.zero_capacity += 1,
            UtilizationBand::Over => agg.above_target += 1,
            UtilizationBand::Optimal => agg.within_optimal += 1,
            band if band.is_below_target() => agg.below_target += 1,
            _ => {}
        }
        if let Some(u) = metric.utilization {
            ratio_sum += u;
            rated += 1;
            if agg.min_section.as_ref().map_or(true, |(_, min)| u < *min) {
                agg.min_section = Some((metric.section.clone(), u));
            }
            if agg.max_section.as_ref().map_or(true, |(_, max)| u > *max) {
                agg.max_section = Some((metric.section.clone(), u));
            }
        }
    }
    if rated > 0 {
        agg.mean = ratio_sum / rated as f64;
    }
    if agg.total_capacity > 0 {
        agg.weighted = agg.total_enrolled as f64 / agg.total_capacity as f64;
    }
    agg.score = agg.below_target as f64 * 2.0 + agg.above_target as f64 * 3.0
        - agg.within_optimal as f64 * 0.5;
    agg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::Fixture;
    use crate::models::{StudentId, UnmetRequest};

    fn assignment_with(enrolled: &[(&str, usize)], unmet: &[(&str, usize)]) -> Assignment {
        let mut assignment = Assignment::default();
        for (section, count) in enrolled {
            assignment.enrollments.insert(
                (*section).into(),
                (0..*count)
                    .map(|n| StudentId::new(format!("{}-{}", section, n)))
                    .collect(),
            );
        }
        for (course, count) in unmet {
            for n in 0..*count {
                assignment.unmet.push(UnmetRequest {
                    student: StudentId::new(format!("u{}", n)),
                    course: (*course).into(),
                });
            }
        }
        assignment
    }

    #[test]
    fn test_classify_bands() {
        let t = UtilizationThresholds::default();
        assert_eq!(classify(None, None, &t), UtilizationBand::ZeroCapacity);
        assert_eq!(classify(Some(0.2), Some(0.2), &t), UtilizationBand::RemoveCandidate);
        assert_eq!(classify(Some(0.4), Some(0.4), &t), UtilizationBand::Critical);
        assert_eq!(classify(Some(0.6), Some(0.6), &t), UtilizationBand::Under);
        assert_eq!(classify(Some(0.72), Some(0.72), &t), UtilizationBand::Acceptable);
        assert_eq!(classify(Some(0.9), Some(0.9), &t), UtilizationBand::Optimal);
        assert_eq!(classify(Some(1.0), Some(1.5), &t), UtilizationBand::Over);
    }

    #[test]
    fn test_analyze_ratios_and_demand() {
        let (problem, layout) = Fixture::new()
            .periods(&["P1", "P2"])
            .room("r1", 30)
            .teacher("t1")
            .course("ALG")
            .section("ALG-1", "ALG", "t1", "P1", "r1", 20)
            .section("ALG-2", "ALG", "t1", "P2", "r1", 20)
            .build();
        let assignment = assignment_with(&[("ALG-1", 20), ("ALG-2", 20)], &[("ALG", 8)]);

        let analysis = analyze(&problem, &layout, &assignment, &UtilizationThresholds::default());
        let m = analysis.metric(&"ALG-1".into()).unwrap();
        assert_eq!(m.utilization, Some(1.0));
        assert!((m.demand_ratio.unwrap() - 1.2).abs() < 1e-9);
        assert_eq!(m.band, UtilizationBand::Over);

        let course = &analysis.courses["ALG"];
        assert_eq!(course.capacity, 40);
        assert_eq!(course.unmet, 8);
        assert_eq!(course.remaining_capacity(), 0);
        assert_eq!(analysis.aggregate.above_target, 2);
        assert_eq!(analysis.aggregate.score, 6.0);
        assert!(!analysis.all_optimal());
    }

    #[test]
    fn test_zero_capacity_sections_are_flagged() {
        let (problem, layout) = Fixture::new()
            .periods(&["P1", "P2"])
            .room("r1", 30)
            .teacher("t1")
            .course("ALG")
            .section("ALG-1", "ALG", "t1", "P1", "r1", 0)
            .section("ALG-2", "ALG", "t1", "P2", "r1", 20)
            .build();
        let assignment = assignment_with(&[("ALG-2", 18)], &[]);

        let analysis = analyze(&problem, &layout, &assignment, &UtilizationThresholds::default());
        assert_eq!(analysis.zero_capacity_sections, vec![SectionId::from("ALG-1")]);
        assert_eq!(analysis.aggregate.zero_capacity, 1);
        assert!((analysis.aggregate.mean - 0.9).abs() < 1e-9);
        assert!((analysis.aggregate.weighted - 0.9).abs() < 1e-9);
        assert!(!analysis.all_optimal());
    }

    #[test]
    fn test_all_optimal() {
        let (problem, layout) = Fixture::new()
            .periods(&["P1"])
            .room("r1", 30)
            .teacher("t1")
            .course("ALG")
            .section("ALG-1", "ALG", "t1", "P1", "r1", 20)
            .build();
        let assignment = assignment_with(&[("ALG-1", 18)], &[]);
        let analysis = analyze(&problem, &layout, &assignment, &UtilizationThresholds::default());
        assert!(analysis.all_optimal());
        assert_eq!(analysis.aggregate.score, -0.5);
        assert_eq!(analysis.aggregate.min_section, Some(("ALG-1".into(), 0.9)));
    }

    #[test]
    fn test_requested_course_without_sections_gets_summary() {
        let (problem, layout) = Fixture::new()
            .periods(&["P1"])
            .course("BIO")
            .students("s", 3, &["BIO"])
            .build();
        let assignment = Assignment::unplaced(&problem, &layout);
        let analysis = analyze(&problem, &layout, &assignment, &UtilizationThresholds::default());
        let bio = &analysis.courses["BIO"];
        assert_eq!(bio.sections, 0);
        assert_eq!(bio.requested, 3);
        assert_eq!(bio.unmet, 3);
        assert_eq!(bio.demand_ratio(), None);
    }
}
