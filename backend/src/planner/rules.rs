//! Threshold rules that turn utilization metrics into candidate edits.
//!
//! Section rules are evaluated in precedence order (split, remove, merge) and
//! the first rule whose condition holds decides the section's candidate. A rule
//! that matches but cannot be materialized yields a discard reason instead of
//! falling through to a weaker rule.

use tracing::debug;

use super::actions::{ActionKind, ActionProposal, StructuralEdit};
use super::placement::find_placement;
use crate::analysis::{CourseSummary, UtilizationAnalysis, UtilizationMetric};
use crate::config::OptimizerConfig;
use crate::models::{CourseId, Layout, Problem, Section, SectionId};

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    NoMatch,
    Proposal(ActionProposal),
    /// The rule fired but no valid edit exists.
    Discarded { kind: ActionKind, reason: String },
}

pub struct RuleContext<'a> {
    pub problem: &'a Problem,
    pub config: &'a OptimizerConfig,
    pub analysis: &'a UtilizationAnalysis,
}

/// Maximum number of sections a course may have.
///
/// A special rule's `max_sections` wins; otherwise every period may host up to
/// `max_sections_to_merge` sections of the course.
pub fn course_section_cap(problem: &Problem, config: &OptimizerConfig, course: &CourseId) -> usize {
    config.policy_for(course).max_sections().unwrap_or_else(|| {
        problem.periods.len().max(1) * config.actions.max_sections_to_merge
    })
}

fn ceil_seats(value: f64) -> u32 {
    value.ceil().clamp(0.0, f64::from(u32::MAX)) as u32
}

fn discarded(kind: ActionKind, reason: impl Into<String>) -> RuleOutcome {
    RuleOutcome::Discarded {
        kind,
        reason: reason.into(),
    }
}

impl<'a> RuleContext<'a> {
    fn summary(&self, course: &CourseId) -> Option<&'a CourseSummary> {
        self.analysis.courses.get(course)
    }

    /// Evaluate split, remove and merge for one section, first match wins.
    pub fn section_candidate(&self, layout: &Layout, section: &Section) -> RuleOutcome {
        let Some(metric) = self.analysis.metric(&section.id) else {
            return RuleOutcome::NoMatch;
        };
        let rules: [fn(&Self, &Layout, &Section, &UtilizationMetric) -> RuleOutcome; 3] =
            [Self::split_rule, Self::remove_rule, Self::merge_rule];
        for rule in rules {
            match rule(self, layout, section, metric) {
                RuleOutcome::NoMatch => continue,
                outcome => return outcome,
            }
        }
        RuleOutcome::NoMatch
    }

    fn split_rule(
        &self,
        layout: &Layout,
        section: &Section,
        metric: &UtilizationMetric,
    ) -> RuleOutcome {
        let actions = &self.config.actions;
        let Some(demand_ratio) = metric.demand_ratio else {
            return RuleOutcome::NoMatch;
        };
        let threshold = actions.split_threshold * actions.target_utilization;
        if demand_ratio < threshold {
            return RuleOutcome::NoMatch;
        }
        let count = layout.course_section_count(&section.course);
        let cap = course_section_cap(self.problem, self.config, &section.course);
        if count >= cap {
            debug!(
                "{}: split skipped, course already has {}/{} sections",
                section.id, count, cap
            );
            return RuleOutcome::NoMatch;
        }

        let policy = self.config.policy_for(&section.course);
        let demand_seats = demand_ratio * f64::from(section.capacity);
        let total = section
            .capacity
            .max(ceil_seats(demand_seats / actions.target_utilization));
        let Some(placement) = find_placement(
            self.problem,
            layout,
            self.config,
            &section.course,
            Some(&section.teacher),
            ceil_seats(f64::from(total) / 2.0),
        ) else {
            return discarded(ActionKind::Split, format!("no free slot to split {}", section.id));
        };

        let here = self
            .problem
            .rooms
            .get(&section.room)
            .map_or(section.capacity, |r| policy.seat_cap(r.capacity));
        let there = placement.seat_cap;
        let min_ratio = actions.min_split_ratio;
        let ratio = (f64::from(here) / f64::from(here + there)).clamp(min_ratio, 1.0 - min_ratio);

        let retained = here.min(ceil_seats(ratio * f64::from(total)));
        let moved = there.min(total.saturating_sub(retained));
        if moved == 0 {
            return discarded(ActionKind::Split, format!("split of {} leaves no seats to move", section.id));
        }
        if ((retained + moved) as usize) < metric.enrolled {
            return discarded(
                ActionKind::Split,
                format!("split of {} would strand enrolled students", section.id),
            );
        }

        let new_section = Section {
            id: layout.fresh_section_id(&section.course),
            course: section.course.clone(),
            teacher: placement.teacher,
            period: placement.period,
            room: placement.room,
            capacity: moved,
        };
        RuleOutcome::Proposal(ActionProposal {
            course: section.course.clone(),
            edit: StructuralEdit::Split {
                section: section.id.clone(),
                ratio: f64::from(retained) / f64::from(retained + moved),
                retained_capacity: retained,
                new_section,
            },
            reason: format!(
                "demand at {:.0}% of capacity, split threshold {:.0}%",
                demand_ratio * 100.0,
                threshold * 100.0
            ),
        })
    }

    /// Remove screens: utilization at or below `remove_threshold` AND the
    /// section's share of course enrollment at or below `min_enrollment_percentage`.
    fn remove_rule(
        &self,
        layout: &Layout,
        section: &Section,
        metric: &UtilizationMetric,
    ) -> RuleOutcome {
        let Some(utilization) = metric.utilization else {
            return RuleOutcome::NoMatch;
        };
        if utilization > self.config.utilization.remove_threshold {
            return RuleOutcome::NoMatch;
        }
        let course_enrolled = self.summary(&section.course).map_or(0, |s| s.enrolled);
        let share = if course_enrolled == 0 {
            0.0
        } else {
            metric.enrolled as f64 / course_enrolled as f64
        };
        if share > self.config.actions.min_enrollment_percentage {
            return RuleOutcome::NoMatch;
        }
        let required = self
            .problem
            .courses
            .get(&section.course)
            .map_or(true, |c| c.required);
        if required && layout.course_section_count(&section.course) <= 1 {
            return RuleOutcome::NoMatch;
        }
        RuleOutcome::Proposal(ActionProposal {
            course: section.course.clone(),
            edit: StructuralEdit::Remove {
                section: section.id.clone(),
            },
            reason: format!(
                "utilization {:.0}% with {:.0}% of course enrollment",
                utilization * 100.0,
                share * 100.0
            ),
        })
    }

    fn merge_rule(
        &self,
        layout: &Layout,
        section: &Section,
        metric: &UtilizationMetric,
    ) -> RuleOutcome {
        let actions = &self.config.actions;
        let viable = actions.min_viable_utilization;
        let Some(utilization) = metric.utilization else {
            return RuleOutcome::NoMatch;
        };
        if utilization >= viable {
            return RuleOutcome::NoMatch;
        }

        let mut siblings: Vec<(&Section, &UtilizationMetric, f64)> = layout
            .sections_for_course(&section.course)
            .filter(|s| s.id != section.id)
            .filter_map(|s| {
                let m = self.analysis.metric(&s.id)?;
                let u = m.utilization?;
                (u < viable).then_some((s, m, u))
            })
            .collect();
        if siblings.is_empty() {
            return RuleOutcome::NoMatch;
        }
        siblings.sort_by(|a, b| a.2.total_cmp(&b.2).then_with(|| a.0.id.cmp(&b.0.id)));

        let mut group: Vec<(&Section, &UtilizationMetric)> = vec![(section, metric)];
        group.extend(
            siblings
                .into_iter()
                .take(actions.max_sections_to_merge - 1)
                .map(|(s, m, _)| (s, m)),
        );
        group.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        let combined: usize = group.iter().map(|(_, m)| m.enrolled).sum();
        let combined_sped: usize = group.iter().map(|(_, m)| m.sped_enrolled).sum();
        let mean_capacity =
            group.iter().map(|(s, _)| f64::from(s.capacity)).sum::<f64>() / group.len() as f64;
        let merge_ratio = combined as f64 / mean_capacity;
        if merge_ratio > actions.max_merge_ratio {
            return RuleOutcome::NoMatch;
        }

        let policy = self.config.policy_for(&section.course);
        let seat_cap = |s: &Section| {
            self.problem
                .rooms
                .get(&s.room)
                .map_or(s.capacity, |r| policy.seat_cap(r.capacity))
        };
        let Some(keep) = group
            .iter()
            .map(|(s, _)| *s)
            .max_by(|a, b| seat_cap(a).cmp(&seat_cap(b)).then_with(|| b.id.cmp(&a.id)))
        else {
            return RuleOutcome::NoMatch;
        };

        let largest = group.iter().map(|(s, _)| s.capacity).max().unwrap_or(0);
        let wanted = largest.max(combined as u32 + actions.merge_buffer_seats);
        let capacity = wanted.min(seat_cap(keep));
        if (capacity as usize) < combined {
            return discarded(
                ActionKind::Merge,
                format!("{} cannot hold {} merged students", keep.id, combined),
            );
        }
        if combined_sped > self.config.constraints.max_sped_per_section {
            return discarded(
                ActionKind::Merge,
                format!("merging into {} would exceed the SPED cap", keep.id),
            );
        }

        let absorbed: Vec<SectionId> = group
            .iter()
            .filter(|(s, _)| s.id != keep.id)
            .map(|(s, _)| s.id.clone())
            .collect();
        RuleOutcome::Proposal(ActionProposal {
            course: section.course.clone(),
            edit: StructuralEdit::Merge {
                keep: keep.id.clone(),
                absorbed,
                capacity,
            },
            reason: format!(
                "{} sections below {:.0}% utilization, combined ratio {:.2}",
                group.len(),
                viable * 100.0,
                merge_ratio
            ),
        })
    }

    /// Course-level growth when unmet demand outweighs the spare seats.
    pub fn add_candidate(&self, layout: &Layout, course: &CourseId) -> RuleOutcome {
        let actions = &self.config.actions;
        let Some(summary) = self.summary(course) else {
            return RuleOutcome::NoMatch;
        };
        if summary.unmet == 0 {
            return RuleOutcome::NoMatch;
        }
        let remaining = summary.remaining_capacity() as f64;
        if summary.unmet as f64 <= actions.add_threshold * remaining {
            return RuleOutcome::NoMatch;
        }
        let count = layout.course_section_count(course);
        let cap = course_section_cap(self.problem, self.config, course);
        if count >= cap {
            return discarded(
                ActionKind::Add,
                format!("{} already has {}/{} sections", course, count, cap),
            );
        }

        let desired = ceil_seats(summary.unmet as f64 / actions.target_utilization).max(1);
        let preferred = layout.sections_for_course(course).next().map(|s| s.teacher.clone());
        let Some(placement) = find_placement(
            self.problem,
            layout,
            self.config,
            course,
            preferred.as_ref(),
            desired,
        ) else {
            return discarded(ActionKind::Add, format!("no free slot for a new {} section", course));
        };

        let section = Section {
            id: layout.fresh_section_id(course),
            course: course.clone(),
            teacher: placement.teacher,
            period: placement.period,
            room: placement.room,
            capacity: desired.min(placement.seat_cap),
        };
        RuleOutcome::Proposal(ActionProposal {
            course: course.clone(),
            edit: StructuralEdit::Add { section },
            reason: format!(
                "{} unmet requests against {} spare seats",
                summary.unmet, remaining
            ),
        })
    }
}
