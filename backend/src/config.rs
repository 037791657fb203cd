//! Optimizer configuration file support.
//!
//! Configuration is read from a TOML file once per run and then passed around as
//! an immutable `Arc<OptimizerConfig>`. Every field has a default so a partial
//! file (or none at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ErrorContext, OptimizerError, OptimizerResult};
use crate::models::{CourseId, PeriodId};

/// Complete configuration bundle for one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub constraints: ConstraintSettings,
    #[serde(default)]
    pub utilization: UtilizationThresholds,
    #[serde(default)]
    pub actions: ActionSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub advisor: AdvisorSettings,
    /// Per-course overrides, keyed by course id.
    #[serde(default)]
    pub special_courses: BTreeMap<CourseId, SpecialCourseRule>,
}

/// MILP solve budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default = "default_time_limit_secs")]
    pub time_limit_secs: u64,
    #[serde(default = "default_mip_gap")]
    pub mip_gap: f64,
    /// Worker threads for the solver; 0 lets the backend decide.
    #[serde(default)]
    pub threads: u32,
    #[serde(default = "default_memory_percentage")]
    pub memory_percentage: f64,
    #[serde(default = "default_random_seed")]
    pub random_seed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSettings {
    #[serde(default = "default_max_teacher_sections")]
    pub max_teacher_sections: usize,
    #[serde(default = "default_max_sped_per_section")]
    pub max_sped_per_section: usize,
    /// Every request of a student must be satisfied, or the layout is infeasible.
    #[serde(default)]
    pub require_full_assignment: bool,
}

/// Utilization bands used by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationThresholds {
    #[serde(default = "default_min_target")]
    pub min_target: f64,
    #[serde(default = "default_max_target")]
    pub max_target: f64,
    #[serde(default = "default_optimal_min")]
    pub optimal_min: f64,
    #[serde(default = "default_optimal_max")]
    pub optimal_max: f64,
    #[serde(default = "default_min_acceptable")]
    pub min_acceptable: f64,
    #[serde(default = "default_remove_threshold")]
    pub remove_threshold: f64,
}

/// Thresholds driving the action planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSettings {
    #[serde(default = "default_max_changes_per_iteration")]
    pub max_changes_per_iteration: usize,
    #[serde(default = "default_split_threshold")]
    pub split_threshold: f64,
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    #[serde(default = "default_min_split_ratio")]
    pub min_split_ratio: f64,
    #[serde(default = "default_max_merge_ratio")]
    pub max_merge_ratio: f64,
    #[serde(default = "default_max_sections_to_merge")]
    pub max_sections_to_merge: usize,
    #[serde(default = "default_min_viable_utilization")]
    pub min_viable_utilization: f64,
    #[serde(default = "default_add_threshold")]
    pub add_threshold: f64,
    #[serde(default = "default_min_enrollment_percentage")]
    pub min_enrollment_percentage: f64,
    /// Spare seats left above the combined enrollment when merging.
    #[serde(default = "default_merge_buffer_seats")]
    pub merge_buffer_seats: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_true")]
    pub allow_heuristic_fallback: bool,
}

/// Remote advisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_advisor_model")]
    pub model: String,
    /// Environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_advisor_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,
}

/// Bespoke placement and staffing rules for one course.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialCourseRule {
    /// Periods the course may be scheduled in. Empty means any.
    #[serde(default)]
    pub allowed_periods: BTreeSet<PeriodId>,
    #[serde(default)]
    pub max_seats: Option<u32>,
    #[serde(default)]
    pub requires_dedicated_teacher: bool,
    #[serde(default)]
    pub max_sections_per_period: Option<usize>,
    /// Total number of sections the course may have.
    #[serde(default)]
    pub max_sections: Option<usize>,
}

impl SpecialCourseRule {
    pub fn allows_period(&self, period: &PeriodId) -> bool {
        self.allowed_periods.is_empty() || self.allowed_periods.contains(period)
    }
}

/// Placement policy resolved for a course.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoursePolicy<'a> {
    Standard,
    Special(&'a SpecialCourseRule),
}

impl<'a> CoursePolicy<'a> {
    pub fn allows_period(&self, period: &PeriodId) -> bool {
        match self {
            CoursePolicy::Standard => true,
            CoursePolicy::Special(rule) => rule.allows_period(period),
        }
    }

    /// Seat cap for a section hosted in a room of `room_capacity`.
    pub fn seat_cap(&self, room_capacity: u32) -> u32 {
        match self {
            CoursePolicy::Special(SpecialCourseRule {
                max_seats: Some(max),
                ..
            }) => room_capacity.min(*max),
            _ => room_capacity,
        }
    }

    pub fn requires_dedicated_teacher(&self) -> bool {
        matches!(self, CoursePolicy::Special(rule) if rule.requires_dedicated_teacher)
    }

    pub fn max_sections_per_period(&self) -> Option<usize> {
        match self {
            CoursePolicy::Standard => None,
            CoursePolicy::Special(rule) => rule.max_sections_per_period,
        }
    }

    pub fn max_sections(&self) -> Option<usize> {
        match self {
            CoursePolicy::Standard => None,
            CoursePolicy::Special(rule) => rule.max_sections,
        }
    }
}

fn default_time_limit_secs() -> u64 {
    60
}

fn default_mip_gap() -> f64 {
    0.01
}

fn default_memory_percentage() -> f64 {
    0.95
}

fn default_random_seed() -> u32 {
    1234
}

fn default_max_teacher_sections() -> usize {
    6
}

fn default_max_sped_per_section() -> usize {
    12
}

fn default_min_target() -> f64 {
    0.70
}

fn default_max_target() -> f64 {
    1.10
}

fn default_optimal_min() -> f64 {
    0.75
}

fn default_optimal_max() -> f64 {
    1.10
}

fn default_min_acceptable() -> f64 {
    0.50
}

fn default_remove_threshold() -> f64 {
    0.25
}

fn default_max_changes_per_iteration() -> usize {
    10
}

fn default_split_threshold() -> f64 {
    1.20
}

fn default_target_utilization() -> f64 {
    1.0
}

fn default_min_split_ratio() -> f64 {
    0.40
}

fn default_max_merge_ratio() -> f64 {
    1.30
}

fn default_max_sections_to_merge() -> usize {
    2
}

fn default_min_viable_utilization() -> f64 {
    0.30
}

fn default_add_threshold() -> f64 {
    1.30
}

fn default_min_enrollment_percentage() -> f64 {
    0.20
}

fn default_merge_buffer_seats() -> u32 {
    5
}

fn default_max_iterations() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_advisor_model() -> String {
    "registrar-advisor".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_advisor_timeout_secs() -> u64 {
    30
}

fn default_max_description_chars() -> usize {
    4000
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_limit_secs: default_time_limit_secs(),
            mip_gap: default_mip_gap(),
            threads: 0,
            memory_percentage: default_memory_percentage(),
            random_seed: default_random_seed(),
        }
    }
}

impl Default for ConstraintSettings {
    fn default() -> Self {
        Self {
            max_teacher_sections: default_max_teacher_sections(),
            max_sped_per_section: default_max_sped_per_section(),
            require_full_assignment: false,
        }
    }
}

impl Default for UtilizationThresholds {
    fn default() -> Self {
        Self {
            min_target: default_min_target(),
            max_target: default_max_target(),
            optimal_min: default_optimal_min(),
            optimal_max: default_optimal_max(),
            min_acceptable: default_min_acceptable(),
            remove_threshold: default_remove_threshold(),
        }
    }
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            max_changes_per_iteration: default_max_changes_per_iteration(),
            split_threshold: default_split_threshold(),
            target_utilization: default_target_utilization(),
            min_split_ratio: default_min_split_ratio(),
            max_merge_ratio: default_max_merge_ratio(),
            max_sections_to_merge: default_max_sections_to_merge(),
            min_viable_utilization: default_min_viable_utilization(),
            add_threshold: default_add_threshold(),
            min_enrollment_percentage: default_min_enrollment_percentage(),
            merge_buffer_seats: default_merge_buffer_seats(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            allow_heuristic_fallback: true,
        }
    }
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            model: default_advisor_model(),
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_advisor_timeout_secs(),
            max_description_chars: default_max_description_chars(),
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> OptimizerError {
    OptimizerError::configuration_with_context(
        message,
        ErrorContext::new("validate_config").with_entity_id(field),
    )
}

impl OptimizerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> OptimizerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            OptimizerError::configuration_with_context(
                format!("Failed to read config file: {}", e),
                ErrorContext::new("load_config").with_details(path.display().to_string()),
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> OptimizerResult<Self> {
        toml::from_str(content).map_err(|e| {
            OptimizerError::configuration_with_context(
                format!("Failed to parse config file: {}", e),
                ErrorContext::new("load_config"),
            )
        })
    }

    /// Load configuration from the default location.
    ///
    /// Searches for `optimo.toml` in:
    /// 1. Current directory
    /// 2. `backend/` directory
    /// 3. Parent directory
    pub fn from_default_location() -> OptimizerResult<Self> {
        let search_paths = [
            PathBuf::from("optimo.toml"),
            PathBuf::from("backend/optimo.toml"),
            PathBuf::from("../optimo.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(OptimizerError::configuration(
            "No optimo.toml found in standard locations",
        ))
    }

    /// Resolve the placement policy for a course.
    pub fn policy_for(&self, course: &CourseId) -> CoursePolicy<'_> {
        self.special_courses
            .get(course)
            .map_or(CoursePolicy::Standard, CoursePolicy::Special)
    }

    /// Check ranges and orderings that the rest of the pipeline relies on.
    pub fn validate(&self) -> OptimizerResult<()> {
        let s = &self.solver;
        if s.time_limit_secs == 0 {
            return Err(invalid("solver.time_limit_secs", "time limit must be positive"));
        }
        if !(0.0..1.0).contains(&s.mip_gap) {
            return Err(invalid("solver.mip_gap", "mip gap must be in [0, 1)"));
        }
        if !(s.memory_percentage > 0.0 && s.memory_percentage <= 1.0) {
            return Err(invalid(
                "solver.memory_percentage",
                "memory percentage must be in (0, 1]",
            ));
        }

        if self.constraints.max_teacher_sections == 0 {
            return Err(invalid(
                "constraints.max_teacher_sections",
                "teachers must be allowed at least one section",
            ));
        }

        let u = &self.utilization;
        let ordered = [
            ("utilization.remove_threshold", u.remove_threshold),
            ("utilization.min_acceptable", u.min_acceptable),
            ("utilization.min_target", u.min_target),
            ("utilization.optimal_min", u.optimal_min),
            ("utilization.optimal_max", u.optimal_max),
            ("utilization.max_target", u.max_target),
        ];
        if u.remove_threshold < 0.0 {
            return Err(invalid("utilization.remove_threshold", "must not be negative"));
        }
        for pair in ordered.windows(2) {
            let (lo_name, lo) = pair[0];
            let (hi_name, hi) = pair[1];
            if lo > hi {
                return Err(invalid(
                    hi_name,
                    format!("{} ({}) exceeds {} ({})", lo_name, lo, hi_name, hi),
                ));
            }
        }
        if u.min_target >= u.max_target {
            return Err(invalid(
                "utilization.max_target",
                "target band is empty (min_target >= max_target)",
            ));
        }

        let a = &self.actions;
        if a.max_changes_per_iteration == 0 {
            return Err(invalid("actions.max_changes_per_iteration", "must be at least 1"));
        }
        if a.split_threshold <= 0.0 || a.target_utilization <= 0.0 {
            return Err(invalid(
                "actions.split_threshold",
                "split threshold and target utilization must be positive",
            ));
        }
        if !(a.min_split_ratio > 0.0 && a.min_split_ratio <= 0.5) {
            return Err(invalid("actions.min_split_ratio", "must be in (0, 0.5]"));
        }
        if a.max_sections_to_merge < 2 {
            return Err(invalid("actions.max_sections_to_merge", "must be at least 2"));
        }
        if a.max_merge_ratio <= 0.0 || a.add_threshold < 0.0 {
            return Err(invalid(
                "actions.max_merge_ratio",
                "merge ratio must be positive and add threshold non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&a.min_enrollment_percentage) {
            return Err(invalid("actions.min_enrollment_percentage", "must be in [0, 1]"));
        }

        if self.pipeline.max_iterations == 0 {
            return Err(invalid("pipeline.max_iterations", "must be at least 1"));
        }

        let adv = &self.advisor;
        if adv.enabled {
            if adv.timeout_secs == 0 {
                return Err(invalid("advisor.timeout_secs", "must be positive"));
            }
            if !(0.0..=2.0).contains(&adv.temperature) {
                return Err(invalid("advisor.temperature", "must be in [0, 2]"));
            }
        }

        for (course, rule) in &self.special_courses {
            let field = format!("special_courses.{}", course);
            if rule.max_seats == Some(0) {
                return Err(invalid(&field, "max_seats must be positive"));
            }
            if rule.max_sections == Some(0) || rule.max_sections_per_period == Some(0) {
                return Err(invalid(&field, "section caps must be positive"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.solver.time_limit_secs, 60);
        assert_eq!(config.constraints.max_sped_per_section, 12);
        assert_eq!(config.pipeline.max_iterations, 5);
        assert!(config.pipeline.allow_heuristic_fallback);
        assert_eq!(config.advisor.max_tokens, 2000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = OptimizerConfig::from_toml_str(
            r#"
            [pipeline]
            max_iterations = 8
            allow_heuristic_fallback = false

            [special_courses."Medical Career"]
            allowed_periods = ["R1", "G1"]
            max_seats = 25
            max_sections = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.max_iterations, 8);
        assert!(!config.pipeline.allow_heuristic_fallback);
        assert_eq!(config.actions.split_threshold, 1.20);

        let policy = config.policy_for(&"Medical Career".into());
        assert!(policy.allows_period(&"R1".into()));
        assert!(!policy.allows_period(&"R2".into()));
        assert_eq!(policy.seat_cap(30), 25);
        assert_eq!(policy.max_sections(), Some(2));
        assert_eq!(config.policy_for(&"Algebra".into()), CoursePolicy::Standard);
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let mut config = OptimizerConfig::default();
        config.utilization.optimal_min = 0.95;
        config.utilization.optimal_max = 0.80;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, OptimizerError::ConfigurationError { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut config = OptimizerConfig::default();
        config.pipeline.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[solver]\ntime_limit_secs = 5\nthreads = 2").unwrap();
        let config = OptimizerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.solver.time_limit_secs, 5);
        assert_eq!(config.solver.threads, 2);
        assert_eq!(config.solver.random_seed, 1234);
    }

    #[test]
    fn test_bundled_sample_matches_defaults() {
        let config = OptimizerConfig::from_toml_str(include_str!("../optimo.toml")).unwrap();
        assert!(config.validate().is_ok());
        let defaults = OptimizerConfig::default();
        assert_eq!(config.solver, defaults.solver);
        assert_eq!(config.actions, defaults.actions);
        assert_eq!(config.utilization, defaults.utilization);
        assert!(!config.advisor.enabled);
        assert_eq!(config.policy_for(&"MED".into()).max_sections(), Some(1));
    }

    #[test]
    fn test_from_file_missing() {
        let err = OptimizerConfig::from_file("/nonexistent/optimo.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
