//! Loading problem data from JSON files.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::domain::{Problem, ProblemInput};
use super::layout::Layout;

/// Parse a problem from a JSON string.
pub fn parse_problem_json_str(json: &str) -> Result<ProblemInput> {
    serde_json::from_str(json).context("Failed to parse problem JSON")
}

/// Read and parse a problem JSON file.
pub fn load_problem_file<P: AsRef<Path>>(path: P) -> Result<ProblemInput> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read problem file {}", path.display()))?;
    parse_problem_json_str(&content)
}

/// Index the input and build the initial layout.
pub fn build_problem(input: ProblemInput) -> Result<(Problem, Layout)> {
    let (problem, sections) = Problem::from_input(input)?;
    Ok((problem, Layout::new(sections)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "students": [
            {"id": "s1", "requested_courses": ["ALG", "BIO"], "sped": true},
            {"id": "s2", "requested_courses": ["ALG"]}
        ],
        "teachers": [{"id": "t1", "max_sections": 5}],
        "courses": [{"id": "ALG"}, {"id": "BIO", "required": false}],
        "rooms": [{"id": "r1", "capacity": 30, "features": ["lab"]}],
        "periods": [{"id": "P1"}, {"id": "P2"}],
        "sections": [
            {"id": "ALG-1", "course": "ALG", "teacher": "t1", "period": "P1", "room": "r1", "capacity": 25}
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let input = parse_problem_json_str(SAMPLE).unwrap();
        let (problem, layout) = build_problem(input).unwrap();
        assert_eq!(problem.students.len(), 2);
        assert!(!problem.courses["BIO"].required);
        assert_eq!(layout.len(), 1);
        assert_eq!(problem.demand_by_course()["ALG"], 2);
        assert_eq!(problem.total_requests(), 3);
    }

    #[test]
    fn test_parse_error_has_context() {
        let err = parse_problem_json_str("{not json").unwrap_err();
        assert!(err.to_string().contains("Failed to parse problem JSON"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_problem_file("/nonexistent/problem.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read problem file"));
    }
}
