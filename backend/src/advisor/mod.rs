//! Optional external arbitration of ambiguous planning choices.
//!
//! The planner flags a course as ambiguous when its valid options point in
//! opposite directions. An [`Advisor`] sees a bounded, student-free description
//! of the course and the options, and answers with the index of the option to
//! take or a deferral to the default policy.

#[cfg(feature = "http-advisor")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::CourseSummary;
use crate::config::AdvisorSettings;
use crate::models::{CourseId, Layout};
use crate::planner::{ActionKind, CoursePlan};

#[cfg(feature = "http-advisor")]
pub use http::HttpAdvisor;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisorError {
    #[error("advisor unreachable: {0}")]
    Unreachable(String),
    #[error("advisor did not answer within {0:?}")]
    Timeout(Duration),
    #[error("advisor reply unusable: {0}")]
    InvalidResponse(String),
}

/// One choice offered to the advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorOption {
    pub index: usize,
    pub kind: ActionKind,
    pub summary: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorRequest {
    pub course: CourseId,
    /// Registrar context and the options, truncated to the configured size.
    pub description: String,
    pub options: Vec<AdvisorOption>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// JSON schema the reply must satisfy.
    pub response_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdvisorDecision {
    Select { option: usize },
    /// Leave the choice to the default policy.
    Defer,
}

/// A single request/response capability.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, request: &AdvisorRequest) -> Result<Value, AdvisorError>;
}

fn response_schema(option_count: usize) -> Value {
    json!({
        "type": "object",
        "required": ["decision"],
        "properties": {
            "decision": { "type": "string", "enum": ["select", "defer"] },
            "option": {
                "type": "integer",
                "minimum": 0,
                "maximum": option_count.saturating_sub(1)
            }
        }
    })
}

/// Cut `text` to at most `max_chars` characters.
fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}

/// Describe an ambiguous course for the advisor.
pub fn build_request(
    course_plan: &CoursePlan,
    summary: Option<&CourseSummary>,
    layout: &Layout,
    settings: &AdvisorSettings,
) -> AdvisorRequest {
    let mut description = String::new();
    let _ = writeln!(description, "Course {}", course_plan.course);
    if let Some(summary) = summary {
        let _ = writeln!(
            description,
            "sections={} capacity={} enrolled={} requested={} unmet={} buffer={}",
            summary.sections,
            summary.capacity,
            summary.enrolled,
            summary.requested,
            summary.unmet,
            summary.buffer
        );
        for teacher in &summary.teachers {
            let _ = writeln!(
                description,
                "teacher {} teaches {} section(s)",
                teacher,
                layout.teacher_load(teacher)
            );
        }
    }
    let options: Vec<AdvisorOption> = course_plan
        .options
        .iter()
        .enumerate()
        .map(|(index, proposal)| AdvisorOption {
            index,
            kind: proposal.kind(),
            summary: proposal.summary(),
            reason: proposal.reason.clone(),
        })
        .collect();
    for option in &options {
        let _ = writeln!(
            description,
            "option {}: {} ({})",
            option.index, option.summary, option.reason
        );
    }
    truncate_chars(&mut description, settings.max_description_chars);

    AdvisorRequest {
        course: course_plan.course.clone(),
        description,
        response_schema: response_schema(options.len()),
        options,
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    }
}

/// Strip a surrounding markdown code fence, if any.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Validate a raw reply into a decision over `option_count` options.
///
/// Accepts the decision object itself, a JSON string holding it, or a
/// `{"text": ...}` envelope around such a string.
pub fn parse_decision(reply: &Value, option_count: usize) -> Result<AdvisorDecision, AdvisorError> {
    let payload = match reply {
        Value::Object(map) if !map.contains_key("decision") => match map.get("text") {
            Some(Value::String(text)) => Some(text.as_str()),
            _ => None,
        },
        Value::String(text) => Some(text.as_str()),
        _ => None,
    };
    let value = match payload {
        Some(text) => serde_json::from_str::<Value>(strip_fence(text))
            .map_err(|e| AdvisorError::InvalidResponse(format!("not JSON: {}", e)))?,
        None => reply.clone(),
    };

    let decision: AdvisorDecision = serde_json::from_value(value)
        .map_err(|e| AdvisorError::InvalidResponse(e.to_string()))?;
    match decision {
        AdvisorDecision::Select { option } if option >= option_count => {
            Err(AdvisorError::InvalidResponse(format!(
                "option {} out of range (0..{})",
                option, option_count
            )))
        }
        decision => Ok(decision),
    }
}

/// Ask `advisor` once, bounded by `timeout`.
pub async fn consult(
    advisor: &dyn Advisor,
    request: &AdvisorRequest,
    timeout: Duration,
) -> Result<AdvisorDecision, AdvisorError> {
    let reply = tokio::time::timeout(timeout, advisor.advise(request))
        .await
        .map_err(|_| AdvisorError::Timeout(timeout))??;
    parse_decision(&reply, request.options.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ActionProposal, StructuralEdit};

    fn ambiguous_plan() -> CoursePlan {
        CoursePlan {
            course: "ALG".into(),
            options: vec![
                ActionProposal {
                    course: "ALG".into(),
                    edit: StructuralEdit::Add {
                        section: crate::models::Section {
                            id: "ALG-n1".into(),
                            course: "ALG".into(),
                            teacher: "t1".into(),
                            period: "P2".into(),
                            room: "r1".into(),
                            capacity: 12,
                        },
                    },
                    reason: "unmet demand".to_string(),
                },
                ActionProposal {
                    course: "ALG".into(),
                    edit: StructuralEdit::Remove {
                        section: "ALG-2".into(),
                    },
                    reason: "empty".to_string(),
                },
            ],
            chosen: 0,
            ambiguous: true,
        }
    }

    struct Fixed(Value);

    #[async_trait]
    impl Advisor for Fixed {
        async fn advise(&self, _request: &AdvisorRequest) -> Result<Value, AdvisorError> {
            Ok(self.0.clone())
        }
    }

    struct Silent;

    #[async_trait]
    impl Advisor for Silent {
        async fn advise(&self, _request: &AdvisorRequest) -> Result<Value, AdvisorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_request_is_bounded_and_lists_options() {
        let layout = Layout::new(Vec::new());
        let mut settings = AdvisorSettings::default();
        let request = build_request(&ambiguous_plan(), None, &layout, &settings);
        assert_eq!(request.options.len(), 2);
        assert!(request.description.contains("option 1: remove ALG-2"));
        assert_eq!(request.response_schema["properties"]["option"]["maximum"], 1);

        settings.max_description_chars = 10;
        let request = build_request(&ambiguous_plan(), None, &layout, &settings);
        assert_eq!(request.description.chars().count(), 10);
    }

    #[test]
    fn test_parse_decision_shapes() {
        assert_eq!(
            parse_decision(&json!({"decision": "select", "option": 1}), 2).unwrap(),
            AdvisorDecision::Select { option: 1 }
        );
        assert_eq!(
            parse_decision(&json!({"decision": "defer"}), 2).unwrap(),
            AdvisorDecision::Defer
        );
        let envelope = json!({"text": "```json\n{\"decision\": \"select\", \"option\": 0}\n```"});
        assert_eq!(
            parse_decision(&envelope, 2).unwrap(),
            AdvisorDecision::Select { option: 0 }
        );
    }

    #[test]
    fn test_parse_decision_rejects_bad_replies() {
        assert!(matches!(
            parse_decision(&json!({"decision": "select", "option": 5}), 2),
            Err(AdvisorError::InvalidResponse(_))
        ));
        assert!(parse_decision(&json!({"text": "split it"}), 2).is_err());
        assert!(parse_decision(&json!(42), 2).is_err());
    }

    #[tokio::test]
    async fn test_consult_returns_decision() {
        let request = build_request(
            &ambiguous_plan(),
            None,
            &Layout::new(Vec::new()),
            &AdvisorSettings::default(),
        );
        let advisor = Fixed(json!({"decision": "select", "option": 1}));
        let decision = consult(&advisor, &request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(decision, AdvisorDecision::Select { option: 1 });
    }

    #[tokio::test]
    async fn test_consult_times_out() {
        let request = build_request(
            &ambiguous_plan(),
            None,
            &Layout::new(Vec::new()),
            &AdvisorSettings::default(),
        );
        let err = consult(&Silent, &request, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, AdvisorError::Timeout(Duration::from_millis(20)));
    }
}
