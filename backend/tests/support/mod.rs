#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex as PlMutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use optimo_rust::advisor::{Advisor, AdvisorError, AdvisorRequest};
use optimo_rust::config::OptimizerConfig;
use optimo_rust::controller::{OptimizationController, ProgressReporter, ProgressUpdate, RunOutcome};
use optimo_rust::error::OptimizerResult;
use optimo_rust::models::{
    build_problem, Assignment, Course, Layout, Period, Problem, ProblemInput, Room, Section,
    Student, Teacher, UnmetRequest,
};
use optimo_rust::solver::{AssignmentSolver, MilpSolver, SolveOutcome, SolveStatus, Solution};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK poisoned");
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// Builder for problems through the public input types.
#[derive(Default)]
pub struct ProblemBuilder {
    input: ProblemInput,
}

impl ProblemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn periods(mut self, ids: &[&str]) -> Self {
        self.input
            .periods
            .extend(ids.iter().map(|id| Period { id: (*id).into() }));
        self
    }

    pub fn room(mut self, id: &str, capacity: u32) -> Self {
        self.input.rooms.push(Room {
            id: id.into(),
            capacity,
            features: BTreeSet::new(),
        });
        self
    }

    pub fn teacher(mut self, id: &str) -> Self {
        self.input.teachers.push(Teacher {
            id: id.into(),
            max_sections: None,
            qualified_courses: BTreeSet::new(),
            dedicated_course: false,
            unavailable_periods: BTreeSet::new(),
        });
        self
    }

    pub fn course(mut self, id: &str) -> Self {
        self.input.courses.push(Course {
            id: id.into(),
            required: true,
            required_features: BTreeSet::new(),
        });
        self
    }

    pub fn section(
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

    pub fn students(mut self, prefix: &str, count: usize, courses: &[&str]) -> Self {
        for n in 0..count {
            self.input.students.push(Student {
                id: format!("{}{:03}", prefix, n).into(),
                requested_courses: courses.iter().map(|c| (*c).into()).collect(),
                sped: false,
            });
        }
        self
    }

    pub fn input(self) -> ProblemInput {
        self.input
    }

    pub fn json(self) -> String {
        serde_json::to_string(&self.input).expect("input serializes")
    }

    pub fn build(self) -> (Problem, Layout) {
        build_problem(self.input).expect("valid test problem")
    }
}

/// One course that needs two sections: 36 students, one 20-seat section.
pub fn overloaded_course() -> ProblemBuilder {
    ProblemBuilder::new()
        .periods(&["P1", "P2"])
        .room("r1", 30)
        .room("r2", 30)
        .teacher("t1")
        .teacher("t2")
        .course("ALG")
        .section("ALG-1", "ALG", "t1", "P1", "r1", 20)
        .students("s", 36, &["ALG"])
}

/// Course A has an empty section and an over-demanded one; B pins students to P1.
pub fn ambiguous_course() -> ProblemBuilder {
    ProblemBuilder::new()
        .periods(&["P1", "P2"])
        .room("r1", 40)
        .room("r2", 40)
        .room("r3", 40)
        .teacher("t1")
        .teacher("t2")
        .teacher("t3")
        .course("A")
        .course("B")
        .section("A-1", "A", "t1", "P1", "r1", 10)
        .section("A-2", "A", "t2", "P2", "r2", 10)
        .section("B-1", "B", "t3", "P1", "r3", 40)
        .students("s", 15, &["A", "B"])
}

pub fn controller(problem: Problem, config: OptimizerConfig) -> OptimizationController {
    OptimizationController::new(Arc::new(problem), Arc::new(config))
}

pub async fn run(builder: ProblemBuilder, config: OptimizerConfig) -> RunOutcome {
    let (problem, layout) = builder.build();
    controller(problem, config).run(layout).await
}

/// Advisor that can never be reached.
pub struct UnreachableAdvisor;

#[async_trait]
impl Advisor for UnreachableAdvisor {
    async fn advise(&self, _request: &AdvisorRequest) -> Result<Value, AdvisorError> {
        Err(AdvisorError::Unreachable("connection refused".to_string()))
    }
}

/// Advisor that always answers with the same payload and remembers the requests.
pub struct ScriptedAdvisor {
    reply: Value,
    pub requests: PlMutex<Vec<AdvisorRequest>>,
}

impl ScriptedAdvisor {
    pub fn new(reply: Value) -> Self {
        Self {
            reply,
            requests: PlMutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Advisor for ScriptedAdvisor {
    async fn advise(&self, request: &AdvisorRequest) -> Result<Value, AdvisorError> {
        self.requests.lock().push(request.clone());
        Ok(self.reply.clone())
    }
}

/// Places each course's students round-robin over its sections in id order.
///
/// Ignores periods, so only use it with single-course students.
pub struct RoundRobinSolver;

impl AssignmentSolver for RoundRobinSolver {
    fn solve(
        &self,
        problem: &Problem,
        layout: &Layout,
        _config: &OptimizerConfig,
    ) -> OptimizerResult<SolveOutcome> {
        let mut assignment = Assignment {
            enrollments: layout
                .sections()
                .map(|s| (s.id.clone(), BTreeSet::new()))
                .collect(),
            unmet: Vec::new(),
        };
        let mut cursor: BTreeMap<String, usize> = BTreeMap::new();
        for student in problem.students.values() {
            for course in student.requests() {
                let sections: Vec<&Section> = layout.sections_for_course(course).collect();
                let placed = (0..sections.len()).find_map(|offset| {
                    let start = cursor.get(course.as_str()).copied().unwrap_or(0);
                    let section = sections[(start + offset) % sections.len()];
                    let enrolled = assignment.enrollments.get_mut(&section.id)?;
                    if enrolled.len() < section.capacity as usize {
                        enrolled.insert(student.id.clone());
                        cursor.insert(course.to_string(), start + offset + 1);
                        Some(())
                    } else {
                        None
                    }
                });
                if placed.is_none() {
                    assignment.unmet.push(UnmetRequest {
                        student: student.id.clone(),
                        course: course.clone(),
                    });
                }
            }
        }
        let objective = assignment.satisfied_requests() as f64;
        Ok(SolveOutcome::Solved(Solution {
            assignment,
            status: SolveStatus::Optimal,
            objective,
            gap: Some(0.0),
            runtime: Duration::ZERO,
            closed_sections: Vec::new(),
            variables: 0,
            constraints: 0,
        }))
    }
}

/// Sleeps before delegating to the MILP solver.
pub struct SlowSolver(pub Duration);

impl AssignmentSolver for SlowSolver {
    fn solve(
        &self,
        problem: &Problem,
        layout: &Layout,
        config: &OptimizerConfig,
    ) -> OptimizerResult<SolveOutcome> {
        std::thread::sleep(self.0);
        MilpSolver::new().solve(problem, layout, config)
    }
}

/// Keeps every progress update.
#[derive(Default)]
pub struct CollectingReporter {
    pub updates: PlMutex<Vec<ProgressUpdate>>,
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, update: &ProgressUpdate) {
        self.updates.lock().push(update.clone());
    }
}

/// Serve exactly one HTTP request with `body`, returning the base URL and a
/// handle yielding the raw request text.
pub async fn serve_once(body: String) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.expect("write");
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });
    (format!("http://{}", addr), handle)
}
