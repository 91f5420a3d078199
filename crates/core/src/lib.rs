pub mod advisor;
pub mod evaluation;
pub mod postvalidate;
pub mod ranking;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use types::{
    GenerateRequest, GenerateResponse, Timetable, TimetableEntry, TimetableSolution,
    ValidateRequest, ValidationResult,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("infeasible constraints: {}", conflicts.join("; "))]
    InfeasibleConstraints {
        conflicts: Vec<String>,
        suggestions: Vec<String>,
    },
    #[error("no qualified teacher for subject {subject}")]
    NoQualifiedTeacher { subject: String },
    #[error("insufficient teacher capacity for {subject} (short by {deficit_periods} periods/week)")]
    InsufficientTeacherCapacity {
        subject: String,
        deficit_periods: u32,
    },
    #[error("class {class} has no home room assigned")]
    MissingHomeRoom { class: String },
    #[error("{phase} phase timed out after {elapsed_seconds:.1}s ({last_progress})")]
    Timeout {
        phase: String,
        elapsed_seconds: f64,
        last_progress: String,
    },
    #[error("generation cancelled")]
    Cancelled,
    #[error("internal error: {context}")]
    Internal { context: String },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// `Internal` never crosses the engine boundary as-is; callers downgrade
    /// it to an infeasibility report naming the current bottleneck.
    pub fn into_boundary(self, bottleneck: Option<&str>) -> EngineError {
        match self {
            EngineError::Internal { .. } => {
                let mut conflicts =
                    vec!["generation failed before a feasible timetable was produced".to_string()];
                if let Some(b) = bottleneck {
                    conflicts.push(format!("most recent bottleneck: {b}"));
                }
                EngineError::InfeasibleConstraints {
                    conflicts,
                    suggestions: vec![
                        "Review teacher capacity and room supply for the affected subjects"
                            .to_string(),
                    ],
                }
            }
            other => other,
        }
    }
}

/// Cooperative cancellation signal, checked between CSP lessons and GA
/// generations. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-phase wall-clock budget.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn check(&self, phase: &str, last_progress: impl Into<String>) -> EngineResult<()> {
        if self.expired() {
            Err(EngineError::Timeout {
                phase: phase.to_string(),
                elapsed_seconds: self.elapsed_seconds(),
                last_progress: last_progress.into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait Solver: Send + Sync + 'static {
    async fn solve(&self, req: GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// Like [`Solver::solve`], observing an external cancellation flag.
    /// Implementations that cannot be interrupted may ignore the flag.
    async fn solve_cancellable(
        &self,
        req: GenerateRequest,
        cancel: CancelFlag,
    ) -> anyhow::Result<GenerateResponse> {
        let _ = cancel;
        self.solve(req).await
    }
}

/// Optional external cache collaborator. The engine stores per-generation
/// bests when a cache is attached and never depends on it for correctness.
pub trait SolutionCache: Send + Sync {
    fn store(&self, session_id: &str, generation: u32, fitness: f64, timetable: &Timetable);
    fn retrieve_best(&self, session_id: &str) -> Option<Timetable>;
}

fn chk_unique<'a>(name: &str, ids: impl Iterator<Item = &'a str>, errors: &mut Vec<String>) {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            errors.push(format!("duplicate {name} id: {id}"));
        }
    }
}

/// Structural validation of a generation request: duplicate ids, dangling
/// references, out-of-range fields, an empty slot grid. Resource feasibility
/// is the advisor's job.
pub fn validate_request(req: &GenerateRequest) -> EngineResult<()> {
    use std::collections::HashSet;

    let mut errors: Vec<String> = Vec::new();

    if !req.classes.is_empty() && req.active_slots().next().is_none() {
        errors.push("no active (non-break) time slots".into());
    }

    chk_unique("class", req.classes.iter().map(|x| x.id.0.as_str()), &mut errors);
    chk_unique("subject", req.subjects.iter().map(|x| x.id.0.as_str()), &mut errors);
    chk_unique("teacher", req.teachers.iter().map(|x| x.id.0.as_str()), &mut errors);
    chk_unique("room", req.rooms.iter().map(|x| x.id.0.as_str()), &mut errors);
    chk_unique("time slot", req.time_slots.iter().map(|x| x.id.0.as_str()), &mut errors);

    let mut grid = HashSet::new();
    for ts in req.active_slots() {
        if !(1..=12).contains(&ts.period_number) {
            errors.push(format!(
                "time slot {} has period {} outside 1..=12",
                ts.id, ts.period_number
            ));
        }
        if !grid.insert((ts.day, ts.period_number)) {
            errors.push(format!(
                "more than one active slot at {} period {}",
                ts.day, ts.period_number
            ));
        }
    }

    for s in &req.subjects {
        if !(1..=10).contains(&s.periods_per_week) {
            errors.push(format!(
                "subject {} has periods_per_week {} outside 1..=10",
                s.name, s.periods_per_week
            ));
        }
    }

    let rooms: HashSet<&str> = req.rooms.iter().map(|r| r.id.0.as_str()).collect();
    for c in &req.classes {
        if c.grade > 12 {
            errors.push(format!("class {} has grade {} above 12", c.name, c.grade));
        }
        if let Some(home) = &c.home_room_id {
            if !rooms.contains(home.0.as_str()) {
                errors.push(format!(
                    "class {} references missing home room {}",
                    c.name, home
                ));
            }
        }
    }

    let subjects: HashSet<&str> = req.subjects.iter().map(|s| s.id.0.as_str()).collect();
    for r in &req.subject_requirements {
        if !subjects.contains(r.subject_id.0.as_str()) {
            errors.push(format!(
                "grade {} requirement references missing subject {}",
                r.grade, r.subject_id
            ));
        }
        if !(1..=10).contains(&r.periods_per_week) {
            errors.push(format!(
                "grade {} requirement for {} has periods_per_week {} outside 1..=10",
                r.grade, r.subject_id, r.periods_per_week
            ));
        }
    }

    if !(1..=5).contains(&req.num_solutions) {
        errors.push(format!(
            "num_solutions {} outside 1..=5",
            req.num_solutions
        ));
    }
    if !(10..=300).contains(&req.timeout_seconds) {
        errors.push(format!(
            "timeout_seconds {} outside 10..=300",
            req.timeout_seconds
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InfeasibleConstraints {
            conflicts: errors,
            suggestions: Vec::new(),
        })
    }
}
