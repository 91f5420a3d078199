//! Pipeline composition root: advisor gate, greedy pre-assignment and CSP
//! search, base ranking, genetic refinement, post-validation, response
//! assembly. One engine instance serves many requests; all per-request state
//! lives on the stack of `generate`.

use async_trait::async_trait;
use solver_csp::CspSolver;
use solver_ga::{GaConfig, GaOptimizer};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tt_core::evaluation::{structural_hash, Evaluator, PenaltyKind};
use tt_core::ranking::{RankingCriteria, RankingService};
use tt_core::{
    advisor, postvalidate, validate_request, CancelFlag, Deadline, EngineError, EngineResult,
    SolutionCache, Solver,
};
use types::{
    Diagnostics, GenerateRequest, GenerateResponse, SolutionMetrics, TimetableId,
    TimetableSolution, ValidateRequest, ValidationResult,
};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Wall-clock budget for the CSP phase.
    pub csp_budget: Duration,
    /// Wall-clock budget for the GA phase.
    pub ga_budget: Duration,
    pub ga: GaConfig,
    /// Base solutions requested from the CSP per final solution wanted.
    pub base_oversampling: u32,
    /// Fixed PRNG seed; derived from the request when absent.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            csp_budget: Duration::from_secs(60),
            ga_budget: Duration::from_secs(120),
            ga: GaConfig::default(),
            base_oversampling: 2,
            seed: None,
        }
    }
}

pub struct TimetableEngine {
    config: EngineConfig,
    cache: Option<Arc<dyn SolutionCache>>,
}

impl Default for TimetableEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl TimetableEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    /// Attach an external cache collaborator. Correctness never depends on it.
    pub fn with_cache(mut self, cache: Arc<dyn SolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run the whole generation pipeline synchronously. CPU-bound; callers on
    /// an async runtime go through [`Solver::solve`], which offloads this.
    pub fn generate(
        &self,
        req: &GenerateRequest,
        cancel: &CancelFlag,
    ) -> EngineResult<GenerateResponse> {
        let started = Instant::now();

        if req.classes.is_empty() {
            return Ok(GenerateResponse {
                solutions: Vec::new(),
                generation_time_seconds: started.elapsed().as_secs_f64(),
                conflicts: None,
                suggestions: None,
                diagnostics: None,
            });
        }

        validate_request(req)?;
        let seed = self.config.seed.unwrap_or_else(|| derive_seed(req));
        let mut warnings: Vec<String> = Vec::new();
        let mut phase_timings: BTreeMap<String, f64> = BTreeMap::new();

        // Feasibility gate.
        let phase_start = Instant::now();
        let analysis = advisor::pre_computation_check(req);
        phase_timings.insert("advisor".into(), phase_start.elapsed().as_secs_f64());
        if !analysis.is_feasible {
            return Err(EngineError::InfeasibleConstraints {
                conflicts: analysis.conflicts(),
                suggestions: analysis.suggestions,
            });
        }
        warnings.extend(analysis.warnings.iter().map(|w| w.message.clone()));

        // Greedy pre-assignment + CSP search.
        let request_budget = Duration::from_secs(req.timeout_seconds);
        let phase_start = Instant::now();
        let csp_deadline = Deadline::new(self.config.csp_budget.min(request_budget));
        let num_base = req.num_solutions.clamp(1, 5) * self.config.base_oversampling.max(1);
        let csp_outcome =
            CspSolver::default().solve(req, num_base, seed, cancel, &csp_deadline)?;
        phase_timings.insert("csp".into(), phase_start.elapsed().as_secs_f64());
        warnings.extend(csp_outcome.warnings.clone());
        info!(
            base_solutions = csp_outcome.solutions.len(),
            "csp phase complete"
        );

        // Genetic refinement on the soft objectives.
        let weights = req.weights();
        let phase_start = Instant::now();
        let remaining = request_budget.saturating_sub(started.elapsed());
        let population = if remaining.is_zero() {
            warnings.push("request budget exhausted before optimization; returning unoptimized solutions".into());
            csp_outcome.solutions.clone()
        } else {
            let ga_deadline = Deadline::new(self.config.ga_budget.min(remaining));
            let session_id = format!("{}-{seed}", req.school_id);
            let outcome = GaOptimizer::new(self.config.ga.clone()).evolve(
                csp_outcome.solutions.clone(),
                req,
                &weights,
                seed,
                cancel,
                &ga_deadline,
                self.cache.as_deref(),
                &session_id,
            )?;
            warnings.extend(outcome.warnings);
            outcome.population
        };
        phase_timings.insert("ga".into(), phase_start.elapsed().as_secs_f64());

        // Final scoring; keep the best distinct candidates.
        let evaluator = Evaluator::from_weights(&weights);
        let ranking = RankingService::new(evaluator);
        let ranked = ranking.rank_candidates(&population, &RankingCriteria::default());

        let wanted = req.num_solutions.clamp(1, 5) as usize;
        let mut picked = Vec::new();
        let mut seen = HashSet::new();
        for rt in ranked {
            if seen.insert(structural_hash(&rt.timetable)) {
                picked.push(rt);
            }
            if picked.len() == wanted {
                break;
            }
        }
        if picked.len() < wanted {
            warnings.push(format!(
                "only {} distinct solution(s) available of {wanted} requested",
                picked.len()
            ));
        }

        // Mandatory-criteria verification, best solution first.
        let mut conflicts: Vec<String> = csp_outcome.conflicts.clone();
        let mut solutions = Vec::new();
        for (i, ranked_tt) in picked.into_iter().enumerate() {
            let mut timetable = ranked_tt.timetable;
            timetable.id = TimetableId(format!("{}-tt-{seed}-opt{}", req.school_id, i + 1));
            timetable.name = Some(format!("Option {}", i + 1));
            for e in timetable.entries.iter_mut() {
                e.timetable_id = timetable.id.clone();
            }

            let report = postvalidate::validate_timetable(&timetable, req);
            if i == 0 && !report.is_valid {
                warn!(
                    violations = report.critical_violations.len(),
                    "best solution failed post-validation"
                );
                conflicts.extend(report.critical_violations.clone());
            }
            warnings.extend(report.warnings.clone());

            let gaps = ranked_tt.evaluation.raw_penalty(PenaltyKind::StudentGaps) as u32;
            let total = req.constraints.len() as u32;
            solutions.push(TimetableSolution {
                total_score: ranked_tt.evaluation.total_score,
                feasible: report.is_valid,
                conflicts: report.critical_violations,
                metrics: SolutionMetrics {
                    constraints_satisfied: if report.is_valid { total } else { 0 },
                    total_constraints: total,
                    gaps,
                },
                timetable,
            });
        }

        warnings.sort();
        warnings.dedup();

        Ok(GenerateResponse {
            solutions,
            generation_time_seconds: started.elapsed().as_secs_f64(),
            conflicts: (!conflicts.is_empty()).then_some(conflicts),
            suggestions: (!csp_outcome.suggestions.is_empty())
                .then_some(csp_outcome.suggestions),
            diagnostics: Some(Diagnostics {
                bottleneck_resources: analysis.bottleneck_resources,
                warnings,
                phase_timings,
            }),
        })
    }

    /// Cheap feasibility probe over raw entities; never schedules anything.
    pub fn validate(&self, req: &ValidateRequest) -> ValidationResult {
        let probe = GenerateRequest {
            school_id: req
                .entities
                .classes
                .first()
                .map(|c| c.school_id.clone())
                .unwrap_or_else(|| types::SchoolId("unknown".into())),
            academic_year_id: types::AcademicYearId("validation".into()),
            classes: req.entities.classes.clone(),
            subjects: req.entities.subjects.clone(),
            teachers: req.entities.teachers.clone(),
            time_slots: req.entities.time_slots.clone(),
            rooms: req.entities.rooms.clone(),
            constraints: req.constraints.clone(),
            subject_requirements: Vec::new(),
            weights: None,
            num_solutions: 1,
            timeout_seconds: 60,
            enforce_teacher_consistency: true,
        };

        if let Err(EngineError::InfeasibleConstraints { conflicts, suggestions }) =
            validate_request(&probe)
        {
            return ValidationResult {
                feasible: false,
                conflicts,
                suggestions,
            };
        }
        let analysis = advisor::pre_computation_check(&probe);
        ValidationResult {
            feasible: analysis.is_feasible,
            conflicts: analysis.conflicts(),
            suggestions: analysis.suggestions,
        }
    }
}

/// Stable fallback seed so identical requests reproduce identical output.
fn derive_seed(req: &GenerateRequest) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    req.school_id.0.hash(&mut hasher);
    req.academic_year_id.0.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl Solver for TimetableEngine {
    /// Runs the CPU-bound pipeline off the async reactor.
    async fn solve(&self, req: GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.solve_cancellable(req, CancelFlag::new()).await
    }

    async fn solve_cancellable(
        &self,
        req: GenerateRequest,
        cancel: CancelFlag,
    ) -> anyhow::Result<GenerateResponse> {
        let engine = TimetableEngine {
            config: self.config.clone(),
            cache: self.cache.clone(),
        };
        let result = tokio::task::spawn_blocking(move || engine.generate(&req, &cancel))
            .await
            .map_err(|join_err| {
                EngineError::Internal {
                    context: join_err.to_string(),
                }
                .into_boundary(None)
            })?;
        result
            .map_err(|e| e.into_boundary(None))
            .map_err(anyhow::Error::from)
    }
}
