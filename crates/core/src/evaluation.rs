//! Standalone timetable scoring: coverage-scaled base score minus a weighted,
//! fully itemized penalty breakdown. One evaluator per request; evaluation is
//! a pure function of the timetable.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use types::{ClassId, DayOfWeek, OptimizationWeights, TeacherId, Timetable, TimetableEntry};

#[derive(Clone, Copy, Debug, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    Coverage,
    WorkloadImbalance,
    StudentGaps,
    TimePreferences,
    ConsecutivePeriods,
}

impl PenaltyKind {
    pub const ALL: [PenaltyKind; 5] = [
        PenaltyKind::Coverage,
        PenaltyKind::WorkloadImbalance,
        PenaltyKind::StudentGaps,
        PenaltyKind::TimePreferences,
        PenaltyKind::ConsecutivePeriods,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PenaltyKind::Coverage => "coverage",
            PenaltyKind::WorkloadImbalance => "workload_imbalance",
            PenaltyKind::StudentGaps => "student_gaps",
            PenaltyKind::TimePreferences => "time_preferences",
            PenaltyKind::ConsecutivePeriods => "consecutive_periods",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PenaltyItem {
    pub kind: PenaltyKind,
    pub raw_score: f64,
    pub weight: f64,
    pub weighted_score: f64,
    pub description: String,
    pub details: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct EvaluationResult {
    pub timetable_id: Option<String>,
    pub total_score: f64,
    pub coverage_percentage: f64,
    pub base_score: f64,
    pub penalty_breakdown: Vec<PenaltyItem>,
}

impl EvaluationResult {
    pub fn total_penalty(&self) -> f64 {
        self.penalty_breakdown.iter().map(|p| p.weighted_score).sum()
    }

    pub fn penalty(&self, kind: PenaltyKind) -> Option<&PenaltyItem> {
        self.penalty_breakdown.iter().find(|p| p.kind == kind)
    }

    /// Weighted score for `kind`, 0 when the penalty did not fire.
    pub fn weighted_penalty(&self, kind: PenaltyKind) -> f64 {
        self.penalty(kind).map(|p| p.weighted_score).unwrap_or(0.0)
    }

    pub fn raw_penalty(&self, kind: PenaltyKind) -> f64 {
        self.penalty(kind).map(|p| p.raw_score).unwrap_or(0.0)
    }

    pub fn penalty_summary(&self) -> BTreeMap<&'static str, f64> {
        self.penalty_breakdown
            .iter()
            .map(|p| (p.kind.as_str(), p.weighted_score))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct EvalConfig {
    pub coverage_weight: f64,
    pub workload_balance_weight: f64,
    pub gap_minimization_weight: f64,
    pub time_preferences_weight: f64,
    pub consecutive_periods_weight: f64,
    pub morning_period_cutoff: u8,
    pub high_priority_penalty: f64,
    pub medium_priority_penalty: f64,
    pub low_priority_penalty: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self::from_weights(&OptimizationWeights::default())
    }
}

impl EvalConfig {
    pub fn from_weights(weights: &OptimizationWeights) -> Self {
        Self {
            coverage_weight: weights.coverage,
            workload_balance_weight: weights.workload_balance,
            gap_minimization_weight: weights.gap_minimization,
            time_preferences_weight: weights.time_preferences,
            consecutive_periods_weight: weights.consecutive_periods,
            morning_period_cutoff: weights.morning_period_cutoff,
            high_priority_penalty: 10.0,
            medium_priority_penalty: 5.0,
            low_priority_penalty: 2.0,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchSummary {
    pub best_score: f64,
    pub worst_score: f64,
    pub average_score: f64,
    pub score_std_dev: f64,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchEvaluation {
    pub evaluations: Vec<EvaluationResult>,
    pub summary: BatchSummary,
}

#[derive(Clone, Debug, Serialize)]
pub struct Comparison {
    pub timetable1_id: Option<String>,
    pub timetable2_id: Option<String>,
    /// 1 or 2 for the winning side, 0 when scores differ by less than 0.01.
    pub winner: u8,
    pub score_difference: f64,
    pub better_in: Vec<PenaltyKind>,
    pub worse_in: Vec<PenaltyKind>,
    pub summary: String,
}

#[derive(Clone, Debug, Default)]
pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn from_weights(weights: &OptimizationWeights) -> Self {
        Self::new(EvalConfig::from_weights(weights))
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn evaluate(&self, timetable: &Timetable) -> EvaluationResult {
        let coverage = timetable.metadata.coverage.clamp(0.0, 1.0);
        let timetable_id = Some(timetable.id.0.clone());

        if timetable.entries.is_empty() {
            return EvaluationResult {
                timetable_id,
                total_score: 0.0,
                coverage_percentage: coverage * 100.0,
                base_score: 0.0,
                penalty_breakdown: Vec::new(),
            };
        }

        let base_score = 1000.0 * coverage;
        let teacher_loads = group_by_teacher(&timetable.entries);
        let class_schedules = group_by_class(&timetable.entries);

        let mut breakdown = Vec::new();

        let coverage_raw = self.coverage_penalty(timetable);
        if coverage_raw > 0.0 {
            breakdown.push(PenaltyItem {
                kind: PenaltyKind::Coverage,
                raw_score: coverage_raw,
                weight: self.config.coverage_weight,
                weighted_score: coverage_raw * self.config.coverage_weight,
                description: format!(
                    "Unfilled slots penalty ({} slots)",
                    timetable.metadata.unfilled_slots.len()
                ),
                details: serde_json::json!({
                    "unfilled_count": timetable.metadata.unfilled_slots.len(),
                }),
            });
        }

        let workload_raw = workload_imbalance(&teacher_loads);
        if workload_raw > 0.0 {
            breakdown.push(PenaltyItem {
                kind: PenaltyKind::WorkloadImbalance,
                raw_score: workload_raw,
                weight: self.config.workload_balance_weight,
                weighted_score: workload_raw * self.config.workload_balance_weight,
                description: format!("Teacher workload imbalance (std dev: {workload_raw:.2})"),
                details: serde_json::json!({
                    "teacher_counts": teacher_loads
                        .iter()
                        .map(|(t, es)| (t.0.clone(), es.len()))
                        .collect::<BTreeMap<_, _>>(),
                }),
            });
        }

        let gaps_raw = self.gap_penalty(timetable, &class_schedules);
        if gaps_raw > 0.0 {
            breakdown.push(PenaltyItem {
                kind: PenaltyKind::StudentGaps,
                raw_score: gaps_raw,
                weight: self.config.gap_minimization_weight,
                weighted_score: gaps_raw * self.config.gap_minimization_weight,
                description: format!("Student schedule gaps ({gaps_raw} gaps)"),
                details: serde_json::json!({ "gap_count": gaps_raw }),
            });
        }

        let prefs_raw = self.time_preference_penalty(&timetable.entries);
        if prefs_raw > 0.0 {
            breakdown.push(PenaltyItem {
                kind: PenaltyKind::TimePreferences,
                raw_score: prefs_raw,
                weight: self.config.time_preferences_weight,
                weighted_score: prefs_raw * self.config.time_preferences_weight,
                description: format!("Time preference violations ({prefs_raw} violations)"),
                details: serde_json::json!({ "violation_count": prefs_raw }),
            });
        }

        let consecutive_raw = consecutive_period_penalty(&teacher_loads);
        if consecutive_raw > 0.0 {
            breakdown.push(PenaltyItem {
                kind: PenaltyKind::ConsecutivePeriods,
                raw_score: consecutive_raw,
                weight: self.config.consecutive_periods_weight,
                weighted_score: consecutive_raw * self.config.consecutive_periods_weight,
                description: format!(
                    "Consecutive period violations ({consecutive_raw} violations)"
                ),
                details: serde_json::json!({ "violation_count": consecutive_raw }),
            });
        }

        let total_penalty: f64 = breakdown.iter().map(|p| p.weighted_score).sum();
        EvaluationResult {
            timetable_id,
            total_score: (base_score - total_penalty).max(0.0),
            coverage_percentage: coverage * 100.0,
            base_score,
            penalty_breakdown: breakdown,
        }
    }

    pub fn batch_evaluate(&self, timetables: &[Timetable]) -> BatchEvaluation {
        let evaluations: Vec<EvaluationResult> =
            timetables.iter().map(|t| self.evaluate(t)).collect();
        let scores: Vec<f64> = evaluations.iter().map(|e| e.total_score).collect();

        let count = scores.len();
        let best_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let worst_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let average_score = if count > 0 {
            scores.iter().sum::<f64>() / count as f64
        } else {
            0.0
        };
        // Sample standard deviation, 0 below two observations.
        let score_std_dev = if count > 1 {
            let var = scores
                .iter()
                .map(|s| (s - average_score).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        BatchEvaluation {
            evaluations,
            summary: BatchSummary {
                best_score: if count > 0 { best_score } else { 0.0 },
                worst_score: if count > 0 { worst_score } else { 0.0 },
                average_score,
                score_std_dev,
                count,
            },
        }
    }

    pub fn compare(&self, a: &Timetable, b: &Timetable) -> Comparison {
        let eval1 = self.evaluate(a);
        let eval2 = self.evaluate(b);
        let score_difference = eval1.total_score - eval2.total_score;

        let winner = if score_difference.abs() < 0.01 {
            0
        } else if score_difference > 0.0 {
            1
        } else {
            2
        };

        let mut better_in = Vec::new();
        let mut worse_in = Vec::new();
        for kind in PenaltyKind::ALL {
            let p1 = eval1.weighted_penalty(kind);
            let p2 = eval2.weighted_penalty(kind);
            if p1 < p2 {
                better_in.push(kind);
            } else if p1 > p2 {
                worse_in.push(kind);
            }
        }

        let summary = match winner {
            0 => "Timetables are essentially tied".to_string(),
            1 => format!("Timetable 1 wins by {score_difference:.2} points"),
            _ => format!("Timetable 2 wins by {:.2} points", score_difference.abs()),
        };

        Comparison {
            timetable1_id: Some(a.id.0.clone()),
            timetable2_id: Some(b.id.0.clone()),
            winner,
            score_difference,
            better_in,
            worse_in,
            summary,
        }
    }

    fn coverage_penalty(&self, timetable: &Timetable) -> f64 {
        timetable
            .metadata
            .unfilled_slots
            .iter()
            .map(|slot| match slot.priority {
                types::SlotPriority::High => self.config.high_priority_penalty,
                types::SlotPriority::Medium => self.config.medium_priority_penalty,
                types::SlotPriority::Low => self.config.low_priority_penalty,
            })
            .sum()
    }

    /// Intra-day holes between a class's occupied periods. Slots the solver
    /// reported as unfilled are not gaps, they are missing coverage.
    fn gap_penalty(
        &self,
        timetable: &Timetable,
        class_schedules: &HashMap<&ClassId, Vec<&TimetableEntry>>,
    ) -> f64 {
        let unfilled: HashSet<(&ClassId, DayOfWeek, u8)> = timetable
            .metadata
            .unfilled_slots
            .iter()
            .map(|s| (&s.class_id, s.day, s.period))
            .collect();

        let mut gaps = 0.0;
        for (class_id, entries) in class_schedules {
            let mut by_day: HashMap<DayOfWeek, Vec<u8>> = HashMap::new();
            for e in entries {
                by_day.entry(e.day).or_default().push(e.period_number);
            }
            for (day, mut periods) in by_day {
                periods.sort_unstable();
                for w in periods.windows(2) {
                    for p in (w[0] + 1)..w[1] {
                        if !unfilled.contains(&(*class_id, day, p)) {
                            gaps += 1.0;
                        }
                    }
                }
            }
        }
        gaps
    }

    fn time_preference_penalty(&self, entries: &[TimetableEntry]) -> f64 {
        let mut penalty = 0u32;
        for e in entries {
            let Some(md) = &e.subject_metadata else {
                continue;
            };
            let period = e.period_number;

            if md.prefer_morning && period > self.config.morning_period_cutoff {
                penalty += 1;
            }
            if let Some(preferred) = &md.preferred_periods {
                // prefer_morning already penalized this entry's placement.
                if !preferred.is_empty() && !preferred.contains(&period) && !md.prefer_morning {
                    penalty += 1;
                }
            }
            if let Some(avoid) = &md.avoid_periods {
                if avoid.contains(&period) {
                    penalty += 1;
                }
            }
        }
        f64::from(penalty)
    }
}

/// Structural identity of a timetable: the (class, day, period) →
/// (subject, teacher, room) mapping, independent of entry order and ids.
/// Used as the GA fitness-cache key and for solution de-duplication.
pub fn structural_hash(timetable: &Timetable) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut cells: Vec<(&str, DayOfWeek, u8, &str, &str, &str)> = timetable
        .entries
        .iter()
        .map(|e| {
            (
                e.class_id.0.as_str(),
                e.day,
                e.period_number,
                e.subject_id.0.as_str(),
                e.teacher_id.0.as_str(),
                e.room_id.0.as_str(),
            )
        })
        .collect();
    cells.sort_unstable();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    cells.hash(&mut hasher);
    hasher.finish()
}

fn group_by_teacher(entries: &[TimetableEntry]) -> HashMap<&TeacherId, Vec<&TimetableEntry>> {
    let mut map: HashMap<&TeacherId, Vec<&TimetableEntry>> = HashMap::new();
    for e in entries {
        map.entry(&e.teacher_id).or_default().push(e);
    }
    map
}

fn group_by_class(entries: &[TimetableEntry]) -> HashMap<&ClassId, Vec<&TimetableEntry>> {
    let mut map: HashMap<&ClassId, Vec<&TimetableEntry>> = HashMap::new();
    for e in entries {
        map.entry(&e.class_id).or_default().push(e);
    }
    map
}

/// Population standard deviation of per-teacher assignment counts; 0 below
/// two teachers.
fn workload_imbalance(teacher_loads: &HashMap<&TeacherId, Vec<&TimetableEntry>>) -> f64 {
    if teacher_loads.len() < 2 {
        return 0.0;
    }
    let counts: Vec<f64> = teacher_loads.values().map(|es| es.len() as f64).collect();
    let mean = counts.iter().sum::<f64>() / counts.len() as f64;
    let var = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
    var.sqrt()
}

fn consecutive_period_penalty(
    teacher_loads: &HashMap<&TeacherId, Vec<&TimetableEntry>>,
) -> f64 {
    let mut penalty = 0u32;
    for entries in teacher_loads.values() {
        let max_consecutive = entries
            .first()
            .and_then(|e| e.teacher_metadata.as_ref())
            .map(|md| md.max_consecutive_periods)
            .unwrap_or(3);

        let mut by_day: HashMap<DayOfWeek, Vec<u8>> = HashMap::new();
        for e in entries {
            by_day.entry(e.day).or_default().push(e.period_number);
        }
        for periods in by_day.values_mut() {
            periods.sort_unstable();
            let mut run = 1u8;
            for w in periods.windows(2) {
                if w[1] == w[0] + 1 {
                    run += 1;
                } else {
                    if run > max_consecutive {
                        penalty += u32::from(run - max_consecutive);
                    }
                    run = 1;
                }
            }
            if run > max_consecutive {
                penalty += u32::from(run - max_consecutive);
            }
        }
    }
    f64::from(penalty)
}
