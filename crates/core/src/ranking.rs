//! Criteria-driven ranking over evaluated timetables: filter, sort, top-N,
//! pairwise comparison, and penalty-distribution analysis.

use crate::evaluation::{Comparison, EvaluationResult, Evaluator, PenaltyKind};
use serde::Serialize;
use std::collections::BTreeMap;
use types::Timetable;

#[derive(Clone, Debug)]
pub enum SortBy {
    TotalScore,
    Coverage,
    Penalty(PenaltyKind),
}

#[derive(Clone, Debug)]
pub struct RankingCriteria {
    pub sort_by: SortBy,
    pub descending: bool,
    /// Minimum coverage percentage (0..=100) a candidate must reach.
    pub min_coverage: Option<f64>,
    /// Per-kind ceilings on the weighted penalty score.
    pub max_penalties: Option<BTreeMap<PenaltyKind, f64>>,
}

impl Default for RankingCriteria {
    fn default() -> Self {
        Self {
            sort_by: SortBy::TotalScore,
            descending: true,
            min_coverage: None,
            max_penalties: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RankedTimetable {
    pub rank: usize,
    pub timetable: Timetable,
    pub evaluation: EvaluationResult,
}

impl RankedTimetable {
    pub fn score(&self) -> f64 {
        self.evaluation.total_score
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PenaltyKindStats {
    pub affected: usize,
    pub affected_fraction: f64,
    pub mean: f64,
    pub max: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PenaltyDistribution {
    pub total_timetables: usize,
    pub score_mean: f64,
    pub score_min: f64,
    pub score_max: f64,
    pub coverage_mean: f64,
    pub per_kind: BTreeMap<&'static str, PenaltyKindStats>,
}

pub struct RankingService {
    evaluator: Evaluator,
}

impl RankingService {
    pub fn new(evaluator: Evaluator) -> Self {
        Self { evaluator }
    }

    /// Evaluate, filter, sort, and assign ranks starting at 1. Evaluations
    /// stay attached to their timetable through every step.
    pub fn rank_candidates(
        &self,
        timetables: &[Timetable],
        criteria: &RankingCriteria,
    ) -> Vec<RankedTimetable> {
        let mut pairs: Vec<(Timetable, EvaluationResult)> = timetables
            .iter()
            .map(|t| (t.clone(), self.evaluator.evaluate(t)))
            .collect();

        if let Some(min_coverage) = criteria.min_coverage {
            pairs.retain(|(_, e)| e.coverage_percentage >= min_coverage);
        }
        if let Some(max_penalties) = &criteria.max_penalties {
            pairs.retain(|(_, e)| {
                max_penalties
                    .iter()
                    .all(|(kind, max)| e.weighted_penalty(*kind) <= *max)
            });
        }

        let key = |e: &EvaluationResult| -> f64 {
            match &criteria.sort_by {
                SortBy::TotalScore => e.total_score,
                SortBy::Coverage => e.coverage_percentage,
                SortBy::Penalty(kind) => e.weighted_penalty(*kind),
            }
        };
        pairs.sort_by(|(_, a), (_, b)| {
            let ord = key(a).total_cmp(&key(b));
            if criteria.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        pairs
            .into_iter()
            .enumerate()
            .map(|(i, (timetable, evaluation))| RankedTimetable {
                rank: i + 1,
                timetable,
                evaluation,
            })
            .collect()
    }

    /// Best candidate reaching `min_coverage` (a fraction in 0..=1).
    pub fn find_best_partial(
        &self,
        timetables: &[Timetable],
        min_coverage: f64,
    ) -> Option<RankedTimetable> {
        let criteria = RankingCriteria {
            min_coverage: Some(min_coverage * 100.0),
            ..RankingCriteria::default()
        };
        self.rank_candidates(timetables, &criteria).into_iter().next()
    }

    pub fn top_n(
        &self,
        timetables: &[Timetable],
        n: usize,
        criteria: &RankingCriteria,
    ) -> Vec<RankedTimetable> {
        let mut ranked = self.rank_candidates(timetables, criteria);
        ranked.truncate(n);
        ranked
    }

    pub fn filter_by_quality(
        &self,
        timetables: &[Timetable],
        min_score: f64,
    ) -> Vec<RankedTimetable> {
        self.rank_candidates(timetables, &RankingCriteria::default())
            .into_iter()
            .filter(|rt| rt.score() >= min_score)
            .collect()
    }

    pub fn compare_alternatives(&self, a: &Timetable, b: &Timetable) -> Comparison {
        self.evaluator.compare(a, b)
    }

    pub fn evaluation_breakdown(&self, timetable: &Timetable) -> EvaluationResult {
        self.evaluator.evaluate(timetable)
    }

    pub fn analyze_penalty_distribution(&self, timetables: &[Timetable]) -> PenaltyDistribution {
        let evaluations: Vec<EvaluationResult> =
            timetables.iter().map(|t| self.evaluator.evaluate(t)).collect();
        let n = evaluations.len();

        let scores: Vec<f64> = evaluations.iter().map(|e| e.total_score).collect();
        let coverages: Vec<f64> = evaluations.iter().map(|e| e.coverage_percentage).collect();

        let mean = |xs: &[f64]| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        };

        let mut per_kind = BTreeMap::new();
        for kind in PenaltyKind::ALL {
            let values: Vec<f64> = evaluations
                .iter()
                .map(|e| e.weighted_penalty(kind))
                .collect();
            let affected = values.iter().filter(|v| **v > 0.0).count();
            per_kind.insert(
                kind.as_str(),
                PenaltyKindStats {
                    affected,
                    affected_fraction: if n > 0 { affected as f64 / n as f64 } else { 0.0 },
                    mean: mean(&values),
                    max: values.iter().copied().fold(0.0, f64::max),
                },
            );
        }

        let score_min = if n > 0 {
            scores.iter().copied().fold(f64::INFINITY, f64::min)
        } else {
            0.0
        };
        let score_max = if n > 0 {
            scores.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        } else {
            0.0
        };
        PenaltyDistribution {
            total_timetables: n,
            score_mean: mean(&scores),
            score_min,
            score_max,
            coverage_mean: mean(&coverages),
            per_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{
        AcademicYearId, ClassId, DayOfWeek, RoomId, SchoolId, SubjectId, SubjectMetadata,
        TeacherId, TeacherMetadata, TimeSlotId, TimetableEntry, TimetableId, TimetableMeta,
        TimetableStatus,
    };

    fn entry(class: &str, teacher: &str, day: DayOfWeek, period: u8) -> TimetableEntry {
        TimetableEntry {
            id: None,
            timetable_id: TimetableId("tt".into()),
            class_id: ClassId(class.into()),
            subject_id: SubjectId("s1".into()),
            teacher_id: TeacherId(teacher.into()),
            room_id: RoomId("r1".into()),
            time_slot_id: TimeSlotId(format!("ts-{day}-{period}")),
            day,
            period_number: period,
            is_fixed: false,
            subject_metadata: Some(SubjectMetadata::default()),
            teacher_metadata: Some(TeacherMetadata {
                max_consecutive_periods: 3,
            }),
        }
    }

    fn timetable(id: &str, entries: Vec<TimetableEntry>, coverage: f64) -> Timetable {
        Timetable {
            id: TimetableId(id.into()),
            school_id: SchoolId("sch".into()),
            academic_year_id: AcademicYearId("ay".into()),
            name: None,
            status: TimetableStatus::Draft,
            metadata: TimetableMeta {
                coverage,
                unfilled_slots: Vec::new(),
            },
            entries,
        }
    }

    fn service() -> RankingService {
        RankingService::new(Evaluator::default())
    }

    #[test]
    fn ranks_best_first_with_ranks_from_one() {
        let clean = timetable("a", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 1.0);
        let gappy = timetable(
            "b",
            vec![
                entry("c1", "t1", DayOfWeek::Monday, 1),
                entry("c1", "t1", DayOfWeek::Monday, 3),
            ],
            1.0,
        );
        let ranked = service().rank_candidates(
            &[gappy, clean],
            &RankingCriteria::default(),
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].timetable.id.0, "a");
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].timetable.id.0, "b");
        assert!(ranked[0].score() > ranked[1].score());
    }

    #[test]
    fn evaluation_stays_attached_to_its_timetable_after_sorting() {
        let low = timetable("low", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 0.5);
        let high = timetable("high", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 1.0);
        let ranked = service().rank_candidates(&[low, high], &RankingCriteria::default());
        for rt in &ranked {
            let fresh = Evaluator::default().evaluate(&rt.timetable);
            assert_eq!(fresh.total_score, rt.score());
        }
    }

    #[test]
    fn min_coverage_filters_candidates() {
        let partial = timetable("p", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 0.6);
        let full = timetable("f", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 1.0);
        let svc = service();

        let best = svc.find_best_partial(&[partial.clone(), full.clone()], 0.7).unwrap();
        assert_eq!(best.timetable.id.0, "f");
        assert!(svc.find_best_partial(&[partial], 0.7).is_none());
    }

    #[test]
    fn max_penalty_ceiling_filters_candidates() {
        let gappy = timetable(
            "g",
            vec![
                entry("c1", "t1", DayOfWeek::Monday, 1),
                entry("c1", "t1", DayOfWeek::Monday, 3),
            ],
            1.0,
        );
        let clean = timetable("c", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 1.0);
        let criteria = RankingCriteria {
            max_penalties: Some([(PenaltyKind::StudentGaps, 0.0)].into()),
            ..RankingCriteria::default()
        };
        let ranked = service().rank_candidates(&[gappy, clean], &criteria);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].timetable.id.0, "c");
    }

    #[test]
    fn top_n_truncates() {
        let tts: Vec<Timetable> = (0..4)
            .map(|i| {
                timetable(
                    &format!("t{i}"),
                    vec![entry("c1", "t1", DayOfWeek::Monday, 1)],
                    1.0,
                )
            })
            .collect();
        let top = service().top_n(&tts, 2, &RankingCriteria::default());
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn penalty_distribution_reports_affected_fraction() {
        let gappy = timetable(
            "g",
            vec![
                entry("c1", "t1", DayOfWeek::Monday, 1),
                entry("c1", "t1", DayOfWeek::Monday, 3),
            ],
            1.0,
        );
        let clean = timetable("c", vec![entry("c1", "t1", DayOfWeek::Monday, 1)], 1.0);
        let dist = service().analyze_penalty_distribution(&[gappy, clean]);
        assert_eq!(dist.total_timetables, 2);
        let gaps = &dist.per_kind["student_gaps"];
        assert_eq!(gaps.affected, 1);
        assert_eq!(gaps.affected_fraction, 0.5);
        assert_eq!(gaps.max, 15.0);
    }
}
