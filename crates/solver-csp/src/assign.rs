//! Greedy teacher pre-assignment. Binds exactly one teacher to every
//! (class, subject) pair before scheduling starts, so teacher consistency
//! holds by construction.

use std::collections::HashMap;
use tracing::debug;
use tt_core::{EngineError, EngineResult};
use types::{ClassId, GenerateRequest, SubjectId, TeacherId};

/// Subjects whose name contains one of these are scheduled first, the way a
/// human planner pins the core curriculum before filling electives.
const MANDATORY_KEYWORDS: [&str; 4] = ["math", "english", "science", "language"];

pub fn mandatory_bonus(subject_name: &str) -> u32 {
    let lower = subject_name.to_lowercase();
    if MANDATORY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        1000
    } else {
        0
    }
}

/// Priority score per subject: mandatory bonus plus total weekly demand
/// across all classes. Shared with the solver's lesson ordering.
pub fn subject_priorities(req: &GenerateRequest) -> HashMap<SubjectId, u32> {
    req.subjects
        .iter()
        .map(|s| {
            let demand: u32 = req
                .classes
                .iter()
                .map(|c| u32::from(req.periods_required(c, s)))
                .sum();
            (s.id.clone(), mandatory_bonus(&s.name) + demand)
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct TeacherAssignments {
    pub by_pair: HashMap<(ClassId, SubjectId), TeacherId>,
    pub load: HashMap<TeacherId, u32>,
    pub warnings: Vec<String>,
}

impl TeacherAssignments {
    pub fn teacher_for(&self, class: &ClassId, subject: &SubjectId) -> Option<&TeacherId> {
        self.by_pair.get(&(class.clone(), subject.clone()))
    }

    /// Move one (class, subject) pair to another qualified teacher with room
    /// for the pair's full demand. Used by the solver's fallback when the
    /// original binding cannot be placed.
    pub fn reassign(
        &mut self,
        req: &GenerateRequest,
        class_id: &ClassId,
        subject_id: &SubjectId,
    ) -> Option<TeacherId> {
        let class = req.classes.iter().find(|c| &c.id == class_id)?;
        let subject = req.subjects.iter().find(|s| &s.id == subject_id)?;
        let needed = u32::from(req.periods_required(class, subject));
        let current = self.by_pair.get(&(class_id.clone(), subject_id.clone()))?.clone();

        let mut candidates: Vec<&types::Teacher> = req
            .teachers
            .iter()
            .filter(|t| t.id != current && t.is_qualified_for(subject))
            .filter(|t| {
                let load = self.load.get(&t.id).copied().unwrap_or(0);
                u32::from(t.max_periods_per_week).saturating_sub(load) >= needed
            })
            .collect();
        candidates.sort_by(|a, b| {
            let ra = u32::from(a.max_periods_per_week) - self.load.get(&a.id).copied().unwrap_or(0);
            let rb = u32::from(b.max_periods_per_week) - self.load.get(&b.id).copied().unwrap_or(0);
            rb.cmp(&ra).then_with(|| a.id.0.cmp(&b.id.0))
        });
        let next = candidates.first()?.id.clone();

        *self.load.entry(current).or_default() -= needed;
        *self.load.entry(next.clone()).or_default() += needed;
        self.by_pair
            .insert((class_id.clone(), subject_id.clone()), next.clone());
        Some(next)
    }
}

pub fn assign_teachers(req: &GenerateRequest) -> EngineResult<TeacherAssignments> {
    let priorities = subject_priorities(req);

    // (priority, class, subject, periods needed), highest priority first with
    // a deterministic id tie-break.
    let mut pairs: Vec<(u32, &types::Class, &types::Subject, u32)> = Vec::new();
    for class in &req.classes {
        for subject in &req.subjects {
            let needed = u32::from(req.periods_required(class, subject));
            if needed == 0 {
                continue;
            }
            let priority = priorities.get(&subject.id).copied().unwrap_or(0);
            pairs.push((priority, class, subject, needed));
        }
    }
    pairs.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.id.0.cmp(&b.1.id.0))
            .then_with(|| a.2.id.0.cmp(&b.2.id.0))
    });

    let mut load: HashMap<TeacherId, u32> =
        req.teachers.iter().map(|t| (t.id.clone(), 0)).collect();
    let max_of: HashMap<&TeacherId, u32> = req
        .teachers
        .iter()
        .map(|t| (&t.id, u32::from(t.max_periods_per_week)))
        .collect();

    let mut by_pair = HashMap::new();
    let mut warnings = Vec::new();

    for (_, class, subject, needed) in pairs {
        let qualified: Vec<&types::Teacher> = req
            .teachers
            .iter()
            .filter(|t| t.is_qualified_for(subject))
            .collect();

        let remaining =
            |t: &types::Teacher| max_of[&t.id].saturating_sub(load.get(&t.id).copied().unwrap_or(0));

        let chosen = if qualified.is_empty() {
            // Last resort: any teacher with spare capacity keeps the grid
            // complete, flagged for the operator.
            let mut any: Vec<&types::Teacher> =
                req.teachers.iter().filter(|t| remaining(t) > 0).collect();
            if any.is_empty() {
                return Err(EngineError::NoQualifiedTeacher {
                    subject: subject.name.clone(),
                });
            }
            any.sort_by(|a, b| remaining(b).cmp(&remaining(a)).then_with(|| a.id.0.cmp(&b.id.0)));
            let pick = any[0];
            warnings.push(format!(
                "No qualified teacher for {}; assigned {} to class {} as best fit",
                subject.name, pick.id, class.name
            ));
            pick
        } else {
            let mut with_capacity: Vec<&types::Teacher> = qualified
                .iter()
                .copied()
                .filter(|t| remaining(t) >= needed)
                .collect();
            with_capacity
                .sort_by(|a, b| remaining(b).cmp(&remaining(a)).then_with(|| a.id.0.cmp(&b.id.0)));

            if let Some(&pick) = with_capacity.first() {
                pick
            } else {
                // Overcommit the least-loaded qualified teacher rather than
                // leave the pair unbound.
                let mut partial: Vec<&types::Teacher> = qualified
                    .iter()
                    .copied()
                    .filter(|t| remaining(t) > 0)
                    .collect();
                partial.sort_by(|a, b| {
                    remaining(b).cmp(&remaining(a)).then_with(|| a.id.0.cmp(&b.id.0))
                });
                match partial.first() {
                    Some(&pick) => {
                        warnings.push(format!(
                            "Teacher capacity for {} is tight: {} takes class {} with only {} of {} periods free",
                            subject.name,
                            pick.id,
                            class.name,
                            remaining(pick),
                            needed
                        ));
                        pick
                    }
                    None => {
                        return Err(EngineError::InsufficientTeacherCapacity {
                            subject: subject.name.clone(),
                            deficit_periods: needed,
                        });
                    }
                }
            }
        };

        *load.get_mut(&chosen.id).expect("load seeded for all teachers") += needed;
        by_pair.insert((class.id.clone(), subject.id.clone()), chosen.id.clone());
    }

    debug!(
        pairs = by_pair.len(),
        warnings = warnings.len(),
        "greedy teacher assignment done"
    );
    Ok(TeacherAssignments {
        by_pair,
        load,
        warnings,
    })
}
