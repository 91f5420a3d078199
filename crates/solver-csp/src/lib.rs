//! Complete backtracking solver for the weekly grid. Places every required
//! period for every class while keeping teachers, shared rooms, and teacher
//! caps conflict-free, and emits any number of distinct seeded solutions.

pub mod assign;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info};
use tt_core::evaluation::structural_hash;
use tt_core::{advisor, CancelFlag, Deadline, EngineError, EngineResult};
use types::{
    Class, DayOfWeek, GenerateRequest, RoomStrategy, RoomType, Subject, SubjectId,
    SubjectMetadata, Teacher, TeacherMetadata, TimeSlot, Timetable, TimetableEntry, TimetableId,
    TimetableMeta, TimetableStatus, UnfilledSlot,
};

#[derive(Clone, Debug)]
pub struct CspOutcome {
    pub solutions: Vec<Timetable>,
    pub elapsed_seconds: f64,
    pub conflicts: Vec<String>,
    pub suggestions: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CspSolver {
    /// Undo operations allowed before a search attempt is declared stuck.
    pub backtrack_budget: u32,
    /// Teacher re-assignments allowed per solution attempt.
    pub fallback_budget: u32,
}

impl Default for CspSolver {
    fn default() -> Self {
        Self {
            backtrack_budget: 20_000,
            fallback_budget: 5,
        }
    }
}

struct Ctx<'a> {
    req: &'a GenerateRequest,
    /// Active slots, sorted by (day, period).
    slots: Vec<&'a TimeSlot>,
    classes: Vec<&'a Class>,
    subjects: Vec<&'a Subject>,
    teachers: Vec<&'a Teacher>,
    teacher_idx: HashMap<&'a str, usize>,
    labs: Vec<usize>,
    classrooms: Vec<usize>,
    home_room: Vec<Option<usize>>,
    strategy: RoomStrategy,
    priorities: HashMap<SubjectId, u32>,
}

impl<'a> Ctx<'a> {
    fn build(req: &'a GenerateRequest) -> EngineResult<Self> {
        let mut slots: Vec<&TimeSlot> = req.active_slots().collect();
        slots.sort_by_key(|s| (s.day, s.period_number));

        let classes: Vec<&Class> = req.classes.iter().collect();
        let subjects: Vec<&Subject> = req.subjects.iter().collect();
        let teachers: Vec<&Teacher> = req.teachers.iter().collect();
        let teacher_idx = teachers
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.0.as_str(), i))
            .collect();
        let room_idx: HashMap<&str, usize> = req
            .rooms
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.0.as_str(), i))
            .collect();

        let labs: Vec<usize> = req
            .rooms
            .iter()
            .enumerate()
            .filter(|(_, r)| r.room_type == RoomType::Lab)
            .map(|(i, _)| i)
            .collect();
        let classrooms: Vec<usize> = req
            .rooms
            .iter()
            .enumerate()
            .filter(|(_, r)| r.room_type == RoomType::Classroom)
            .map(|(i, _)| i)
            .collect();

        let strategy = req.room_strategy();
        let mut home_room = Vec::with_capacity(classes.len());
        for class in &classes {
            match (&class.home_room_id, strategy) {
                (Some(id), _) => match room_idx.get(id.0.as_str()) {
                    Some(&ri) => home_room.push(Some(ri)),
                    None => {
                        return Err(EngineError::MissingHomeRoom {
                            class: class.name.clone(),
                        })
                    }
                },
                (None, RoomStrategy::HomeRooms) => {
                    return Err(EngineError::MissingHomeRoom {
                        class: class.name.clone(),
                    })
                }
                (None, RoomStrategy::TrackAll) => home_room.push(None),
            }
        }

        Ok(Self {
            req,
            slots,
            classes,
            subjects,
            teachers,
            teacher_idx,
            labs,
            classrooms,
            home_room,
            strategy,
            priorities: assign::subject_priorities(req),
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Lesson {
    class: usize,
    subject: usize,
    teacher: usize,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    slot: usize,
    room: usize,
    track_room: bool,
}

/// Mutable occupancy tables, owned by one solve attempt.
#[derive(Default)]
struct WorkingState {
    teacher_busy: HashSet<(usize, DayOfWeek, u8)>,
    room_busy: HashSet<(usize, DayOfWeek, u8)>,
    class_filled: HashSet<(usize, DayOfWeek, u8)>,
    teacher_day: HashMap<(usize, DayOfWeek), u8>,
    teacher_week: HashMap<usize, u32>,
    subject_on_day: HashMap<(usize, usize, DayOfWeek), u8>,
}

impl WorkingState {
    fn commit(&mut self, ctx: &Ctx<'_>, lesson: Lesson, cand: Candidate) {
        let slot = ctx.slots[cand.slot];
        let (day, period) = (slot.day, slot.period_number);
        self.teacher_busy.insert((lesson.teacher, day, period));
        self.class_filled.insert((lesson.class, day, period));
        if cand.track_room {
            self.room_busy.insert((cand.room, day, period));
        }
        *self.teacher_day.entry((lesson.teacher, day)).or_default() += 1;
        *self.teacher_week.entry(lesson.teacher).or_default() += 1;
        *self
            .subject_on_day
            .entry((lesson.class, lesson.subject, day))
            .or_default() += 1;
    }

    fn undo(&mut self, ctx: &Ctx<'_>, lesson: Lesson, cand: Candidate) {
        let slot = ctx.slots[cand.slot];
        let (day, period) = (slot.day, slot.period_number);
        self.teacher_busy.remove(&(lesson.teacher, day, period));
        self.class_filled.remove(&(lesson.class, day, period));
        if cand.track_room {
            self.room_busy.remove(&(cand.room, day, period));
        }
        *self.teacher_day.get_mut(&(lesson.teacher, day)).unwrap() -= 1;
        *self.teacher_week.get_mut(&lesson.teacher).unwrap() -= 1;
        *self
            .subject_on_day
            .get_mut(&(lesson.class, lesson.subject, day))
            .unwrap() -= 1;
    }

    /// Length of the consecutive run the teacher would sit in if placed at
    /// (day, period).
    fn run_after(&self, teacher: usize, day: DayOfWeek, period: u8) -> u8 {
        let mut run = 1u8;
        let mut p = period;
        while p > 1 && self.teacher_busy.contains(&(teacher, day, p - 1)) {
            run += 1;
            p -= 1;
        }
        let mut p = period;
        while p < 12 && self.teacher_busy.contains(&(teacher, day, p + 1)) {
            run += 1;
            p += 1;
        }
        run
    }
}

#[derive(Clone, Debug, Default)]
struct BlockStats {
    class_filled: u32,
    teacher_conflict: u32,
    teacher_caps: u32,
    room_contested: u32,
}

impl BlockStats {
    fn dominant(&self) -> &'static str {
        let mut best = ("class slot already filled", self.class_filled);
        for (label, n) in [
            ("teacher already booked or unavailable", self.teacher_conflict),
            ("teacher daily/weekly/consecutive caps", self.teacher_caps),
            ("no free compatible room", self.room_contested),
        ] {
            if n > best.1 {
                best = (label, n);
            }
        }
        best.0
    }
}

struct StuckReport {
    /// (class, subject) of the lesson that exhausted its candidates most
    /// recently; the fallback re-binds this pair.
    pair: Option<(usize, usize)>,
    conflicts: Vec<String>,
}

enum Attempt {
    Solved(Vec<Candidate>),
    Stuck(StuckReport),
}

impl CspSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn solve(
        &self,
        req: &GenerateRequest,
        num_solutions: u32,
        seed: u64,
        cancel: &CancelFlag,
        deadline: &Deadline,
    ) -> EngineResult<CspOutcome> {
        let started = Instant::now();
        if req.classes.is_empty() || num_solutions == 0 {
            return Ok(CspOutcome {
                solutions: Vec::new(),
                elapsed_seconds: started.elapsed().as_secs_f64(),
                conflicts: Vec::new(),
                suggestions: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let ctx = Ctx::build(req)?;
        let base_assignments = assign::assign_teachers(req)?;
        let mut warnings = base_assignments.warnings.clone();

        let mut solutions: Vec<Timetable> = Vec::new();
        let mut conflicts: Vec<String> = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();

        for k in 0..num_solutions {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(u64::from(k)));
            let mut assignments = base_assignments.clone();

            for fallback in 0..=self.fallback_budget {
                let lessons = build_lessons(&ctx, &assignments, &mut rng);
                match self.solve_one(&ctx, &lessons, &mut rng, cancel, deadline)? {
                    Attempt::Solved(placements) => {
                        let timetable =
                            build_timetable(&ctx, &lessons, &placements, seed, k);
                        if seen.insert(structural_hash(&timetable)) {
                            solutions.push(timetable);
                        }
                        break;
                    }
                    Attempt::Stuck(report) => {
                        // Pair-level re-assignment keeps teacher consistency
                        // intact, so the fallback is safe in both modes.
                        let reassigned = fallback < self.fallback_budget
                            && report.pair.is_some_and(|(ci, si)| {
                                let class_id = ctx.classes[ci].id.clone();
                                let subject_id = ctx.subjects[si].id.clone();
                                match assignments.reassign(req, &class_id, &subject_id) {
                                    Some(next) => {
                                        warnings.push(format!(
                                            "Re-assigned {} of class {} to teacher {next} after a placement dead end",
                                            ctx.subjects[si].name, ctx.classes[ci].name
                                        ));
                                        true
                                    }
                                    None => false,
                                }
                            });
                        if !reassigned {
                            conflicts.extend(report.conflicts);
                            break;
                        }
                    }
                }
            }
        }

        conflicts.sort();
        conflicts.dedup();

        if solutions.is_empty() {
            let analysis = advisor::pre_computation_check(req);
            let mut suggestions = analysis.suggestions;
            suggestions.extend(advisor::post_mortem_analysis(&conflicts));
            return Err(EngineError::InfeasibleConstraints {
                conflicts,
                suggestions,
            });
        }
        if (solutions.len() as u32) < num_solutions {
            warnings.push(format!(
                "only {} distinct solution(s) found of {num_solutions} requested",
                solutions.len()
            ));
        }

        info!(
            solutions = solutions.len(),
            elapsed = ?started.elapsed(),
            "csp solve done"
        );
        Ok(CspOutcome {
            solutions,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            conflicts,
            suggestions: Vec::new(),
            warnings,
        })
    }

    fn solve_one(
        &self,
        ctx: &Ctx<'_>,
        lessons: &[Lesson],
        rng: &mut ChaCha8Rng,
        cancel: &CancelFlag,
        deadline: &Deadline,
    ) -> EngineResult<Attempt> {
        let mut state = WorkingState::default();
        let mut frames: Vec<(Vec<Candidate>, usize)> = Vec::with_capacity(lessons.len());
        let mut placed: Vec<Candidate> = Vec::with_capacity(lessons.len());
        let mut stats = BlockStats::default();
        let mut backtracks = 0u32;
        let mut last_stuck: Option<usize> = None;
        let mut steps = 0u32;

        let mut i = 0usize;
        loop {
            cancel.check()?;
            steps += 1;
            if steps % 64 == 0 {
                deadline.check(
                    "csp",
                    format!("{} of {} lessons placed", placed.len(), lessons.len()),
                )?;
            }

            if i == lessons.len() {
                return Ok(Attempt::Solved(placed));
            }
            if frames.len() == i {
                let cands = enumerate_candidates(ctx, &state, lessons[i], rng, &mut stats);
                if cands.is_empty() {
                    last_stuck = Some(i);
                }
                frames.push((cands, 0));
            }

            let (cands, next) = frames.last_mut().expect("frame pushed above");
            if *next < cands.len() {
                let cand = cands[*next];
                *next += 1;
                state.commit(ctx, lessons[i], cand);
                placed.push(cand);
                i += 1;
            } else {
                frames.pop();
                if i == 0 || backtracks >= self.backtrack_budget {
                    let stuck = last_stuck.unwrap_or(0);
                    return Ok(Attempt::Stuck(self.stuck_report(ctx, lessons, stuck, &stats)));
                }
                backtracks += 1;
                i -= 1;
                let cand = placed.pop().expect("placement exists for frame");
                state.undo(ctx, lessons[i], cand);
            }
        }
    }

    fn stuck_report(
        &self,
        ctx: &Ctx<'_>,
        lessons: &[Lesson],
        stuck: usize,
        stats: &BlockStats,
    ) -> StuckReport {
        let lesson = lessons[stuck];
        let class = ctx.classes[lesson.class];
        let subject = ctx.subjects[lesson.subject];
        let teacher = ctx.teachers[lesson.teacher];
        debug!(
            class = %class.name,
            subject = %subject.name,
            "search stuck"
        );
        StuckReport {
            pair: Some((lesson.class, lesson.subject)),
            conflicts: vec![format!(
                "could not place {} for class {} (teacher {}): binding constraint was {}",
                subject.name,
                class.name,
                teacher.id,
                stats.dominant()
            )],
        }
    }
}

fn build_lessons(
    ctx: &Ctx<'_>,
    assignments: &assign::TeacherAssignments,
    rng: &mut ChaCha8Rng,
) -> Vec<Lesson> {
    let mut lessons: Vec<(Lesson, bool, u32, u32, u8, u64)> = Vec::new();
    for (ci, class) in ctx.classes.iter().enumerate() {
        for (si, subject) in ctx.subjects.iter().enumerate() {
            let needed = ctx.req.periods_required(class, subject);
            if needed == 0 {
                continue;
            }
            let Some(teacher_id) = assignments.teacher_for(&class.id, &subject.id) else {
                continue;
            };
            let Some(&ti) = ctx.teacher_idx.get(teacher_id.0.as_str()) else {
                continue;
            };
            let demand = assignments.load.get(teacher_id).copied().unwrap_or(0);
            let priority = ctx.priorities.get(&subject.id).copied().unwrap_or(0);
            for _ in 0..needed {
                lessons.push((
                    Lesson {
                        class: ci,
                        subject: si,
                        teacher: ti,
                    },
                    subject.requires_lab,
                    demand,
                    priority,
                    class.grade,
                    rng.gen(),
                ));
            }
        }
    }
    // Hardest first: lab lessons, then the most loaded teachers, then subject
    // priority, then lower grades. The random tag reorders within a band so
    // each seed explores a different branch first.
    lessons.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| b.3.cmp(&a.3))
            .then_with(|| a.4.cmp(&b.4))
            .then_with(|| a.5.cmp(&b.5))
    });
    lessons.into_iter().map(|(l, ..)| l).collect()
}

fn enumerate_candidates(
    ctx: &Ctx<'_>,
    state: &WorkingState,
    lesson: Lesson,
    rng: &mut ChaCha8Rng,
    stats: &mut BlockStats,
) -> Vec<Candidate> {
    let subject = ctx.subjects[lesson.subject];
    let teacher = ctx.teachers[lesson.teacher];
    let cutoff = ctx.req.weights().morning_period_cutoff;
    let max_day = teacher.max_periods_per_day;
    let max_week = u32::from(teacher.max_periods_per_week);
    let max_consecutive = teacher.max_consecutive_periods;

    let mut slot_order: Vec<usize> = (0..ctx.slots.len()).collect();
    slot_order.shuffle(rng);

    let mut scored: Vec<((u8, u8, u8, u8, u8), Candidate)> = Vec::new();
    for &si in &slot_order {
        let slot = ctx.slots[si];
        let (day, period) = (slot.day, slot.period_number);

        if state.class_filled.contains(&(lesson.class, day, period)) {
            stats.class_filled += 1;
            continue;
        }
        if state.teacher_busy.contains(&(lesson.teacher, day, period))
            || !teacher.is_available(day, period)
        {
            stats.teacher_conflict += 1;
            continue;
        }
        let day_count = state
            .teacher_day
            .get(&(lesson.teacher, day))
            .copied()
            .unwrap_or(0);
        let week_count = state.teacher_week.get(&lesson.teacher).copied().unwrap_or(0);
        let run = state.run_after(lesson.teacher, day, period);
        if day_count + 1 > max_day || week_count + 1 > max_week || run > max_consecutive {
            stats.teacher_caps += 1;
            continue;
        }

        let (room, track_room) = if subject.requires_lab {
            let mut lab_order = ctx.labs.clone();
            lab_order.shuffle(rng);
            match lab_order
                .into_iter()
                .find(|&r| !state.room_busy.contains(&(r, day, period)))
            {
                Some(r) => (r, true),
                None => {
                    stats.room_contested += 1;
                    continue;
                }
            }
        } else {
            match ctx.strategy {
                RoomStrategy::HomeRooms => {
                    let r = ctx.home_room[lesson.class].expect("home rooms checked in Ctx::build");
                    (r, false)
                }
                RoomStrategy::TrackAll => {
                    let mut rooms = ctx.classrooms.clone();
                    rooms.shuffle(rng);
                    match rooms
                        .into_iter()
                        .find(|&r| !state.room_busy.contains(&(r, day, period)))
                    {
                        Some(r) => (r, true),
                        None => {
                            stats.room_contested += 1;
                            continue;
                        }
                    }
                }
            }
        };

        let has_subject_today = state
            .subject_on_day
            .get(&(lesson.class, lesson.subject, day))
            .copied()
            .unwrap_or(0)
            > 0;
        let avoided = subject
            .avoid_periods
            .as_ref()
            .is_some_and(|a| a.contains(&period));
        let preferred_miss = subject
            .preferred_periods
            .as_ref()
            .is_some_and(|p| !p.is_empty() && !p.contains(&period));
        // Earlier periods first for morning-preferring subjects; beyond the
        // cutoff the slot additionally counts as a full miss.
        let morning_key = if subject.prefer_morning {
            if period > cutoff {
                period.saturating_add(12)
            } else {
                period
            }
        } else {
            0
        };

        scored.push((
            (
                u8::from(has_subject_today),
                u8::from(avoided),
                u8::from(preferred_miss),
                morning_key,
                run,
            ),
            Candidate {
                slot: si,
                room,
                track_room,
            },
        ));
    }

    // Stable sort keeps the shuffled order within equal keys, which is where
    // per-seed diversity comes from.
    scored.sort_by_key(|(key, _)| *key);
    scored.into_iter().map(|(_, c)| c).collect()
}

fn build_timetable(
    ctx: &Ctx<'_>,
    lessons: &[Lesson],
    placements: &[Candidate],
    seed: u64,
    index: u32,
) -> Timetable {
    let req = ctx.req;
    let id = TimetableId(format!("{}-tt-{seed}-{index}", req.school_id));

    let mut entries: Vec<TimetableEntry> = lessons
        .iter()
        .zip(placements)
        .map(|(lesson, cand)| {
            let slot = ctx.slots[cand.slot];
            let class = ctx.classes[lesson.class];
            let subject = ctx.subjects[lesson.subject];
            let teacher = ctx.teachers[lesson.teacher];
            TimetableEntry {
                id: None,
                timetable_id: id.clone(),
                class_id: class.id.clone(),
                subject_id: subject.id.clone(),
                teacher_id: teacher.id.clone(),
                room_id: req.rooms[cand.room].id.clone(),
                time_slot_id: slot.id.clone(),
                day: slot.day,
                period_number: slot.period_number,
                is_fixed: false,
                subject_metadata: Some(SubjectMetadata::of(subject)),
                teacher_metadata: Some(TeacherMetadata::of(teacher)),
            }
        })
        .collect();
    entries.sort_by(|a, b| {
        (a.day, a.period_number, &a.class_id.0).cmp(&(b.day, b.period_number, &b.class_id.0))
    });
    for (i, e) in entries.iter_mut().enumerate() {
        e.id = Some(format!("{id}-e{i:03}"));
    }

    let filled: HashSet<(&str, DayOfWeek, u8)> = entries
        .iter()
        .map(|e| (e.class_id.0.as_str(), e.day, e.period_number))
        .collect();
    let mut unfilled = Vec::new();
    for class in &ctx.classes {
        for slot in &ctx.slots {
            if !filled.contains(&(class.id.0.as_str(), slot.day, slot.period_number)) {
                unfilled.push(UnfilledSlot {
                    class_id: class.id.clone(),
                    day: slot.day,
                    period: slot.period_number,
                    priority: types::SlotPriority::Medium,
                });
            }
        }
    }
    let cells = ctx.classes.len() * ctx.slots.len();
    let coverage = if cells == 0 {
        1.0
    } else {
        entries.len() as f64 / cells as f64
    };

    Timetable {
        id,
        school_id: req.school_id.clone(),
        academic_year_id: req.academic_year_id.clone(),
        name: None,
        status: TimetableStatus::Draft,
        metadata: TimetableMeta {
            coverage,
            unfilled_slots: unfilled,
        },
        entries,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tt_core::postvalidate::{validate_timetable, ValidationStatus};
    use types::RoomType;

    fn solve(req: &GenerateRequest, n: u32, seed: u64) -> EngineResult<CspOutcome> {
        CspSolver::default().solve(
            req,
            n,
            seed,
            &CancelFlag::new(),
            &Deadline::new(Duration::from_secs(60)),
        )
    }

    fn assert_invariants(tt: &Timetable, req: &GenerateRequest) {
        // Teacher singularity.
        let mut teacher_slots = HashSet::new();
        for e in &tt.entries {
            assert!(
                teacher_slots.insert((&e.teacher_id, e.day, e.period_number)),
                "teacher {} double-booked at {} period {}",
                e.teacher_id,
                e.day,
                e.period_number
            );
        }
        // Class slot singularity.
        let mut class_slots = HashSet::new();
        for e in &tt.entries {
            assert!(class_slots.insert((&e.class_id, e.day, e.period_number)));
        }
        // Teacher consistency.
        let mut pair_teacher: HashMap<(&str, &str), &str> = HashMap::new();
        for e in &tt.entries {
            let prev = pair_teacher
                .entry((e.class_id.0.as_str(), e.subject_id.0.as_str()))
                .or_insert(e.teacher_id.0.as_str());
            assert_eq!(*prev, e.teacher_id.0.as_str(), "teacher consistency broken");
        }
        // Subject demand.
        let mut counts: HashMap<(&str, &str), u32> = HashMap::new();
        for e in &tt.entries {
            *counts
                .entry((e.class_id.0.as_str(), e.subject_id.0.as_str()))
                .or_default() += 1;
        }
        for class in &req.classes {
            for subject in &req.subjects {
                let required = u32::from(req.periods_required(class, subject));
                let actual = counts
                    .get(&(class.id.0.as_str(), subject.id.0.as_str()))
                    .copied()
                    .unwrap_or(0);
                assert_eq!(actual, required, "demand for {}/{}", class.name, subject.name);
            }
        }
        // Teacher caps.
        let mut weekly: HashMap<&str, u32> = HashMap::new();
        let mut daily: HashMap<(&str, DayOfWeek), Vec<u8>> = HashMap::new();
        for e in &tt.entries {
            *weekly.entry(e.teacher_id.0.as_str()).or_default() += 1;
            daily
                .entry((e.teacher_id.0.as_str(), e.day))
                .or_default()
                .push(e.period_number);
        }
        for t in &req.teachers {
            assert!(weekly.get(t.id.0.as_str()).copied().unwrap_or(0)
                <= u32::from(t.max_periods_per_week));
            for day in DayOfWeek::ALL {
                if let Some(periods) = daily.get_mut(&(t.id.0.as_str(), day)) {
                    assert!(periods.len() as u32 <= u32::from(t.max_periods_per_day));
                    periods.sort_unstable();
                    let mut run = 1u8;
                    for w in periods.windows(2) {
                        run = if w[1] == w[0] + 1 { run + 1 } else { 1 };
                        assert!(run <= t.max_consecutive_periods);
                    }
                }
            }
        }
    }

    fn tiny_request() -> GenerateRequest {
        request(
            vec![class("c1", "10-A", 10, None)],
            vec![
                subject("s1", "Mathematics", "MATH", 3),
                subject("s2", "English", "ENG", 2),
            ],
            vec![
                teacher("t1", &["Mathematics"], 30),
                teacher("t2", &["English"], 30),
            ],
            slot_grid(5, 1),
            vec![room("r1", RoomType::Classroom)],
        )
    }

    #[test]
    fn tiny_feasible_covers_every_slot() {
        let req = tiny_request();
        let outcome = solve(&req, 1, 42).unwrap();
        assert_eq!(outcome.solutions.len(), 1);
        let tt = &outcome.solutions[0];

        assert_eq!(tt.entries.len(), 5);
        assert_eq!(tt.metadata.coverage, 1.0);
        assert!(tt.metadata.unfilled_slots.is_empty());
        assert_invariants(tt, &req);

        let math_entries: Vec<_> = tt.entries.iter().filter(|e| e.subject_id.0 == "s1").collect();
        let english_entries: Vec<_> =
            tt.entries.iter().filter(|e| e.subject_id.0 == "s2").collect();
        assert_eq!(math_entries.len(), 3);
        assert_eq!(english_entries.len(), 2);
        assert!(math_entries.iter().all(|e| e.teacher_id.0 == "t1"));
        assert!(english_entries.iter().all(|e| e.teacher_id.0 == "t2"));

        let report = validate_timetable(tt, &req);
        assert_eq!(report.status, ValidationStatus::Pass, "{:?}", report.critical_violations);
    }

    #[test]
    fn two_classes_keep_one_math_teacher_each() {
        let req = request(
            vec![class("c1", "10-A", 10, None), class("c2", "10-B", 10, None)],
            vec![subject("s1", "Mathematics", "MATH", 6)],
            vec![
                teacher("m1", &["Mathematics"], 30),
                teacher("m2", &["Mathematics"], 30),
            ],
            slot_grid(4, 5),
            vec![room("r1", RoomType::Classroom), room("r2", RoomType::Classroom)],
        );
        let outcome = solve(&req, 1, 7).unwrap();
        let tt = &outcome.solutions[0];
        assert_invariants(tt, &req);

        let teachers_of = |class: &str| -> BTreeSet<String> {
            tt.entries
                .iter()
                .filter(|e| e.class_id.0 == class)
                .map(|e| e.teacher_id.0.clone())
                .collect()
        };
        let a = teachers_of("c1");
        let b = teachers_of("c2");
        assert_eq!(a.len(), 1, "class 10-A must have a single Math teacher");
        assert_eq!(b.len(), 1, "class 10-B must have a single Math teacher");
        assert_ne!(a, b, "load balancing sends one teacher to each class");
    }

    #[test]
    fn lab_subject_lands_in_the_lab() {
        let mut sci = subject("s1", "Science", "SCI", 4);
        sci.requires_lab = true;
        let mut rooms = vec![room("lab1", RoomType::Lab)];
        for i in 0..5 {
            rooms.push(room(&format!("r{i}"), RoomType::Classroom));
        }
        let req = request(
            vec![class("c1", "10-A", 10, None)],
            vec![sci, subject("s2", "English", "ENG", 6)],
            vec![
                teacher("t1", &["Science"], 30),
                teacher("t2", &["English"], 30),
            ],
            slot_grid(5, 2),
            rooms,
        );
        let outcome = solve(&req, 1, 3).unwrap();
        let tt = &outcome.solutions[0];
        assert_invariants(tt, &req);

        let science: Vec<_> = tt.entries.iter().filter(|e| e.subject_id.0 == "s1").collect();
        assert_eq!(science.len(), 4);
        assert!(science.iter().all(|e| e.room_id.0 == "lab1"));

        let mut lab_slots = HashSet::new();
        for e in &science {
            assert!(lab_slots.insert((e.day, e.period_number)), "lab double-booked");
        }
    }

    #[test]
    fn home_rooms_host_every_non_lab_entry() {
        // Subject totals stay within the 5 weekly slots even with one
        // teacher carrying both classes.
        let req = request(
            vec![
                class("c1", "10-A", 10, Some("r1")),
                class("c2", "10-B", 10, Some("r2")),
            ],
            vec![
                subject("s1", "Mathematics", "MATH", 2),
                subject("s2", "English", "ENG", 2),
                subject("s3", "History", "HIS", 1),
            ],
            vec![
                teacher("t1", &["Mathematics"], 30),
                teacher("t2", &["English"], 30),
                teacher("t3", &["History"], 30),
            ],
            slot_grid(5, 1),
            vec![room("r1", RoomType::Classroom), room("r2", RoomType::Classroom)],
        );
        let outcome = solve(&req, 1, 11).unwrap();
        let tt = &outcome.solutions[0];
        assert_invariants(tt, &req);

        for e in &tt.entries {
            let expected = if e.class_id.0 == "c1" { "r1" } else { "r2" };
            assert_eq!(e.room_id.0, expected, "entry must use the class home room");
        }
        let report = validate_timetable(tt, &req);
        assert_eq!(report.status, ValidationStatus::Pass);
    }

    #[test]
    fn missing_home_room_fails_when_others_have_one() {
        let req = request(
            vec![
                class("c1", "10-A", 10, Some("r1")),
                class("c2", "10-B", 10, None),
            ],
            vec![subject("s1", "Mathematics", "MATH", 5)],
            vec![teacher("t1", &["Mathematics"], 30)],
            slot_grid(5, 1),
            vec![room("r1", RoomType::Classroom)],
        );
        let err = solve(&req, 1, 0).unwrap_err();
        assert!(matches!(err, EngineError::MissingHomeRoom { class } if class == "10-B"));
    }

    #[test]
    fn same_seed_reproduces_byte_identical_solutions() {
        let req = request(
            vec![class("c1", "10-A", 10, None), class("c2", "10-B", 9, None)],
            vec![
                subject("s1", "Mathematics", "MATH", 4),
                subject("s2", "English", "ENG", 4),
                subject("s3", "History", "HIS", 2),
            ],
            vec![
                teacher("t1", &["Mathematics"], 30),
                teacher("t2", &["English"], 30),
                teacher("t3", &["History"], 30),
            ],
            slot_grid(5, 2),
            vec![room("r1", RoomType::Classroom), room("r2", RoomType::Classroom)],
        );
        let a = solve(&req, 2, 99).unwrap();
        let b = solve(&req, 2, 99).unwrap();
        assert_eq!(
            serde_json::to_vec(&a.solutions).unwrap(),
            serde_json::to_vec(&b.solutions).unwrap()
        );
    }

    #[test]
    fn distinct_seeds_fill_the_requested_solution_count() {
        let req = request(
            vec![class("c1", "10-A", 10, None)],
            vec![
                subject("s1", "Mathematics", "MATH", 5),
                subject("s2", "English", "ENG", 5),
            ],
            vec![
                teacher("t1", &["Mathematics"], 30),
                teacher("t2", &["English"], 30),
            ],
            slot_grid(5, 2),
            vec![room("r1", RoomType::Classroom)],
        );
        let outcome = solve(&req, 3, 1).unwrap();
        assert!(!outcome.solutions.is_empty());
        let hashes: HashSet<u64> = outcome
            .solutions
            .iter()
            .map(structural_hash)
            .collect();
        assert_eq!(hashes.len(), outcome.solutions.len(), "solutions must be distinct");
        for tt in &outcome.solutions {
            assert_invariants(tt, &req);
        }
    }

    #[test]
    fn partial_demand_reports_unfilled_slots() {
        // 3 periods demanded against 5 active slots: 2 unfilled, coverage 0.6.
        let req = request(
            vec![class("c1", "10-A", 10, None)],
            vec![subject("s1", "Mathematics", "MATH", 3)],
            vec![teacher("t1", &["Mathematics"], 30)],
            slot_grid(5, 1),
            vec![room("r1", RoomType::Classroom)],
        );
        let outcome = solve(&req, 1, 5).unwrap();
        let tt = &outcome.solutions[0];
        assert_eq!(tt.entries.len(), 3);
        assert_eq!(tt.metadata.unfilled_slots.len(), 2);
        assert!((tt.metadata.coverage - 0.6).abs() < 1e-9);
    }

    #[test]
    fn impossible_grid_reports_conflicts_and_suggestions() {
        // Teacher capped at 2 periods/week cannot carry 5 periods.
        let req = request(
            vec![class("c1", "10-A", 10, None)],
            vec![subject("s1", "Mathematics", "MATH", 5)],
            vec![teacher("t1", &["Mathematics"], 2)],
            slot_grid(5, 1),
            vec![room("r1", RoomType::Classroom)],
        );
        let err = solve(&req, 1, 0).unwrap_err();
        match err {
            EngineError::InfeasibleConstraints { conflicts, suggestions } => {
                assert!(!conflicts.is_empty());
                assert!(suggestions.iter().any(|s| s.contains("Mathematics")));
            }
            other => panic!("expected InfeasibleConstraints, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_aborts_the_search() {
        let req = tiny_request();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = CspSolver::default()
            .solve(&req, 1, 0, &cancel, &Deadline::new(Duration::from_secs(60)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn entries_come_out_sorted_by_day_period_class() {
        let req = request(
            vec![class("c1", "10-A", 10, None), class("c2", "10-B", 10, None)],
            vec![subject("s1", "Mathematics", "MATH", 5)],
            vec![
                teacher("t1", &["Mathematics"], 30),
                teacher("t2", &["Mathematics"], 30),
            ],
            slot_grid(5, 1),
            vec![room("r1", RoomType::Classroom), room("r2", RoomType::Classroom)],
        );
        let outcome = solve(&req, 1, 13).unwrap();
        let entries = &outcome.solutions[0].entries;
        for w in entries.windows(2) {
            let a = (&w[0].day, w[0].period_number, &w[0].class_id.0);
            let b = (&w[1].day, w[1].period_number, &w[1].class_id.0);
            assert!(a <= b, "entries must be sorted by (day, period, class)");
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_request() -> impl Strategy<Value = GenerateRequest> {
            // Demand is kept under the grid size so every instance is
            // feasible by construction.
            (1usize..=3, 1usize..=3, 1u8..=3, 0u64..1000).prop_map(
                |(n_classes, n_subjects, periods, _salt)| {
                    let classes: Vec<_> = (0..n_classes)
                        .map(|i| class(&format!("c{i}"), &format!("10-{i}"), 10, None))
                        .collect();
                    let subjects: Vec<_> = (0..n_subjects)
                        .map(|i| {
                            subject(&format!("s{i}"), &format!("Subject {i}"), &format!("SUB{i}"), periods)
                        })
                        .collect();
                    let teachers: Vec<_> = (0..n_subjects)
                        .map(|i| teacher(&format!("t{i}"), &[&format!("Subject {i}")], 30))
                        .collect();
                    let rooms: Vec<_> = (0..n_classes)
                        .map(|i| room(&format!("r{i}"), RoomType::Classroom))
                        .collect();
                    request(classes, subjects, teachers, slot_grid(5, 4), rooms)
                },
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn solved_instances_satisfy_every_hard_invariant(
                req in arb_request(),
                seed in 0u64..5000,
            ) {
                let outcome = solve(&req, 1, seed).unwrap();
                for tt in &outcome.solutions {
                    assert_invariants(tt, &req);
                }
            }
        }
    }
}
