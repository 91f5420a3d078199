//! Genetic optimizer over CSP-feasible timetables. Individuals are whole
//! timetables; every operator either preserves the hard invariants or is
//! repaired/discarded, so the population never degrades below feasibility.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};
use tt_core::evaluation::{structural_hash, Evaluator};
use tt_core::{CancelFlag, Deadline, EngineResult, SolutionCache};
use types::{
    ClassId, DayOfWeek, GenerateRequest, OptimizationWeights, RoomId, RoomStrategy, RoomType,
    SubjectId, SubjectMetadata, TeacherId, Timetable, TimetableEntry,
};

#[derive(Clone, Debug)]
pub struct GaConfig {
    pub population_size: usize,
    pub generations: u32,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    pub tournament_size: usize,
    pub elitism_count: usize,
    /// Generations without improvement before the loop stops early.
    pub patience: u32,
    pub max_repair_ops: u32,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            generations: 40,
            crossover_rate: 0.7,
            mutation_rate: 0.15,
            tournament_size: 3,
            elitism_count: 2,
            patience: 8,
            max_repair_ops: 24,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GaOutcome {
    /// Final population, best first.
    pub population: Vec<Timetable>,
    pub generations_run: u32,
    pub warnings: Vec<String>,
}

/// Entity lookups needed to keep children honest, interned once per run.
/// Demand is ordered so repair walks pairs the same way on every run.
struct HardCtx {
    shared_rooms: HashSet<RoomId>,
    demand: BTreeMap<(ClassId, SubjectId), u32>,
    caps: HashMap<TeacherId, (u8, u32, u8)>,
    qualified: HashMap<TeacherId, HashSet<SubjectId>>,
    lab_subjects: HashSet<SubjectId>,
    subject_meta: HashMap<SubjectId, SubjectMetadata>,
    classes: Vec<ClassId>,
    /// Active grid cells with their slot ids, sorted by (day, period).
    slots: Vec<(DayOfWeek, u8, types::TimeSlotId)>,
}

impl HardCtx {
    fn build(req: &GenerateRequest) -> Self {
        let home_rooms: HashSet<&RoomId> = req
            .classes
            .iter()
            .filter_map(|c| c.home_room_id.as_ref())
            .collect();
        let shared_rooms = req
            .rooms
            .iter()
            .filter(|r| {
                req.room_strategy() == RoomStrategy::TrackAll
                    || r.room_type != RoomType::Classroom
                    || !home_rooms.contains(&r.id)
            })
            .map(|r| r.id.clone())
            .collect();

        let mut demand = BTreeMap::new();
        for class in &req.classes {
            for subject in &req.subjects {
                let needed = u32::from(req.periods_required(class, subject));
                if needed > 0 {
                    demand.insert((class.id.clone(), subject.id.clone()), needed);
                }
            }
        }

        let caps = req
            .teachers
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    (
                        t.max_periods_per_day,
                        u32::from(t.max_periods_per_week),
                        t.max_consecutive_periods,
                    ),
                )
            })
            .collect();
        let qualified = req
            .teachers
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    req.subjects
                        .iter()
                        .filter(|s| t.is_qualified_for(s))
                        .map(|s| s.id.clone())
                        .collect(),
                )
            })
            .collect();
        let lab_subjects = req
            .subjects
            .iter()
            .filter(|s| s.requires_lab)
            .map(|s| s.id.clone())
            .collect();
        let subject_meta = req
            .subjects
            .iter()
            .map(|s| (s.id.clone(), SubjectMetadata::of(s)))
            .collect();

        let classes = req.classes.iter().map(|c| c.id.clone()).collect();
        let mut slots: Vec<(DayOfWeek, u8, types::TimeSlotId)> = req
            .active_slots()
            .map(|s| (s.day, s.period_number, s.id.clone()))
            .collect();
        slots.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        Self {
            shared_rooms,
            demand,
            caps,
            qualified,
            lab_subjects,
            subject_meta,
            classes,
            slots,
        }
    }

    fn slot_id(&self, day: DayOfWeek, period: u8) -> Option<&types::TimeSlotId> {
        self.slots
            .iter()
            .find(|(d, p, _)| *d == day && *p == period)
            .map(|(_, _, id)| id)
    }
}

/// Recompute coverage and the unfilled-slot list from the entries. Needed
/// after crossover, which mixes day slices of two parents.
fn recompute_meta(tt: &mut Timetable, ctx: &HardCtx) {
    let filled: HashSet<(&ClassId, DayOfWeek, u8)> = tt
        .entries
        .iter()
        .map(|e| (&e.class_id, e.day, e.period_number))
        .collect();
    let mut unfilled = Vec::new();
    for class in &ctx.classes {
        for (day, period, _) in &ctx.slots {
            if !filled.contains(&(class, *day, *period)) {
                unfilled.push(types::UnfilledSlot {
                    class_id: class.clone(),
                    day: *day,
                    period: *period,
                    priority: types::SlotPriority::Medium,
                });
            }
        }
    }
    let cells = ctx.classes.len() * ctx.slots.len();
    tt.metadata.coverage = if cells == 0 {
        1.0
    } else {
        tt.entries.len() as f64 / cells as f64
    };
    tt.metadata.unfilled_slots = unfilled;
}

fn count_conflicts(tt: &Timetable, ctx: &HardCtx) -> usize {
    let mut teacher_slots: HashMap<(&TeacherId, DayOfWeek, u8), usize> = HashMap::new();
    let mut class_slots: HashMap<(&ClassId, DayOfWeek, u8), usize> = HashMap::new();
    let mut room_slots: HashMap<(&RoomId, DayOfWeek, u8), usize> = HashMap::new();
    for e in &tt.entries {
        *teacher_slots
            .entry((&e.teacher_id, e.day, e.period_number))
            .or_default() += 1;
        *class_slots
            .entry((&e.class_id, e.day, e.period_number))
            .or_default() += 1;
        if ctx.shared_rooms.contains(&e.room_id) {
            *room_slots
                .entry((&e.room_id, e.day, e.period_number))
                .or_default() += 1;
        }
    }
    fn overbooked<K>(m: HashMap<K, usize>) -> usize {
        m.into_values().filter(|n| *n > 1).map(|n| n - 1).sum()
    }
    overbooked(teacher_slots) + overbooked(class_slots) + overbooked(room_slots)
}

fn violates_caps(tt: &Timetable, ctx: &HardCtx) -> bool {
    let mut weekly: HashMap<&TeacherId, u32> = HashMap::new();
    let mut daily: HashMap<(&TeacherId, DayOfWeek), Vec<u8>> = HashMap::new();
    for e in &tt.entries {
        *weekly.entry(&e.teacher_id).or_default() += 1;
        daily
            .entry((&e.teacher_id, e.day))
            .or_default()
            .push(e.period_number);
    }
    for (teacher, week) in &weekly {
        let Some((_, max_week, _)) = ctx.caps.get(*teacher) else {
            continue;
        };
        if week > max_week {
            return true;
        }
    }
    for ((teacher, _), periods) in daily.iter_mut() {
        let Some((max_day, _, max_consecutive)) = ctx.caps.get(*teacher) else {
            continue;
        };
        if periods.len() as u32 > u32::from(*max_day) {
            return true;
        }
        periods.sort_unstable();
        let mut run = 1u8;
        for w in periods.windows(2) {
            run = if w[1] == w[0] + 1 { run + 1 } else { 1 };
            if run > *max_consecutive {
                return true;
            }
        }
    }
    false
}

fn violates_demand_or_consistency(tt: &Timetable, ctx: &HardCtx) -> bool {
    let mut counts: HashMap<(&ClassId, &SubjectId), u32> = HashMap::new();
    let mut pair_teachers: HashMap<(&ClassId, &SubjectId), &TeacherId> = HashMap::new();
    for e in &tt.entries {
        *counts.entry((&e.class_id, &e.subject_id)).or_default() += 1;
        match pair_teachers.entry((&e.class_id, &e.subject_id)) {
            std::collections::hash_map::Entry::Occupied(t) => {
                if *t.get() != &e.teacher_id {
                    return true;
                }
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(&e.teacher_id);
            }
        }
    }
    for ((class, subject), required) in &ctx.demand {
        if counts.get(&(class, subject)).copied().unwrap_or(0) != *required {
            return true;
        }
    }
    counts.len() != ctx.demand.len()
}

fn is_feasible(tt: &Timetable, ctx: &HardCtx) -> bool {
    count_conflicts(tt, ctx) == 0
        && !violates_caps(tt, ctx)
        && !violates_demand_or_consistency(tt, ctx)
}

fn sort_entries(tt: &mut Timetable) {
    tt.entries.sort_by(|a, b| {
        (a.day, a.period_number, &a.class_id.0).cmp(&(b.day, b.period_number, &b.class_id.0))
    });
}

pub struct GaOptimizer {
    config: GaConfig,
}

impl GaOptimizer {
    pub fn new(config: GaConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(GaConfig::default())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn evolve(
        &self,
        base: Vec<Timetable>,
        req: &GenerateRequest,
        weights: &OptimizationWeights,
        seed: u64,
        cancel: &CancelFlag,
        deadline: &Deadline,
        cache: Option<&dyn SolutionCache>,
        session_id: &str,
    ) -> EngineResult<GaOutcome> {
        if base.is_empty() {
            return Ok(GaOutcome {
                population: base,
                generations_run: 0,
                warnings: Vec::new(),
            });
        }

        let ctx = HardCtx::build(req);
        let evaluator = Evaluator::from_weights(weights);
        let mut fitness_cache: HashMap<u64, f64> = HashMap::new();
        let mut fitness = |tt: &Timetable, cache: &mut HashMap<u64, f64>| -> f64 {
            let key = structural_hash(tt);
            *cache
                .entry(key)
                .or_insert_with(|| evaluator.evaluate(tt).total_score)
        };

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut warnings = Vec::new();

        // Seed the population by cycling the base solutions.
        let mut population: Vec<Timetable> = (0..self.config.population_size.max(base.len()))
            .map(|i| base[i % base.len()].clone())
            .collect();

        let mut best_fitness = f64::NEG_INFINITY;
        let mut stagnant = 0u32;
        let mut generations_run = 0u32;

        for generation in 0..self.config.generations {
            cancel.check()?;
            if deadline.expired() {
                warnings.push(format!(
                    "optimization stopped at generation {generation} after its time budget; returning best found"
                ));
                break;
            }
            generations_run = generation + 1;

            population.sort_by(|a, b| {
                fitness(b, &mut fitness_cache).total_cmp(&fitness(a, &mut fitness_cache))
            });

            let generation_best = fitness(&population[0], &mut fitness_cache);
            if generation_best > best_fitness + f64::EPSILON {
                best_fitness = generation_best;
                stagnant = 0;
                if let Some(store) = cache {
                    store.store(session_id, generation, generation_best, &population[0]);
                }
            } else {
                stagnant += 1;
                if stagnant >= self.config.patience {
                    debug!(generation, "fitness stagnated, stopping early");
                    break;
                }
            }

            let mut next: Vec<Timetable> = population
                .iter()
                .take(self.config.elitism_count.min(population.len()))
                .cloned()
                .collect();

            while next.len() < population.len() {
                let parent_a = self.tournament(&population, &mut fitness_cache, &mut fitness, &mut rng);
                let mut child = if rng.gen_bool(self.config.crossover_rate) {
                    let parent_b =
                        self.tournament(&population, &mut fitness_cache, &mut fitness, &mut rng);
                    self.crossover(&population[parent_a], &population[parent_b], &ctx, &mut rng)
                        .unwrap_or_else(|| population[parent_a].clone())
                } else {
                    population[parent_a].clone()
                };
                if rng.gen_bool(self.config.mutation_rate) {
                    self.mutate(&mut child, &ctx, &mut rng);
                }
                next.push(child);
            }
            population = next;
        }

        population.sort_by(|a, b| {
            fitness(b, &mut fitness_cache).total_cmp(&fitness(a, &mut fitness_cache))
        });
        info!(
            generations = generations_run,
            best = fitness(&population[0], &mut fitness_cache),
            "ga evolution done"
        );
        Ok(GaOutcome {
            population,
            generations_run,
            warnings,
        })
    }

    fn tournament(
        &self,
        population: &[Timetable],
        cache: &mut HashMap<u64, f64>,
        fitness: &mut impl FnMut(&Timetable, &mut HashMap<u64, f64>) -> f64,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let k = self.config.tournament_size.min(population.len()).max(2);
        let mut best: Option<(usize, f64)> = None;
        for _ in 0..k {
            let i = rng.gen_range(0..population.len());
            let f = fitness(&population[i], cache);
            if best.map_or(true, |(_, bf)| f > bf) {
                best = Some((i, f));
            }
        }
        best.expect("population is non-empty").0
    }

    /// Day-slice crossover: the child takes whole days from parent A and the
    /// rest from parent B, then gets repaired. On repair failure the caller
    /// falls back to parent A.
    fn crossover(
        &self,
        a: &Timetable,
        b: &Timetable,
        ctx: &HardCtx,
        rng: &mut ChaCha8Rng,
    ) -> Option<Timetable> {
        let mut days: Vec<DayOfWeek> = a.entries.iter().map(|e| e.day).collect();
        days.sort_unstable();
        days.dedup();
        if days.len() < 2 {
            return None;
        }
        // Non-empty proper subset of the scheduled days.
        let take = rng.gen_range(1..days.len());
        days.shuffle(rng);
        let slice: HashSet<DayOfWeek> = days.into_iter().take(take).collect();

        let mut child = a.clone();
        child.entries = a
            .entries
            .iter()
            .filter(|e| slice.contains(&e.day))
            .chain(b.entries.iter().filter(|e| !slice.contains(&e.day)))
            .cloned()
            .collect();

        self.repair(&mut child, ctx, a, rng).then(|| {
            recompute_meta(&mut child, ctx);
            sort_entries(&mut child);
            child
        })
    }

    /// Restore demand counts and clear collisions introduced by crossover.
    /// Bounded by `max_repair_ops`; returns false when the child should be
    /// discarded.
    fn repair(
        &self,
        child: &mut Timetable,
        ctx: &HardCtx,
        parent: &Timetable,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let mut ops = 0u32;

        // Pair bindings: child first, parent as fallback for pairs the slice
        // dropped entirely.
        let mut binding: HashMap<(ClassId, SubjectId), TeacherId> = HashMap::new();
        for e in parent.entries.iter().chain(child.entries.iter()) {
            binding
                .entry((e.class_id.clone(), e.subject_id.clone()))
                .or_insert_with(|| e.teacher_id.clone());
        }

        // Demand rebalance: rewrite surplus entries into deficit subjects of
        // the same class. Lab subjects pin their room and are not rewritten.
        let mut counts: HashMap<(ClassId, SubjectId), u32> = HashMap::new();
        for e in &child.entries {
            *counts
                .entry((e.class_id.clone(), e.subject_id.clone()))
                .or_default() += 1;
        }
        let mut deficits: Vec<(ClassId, SubjectId)> = Vec::new();
        for ((class, subject), required) in &ctx.demand {
            let have = counts
                .get(&(class.clone(), subject.clone()))
                .copied()
                .unwrap_or(0);
            for _ in have..*required {
                if ctx.lab_subjects.contains(subject) {
                    return false;
                }
                deficits.push((class.clone(), subject.clone()));
            }
        }

        if !deficits.is_empty() {
            let mut surplus_left = counts;
            for e in child.entries.iter_mut() {
                let key = (e.class_id.clone(), e.subject_id.clone());
                let required = ctx.demand.get(&key).copied().unwrap_or(0);
                let have = surplus_left.get(&key).copied().unwrap_or(0);
                if have <= required {
                    continue;
                }
                let Some(pos) = deficits.iter().position(|(c, _)| c == &e.class_id) else {
                    continue;
                };
                if ctx.lab_subjects.contains(&e.subject_id) {
                    return false;
                }
                let (_, subject) = deficits.swap_remove(pos);
                *surplus_left.get_mut(&key).unwrap() -= 1;
                let teacher = binding
                    .get(&(e.class_id.clone(), subject.clone()))
                    .cloned()
                    .unwrap_or_else(|| e.teacher_id.clone());
                e.subject_id = subject.clone();
                e.teacher_id = teacher;
                e.subject_metadata = ctx.subject_meta.get(&subject).cloned();
                ops += 1;
                if ops > self.config.max_repair_ops {
                    return false;
                }
            }
            if !deficits.is_empty() {
                return false;
            }
        }

        // Collision descent: swap a conflicting entry's slot with another
        // entry of the same class while the conflict count drops.
        let mut conflicts = count_conflicts(child, ctx);
        while conflicts > 0 && ops < self.config.max_repair_ops {
            ops += 1;
            let mut improved = false;
            let len = child.entries.len();
            let start = rng.gen_range(0..len);
            'outer: for off_i in 0..len {
                let i = (start + off_i) % len;
                for j in 0..len {
                    if i == j || child.entries[i].class_id != child.entries[j].class_id {
                        continue;
                    }
                    swap_slots(&mut child.entries, i, j);
                    let after = count_conflicts(child, ctx);
                    if after < conflicts {
                        conflicts = after;
                        improved = true;
                        break 'outer;
                    }
                    swap_slots(&mut child.entries, i, j);
                }
            }
            if !improved {
                return false;
            }
        }

        conflicts == 0 && !violates_caps(child, ctx) && !violates_demand_or_consistency(child, ctx)
    }

    fn mutate(&self, individual: &mut Timetable, ctx: &HardCtx, rng: &mut ChaCha8Rng) {
        for _ in 0..8 {
            let op = rng.gen_range(0..3u8);
            let applied = match op {
                0 => self.mutate_swap_slots(individual, ctx, rng),
                1 => self.mutate_swap_teachers(individual, ctx, rng),
                _ => self.mutate_move_entry(individual, ctx, rng),
            };
            if applied {
                sort_entries(individual);
                return;
            }
        }
    }

    /// Swap the time-slots of two entries of one class, same day or across
    /// days.
    fn mutate_swap_slots(
        &self,
        individual: &mut Timetable,
        ctx: &HardCtx,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let len = individual.entries.len();
        if len < 2 {
            return false;
        }
        let i = rng.gen_range(0..len);
        let class = individual.entries[i].class_id.clone();
        let partners: Vec<usize> = (0..len)
            .filter(|&j| j != i && individual.entries[j].class_id == class)
            .collect();
        let Some(&j) = partners.as_slice().choose(rng) else {
            return false;
        };
        swap_slots(&mut individual.entries, i, j);
        if is_feasible(individual, ctx) {
            true
        } else {
            swap_slots(&mut individual.entries, i, j);
            false
        }
    }

    /// Exchange the teacher bindings of two whole (class, subject) pairs.
    /// Single entries never move between teachers, so consistency survives.
    fn mutate_swap_teachers(
        &self,
        individual: &mut Timetable,
        ctx: &HardCtx,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        let mut pairs: Vec<(ClassId, SubjectId, TeacherId)> = Vec::new();
        let mut seen = HashSet::new();
        for e in &individual.entries {
            if seen.insert((e.class_id.clone(), e.subject_id.clone())) {
                pairs.push((e.class_id.clone(), e.subject_id.clone(), e.teacher_id.clone()));
            }
        }
        if pairs.len() < 2 {
            return false;
        }
        pairs.shuffle(rng);
        let (c1, s1, t1) = pairs[0].clone();
        let Some((c2, s2, t2)) = pairs[1..]
            .iter()
            .find(|(_, s2, t2)| {
                *t2 != t1
                    && ctx.qualified.get(&t1).is_some_and(|q| q.contains(s2))
                    && ctx.qualified.get(t2).is_some_and(|q| q.contains(&s1))
            })
            .cloned()
        else {
            return false;
        };

        for e in individual.entries.iter_mut() {
            if e.class_id == c1 && e.subject_id == s1 {
                e.teacher_id = t2.clone();
            } else if e.class_id == c2 && e.subject_id == s2 {
                e.teacher_id = t1.clone();
            }
        }
        if is_feasible(individual, ctx) {
            true
        } else {
            for e in individual.entries.iter_mut() {
                if e.class_id == c1 && e.subject_id == s1 {
                    e.teacher_id = t1.clone();
                } else if e.class_id == c2 && e.subject_id == s2 {
                    e.teacher_id = t2.clone();
                }
            }
            false
        }
    }

    /// Move one entry into a slot its class leaves free. Only applies to
    /// partial-coverage timetables; with full coverage there is no free slot.
    fn mutate_move_entry(
        &self,
        individual: &mut Timetable,
        ctx: &HardCtx,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        if individual.metadata.unfilled_slots.is_empty() {
            return false;
        }
        let len = individual.entries.len();
        if len == 0 {
            return false;
        }
        let i = rng.gen_range(0..len);
        let class = individual.entries[i].class_id.clone();
        let mut free: Vec<&types::UnfilledSlot> = individual
            .metadata
            .unfilled_slots
            .iter()
            .filter(|s| s.class_id == class)
            .collect();
        free.shuffle(rng);
        let Some(slot) = free.first() else {
            return false;
        };
        let (old_day, old_period) = (
            individual.entries[i].day,
            individual.entries[i].period_number,
        );
        let (new_day, new_period) = (slot.day, slot.period);
        let Some(new_slot_id) = ctx.slot_id(new_day, new_period).cloned() else {
            return false;
        };
        let old_slot_id = individual.entries[i].time_slot_id.clone();

        let entry = &mut individual.entries[i];
        entry.day = new_day;
        entry.period_number = new_period;
        entry.time_slot_id = new_slot_id;
        if is_feasible(individual, ctx) {
            // The vacated slot becomes unfilled, the target slot is now used.
            let meta = &mut individual.metadata;
            if let Some(s) = meta
                .unfilled_slots
                .iter_mut()
                .find(|s| s.class_id == class && s.day == new_day && s.period == new_period)
            {
                s.day = old_day;
                s.period = old_period;
            }
            true
        } else {
            let entry = &mut individual.entries[i];
            entry.day = old_day;
            entry.period_number = old_period;
            entry.time_slot_id = old_slot_id;
            false
        }
    }
}

fn swap_slots(entries: &mut [TimetableEntry], i: usize, j: usize) {
    let (day_i, period_i) = (entries[i].day, entries[i].period_number);
    let (day_j, period_j) = (entries[j].day, entries[j].period_number);
    entries[i].day = day_j;
    entries[i].period_number = period_j;
    entries[j].day = day_i;
    entries[j].period_number = period_i;
    let slot_i = entries[i].time_slot_id.clone();
    entries[i].time_slot_id = entries[j].time_slot_id.clone();
    entries[j].time_slot_id = slot_i;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tt_core::evaluation::PenaltyKind;
    use types::{
        AcademicYearId, Class, RoomType, SchoolId, Subject, Teacher, TeacherMetadata, TimeSlot,
        TimeSlotId, TimetableId, TimetableMeta, TimetableStatus,
    };

    fn subject(id: &str, name: &str, periods: u8, prefer_morning: bool) -> Subject {
        Subject {
            id: SubjectId(id.into()),
            school_id: SchoolId("sch".into()),
            name: name.into(),
            code: name.to_uppercase(),
            periods_per_week: periods,
            requires_lab: false,
            is_elective: false,
            prefer_morning,
            preferred_periods: None,
            avoid_periods: None,
        }
    }

    fn teacher(id: &str, subjects: &[&str]) -> Teacher {
        Teacher {
            id: TeacherId(id.into()),
            user_id: format!("user-{id}"),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            max_periods_per_day: 6,
            max_periods_per_week: 30,
            max_consecutive_periods: 3,
            availability: None,
        }
    }

    fn class(id: &str, name: &str) -> Class {
        Class {
            id: ClassId(id.into()),
            school_id: SchoolId("sch".into()),
            name: name.into(),
            grade: 10,
            section: "A".into(),
            student_count: Some(30),
            home_room_id: None,
        }
    }

    fn room(id: &str) -> types::Room {
        types::Room {
            id: RoomId(id.into()),
            school_id: SchoolId("sch".into()),
            name: id.to_uppercase(),
            room_type: RoomType::Classroom,
            capacity: 40,
            facilities: Vec::new(),
        }
    }

    /// 5 days, one morning period (1) and one afternoon period (5) each.
    fn split_day_slots() -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        for (di, day) in DayOfWeek::ALL.iter().take(5).enumerate() {
            for p in [1u8, 5u8] {
                slots.push(TimeSlot {
                    id: TimeSlotId(format!("ts-{di}-{p}")),
                    school_id: None,
                    day: *day,
                    period_number: p,
                    start_time: format!("{:02}:00", 8 + p),
                    end_time: format!("{:02}:45", 8 + p),
                    is_break: false,
                });
            }
        }
        slots
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            school_id: SchoolId("sch".into()),
            academic_year_id: AcademicYearId("ay".into()),
            classes: vec![class("c1", "10-A")],
            subjects: vec![
                subject("math", "Mathematics", 5, true),
                subject("art", "Art", 5, false),
            ],
            teachers: vec![
                teacher("tm", &["Mathematics", "Art"]),
                teacher("ta", &["Art", "Mathematics"]),
            ],
            time_slots: split_day_slots(),
            rooms: vec![room("r1")],
            constraints: Vec::new(),
            subject_requirements: Vec::new(),
            weights: None,
            num_solutions: 1,
            timeout_seconds: 60,
            enforce_teacher_consistency: true,
        }
    }

    /// Pessimal but valid base: Mathematics (morning-preferring) sits in the
    /// afternoon slot of every day.
    fn pessimal_base(req: &GenerateRequest) -> Timetable {
        let id = TimetableId("base".into());
        let mut entries = Vec::new();
        for (di, day) in DayOfWeek::ALL.iter().take(5).enumerate() {
            for (subj, teach, period) in [("math", "tm", 5u8), ("art", "ta", 1u8)] {
                let subject = req.subjects.iter().find(|s| s.id.0 == subj).unwrap();
                entries.push(TimetableEntry {
                    id: None,
                    timetable_id: id.clone(),
                    class_id: ClassId("c1".into()),
                    subject_id: SubjectId(subj.into()),
                    teacher_id: TeacherId(teach.into()),
                    room_id: RoomId("r1".into()),
                    time_slot_id: TimeSlotId(format!("ts-{di}-{period}")),
                    day: *day,
                    period_number: period,
                    is_fixed: false,
                    subject_metadata: Some(SubjectMetadata::of(subject)),
                    teacher_metadata: Some(TeacherMetadata {
                        max_consecutive_periods: 3,
                    }),
                });
            }
        }
        Timetable {
            id,
            school_id: SchoolId("sch".into()),
            academic_year_id: AcademicYearId("ay".into()),
            name: None,
            status: TimetableStatus::Draft,
            metadata: TimetableMeta::default(),
            entries,
        }
    }

    fn preference_weights() -> OptimizationWeights {
        OptimizationWeights {
            workload_balance: 0.0,
            gap_minimization: 0.0,
            consecutive_periods: 0.0,
            time_preferences: 25.0,
            ..OptimizationWeights::default()
        }
    }

    fn evolve(config: GaConfig, base: Vec<Timetable>, req: &GenerateRequest) -> GaOutcome {
        GaOptimizer::new(config)
            .evolve(
                base,
                req,
                &preference_weights(),
                17,
                &CancelFlag::new(),
                &Deadline::new(Duration::from_secs(60)),
                None,
                "test-session",
            )
            .unwrap()
    }

    #[test]
    fn evolution_never_worsens_the_targeted_penalty() {
        let req = request();
        let base = pessimal_base(&req);
        let evaluator = Evaluator::from_weights(&preference_weights());
        let initial = evaluator.evaluate(&base);
        assert_eq!(initial.raw_penalty(PenaltyKind::TimePreferences), 5.0);

        let config = GaConfig {
            generations: 20,
            mutation_rate: 1.0,
            patience: 20,
            ..GaConfig::default()
        };
        let outcome = evolve(config, vec![base.clone()], &req);
        let best = &outcome.population[0];
        let final_eval = evaluator.evaluate(best);
        assert!(
            final_eval.raw_penalty(PenaltyKind::TimePreferences)
                <= initial.raw_penalty(PenaltyKind::TimePreferences)
        );
        assert!(final_eval.total_score >= initial.total_score);

        let ctx = HardCtx::build(&req);
        assert!(is_feasible(best, &ctx), "hard invariants must survive evolution");
    }

    #[test]
    fn evolution_actually_improves_a_pessimal_seed() {
        // Swapping any math entry into the morning is reachable by a single
        // same-class slot swap, so 20 generations of forced mutation find it.
        let req = request();
        let base = pessimal_base(&req);
        let evaluator = Evaluator::from_weights(&preference_weights());
        let initial = evaluator.evaluate(&base).total_score;

        let config = GaConfig {
            generations: 20,
            mutation_rate: 1.0,
            patience: 20,
            ..GaConfig::default()
        };
        let outcome = evolve(config, vec![base], &req);
        let best_score = evaluator.evaluate(&outcome.population[0]).total_score;
        assert!(
            best_score > initial,
            "expected improvement over {initial}, got {best_score}"
        );
    }

    #[test]
    fn same_seed_same_result() {
        let req = request();
        let base = pessimal_base(&req);
        let config = GaConfig {
            generations: 10,
            ..GaConfig::default()
        };
        let a = evolve(config.clone(), vec![base.clone()], &req);
        let b = evolve(config, vec![base], &req);
        assert_eq!(
            serde_json::to_vec(&a.population[0]).unwrap(),
            serde_json::to_vec(&b.population[0]).unwrap()
        );
    }

    #[test]
    fn crossover_child_or_parent_is_always_feasible() {
        let req = request();
        let ctx = HardCtx::build(&req);
        let a = pessimal_base(&req);

        // A second parent with the mornings flipped on two days.
        let mut b = a.clone();
        b.id = TimetableId("alt".into());
        let idx: Vec<usize> = (0..b.entries.len()).collect();
        for pair in idx.chunks(2).take(2) {
            swap_slots(&mut b.entries, pair[0], pair[1]);
        }
        sort_entries(&mut b);
        assert!(is_feasible(&b, &ctx));

        let optimizer = GaOptimizer::with_defaults();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            if let Some(child) = optimizer.crossover(&a, &b, &ctx, &mut rng) {
                assert!(is_feasible(&child, &ctx), "repaired child must be feasible");
            }
        }
    }

    #[test]
    fn teacher_swap_keeps_pairs_whole() {
        let req = request();
        let ctx = HardCtx::build(&req);
        let mut tt = pessimal_base(&req);
        let optimizer = GaOptimizer::with_defaults();
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        let mut swapped = false;
        for _ in 0..50 {
            if optimizer.mutate_swap_teachers(&mut tt, &ctx, &mut rng) {
                swapped = true;
                break;
            }
        }
        assert!(swapped, "both teachers are cross-qualified, a swap must apply");

        let mut pair_teachers: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for e in &tt.entries {
            pair_teachers
                .entry((e.class_id.0.clone(), e.subject_id.0.clone()))
                .or_default()
                .insert(e.teacher_id.0.clone());
        }
        assert!(pair_teachers.values().all(|set| set.len() == 1));
    }

    #[test]
    fn move_entry_only_applies_to_partial_coverage() {
        let req = request();
        let ctx = HardCtx::build(&req);
        let mut tt = pessimal_base(&req);
        let optimizer = GaOptimizer::with_defaults();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(!optimizer.mutate_move_entry(&mut tt, &ctx, &mut rng));
    }

    #[test]
    fn empty_base_returns_empty_outcome() {
        let req = request();
        let outcome = evolve(GaConfig::default(), Vec::new(), &req);
        assert!(outcome.population.is_empty());
        assert_eq!(outcome.generations_run, 0);
    }
}
