//! Mandatory-criteria verification of a produced timetable. Every critical
//! violation cites the concrete class, subject, teacher, or slot involved.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use types::{
    ClassId, DayOfWeek, GenerateRequest, RoomId, RoomType, RoomStrategy, SubjectId, TeacherId,
    Timetable,
};

pub const CHECK_COVERAGE: &str = "coverage";
pub const CHECK_TEACHER_CONFLICTS: &str = "teacher_conflicts";
pub const CHECK_SHARED_ROOM_CONFLICTS: &str = "shared_room_conflicts";
pub const CHECK_TEACHER_CONSISTENCY: &str = "teacher_consistency";
pub const CHECK_HOME_ROOM_USAGE: &str = "home_room_usage";
pub const CHECK_LAB_PLACEMENT: &str = "lab_placement";
pub const CHECK_SUBJECT_DEMAND: &str = "subject_demand";
pub const CHECK_TEACHER_CAPS: &str = "teacher_caps";

#[derive(Clone, Copy, Debug, Serialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pass,
    Fail,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub critical: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub status: ValidationStatus,
    pub checks: BTreeMap<&'static str, CheckResult>,
    pub critical_violations: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

struct ReportBuilder {
    checks: BTreeMap<&'static str, CheckResult>,
    critical_violations: Vec<String>,
    warnings: Vec<String>,
    suggestions: Vec<String>,
}

impl ReportBuilder {
    fn new() -> Self {
        Self {
            checks: BTreeMap::new(),
            critical_violations: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    fn record(&mut self, name: &'static str, critical: bool, violations: Vec<String>) {
        let passed = violations.is_empty();
        self.checks.insert(name, CheckResult { passed, critical });
        if critical {
            self.critical_violations.extend(violations);
        } else {
            self.warnings.extend(violations);
        }
    }

    fn finish(self) -> ValidationReport {
        let is_valid = self
            .checks
            .iter()
            .all(|(_, c)| c.passed || !c.critical);
        ValidationReport {
            is_valid,
            status: if is_valid {
                ValidationStatus::Pass
            } else {
                ValidationStatus::Fail
            },
            checks: self.checks,
            critical_violations: self.critical_violations,
            warnings: self.warnings,
            suggestions: self.suggestions,
        }
    }
}

pub fn validate_timetable(timetable: &Timetable, req: &GenerateRequest) -> ValidationReport {
    let mut report = ReportBuilder::new();
    let strategy = req.room_strategy();

    report.record(CHECK_COVERAGE, true, check_coverage(timetable, req));
    report.record(
        CHECK_TEACHER_CONFLICTS,
        true,
        check_teacher_conflicts(timetable),
    );
    report.record(
        CHECK_SHARED_ROOM_CONFLICTS,
        true,
        check_shared_room_conflicts(timetable, req, strategy),
    );
    report.record(
        CHECK_TEACHER_CONSISTENCY,
        true,
        check_teacher_consistency(timetable),
    );
    report.record(
        CHECK_HOME_ROOM_USAGE,
        strategy == RoomStrategy::HomeRooms,
        check_home_room_usage(timetable, req, strategy),
    );
    report.record(CHECK_LAB_PLACEMENT, true, check_lab_placement(timetable, req));
    report.record(CHECK_SUBJECT_DEMAND, true, check_subject_demand(timetable, req));

    let (cap_warnings, cap_criticals) = check_teacher_caps(timetable, req);
    let caps_critical = !cap_criticals.is_empty();
    report.record(
        CHECK_TEACHER_CAPS,
        caps_critical,
        if caps_critical { cap_criticals } else { cap_warnings },
    );

    if !report.critical_violations.is_empty() {
        report
            .suggestions
            .push("Regenerate after addressing the cited conflicts".to_string());
    }

    report.finish()
}

fn class_name<'a>(req: &'a GenerateRequest, id: &'a ClassId) -> &'a str {
    req.classes
        .iter()
        .find(|c| &c.id == id)
        .map(|c| c.name.as_str())
        .unwrap_or(id.0.as_str())
}

fn subject_name<'a>(req: &'a GenerateRequest, id: &'a SubjectId) -> &'a str {
    req.subjects
        .iter()
        .find(|s| &s.id == id)
        .map(|s| s.name.as_str())
        .unwrap_or(id.0.as_str())
}

fn check_coverage(timetable: &Timetable, req: &GenerateRequest) -> Vec<String> {
    let mut violations = Vec::new();
    let mut filled: HashMap<(&ClassId, DayOfWeek, u8), u32> = HashMap::new();
    for e in &timetable.entries {
        *filled
            .entry((&e.class_id, e.day, e.period_number))
            .or_default() += 1;
    }
    for class in &req.classes {
        for slot in req.active_slots() {
            match filled
                .get(&(&class.id, slot.day, slot.period_number))
                .copied()
                .unwrap_or(0)
            {
                0 => violations.push(format!(
                    "class {} has no entry at {} period {}",
                    class.name, slot.day, slot.period_number
                )),
                1 => {}
                n => violations.push(format!(
                    "class {} has {n} entries at {} period {}",
                    class.name, slot.day, slot.period_number
                )),
            }
        }
    }
    violations
}

fn check_teacher_conflicts(timetable: &Timetable) -> Vec<String> {
    let mut seen: HashMap<(&TeacherId, DayOfWeek, u8), u32> = HashMap::new();
    for e in &timetable.entries {
        *seen
            .entry((&e.teacher_id, e.day, e.period_number))
            .or_default() += 1;
    }
    let mut violations: Vec<String> = seen
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|((teacher, day, period), n)| {
            format!("teacher {teacher} is booked {n} times at {day} period {period}")
        })
        .collect();
    violations.sort();
    violations
}

/// Shared rooms are everything that is not some class's home classroom.
fn shared_room_ids<'a>(req: &'a GenerateRequest, strategy: RoomStrategy) -> HashSet<&'a RoomId> {
    let home_rooms: HashSet<&RoomId> = req
        .classes
        .iter()
        .filter_map(|c| c.home_room_id.as_ref())
        .collect();
    req.rooms
        .iter()
        .filter(|r| {
            strategy == RoomStrategy::TrackAll
                || r.room_type != RoomType::Classroom
                || !home_rooms.contains(&r.id)
        })
        .map(|r| &r.id)
        .collect()
}

fn check_shared_room_conflicts(
    timetable: &Timetable,
    req: &GenerateRequest,
    strategy: RoomStrategy,
) -> Vec<String> {
    let shared = shared_room_ids(req, strategy);
    let mut seen: HashMap<(&RoomId, DayOfWeek, u8), u32> = HashMap::new();
    for e in &timetable.entries {
        if shared.contains(&e.room_id) {
            *seen.entry((&e.room_id, e.day, e.period_number)).or_default() += 1;
        }
    }
    let mut violations: Vec<String> = seen
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|((room, day, period), n)| {
            format!("room {room} hosts {n} classes at {day} period {period}")
        })
        .collect();
    violations.sort();
    violations
}

fn check_teacher_consistency(timetable: &Timetable) -> Vec<String> {
    let mut teachers: HashMap<(&ClassId, &SubjectId), HashSet<&TeacherId>> = HashMap::new();
    for e in &timetable.entries {
        teachers
            .entry((&e.class_id, &e.subject_id))
            .or_default()
            .insert(&e.teacher_id);
    }
    let mut violations: Vec<String> = teachers
        .into_iter()
        .filter(|(_, set)| set.len() > 1)
        .map(|((class, subject), set)| {
            let mut ids: Vec<&str> = set.iter().map(|t| t.0.as_str()).collect();
            ids.sort_unstable();
            format!(
                "class {class} subject {subject} is taught by {} teachers ({})",
                ids.len(),
                ids.join(", ")
            )
        })
        .collect();
    violations.sort();
    violations
}

fn check_home_room_usage(
    timetable: &Timetable,
    req: &GenerateRequest,
    strategy: RoomStrategy,
) -> Vec<String> {
    if strategy != RoomStrategy::HomeRooms {
        return Vec::new();
    }
    let home_of: HashMap<&ClassId, &RoomId> = req
        .classes
        .iter()
        .filter_map(|c| c.home_room_id.as_ref().map(|r| (&c.id, r)))
        .collect();
    let lab_subjects: HashSet<&SubjectId> = req
        .subjects
        .iter()
        .filter(|s| s.requires_lab)
        .map(|s| &s.id)
        .collect();

    let mut violations = Vec::new();
    for e in &timetable.entries {
        if lab_subjects.contains(&e.subject_id) {
            continue;
        }
        if let Some(home) = home_of.get(&e.class_id) {
            if &&e.room_id != home {
                violations.push(format!(
                    "class {} holds {} in room {} instead of its home room {} ({} period {})",
                    class_name(req, &e.class_id),
                    subject_name(req, &e.subject_id),
                    e.room_id,
                    home,
                    e.day,
                    e.period_number
                ));
            }
        }
    }
    violations
}

fn check_lab_placement(timetable: &Timetable, req: &GenerateRequest) -> Vec<String> {
    let lab_subjects: HashSet<&SubjectId> = req
        .subjects
        .iter()
        .filter(|s| s.requires_lab)
        .map(|s| &s.id)
        .collect();
    let room_types: HashMap<&RoomId, RoomType> =
        req.rooms.iter().map(|r| (&r.id, r.room_type)).collect();

    timetable
        .entries
        .iter()
        .filter(|e| lab_subjects.contains(&e.subject_id))
        .filter(|e| room_types.get(&e.room_id) != Some(&RoomType::Lab))
        .map(|e| {
            format!(
                "lab subject {} for class {} is placed in non-LAB room {} ({} period {})",
                subject_name(req, &e.subject_id),
                class_name(req, &e.class_id),
                e.room_id,
                e.day,
                e.period_number
            )
        })
        .collect()
}

fn check_subject_demand(timetable: &Timetable, req: &GenerateRequest) -> Vec<String> {
    let mut counts: HashMap<(&ClassId, &SubjectId), u32> = HashMap::new();
    for e in &timetable.entries {
        *counts.entry((&e.class_id, &e.subject_id)).or_default() += 1;
    }
    let mut violations = Vec::new();
    for class in &req.classes {
        for subject in &req.subjects {
            let required = u32::from(req.periods_required(class, subject));
            let actual = counts.get(&(&class.id, &subject.id)).copied().unwrap_or(0);
            if actual != required {
                violations.push(format!(
                    "class {} has {actual} periods of {} but requires {required}",
                    class.name, subject.name
                ));
            }
        }
    }
    violations
}

/// Returns (warnings, criticals): overruns of at most 10% of the cap are
/// warnings, anything beyond is critical.
fn check_teacher_caps(
    timetable: &Timetable,
    req: &GenerateRequest,
) -> (Vec<String>, Vec<String>) {
    let mut weekly: HashMap<&TeacherId, u32> = HashMap::new();
    let mut daily: HashMap<(&TeacherId, DayOfWeek), Vec<u8>> = HashMap::new();
    for e in &timetable.entries {
        *weekly.entry(&e.teacher_id).or_default() += 1;
        daily
            .entry((&e.teacher_id, e.day))
            .or_default()
            .push(e.period_number);
    }

    let mut warnings = Vec::new();
    let mut criticals = Vec::new();
    let mut push = |limit: u32, actual: u32, message: String| {
        if actual <= limit {
            return;
        }
        if f64::from(actual) <= f64::from(limit) * 1.1 {
            warnings.push(message);
        } else {
            criticals.push(message);
        }
    };

    for teacher in &req.teachers {
        let week = weekly.get(&teacher.id).copied().unwrap_or(0);
        push(
            u32::from(teacher.max_periods_per_week),
            week,
            format!(
                "teacher {} teaches {week} periods/week against a cap of {}",
                teacher.id, teacher.max_periods_per_week
            ),
        );

        for day in DayOfWeek::ALL {
            let Some(periods) = daily.get_mut(&(&teacher.id, day)) else {
                continue;
            };
            push(
                u32::from(teacher.max_periods_per_day),
                periods.len() as u32,
                format!(
                    "teacher {} teaches {} periods on {day} against a daily cap of {}",
                    teacher.id,
                    periods.len(),
                    teacher.max_periods_per_day
                ),
            );

            periods.sort_unstable();
            let mut run = 1u32;
            let mut longest = 1u32;
            for w in periods.windows(2) {
                run = if w[1] == w[0] + 1 { run + 1 } else { 1 };
                longest = longest.max(run);
            }
            push(
                u32::from(teacher.max_consecutive_periods),
                longest,
                format!(
                    "teacher {} has a run of {longest} consecutive periods on {day} against a limit of {}",
                    teacher.id, teacher.max_consecutive_periods
                ),
            );
        }
    }

    (warnings, criticals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use types::{
        AcademicYearId, ClassId, RoomId, RoomType, SchoolId, SubjectId, SubjectMetadata,
        TeacherId, TeacherMetadata, TimeSlotId, TimetableEntry, TimetableId, TimetableMeta,
        TimetableStatus,
    };

    fn entry(
        class: &str,
        subject: &str,
        teacher: &str,
        room: &str,
        day: DayOfWeek,
        period: u8,
    ) -> TimetableEntry {
        TimetableEntry {
            id: None,
            timetable_id: TimetableId("tt".into()),
            class_id: ClassId(class.into()),
            subject_id: SubjectId(subject.into()),
            teacher_id: TeacherId(teacher.into()),
            room_id: RoomId(room.into()),
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

    fn timetable(entries: Vec<TimetableEntry>) -> Timetable {
        Timetable {
            id: TimetableId("tt".into()),
            school_id: SchoolId("sch".into()),
            academic_year_id: AcademicYearId("ay".into()),
            name: None,
            status: TimetableStatus::Draft,
            metadata: TimetableMeta::default(),
            entries,
        }
    }

    fn tiny_request() -> types::GenerateRequest {
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

    fn tiny_valid_timetable() -> Timetable {
        // 3 Math + 2 English over five one-period days.
        timetable(vec![
            entry("c1", "s1", "t1", "r1", DayOfWeek::Monday, 1),
            entry("c1", "s1", "t1", "r1", DayOfWeek::Tuesday, 1),
            entry("c1", "s1", "t1", "r1", DayOfWeek::Wednesday, 1),
            entry("c1", "s2", "t2", "r1", DayOfWeek::Thursday, 1),
            entry("c1", "s2", "t2", "r1", DayOfWeek::Friday, 1),
        ])
    }

    #[test]
    fn valid_timetable_passes_all_checks() {
        let report = validate_timetable(&tiny_valid_timetable(), &tiny_request());
        assert!(report.is_valid, "violations: {:?}", report.critical_violations);
        assert_eq!(report.status, ValidationStatus::Pass);
        assert!(report.checks.values().all(|c| c.passed));
    }

    #[test]
    fn missing_slot_fails_coverage() {
        let mut tt = tiny_valid_timetable();
        tt.entries.pop();
        let report = validate_timetable(&tt, &tiny_request());
        assert!(!report.is_valid);
        assert!(!report.checks[CHECK_COVERAGE].passed);
        assert!(report
            .critical_violations
            .iter()
            .any(|v| v.contains("10-A") && v.contains("FRIDAY")));
    }

    #[test]
    fn double_booked_teacher_is_cited() {
        let tt = timetable(vec![
            entry("c1", "s1", "t1", "r1", DayOfWeek::Monday, 1),
            entry("c2", "s1", "t1", "r2", DayOfWeek::Monday, 1),
        ]);
        let mut req = tiny_request();
        req.classes.push(class("c2", "10-B", 10, None));
        let report = validate_timetable(&tt, &req);
        assert!(!report.checks[CHECK_TEACHER_CONFLICTS].passed);
        assert!(report
            .critical_violations
            .iter()
            .any(|v| v.contains("t1") && v.contains("MONDAY")));
    }

    #[test]
    fn split_teaching_fails_consistency() {
        let mut tt = tiny_valid_timetable();
        tt.entries[2].teacher_id = TeacherId("t2".into());
        let report = validate_timetable(&tt, &tiny_request());
        assert!(!report.checks[CHECK_TEACHER_CONSISTENCY].passed);
    }

    #[test]
    fn lab_subject_outside_lab_fails() {
        let mut req = tiny_request();
        req.subjects[0].requires_lab = true;
        req.rooms.push(room("lab1", RoomType::Lab));
        let report = validate_timetable(&tiny_valid_timetable(), &req);
        assert!(!report.checks[CHECK_LAB_PLACEMENT].passed);
        assert!(report
            .critical_violations
            .iter()
            .any(|v| v.contains("Mathematics") && v.contains("r1")));
    }

    #[test]
    fn home_room_violation_is_critical_when_home_rooms_exist() {
        let mut req = tiny_request();
        req.classes[0].home_room_id = Some(RoomId("r1".into()));
        req.rooms.push(room("r2", RoomType::Classroom));
        let mut tt = tiny_valid_timetable();
        tt.entries[0].room_id = RoomId("r2".into());
        let report = validate_timetable(&tt, &req);
        assert!(!report.checks[CHECK_HOME_ROOM_USAGE].passed);
        assert!(report.checks[CHECK_HOME_ROOM_USAGE].critical);
        assert!(!report.is_valid);
    }

    #[test]
    fn shared_room_double_booking_fails() {
        let mut req = tiny_request();
        req.classes[0].home_room_id = Some(RoomId("r1".into()));
        req.classes.push(class("c2", "10-B", 10, Some("r2")));
        req.rooms.push(room("r2", RoomType::Classroom));
        req.rooms.push(room("lab1", RoomType::Lab));
        req.subjects[0].requires_lab = true;

        // Both classes in the lab at the same slot.
        let tt = timetable(vec![
            entry("c1", "s1", "t1", "lab1", DayOfWeek::Monday, 1),
            entry("c2", "s1", "t2", "lab1", DayOfWeek::Monday, 1),
        ]);
        let report = validate_timetable(&tt, &req);
        assert!(!report.checks[CHECK_SHARED_ROOM_CONFLICTS].passed);
        assert!(report
            .critical_violations
            .iter()
            .any(|v| v.contains("lab1")));
    }

    #[test]
    fn subject_demand_mismatch_is_cited() {
        let mut tt = tiny_valid_timetable();
        tt.entries[4].subject_id = SubjectId("s1".into());
        tt.entries[4].teacher_id = TeacherId("t1".into());
        let report = validate_timetable(&tt, &tiny_request());
        assert!(!report.checks[CHECK_SUBJECT_DEMAND].passed);
        assert!(report
            .critical_violations
            .iter()
            .any(|v| v.contains("Mathematics") && v.contains('4')));
        assert!(report
            .critical_violations
            .iter()
            .any(|v| v.contains("English") && v.contains('1')));
    }

    #[test]
    fn small_cap_overrun_warns_large_overrun_fails() {
        // Weekly cap of 10, 11 periods taught: within 10%, a warning.
        let mut req = request(
            vec![class("c1", "10-A", 10, None)],
            vec![subject("s1", "Mathematics", "MATH", 10)],
            vec![teacher("t1", &["Mathematics"], 10)],
            slot_grid(6, 2),
            vec![room("r1", RoomType::Classroom)],
        );
        req.subject_requirements = vec![types::GradeSubjectRequirement {
            grade: 10,
            subject_id: SubjectId("s1".into()),
            periods_per_week: 11,
        }];
        let entries: Vec<_> = (0..11)
            .map(|i| {
                entry(
                    "c1",
                    "s1",
                    "t1",
                    "r1",
                    DayOfWeek::ALL[i / 2],
                    (i % 2 + 1) as u8,
                )
            })
            .collect();
        let mut tt = timetable(entries);
        // Keep the grid consistent for the coverage check.
        tt.metadata.coverage = 11.0 / 12.0;
        let report = validate_timetable(&tt, &req);
        assert!(!report.checks[CHECK_TEACHER_CAPS].critical);
        assert!(report.warnings.iter().any(|w| w.contains("t1")));
    }
}
