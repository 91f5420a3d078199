use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}
id_newtype!(SchoolId);
id_newtype!(AcademicYearId);
id_newtype!(SubjectId);
id_newtype!(TeacherId);
id_newtype!(ClassId);
id_newtype!(RoomId);
id_newtype!(TimeSlotId);
id_newtype!(TimetableId);
id_newtype!(ConstraintId);

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 6] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DayOfWeek::Monday => "MONDAY",
            DayOfWeek::Tuesday => "TUESDAY",
            DayOfWeek::Wednesday => "WEDNESDAY",
            DayOfWeek::Thursday => "THURSDAY",
            DayOfWeek::Friday => "FRIDAY",
            DayOfWeek::Saturday => "SATURDAY",
        };
        f.write_str(s)
    }
}

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Classroom,
    Lab,
    Sports,
    Library,
    Auditorium,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimetableStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    TeacherAvailability,
    RoomCapacity,
    ConsecutivePeriods,
    MinPeriodsPerWeek,
    MaxPeriodsPerWeek,
    PreferredTimeSlot,
    NoGaps,
    LunchBreak,
}

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintPriority {
    Mandatory,
    High,
    Medium,
    Low,
}

/// Priority of a slot left unfilled by a partial solution.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotPriority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct School {
    pub id: SchoolId,
    pub name: String,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct AcademicYear {
    pub id: AcademicYearId,
    pub school_id: SchoolId,
    pub name: String,
    pub valid_from: String,
    pub valid_to: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Subject {
    pub id: SubjectId,
    pub school_id: SchoolId,
    pub name: String,
    pub code: String,
    pub periods_per_week: u8,
    #[serde(default)]
    pub requires_lab: bool,
    #[serde(default)]
    pub is_elective: bool,
    #[serde(default)]
    pub prefer_morning: bool,
    #[serde(default)]
    pub preferred_periods: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub avoid_periods: Option<BTreeSet<u8>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Teacher {
    pub id: TeacherId,
    pub user_id: String,
    /// Subject names or codes this teacher is qualified for.
    pub subjects: Vec<String>,
    #[serde(default = "default_max_periods_per_day")]
    pub max_periods_per_day: u8,
    #[serde(default = "default_max_periods_per_week")]
    pub max_periods_per_week: u8,
    #[serde(default = "default_max_consecutive_periods")]
    pub max_consecutive_periods: u8,
    #[serde(default)]
    pub availability: Option<BTreeMap<DayOfWeek, BTreeSet<u8>>>,
}

fn default_max_periods_per_day() -> u8 {
    6
}
fn default_max_periods_per_week() -> u8 {
    30
}
fn default_max_consecutive_periods() -> u8 {
    3
}

impl Teacher {
    pub fn is_qualified_for(&self, subject: &Subject) -> bool {
        self.subjects
            .iter()
            .any(|s| s == &subject.name || s == &subject.code)
    }

    /// An absent availability map means the teacher is free in every slot.
    pub fn is_available(&self, day: DayOfWeek, period: u8) -> bool {
        match &self.availability {
            None => true,
            Some(map) => map.get(&day).is_some_and(|ps| ps.contains(&period)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Class {
    pub id: ClassId,
    pub school_id: SchoolId,
    pub name: String,
    pub grade: u8,
    pub section: String,
    #[serde(default)]
    pub student_count: Option<u32>,
    /// Pre-assigned home classroom. Required when home-room scheduling is in
    /// effect (see [`GenerateRequest::room_strategy`]).
    #[serde(default)]
    pub home_room_id: Option<RoomId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Room {
    pub id: RoomId,
    pub school_id: SchoolId,
    pub name: String,
    #[serde(rename = "type", default = "default_room_type")]
    pub room_type: RoomType,
    pub capacity: u32,
    #[serde(default)]
    pub facilities: Vec<String>,
}

fn default_room_type() -> RoomType {
    RoomType::Classroom
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TimeSlot {
    pub id: TimeSlotId,
    #[serde(default)]
    pub school_id: Option<SchoolId>,
    pub day: DayOfWeek,
    pub period_number: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub is_break: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Constraint {
    pub id: ConstraintId,
    pub kind: ConstraintKind,
    pub priority: ConstraintPriority,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

/// Grade-level override of a subject's weekly period count.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct GradeSubjectRequirement {
    pub grade: u8,
    pub subject_id: SubjectId,
    pub periods_per_week: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationWeights {
    #[serde(default = "default_workload_balance")]
    pub workload_balance: f64,
    #[serde(default = "default_gap_minimization")]
    pub gap_minimization: f64,
    #[serde(default = "default_time_preferences")]
    pub time_preferences: f64,
    #[serde(default = "default_consecutive_periods")]
    pub consecutive_periods: f64,
    #[serde(default = "default_coverage")]
    pub coverage: f64,
    /// Last period number still considered "morning".
    #[serde(default = "default_morning_period_cutoff")]
    pub morning_period_cutoff: u8,

    // Accepted for wire compatibility; not consulted anywhere.
    #[serde(default = "default_academic_requirements")]
    pub academic_requirements: f64,
    #[serde(default = "default_resource_utilization")]
    pub resource_utilization: f64,
    #[serde(default = "default_teacher_preferences")]
    pub teacher_preferences: f64,
}

fn default_workload_balance() -> f64 {
    50.0
}
fn default_gap_minimization() -> f64 {
    15.0
}
fn default_time_preferences() -> f64 {
    25.0
}
fn default_consecutive_periods() -> f64 {
    10.0
}
fn default_coverage() -> f64 {
    20.0
}
fn default_morning_period_cutoff() -> u8 {
    4
}
fn default_academic_requirements() -> f64 {
    0.4
}
fn default_resource_utilization() -> f64 {
    0.25
}
fn default_teacher_preferences() -> f64 {
    0.15
}

impl Default for OptimizationWeights {
    fn default() -> Self {
        Self {
            workload_balance: default_workload_balance(),
            gap_minimization: default_gap_minimization(),
            time_preferences: default_time_preferences(),
            consecutive_periods: default_consecutive_periods(),
            coverage: default_coverage(),
            morning_period_cutoff: default_morning_period_cutoff(),
            academic_requirements: default_academic_requirements(),
            resource_utilization: default_resource_utilization(),
            teacher_preferences: default_teacher_preferences(),
        }
    }
}

/// Subject scheduling preferences carried on each entry so that fitness
/// evaluation needs no further entity lookups.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SubjectMetadata {
    #[serde(default)]
    pub prefer_morning: bool,
    #[serde(default)]
    pub preferred_periods: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub avoid_periods: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub requires_lab: bool,
}

impl SubjectMetadata {
    pub fn of(subject: &Subject) -> Self {
        Self {
            prefer_morning: subject.prefer_morning,
            preferred_periods: subject.preferred_periods.clone(),
            avoid_periods: subject.avoid_periods.clone(),
            requires_lab: subject.requires_lab,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TeacherMetadata {
    #[serde(default = "default_max_consecutive_periods")]
    pub max_consecutive_periods: u8,
}

impl TeacherMetadata {
    pub fn of(teacher: &Teacher) -> Self {
        Self {
            max_consecutive_periods: teacher.max_consecutive_periods,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimetableEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub timetable_id: TimetableId,
    pub class_id: ClassId,
    pub subject_id: SubjectId,
    pub teacher_id: TeacherId,
    pub room_id: RoomId,
    pub time_slot_id: TimeSlotId,
    pub day: DayOfWeek,
    pub period_number: u8,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub subject_metadata: Option<SubjectMetadata>,
    #[serde(default)]
    pub teacher_metadata: Option<TeacherMetadata>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct UnfilledSlot {
    pub class_id: ClassId,
    pub day: DayOfWeek,
    pub period: u8,
    #[serde(default)]
    pub priority: SlotPriority,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimetableMeta {
    /// Fraction of (class, active slot) pairs holding an entry, in [0, 1].
    #[serde(default = "default_coverage_fraction")]
    pub coverage: f64,
    #[serde(default)]
    pub unfilled_slots: Vec<UnfilledSlot>,
}

fn default_coverage_fraction() -> f64 {
    1.0
}

impl Default for TimetableMeta {
    fn default() -> Self {
        Self {
            coverage: 1.0,
            unfilled_slots: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Timetable {
    pub id: TimetableId,
    pub school_id: SchoolId,
    pub academic_year_id: AcademicYearId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: TimetableStatus,
    #[serde(default)]
    pub metadata: TimetableMeta,
    #[serde(default)]
    pub entries: Vec<TimetableEntry>,
}

/// How rooms are allocated and tracked during solving.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoomStrategy {
    /// Classes have pre-assigned home classrooms; only shared amenities are
    /// conflict-tracked.
    HomeRooms,
    /// No home rooms; every room is searched and conflict-tracked.
    TrackAll,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GenerateRequest {
    pub school_id: SchoolId,
    pub academic_year_id: AcademicYearId,
    pub classes: Vec<Class>,
    pub subjects: Vec<Subject>,
    pub teachers: Vec<Teacher>,
    pub time_slots: Vec<TimeSlot>,
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub subject_requirements: Vec<GradeSubjectRequirement>,
    #[serde(default)]
    pub weights: Option<OptimizationWeights>,
    #[serde(default = "default_num_solutions")]
    pub num_solutions: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub enforce_teacher_consistency: bool,
}

fn default_num_solutions() -> u32 {
    3
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl GenerateRequest {
    pub fn active_slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.time_slots.iter().filter(|ts| !ts.is_break)
    }

    pub fn weights(&self) -> OptimizationWeights {
        self.weights.clone().unwrap_or_default()
    }

    /// Home-room scheduling is in effect as soon as any class carries a home
    /// room; a request with no home rooms at all runs in the legacy
    /// track-every-room mode.
    pub fn room_strategy(&self) -> RoomStrategy {
        if self.classes.iter().any(|c| c.home_room_id.is_some()) {
            RoomStrategy::HomeRooms
        } else {
            RoomStrategy::TrackAll
        }
    }

    /// Weekly periods required for (class, subject), honoring grade overrides.
    pub fn periods_required(&self, class: &Class, subject: &Subject) -> u8 {
        self.subject_requirements
            .iter()
            .find(|r| r.grade == class.grade && r.subject_id == subject.id)
            .map(|r| r.periods_per_week)
            .unwrap_or(subject.periods_per_week)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SolutionMetrics {
    pub constraints_satisfied: u32,
    pub total_constraints: u32,
    pub gaps: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimetableSolution {
    pub timetable: Timetable,
    pub total_score: f64,
    pub feasible: bool,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub metrics: SolutionMetrics,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostics {
    #[serde(default)]
    pub bottleneck_resources: BTreeMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Seconds spent in each pipeline phase.
    #[serde(default)]
    pub phase_timings: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct GenerateResponse {
    pub solutions: Vec<TimetableSolution>,
    pub generation_time_seconds: f64,
    #[serde(default)]
    pub conflicts: Option<Vec<String>>,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
    #[serde(default)]
    pub diagnostics: Option<Diagnostics>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RequestEntities {
    #[serde(default)]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
    #[serde(default)]
    pub rooms: Vec<Room>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ValidateRequest {
    pub entities: RequestEntities,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ValidationResult {
    pub feasible: bool,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}
