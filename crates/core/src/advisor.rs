//! Pre-computation resource feasibility analysis. Runs before any scheduling
//! work and either clears the request or reports the bottleneck with
//! entity-named suggestions.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use types::{GenerateRequest, RoomStrategy, RoomType};

pub const CHECK_TEACHER_CAPACITY: &str = "teacher_capacity";
pub const CHECK_LAB_CAPACITY: &str = "lab_capacity";
pub const CHECK_SLOT_SUPPLY: &str = "slot_supply";
pub const CHECK_HOME_ROOMS: &str = "home_rooms";
pub const CHECK_CONSECUTIVE_SANITY: &str = "consecutive_sanity";

#[derive(Clone, Copy, Debug, Serialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Clone, Debug, Serialize)]
pub struct Issue {
    pub check: &'static str,
    pub severity: IssueSeverity,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResourceAnalysis {
    pub is_feasible: bool,
    pub critical_issues: Vec<Issue>,
    pub warnings: Vec<Issue>,
    /// Utilization percentage per strained resource, keyed `subject:<name>`
    /// or `room:LAB`.
    pub bottleneck_resources: BTreeMap<String, f64>,
    pub suggestions: Vec<String>,
}

impl ResourceAnalysis {
    pub fn conflicts(&self) -> Vec<String> {
        self.critical_issues.iter().map(|i| i.message.clone()).collect()
    }
}

pub fn pre_computation_check(req: &GenerateRequest) -> ResourceAnalysis {
    let mut critical_issues = Vec::new();
    let mut warnings = Vec::new();
    let mut bottlenecks = BTreeMap::new();

    let active_slots = req.active_slots().count() as u32;
    let active_days = {
        let mut days: Vec<_> = req.active_slots().map(|ts| ts.day).collect();
        days.sort_unstable();
        days.dedup();
        days.len() as u32
    };

    check_teacher_capacity(req, &mut critical_issues, &mut warnings, &mut bottlenecks);
    check_lab_capacity(req, active_slots, &mut critical_issues, &mut bottlenecks);
    check_slot_supply(req, active_slots, &mut critical_issues, &mut warnings);
    check_home_rooms(req, &mut critical_issues);
    check_consecutive_sanity(req, active_days, &mut warnings);

    let suggestions: Vec<String> = critical_issues
        .iter()
        .chain(warnings.iter())
        .flat_map(|i| i.suggestions.iter().cloned())
        .collect();

    let is_feasible = critical_issues.is_empty();
    debug!(
        feasible = is_feasible,
        critical = critical_issues.len(),
        warnings = warnings.len(),
        "pre-computation check done"
    );

    ResourceAnalysis {
        is_feasible,
        critical_issues,
        warnings,
        bottleneck_resources: bottlenecks,
        suggestions,
    }
}

fn check_teacher_capacity(
    req: &GenerateRequest,
    critical: &mut Vec<Issue>,
    warnings: &mut Vec<Issue>,
    bottlenecks: &mut BTreeMap<String, f64>,
) {
    for subject in &req.subjects {
        let demand: u32 = req
            .classes
            .iter()
            .map(|c| u32::from(req.periods_required(c, subject)))
            .sum();
        if demand == 0 {
            continue;
        }

        let qualified: Vec<_> = req
            .teachers
            .iter()
            .filter(|t| t.is_qualified_for(subject))
            .collect();
        let supply: u32 = qualified.iter().map(|t| u32::from(t.max_periods_per_week)).sum();

        if qualified.is_empty() {
            let needed = demand.div_ceil(30).max(1);
            critical.push(Issue {
                check: CHECK_TEACHER_CAPACITY,
                severity: IssueSeverity::Critical,
                message: format!(
                    "No teachers are qualified for {} ({} periods/week required)",
                    subject.name, demand
                ),
                suggestions: vec![format!(
                    "Add at least {needed} teacher(s) qualified for {}",
                    subject.name
                )],
            });
            continue;
        }

        let utilization = demand as f64 / supply as f64 * 100.0;
        if demand > supply {
            let deficit = demand - supply;
            let avg_capacity = (supply / qualified.len() as u32).max(1);
            let needed = deficit.div_ceil(avg_capacity).max(1);
            bottlenecks.insert(format!("subject:{}", subject.name), utilization);
            critical.push(Issue {
                check: CHECK_TEACHER_CAPACITY,
                severity: IssueSeverity::Critical,
                message: format!(
                    "Teacher capacity for {} is insufficient: {} periods/week required, {} available",
                    subject.name, demand, supply
                ),
                suggestions: vec![format!(
                    "Add at least {needed} more teacher(s) qualified for {} (short by {deficit} periods/week)",
                    subject.name
                )],
            });
        } else if utilization > 90.0 {
            bottlenecks.insert(format!("subject:{}", subject.name), utilization);
            warnings.push(Issue {
                check: CHECK_TEACHER_CAPACITY,
                severity: IssueSeverity::Warning,
                message: format!(
                    "Teachers for {} are at {utilization:.0}% of weekly capacity",
                    subject.name
                ),
                suggestions: vec![format!(
                    "Consider an additional teacher qualified for {} to leave headroom",
                    subject.name
                )],
            });
        }
    }
}

fn check_lab_capacity(
    req: &GenerateRequest,
    active_slots: u32,
    critical: &mut Vec<Issue>,
    bottlenecks: &mut BTreeMap<String, f64>,
) {
    let lab_demand: u32 = req
        .subjects
        .iter()
        .filter(|s| s.requires_lab)
        .map(|s| {
            req.classes
                .iter()
                .map(|c| u32::from(req.periods_required(c, s)))
                .sum::<u32>()
        })
        .sum();
    if lab_demand == 0 {
        return;
    }

    let lab_rooms = req
        .rooms
        .iter()
        .filter(|r| r.room_type == RoomType::Lab)
        .count() as u32;
    let lab_supply = lab_rooms * active_slots;

    if lab_supply == 0 {
        critical.push(Issue {
            check: CHECK_LAB_CAPACITY,
            severity: IssueSeverity::Critical,
            message: format!(
                "{lab_demand} lab periods/week are required but no LAB rooms exist"
            ),
            suggestions: vec!["Add at least 1 LAB room".to_string()],
        });
        return;
    }

    let utilization = lab_demand as f64 / lab_supply as f64 * 100.0;
    if lab_demand > lab_supply {
        let extra = (lab_demand - lab_supply).div_ceil(active_slots.max(1));
        bottlenecks.insert("room:LAB".to_string(), utilization);
        critical.push(Issue {
            check: CHECK_LAB_CAPACITY,
            severity: IssueSeverity::Critical,
            message: format!(
                "Lab capacity is insufficient: {lab_demand} lab periods/week against {lab_supply} available lab slots"
            ),
            suggestions: vec![format!("Add at least {extra} more LAB room(s)")],
        });
    } else if utilization > 90.0 {
        bottlenecks.insert("room:LAB".to_string(), utilization);
    }
}

fn check_slot_supply(
    req: &GenerateRequest,
    active_slots: u32,
    critical: &mut Vec<Issue>,
    warnings: &mut Vec<Issue>,
) {
    for class in &req.classes {
        let required: u32 = req
            .subjects
            .iter()
            .map(|s| u32::from(req.periods_required(class, s)))
            .sum();
        if required > active_slots {
            let excess = required - active_slots;
            critical.push(Issue {
                check: CHECK_SLOT_SUPPLY,
                severity: IssueSeverity::Critical,
                message: format!(
                    "Class {} needs {required} periods/week but only {active_slots} active slots exist",
                    class.name
                ),
                suggestions: vec![format!(
                    "Reduce the subject load of class {} by {excess} period(s)/week, or add time slots",
                    class.name
                )],
            });
        } else if required < active_slots {
            warnings.push(Issue {
                check: CHECK_SLOT_SUPPLY,
                severity: IssueSeverity::Warning,
                message: format!(
                    "Class {} demands {required} periods against {active_slots} active slots; {} slot(s) will stay unfilled",
                    class.name,
                    active_slots - required
                ),
                suggestions: vec![format!(
                    "Add {} period(s)/week of subjects for class {} for full coverage",
                    active_slots - required,
                    class.name
                )],
            });
        }
    }
}

fn check_home_rooms(req: &GenerateRequest, critical: &mut Vec<Issue>) {
    if req.room_strategy() != RoomStrategy::HomeRooms {
        return;
    }
    for class in &req.classes {
        match &class.home_room_id {
            None => critical.push(Issue {
                check: CHECK_HOME_ROOMS,
                severity: IssueSeverity::Critical,
                message: format!("Class {} has no home room assigned", class.name),
                suggestions: vec![format!(
                    "Assign a home classroom to class {} before generating",
                    class.name
                )],
            }),
            Some(home) => match req.rooms.iter().find(|r| &r.id == home) {
                None => critical.push(Issue {
                    check: CHECK_HOME_ROOMS,
                    severity: IssueSeverity::Critical,
                    message: format!(
                        "Class {} references home room {home} which does not exist",
                        class.name
                    ),
                    suggestions: vec![format!("Fix the home room reference of class {}", class.name)],
                }),
                Some(room) if room.room_type != RoomType::Classroom => critical.push(Issue {
                    check: CHECK_HOME_ROOMS,
                    severity: IssueSeverity::Critical,
                    message: format!(
                        "Home room {} of class {} is a {:?}, not a CLASSROOM",
                        room.name, class.name, room.room_type
                    ),
                    suggestions: vec![format!(
                        "Assign a CLASSROOM-type home room to class {}",
                        class.name
                    )],
                }),
                Some(_) => {}
            },
        }
    }
}

fn check_consecutive_sanity(req: &GenerateRequest, active_days: u32, warnings: &mut Vec<Issue>) {
    let cutoff = u32::from(req.weights().morning_period_cutoff);
    for subject in &req.subjects {
        if subject.periods_per_week > 5
            && subject.prefer_morning
            && cutoff * active_days < u32::from(subject.periods_per_week)
        {
            warnings.push(Issue {
                check: CHECK_CONSECUTIVE_SANITY,
                severity: IssueSeverity::Warning,
                message: format!(
                    "{} wants {} morning periods/week but only {} morning slots exist across the week",
                    subject.name,
                    subject.periods_per_week,
                    cutoff * active_days
                ),
                suggestions: vec![format!(
                    "Relax the morning preference of {} or spread it over more days",
                    subject.name
                )],
            });
        }
    }
}

/// Classify solver conflict strings by their binding resource and turn them
/// into recommendations. Used when the CSP gives up after the advisor said
/// the request looked feasible.
pub fn post_mortem_analysis(conflicts: &[String]) -> Vec<String> {
    let mut recommendations = Vec::new();
    let lower: Vec<String> = conflicts.iter().map(|c| c.to_lowercase()).collect();

    if lower.iter().any(|c| c.contains("teacher")) {
        recommendations.push(
            "Teacher availability was the binding constraint; add qualified teachers or raise weekly limits"
                .to_string(),
        );
    }
    if lower.iter().any(|c| c.contains("lab") || c.contains("room")) {
        recommendations
            .push("Room supply was the binding constraint; add rooms of the cited type".to_string());
    }
    if lower.iter().any(|c| c.contains("slot")) {
        recommendations.push("The slot grid is too tight; add periods or days".to_string());
    }
    if recommendations.is_empty() && !conflicts.is_empty() {
        recommendations
            .push("Review the listed conflicts and relax the narrowest constraint first".to_string());
    }
    recommendations
}
