//! Daily energy expenditure model
//!
//! Combines measured activity with a basal estimate:
//! - Step calories: a linear per-step constant
//! - Exercise calories: measured active calories per session, else a
//!   per-type kcal/minute table, with a step-based floor for running/walking
//! - Basal calories: Mifflin-St Jeor BMR pro-rated to the elapsed part of the day
//!
//! Active calories are the max of step and exercise calories, never the sum,
//! since ambulatory sessions are already counted by the step sensor.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{
    EnergyBreakdown, EstimateMethod, ExerciseType, Gender, Record, RecordValue, SessionEnergy,
    UserProfile,
};

/// Kilocalories per step (crude linear approximation)
pub const KCAL_PER_STEP: f64 = 0.04;

/// Fallback rate for exercise types missing from the table
pub const DEFAULT_KCAL_PER_MINUTE: f64 = 5.0;

pub const MINUTES_PER_DAY: f64 = 1440.0;

pub const DEFAULT_AGE: u32 = 30;
pub const DEFAULT_GENDER: Gender = Gender::Male;
pub const DEFAULT_HEIGHT_CM: f64 = 170.0;
pub const DEFAULT_WEIGHT_KG: f64 = 70.0;

/// Typical energy cost of an exercise type in kcal per minute
pub fn kcal_per_minute(exercise_type: &ExerciseType) -> f64 {
    match exercise_type {
        ExerciseType::Running => 10.0,
        ExerciseType::Walking => 4.0,
        ExerciseType::Cycling => 8.0,
        ExerciseType::Swimming => 9.0,
        ExerciseType::Hiking => 6.5,
        ExerciseType::StrengthTraining => 6.0,
        ExerciseType::Hiit => 11.0,
        ExerciseType::Rowing => 8.5,
        ExerciseType::Elliptical => 7.5,
        ExerciseType::Yoga => 3.0,
        ExerciseType::Dancing => 5.5,
        ExerciseType::Other(_) => DEFAULT_KCAL_PER_MINUTE,
    }
}

/// Profile with every field filled in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedProfile {
    pub age: u32,
    pub gender: Gender,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub defaults_used: bool,
}

impl Default for ResolvedProfile {
    fn default() -> Self {
        Self {
            age: DEFAULT_AGE,
            gender: DEFAULT_GENDER,
            height_cm: DEFAULT_HEIGHT_CM,
            weight_kg: DEFAULT_WEIGHT_KG,
            defaults_used: true,
        }
    }
}

impl ResolvedProfile {
    /// Fill missing or non-positive profile fields.
    ///
    /// A missing weight is taken from `measured_weight_kg` (the reconciled
    /// weight metric) before falling back to the default.
    pub fn resolve(profile: &UserProfile, measured_weight_kg: Option<f64>) -> Self {
        let mut missing = Vec::new();

        let age = profile.age.unwrap_or_else(|| {
            missing.push("age");
            DEFAULT_AGE
        });
        let gender = profile.gender.unwrap_or_else(|| {
            missing.push("gender");
            DEFAULT_GENDER
        });
        let height_cm = positive(profile.height_cm).unwrap_or_else(|| {
            missing.push("height_cm");
            DEFAULT_HEIGHT_CM
        });
        let weight_kg = positive(profile.weight_kg)
            .or_else(|| positive(measured_weight_kg))
            .unwrap_or_else(|| {
                missing.push("weight_kg");
                DEFAULT_WEIGHT_KG
            });

        if !missing.is_empty() {
            warn!(fields = ?missing, "Profile incomplete, using defaults");
        }

        Self {
            age,
            gender,
            height_cm,
            weight_kg,
            defaults_used: !missing.is_empty(),
        }
    }

    /// Mifflin-St Jeor basal metabolic rate (kcal/day)
    pub fn daily_bmr(&self) -> f64 {
        let base = 10.0 * self.weight_kg + 6.25 * self.height_cm - 5.0 * f64::from(self.age);
        match self.gender {
            Gender::Male => base + 5.0,
            Gender::Female => base - 161.0,
        }
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Basal calories accrued between local midnight and `now`
pub fn bmr_calories_so_far(daily_bmr: f64, day_start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_minutes = (now - day_start).num_seconds() as f64 / 60.0;
    let fraction = (elapsed_minutes / MINUTES_PER_DAY).clamp(0.0, 1.0);
    daily_bmr * fraction
}

/// Side data looked up for one exercise session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionEvidence {
    /// Reconciled active calories recorded during the session; `None` if the
    /// lookup failed
    pub measured_calories: Option<f64>,
    /// Reconciled steps recorded during the session; `None` if the lookup
    /// failed or was not needed
    pub steps: Option<u64>,
}

/// Estimate the energy of one exercise session.
///
/// Returns `None` for records that are not exercise sessions.
pub fn session_energy(session: &Record, evidence: &SessionEvidence) -> Option<SessionEnergy> {
    let RecordValue::Exercise { exercise_type, .. } = &session.value else {
        return None;
    };
    let minutes = session.duration_minutes();

    let (mut calories, mut method) = match positive(evidence.measured_calories) {
        Some(kcal) => (kcal, EstimateMethod::MeasuredCalories),
        None => (
            minutes * kcal_per_minute(exercise_type),
            EstimateMethod::DurationEstimate,
        ),
    };

    if exercise_type.is_ambulatory() {
        if let Some(steps) = evidence.steps {
            let step_calories = steps as f64 * KCAL_PER_STEP;
            if step_calories > calories {
                calories = step_calories;
                method = EstimateMethod::StepEstimate;
            }
        }
    }

    Some(SessionEnergy {
        exercise_type: exercise_type.clone(),
        start_time: session.start_time,
        end_time: session.end_time,
        minutes,
        calories,
        method,
    })
}

/// Combine step count, session estimates and profile into the day's breakdown
pub fn compute_breakdown(
    steps: u64,
    sessions: Vec<SessionEnergy>,
    profile: &ResolvedProfile,
    day_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> EnergyBreakdown {
    let step_calories = steps as f64 * KCAL_PER_STEP;
    let exercise_calories: f64 = sessions.iter().map(|s| s.calories).sum();
    let active_calories = step_calories.max(exercise_calories);

    let daily_bmr = profile.daily_bmr();
    let bmr_calories_so_far = bmr_calories_so_far(daily_bmr, day_start, now);

    EnergyBreakdown {
        step_calories,
        exercise_calories,
        active_calories,
        daily_bmr,
        bmr_calories_so_far,
        total_calories: bmr_calories_so_far + active_calories,
        sessions,
        profile_defaults_used: profile.defaults_used,
    }
}
