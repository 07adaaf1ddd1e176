//! Typed health records collected from the device store.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::PivotError;
use crate::catalog;

pub type Timestamp = DateTime<Utc>;

/// Start and end of a record. `end >= start` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordSpan {
    start: Timestamp,
    end: Timestamp,
}

impl RecordSpan {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, PivotError> {
        if end < start {
            return Err(PivotError::InvalidRecord(format!(
                "end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The whole UTC calendar day.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }
}

/// A value and its unit, present or absent together.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuantityRecord {
    pub kind: String,
    pub span: RecordSpan,
    pub value: f64,
    pub unit: String,
    pub source: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CategoryRecord {
    pub kind: String,
    pub span: RecordSpan,
    /// Raw store value, mapped through the kind's vocabulary on encode.
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkoutRecord {
    pub span: RecordSpan,
    pub duration_secs: f64,
    pub activity_kind: String,
    pub total_distance: Option<Measurement>,
    pub total_energy: Option<Measurement>,
}

impl WorkoutRecord {
    /// Build from store units: distance in meters, energy in kilocalories.
    pub fn new(
        span: RecordSpan,
        duration_secs: f64,
        activity_code: u32,
        distance_meters: Option<f64>,
        energy_kilocalories: Option<f64>,
    ) -> Self {
        Self {
            span,
            duration_secs,
            activity_kind: catalog::workout_activity_name(activity_code).to_string(),
            total_distance: distance_meters.map(|m| Measurement::new(m, "m")),
            total_energy: energy_kilocalories.map(|k| Measurement::new(k, "kcal")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActivitySummaryRecord {
    pub date: NaiveDate,
    pub move_time_secs: Option<f64>,
    pub exercise_time_secs: Option<f64>,
    pub active_energy: Option<Measurement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HealthRecord {
    Quantity(QuantityRecord),
    Category(CategoryRecord),
    Workout(WorkoutRecord),
    ActivitySummary(ActivitySummaryRecord),
}

impl HealthRecord {
    pub fn quantity(
        kind: impl Into<String>,
        span: RecordSpan,
        value: f64,
        unit: impl Into<String>,
        source: Option<String>,
    ) -> Self {
        HealthRecord::Quantity(QuantityRecord {
            kind: kind.into(),
            span,
            value,
            unit: unit.into(),
            source,
        })
    }

    pub fn category(kind: impl Into<String>, span: RecordSpan, value: i64) -> Self {
        HealthRecord::Category(CategoryRecord {
            kind: kind.into(),
            span,
            value,
        })
    }

    /// Wire `type` of the record.
    pub fn kind(&self) -> &str {
        match self {
            HealthRecord::Quantity(q) => &q.kind,
            HealthRecord::Category(c) => &c.kind,
            HealthRecord::Workout(_) => "workout",
            HealthRecord::ActivitySummary(_) => "activitySummary",
        }
    }

    pub fn span(&self) -> RecordSpan {
        match self {
            HealthRecord::Quantity(q) => q.span,
            HealthRecord::Category(c) => c.span,
            HealthRecord::Workout(w) => w.span,
            HealthRecord::ActivitySummary(a) => RecordSpan::day(a.date),
        }
    }

    pub fn start_date(&self) -> Timestamp {
        self.span().start()
    }

    pub fn end_date(&self) -> Timestamp {
        self.span().end()
    }
}
