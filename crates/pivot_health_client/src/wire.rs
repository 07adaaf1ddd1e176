//! JSON body of the upload PUT.
//!
//! ```json
//! { "data": [ ...quantity | category | workout... ], "dailySummary": [ ... ] }
//! ```

use serde::Serialize;

use crate::PivotError;
use crate::catalog::{self, KindShape};
use crate::record::{ActivitySummaryRecord, HealthRecord, Timestamp};

/// UTC with a fixed `+00:00` offset.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

pub fn format_date(ts: &Timestamp) -> String {
    ts.format(DATE_FORMAT).to_string()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuantityEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub start_date: String,
    pub end_date: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub start_date: String,
    pub end_date: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub start_date: String,
    pub end_date: String,
    pub duration: f64,
    pub activity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_energy_burned: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_burned_unit: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DataEntry {
    Quantity(QuantityEntry),
    Category(CategoryEntry),
    Workout(WorkoutEntry),
}

/// Move and exercise time are always written (as `null` when unknown);
/// active energy and its unit are written together or not at all.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySummaryEntry {
    pub date: String,
    pub move_time: Option<f64>,
    pub exercise_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_energy_burned: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_energy_unit: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WireRecord {
    Data(DataEntry),
    Summary(DailySummaryEntry),
}

/// Encode a single record, validating it against the catalog.
pub fn encode_record(record: &HealthRecord) -> Result<WireRecord, PivotError> {
    let start_date = format_date(&record.start_date());
    let end_date = format_date(&record.end_date());

    match record {
        HealthRecord::Quantity(q) => {
            let entry = catalog::entry_by_name(&q.kind)
                .ok_or_else(|| PivotError::NoNameFound(q.kind.clone()))?;
            match entry.shape {
                KindShape::Quantity(_) if entry.unit == q.unit => {}
                KindShape::Quantity(_) => {
                    return Err(PivotError::InvalidRecord(format!(
                        "{} expects unit {}, got {}",
                        q.kind, entry.unit, q.unit
                    )));
                }
                _ => {
                    return Err(PivotError::InvalidRecord(format!(
                        "{} is not a quantity kind",
                        q.kind
                    )));
                }
            }
            Ok(WireRecord::Data(DataEntry::Quantity(QuantityEntry {
                kind: q.kind.clone(),
                start_date,
                end_date,
                quantity: q.value,
                unit: q.unit.clone(),
                source: q.source.clone(),
            })))
        }
        HealthRecord::Category(c) => {
            let entry = catalog::entry_by_name(&c.kind)
                .ok_or_else(|| PivotError::NoNameFound(c.kind.clone()))?;
            let value = entry.category_name(c.value).ok_or_else(|| {
                PivotError::UnrecognizedCategoryValue {
                    kind: c.kind.clone(),
                    value: c.value,
                }
            })?;
            Ok(WireRecord::Data(DataEntry::Category(CategoryEntry {
                kind: c.kind.clone(),
                start_date,
                end_date,
                value: value.to_string(),
            })))
        }
        HealthRecord::Workout(w) => Ok(WireRecord::Data(DataEntry::Workout(WorkoutEntry {
            kind: "workout".to_string(),
            start_date,
            end_date,
            duration: w.duration_secs,
            activity_type: w.activity_kind.clone(),
            total_distance: w.total_distance.as_ref().map(|m| m.value),
            distance_unit: w.total_distance.as_ref().map(|m| m.unit.clone()),
            total_energy_burned: w.total_energy.as_ref().map(|m| m.value),
            energy_burned_unit: w.total_energy.as_ref().map(|m| m.unit.clone()),
        }))),
        HealthRecord::ActivitySummary(a) => Ok(WireRecord::Summary(encode_summary(a))),
    }
}

fn encode_summary(a: &ActivitySummaryRecord) -> DailySummaryEntry {
    let midnight = crate::record::RecordSpan::day(a.date).start();
    DailySummaryEntry {
        date: format_date(&midnight),
        move_time: a.move_time_secs,
        exercise_time: a.exercise_time_secs,
        active_energy_burned: a.active_energy.as_ref().map(|m| m.value),
        active_energy_unit: a.active_energy.as_ref().map(|m| m.unit.clone()),
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct UploadBatch {
    pub data: Vec<DataEntry>,
    #[serde(rename = "dailySummary")]
    pub daily_summary: Vec<DailySummaryEntry>,
}

impl UploadBatch {
    /// Encode every record, skipping (and logging) the ones that fail.
    pub fn from_records(records: &[HealthRecord]) -> Self {
        let mut batch = UploadBatch::default();
        for record in records {
            match encode_record(record) {
                Ok(WireRecord::Data(d)) => batch.data.push(d),
                Ok(WireRecord::Summary(s)) => batch.daily_summary.push(s),
                Err(e) => {
                    tracing::warn!(kind = record.kind(), error = %e, "skipping record");
                }
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.data.len() + self.daily_summary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PivotError> {
        serde_json::to_vec(self).map_err(|e| PivotError::UploadRequestConstruction(e.to_string()))
    }
}
