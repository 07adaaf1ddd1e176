//! Static registry of every health-data kind the collector tracks.
//!
//! Kind ids are the store's type identifiers; display names are what ends up
//! in the `type` field of the upload body.

use crate::PivotError;

/// How daily statistics for a quantity kind are reduced to a single value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Average,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindShape {
    Quantity(Aggregation),
    /// Raw category values paired with their wire names.
    Category(&'static [(i64, &'static str)]),
    Workout,
    ActivitySummary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind_id: &'static str,
    pub display_name: &'static str,
    pub unit: &'static str,
    pub shape: KindShape,
}

impl CatalogEntry {
    /// Wire name for a raw category value, if this entry has a vocabulary.
    pub fn category_name(&self, raw: i64) -> Option<&'static str> {
        match self.shape {
            KindShape::Category(vocab) => vocab
                .iter()
                .find(|(value, _)| *value == raw)
                .map(|(_, name)| *name),
            _ => None,
        }
    }
}

pub const WORKOUT_KIND: &str = "HKWorkoutTypeIdentifier";
pub const ACTIVITY_SUMMARY_KIND: &str = "HKActivitySummaryTypeIdentifier";

const SLEEP_VALUES: &[(i64, &str)] = &[(0, "inBed"), (1, "asleep"), (2, "awake")];

const fn quantity(
    kind_id: &'static str,
    display_name: &'static str,
    unit: &'static str,
    aggregation: Aggregation,
) -> CatalogEntry {
    CatalogEntry {
        kind_id,
        display_name,
        unit,
        shape: KindShape::Quantity(aggregation),
    }
}

static ENTRIES: &[CatalogEntry] = &[
    quantity("HKQuantityTypeIdentifierStepCount", "stepCount", "count", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierFlightsClimbed", "flightsClimbed", "count", Aggregation::Sum),
    quantity(
        "HKQuantityTypeIdentifierDistanceWalkingRunning",
        "distanceWalkingRunning",
        "m",
        Aggregation::Sum,
    ),
    quantity("HKQuantityTypeIdentifierDistanceCycling", "distanceCycling", "m", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDistanceSwimming", "distanceSwimming", "m", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierBodyMass", "bodyMass", "kg", Aggregation::Average),
    quantity(
        "HKQuantityTypeIdentifierBasalEnergyBurned",
        "basalEnergyBurned",
        "kcal",
        Aggregation::Sum,
    ),
    quantity(
        "HKQuantityTypeIdentifierActiveEnergyBurned",
        "activeEnergyBurned",
        "kcal",
        Aggregation::Sum,
    ),
    quantity(
        "HKQuantityTypeIdentifierDietaryEnergyConsumed",
        "dietaryEnergyConsumed",
        "kcal",
        Aggregation::Sum,
    ),
    quantity("HKQuantityTypeIdentifierDietaryFatTotal", "dietaryFatTotal", "g", Aggregation::Sum),
    quantity(
        "HKQuantityTypeIdentifierDietaryCarbohydrates",
        "dietaryCarbohydrates",
        "g",
        Aggregation::Sum,
    ),
    quantity("HKQuantityTypeIdentifierDietaryProtein", "dietaryProtein", "g", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDietarySugar", "dietarySugar", "g", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDietaryIron", "dietaryIron", "g", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDietaryFiber", "dietaryFiber", "g", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDietarySodium", "dietarySodium", "g", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDietaryCalcium", "dietaryCalcium", "g", Aggregation::Sum),
    quantity("HKQuantityTypeIdentifierDietaryWater", "dietaryWater", "L", Aggregation::Sum),
    CatalogEntry {
        kind_id: "HKCategoryTypeIdentifierSleepAnalysis",
        display_name: "sleepAnalysis",
        unit: "hr",
        shape: KindShape::Category(SLEEP_VALUES),
    },
    CatalogEntry {
        kind_id: WORKOUT_KIND,
        display_name: "workout",
        unit: "s",
        shape: KindShape::Workout,
    },
    CatalogEntry {
        kind_id: ACTIVITY_SUMMARY_KIND,
        display_name: "activitySummary",
        unit: "kcal",
        shape: KindShape::ActivitySummary,
    },
];

pub fn entry(kind_id: &str) -> Option<&'static CatalogEntry> {
    ENTRIES.iter().find(|e| e.kind_id == kind_id)
}

/// Look up by wire name instead of kind id.
pub fn entry_by_name(display_name: &str) -> Option<&'static CatalogEntry> {
    ENTRIES.iter().find(|e| e.display_name == display_name)
}

pub fn unit(kind_id: &str) -> Result<&'static str, PivotError> {
    entry(kind_id)
        .map(|e| e.unit)
        .ok_or_else(|| PivotError::NoUnitFound(kind_id.to_string()))
}

pub fn display_name(kind_id: &str) -> Result<&'static str, PivotError> {
    entry(kind_id)
        .map(|e| e.display_name)
        .ok_or_else(|| PivotError::NoNameFound(kind_id.to_string()))
}

/// Every kind id the collector issues a query for, in catalog order.
pub fn tracked_kinds() -> impl Iterator<Item = &'static str> {
    ENTRIES.iter().map(|e| e.kind_id)
}

/// Canonical activity name for a workout activity code; unknown codes map to
/// `other`.
pub fn workout_activity_name(code: u32) -> &'static str {
    const NAMES: &[&str] = &[
        "americanFootball",
        "archery",
        "australianFootball",
        "badminton",
        "baseball",
        "basketball",
        "bowling",
        "boxing",
        "climbing",
        "cricket",
        "crossTraining",
        "curling",
        "cycling",
        "dance",
        "danceInspiredTraining",
        "elliptical",
        "equestrianSports",
        "fencing",
        "fishing",
        "functionalStrengthTraining",
        "golf",
        "gymnastics",
        "handball",
        "hiking",
        "hockey",
        "hunting",
        "lacrosse",
        "martialArts",
        "mindAndBody",
        "mixedMetabolicCardioTraining",
        "paddleSports",
        "play",
        "preparationAndRecovery",
        "racquetball",
        "rowing",
        "rugby",
        "running",
        "sailing",
        "skatingSports",
        "snowSports",
        "soccer",
        "softball",
        "squash",
        "stairClimbing",
        "surfingSports",
        "swimming",
        "tableTennis",
        "tennis",
        "trackAndField",
        "traditionalStrengthTraining",
        "volleyball",
        "walking",
        "waterFitness",
        "waterPolo",
        "waterSports",
        "wrestling",
        "yoga",
        "barre",
        "coreTraining",
        "crossCountrySkiing",
        "downhillSkiing",
        "flexibility",
        "highIntensityIntervalTraining",
        "jumpRope",
        "kickboxing",
        "pilates",
        "snowboarding",
        "stairs",
        "stepTraining",
        "wheelchairWalkPace",
        "wheelchairRunPace",
        "taiChi",
        "mixedCardio",
        "handCycling",
        "discSports",
        "fitnessGaming",
        "cardioDance",
        "socialDance",
        "pickleball",
        "cooldown",
    ];
    // codes start at 1
    code.checked_sub(1)
        .and_then(|idx| NAMES.get(idx as usize))
        .copied()
        .unwrap_or("other")
}
