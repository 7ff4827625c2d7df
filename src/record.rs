//! The canonical activity record, the normalizer producing it and the differ comparing them.
//!
//! Incoming club activities and rows already in the destination table are both pushed through
//! the same normalization so that they can be compared field by field. There is no key field:
//! two records are the same activity iff every canonical field is equal.

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Credit awarded per synced activity in the fitness layout.
const EARNINGS_PER_ACTIVITY: i64 = 1;

/// Which table layout to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSchema {
    /// Rounded distance and moving time, sport type as sent by Strava.
    Strava,
    /// Raw distance and moving time, spaced-out sport type, one credit and the sync date.
    Fitness,
}
impl RecordSchema {
    pub fn default_table(self) -> &'static str {
        match self {
            Self::Strava => "PPStravaActivities",
            Self::Fitness => "PPFitnessActivities",
        }
    }

    pub fn default_per_page(self) -> u32 {
        match self {
            Self::Strava => 6,
            Self::Fitness => 20,
        }
    }

    /// Columns written on insert, in table order. The row id is generated by the database.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Strava => &[
                "firstName",
                "lastName",
                "activityName",
                "distance",
                "movingTime",
                "sportType",
            ],
            Self::Fitness => &[
                "firstName",
                "lastName",
                "activityName",
                "distance",
                "movingTime",
                "sportType",
                "earnings",
                "date",
            ],
        }
    }

    fn measure(self, value: f64) -> Measure {
        match self {
            // half-to-even, the way the table has always been filled
            Self::Strava => Measure::Whole(value.round_ties_even() as i64),
            Self::Fitness => Measure::Exact(value),
        }
    }

    /// Both sides of the comparison go through here with the same `today`, so in the fitness
    /// layout the credit and the run date never make two records differ.
    pub fn normalize(self, fields: ActivityFields, today: NaiveDate) -> ActivityRecord {
        let (sport_type, earnings, date) = match self {
            Self::Strava => (fields.sport_type, None, None),
            Self::Fitness => (
                format_sport_type(&fields.sport_type),
                Some(EARNINGS_PER_ACTIVITY),
                Some(today.format("%Y-%m-%d").to_string()),
            ),
        };
        ActivityRecord {
            first_name: fields.first_name,
            last_name: fields.last_name,
            activity_name: fields.activity_name,
            distance: self.measure(fields.distance),
            moving_time: self.measure(fields.moving_time),
            sport_type,
            earnings,
            date,
        }
    }

    /// Normalize a row read back from the destination table, dropping its id.
    ///
    /// The stored credit and date are replaced by those of the current run.
    pub fn normalize_stored(self, row: StoredActivity, today: NaiveDate) -> ActivityRecord {
        let StoredActivity {
            first_name,
            last_name,
            activity_name,
            distance,
            moving_time,
            sport_type,
        } = row;
        self.normalize(
            ActivityFields {
                first_name,
                last_name,
                activity_name,
                distance,
                moving_time,
                sport_type,
            },
            today,
        )
    }
}

/// A distance or duration, either rounded to a whole unit or kept as received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Measure {
    Whole(i64),
    Exact(f64),
}

/// The fields shared by club activities and stored rows, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityFields {
    pub first_name: String,
    pub last_name: String,
    pub activity_name: String,
    /// meters
    pub distance: f64,
    /// seconds
    pub moving_time: f64,
    pub sport_type: String,
}

/// A row of the destination table as returned by a full select.
///
/// Any extra column (the generated `id`, and `earnings`/`date` in the fitness layout) is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredActivity {
    pub first_name: String,
    pub last_name: String,
    pub activity_name: String,
    pub distance: f64,
    pub moving_time: f64,
    pub sport_type: String,
}

/// One activity in canonical form. This is exactly what gets inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub first_name: String,
    pub last_name: String,
    pub activity_name: String,
    pub distance: Measure,
    pub moving_time: Measure,
    pub sport_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earnings: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Turn a camel-case sport type into space separated words.
///
/// Every capital letter starts a new word, so `EBikeRide` becomes `E Bike Ride`. Existing
/// whitespace is collapsed, which makes this safe to apply to already formatted values.
pub fn format_sport_type(raw: &str) -> String {
    let mut words = Vec::new();
    for chunk in raw.split_whitespace() {
        let mut word = String::new();
        for c in chunk.chars() {
            if c.is_uppercase() && !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            word.push(c);
        }
        if !word.is_empty() {
            words.push(word);
        }
    }
    words.iter().join(" ")
}

/// All records of `incoming` that do not appear anywhere in `existing`, in their original order.
///
/// Duplicates within `incoming` are kept.
pub fn missing_from(
    incoming: Vec<ActivityRecord>,
    existing: &[ActivityRecord],
) -> Vec<ActivityRecord> {
    incoming
        .into_iter()
        .filter(|activity| !existing.contains(activity))
        .collect()
}
