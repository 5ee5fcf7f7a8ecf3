use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EntryId = Uuid;

/// Upper bound on the estimated duration, in minutes (one leap year).
/// Keeps the expected-return arithmetic within chrono's range.
pub const MAX_ESTIMATED_DURATION: i64 = 60 * 24 * 366;

/// One departure/return record for the tracked subject.
/// An entry is born open (no return time) and is closed exactly once;
/// closed entries are immutable and are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    /// When the subject left
    pub departure_time: DateTime<Utc>,
    /// Planned time away, in minutes (always positive)
    pub estimated_duration: i64,
    /// When the subject came back; None while the entry is open
    #[serde(default)]
    pub return_time: Option<DateTime<Utc>>,
    /// Minutes late relative to the expected return; set together with
    /// return_time, never negative
    #[serde(default)]
    pub late_by: Option<i64>,
}

impl Entry {
    /// Create a new open entry with a fresh id.
    pub fn new(departure_time: DateTime<Utc>, estimated_duration: i64) -> Self {
        assert!(
            estimated_duration > 0,
            "Estimated duration must be positive"
        );
        assert!(
            estimated_duration <= MAX_ESTIMATED_DURATION,
            "Estimated duration out of range"
        );
        Self {
            id: Uuid::new_v4(),
            departure_time,
            estimated_duration,
            return_time: None,
            late_by: None,
        }
    }

    /// Returns true once a return time has been recorded.
    pub fn is_closed(&self) -> bool {
        self.return_time.is_some()
    }

    /// The instant the subject was expected back: departure plus the
    /// estimated duration as a wall-clock offset (not calendar-aware).
    pub fn expected_return(&self) -> DateTime<Utc> {
        self.departure_time + Duration::minutes(self.estimated_duration)
    }

    /// Record the return and derive lateness. The caller must have checked
    /// the lifecycle guards; this transition is one-way.
    pub fn close(&mut self, return_time: DateTime<Utc>) {
        assert!(self.return_time.is_none(), "Entry is already closed");
        assert!(
            return_time >= self.departure_time,
            "Return time must not precede departure time"
        );
        self.late_by = Some(compute_late_by(
            self.departure_time,
            self.estimated_duration,
            return_time,
        ));
        self.return_time = Some(return_time);
    }
}

/// Minutes by which the return exceeded the expected return, never negative.
/// The millisecond difference is converted to minutes and rounded to the
/// nearest minute, ties away from zero.
pub fn compute_late_by(
    departure_time: DateTime<Utc>,
    estimated_duration: i64,
    return_time: DateTime<Utc>,
) -> i64 {
    let expected = departure_time + Duration::minutes(estimated_duration);
    let diff_ms = return_time.signed_duration_since(expected).num_milliseconds();
    let minutes = (diff_ms as f64 / 60_000.0).round() as i64;
    minutes.max(0)
}
