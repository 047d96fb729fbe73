//! Weekly recurring schedules
//!
//! A [`Schedule`] describes a window inside the week (start and stop point,
//! each a weekday plus time of day) and a repeat stride. The endpoint is
//! synchronized at `start`, `start + stride`, `start + 2*stride`, ... up to
//! and including `stop`.
//!
//! ## Week arithmetic
//!
//! All computations use *minutes since Monday 00:00* in the time zone of the
//! reference instant. A schedule whose remaining runs for this week are
//! exhausted wraps to its first run of the following week.
//!
//! [`next_due`] reduces a set of schedules to the single [`NextSync`] the
//! dispatcher should sleep on. When the earliest run lies beyond the coming
//! week boundary, a rollover sentinel at the boundary is returned instead,
//! so the dispatcher re-reads the schedules once per week at least.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{EndpointId, ScheduleId};

/// Shortest allowed repeat stride
pub const MIN_STRIDE_MINUTES: u32 = 5;

const MINUTES_PER_DAY: i64 = 24 * 60;
const MINUTES_PER_WEEK: i64 = 7 * MINUTES_PER_DAY;

// ============================================================================
// WeekPoint
// ============================================================================

/// A point inside the week: weekday plus time of day (minute precision)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekPoint {
    /// Day of the week
    pub day: Weekday,
    /// Time of day; seconds are ignored
    pub time: NaiveTime,
}

impl WeekPoint {
    /// Build a week point, `None` if hour/minute are out of range
    pub fn new(day: Weekday, hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { day, time })
    }

    /// Minutes since Monday 00:00
    pub fn minute_of_week(&self) -> i64 {
        i64::from(self.day.num_days_from_monday()) * MINUTES_PER_DAY
            + i64::from(self.time.hour()) * 60
            + i64::from(self.time.minute())
    }

    /// Inverse of [`minute_of_week`](Self::minute_of_week), wrapping modulo one week
    pub fn from_minute_of_week(minutes: i64) -> Self {
        let minutes = minutes.rem_euclid(MINUTES_PER_WEEK);
        let day = Weekday::try_from((minutes / MINUTES_PER_DAY) as u8).unwrap_or(Weekday::Mon);
        let in_day = minutes % MINUTES_PER_DAY;
        Self {
            day,
            time: NaiveTime::from_hms_opt((in_day / 60) as u32, (in_day % 60) as u32, 0)
                .unwrap_or(NaiveTime::MIN),
        }
    }
}

impl std::fmt::Display for WeekPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.day, self.time.format("%H:%M"))
    }
}

/// Minutes since Monday 00:00 of an instant, truncated to the minute
fn minute_of_week<Tz: TimeZone>(at: &DateTime<Tz>) -> i64 {
    i64::from(at.weekday().num_days_from_monday()) * MINUTES_PER_DAY
        + i64::from(at.hour()) * 60
        + i64::from(at.minute())
}

/// The instant truncated to the start of its minute
fn floor_to_minute<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Tz> {
    at.clone()
        - Duration::seconds(i64::from(at.second()))
        - Duration::nanoseconds(i64::from(at.nanosecond()))
}

/// Start of the next week (Monday 00:00) after `now`
pub fn next_week_start<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let floor = floor_to_minute(now);
    let offset = MINUTES_PER_WEEK - minute_of_week(&floor);
    floor + Duration::minutes(offset)
}

// ============================================================================
// Schedule
// ============================================================================

/// A recurring weekly transfer window for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique id (0 until inserted)
    pub id: ScheduleId,
    /// Endpoint this schedule triggers
    pub endpoint_id: EndpointId,
    /// Display name
    pub name: String,
    /// First run inside the week
    pub start: WeekPoint,
    /// Last possible run inside the week
    pub stop: WeekPoint,
    /// Minutes between runs
    pub stride_minutes: u32,
    /// Disabled schedules never produce a next run
    pub enabled: bool,
}

impl Schedule {
    /// Create an enabled schedule
    pub fn new(
        id: ScheduleId,
        endpoint_id: EndpointId,
        name: impl Into<String>,
        start: WeekPoint,
        stop: WeekPoint,
        stride_minutes: u32,
    ) -> Self {
        Self {
            id,
            endpoint_id,
            name: name.into(),
            start,
            stop,
            stride_minutes,
            enabled: true,
        }
    }

    /// Check the window invariants
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidSchedule`] if start is after stop or the
    /// stride is shorter than [`MIN_STRIDE_MINUTES`].
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.start.minute_of_week() > self.stop.minute_of_week() {
            return Err(DomainError::InvalidSchedule(format!(
                "start ({}) is after stop ({})",
                self.start, self.stop
            )));
        }
        if self.stride_minutes < MIN_STRIDE_MINUTES {
            return Err(DomainError::InvalidSchedule(format!(
                "stride must be at least {} minutes, got {}",
                MIN_STRIDE_MINUTES, self.stride_minutes
            )));
        }
        Ok(())
    }

    /// Number of runs per week: `1 + floor((stop - start) / stride)`
    ///
    /// Returns 0 for a schedule that fails [`validate`](Self::validate).
    pub fn repeats(&self) -> u32 {
        if self.validate().is_err() {
            return 0;
        }
        let span = self.stop.minute_of_week() - self.start.minute_of_week();
        1 + (span / i64::from(self.stride_minutes)) as u32
    }

    /// Run offsets (minutes since Monday 00:00) inside one week, ascending
    pub fn run_offsets(&self) -> impl Iterator<Item = i64> + '_ {
        let start = self.start.minute_of_week();
        let stride = i64::from(self.stride_minutes.max(1));
        (0..i64::from(self.repeats())).map(move |k| start + k * stride)
    }

    /// Earliest run at or after `now` (minute precision)
    ///
    /// Returns `None` for disabled or invalid schedules. When every run of the
    /// current week has passed, the first run of the next week is returned.
    pub fn next_run_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if !self.enabled || self.validate().is_err() {
            return None;
        }

        let floor = floor_to_minute(now);
        let floor_minute = minute_of_week(&floor);
        // A partially elapsed minute counts as passed.
        let now_minute = if floor < *now {
            floor_minute + 1
        } else {
            floor_minute
        };

        let target = self
            .run_offsets()
            .find(|offset| *offset >= now_minute)
            .unwrap_or(self.start.minute_of_week() + MINUTES_PER_WEEK);

        Some(floor + Duration::minutes(target - floor_minute))
    }
}

// ============================================================================
// NextSync / Fingerprint
// ============================================================================

/// Identity of a polled schedule item: "this schedule at this due time"
///
/// Two consecutive polls yielding the same fingerprint must not dispatch
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Schedule id, `None` for the rollover sentinel
    pub schedule_id: Option<ScheduleId>,
    /// Computed due time
    pub due: DateTime<Utc>,
}

/// The next item the dispatcher should wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSync {
    /// A real schedule run
    Scheduled {
        /// Schedule that is due
        schedule_id: ScheduleId,
        /// Endpoint bound to the schedule
        endpoint_id: EndpointId,
        /// Display name of the schedule
        name: String,
        /// When the run is due
        due: DateTime<Utc>,
    },
    /// Nothing is due before the week boundary; wake up and re-read then
    Rollover {
        /// The week boundary
        due: DateTime<Utc>,
    },
}

impl NextSync {
    /// When the item is due
    pub fn due(&self) -> DateTime<Utc> {
        match self {
            NextSync::Scheduled { due, .. } | NextSync::Rollover { due } => *due,
        }
    }

    /// True for the week-rollover sentinel
    pub fn is_rollover(&self) -> bool {
        matches!(self, NextSync::Rollover { .. })
    }

    /// Schedule id for real runs
    pub fn schedule_id(&self) -> Option<ScheduleId> {
        match self {
            NextSync::Scheduled { schedule_id, .. } => Some(*schedule_id),
            NextSync::Rollover { .. } => None,
        }
    }

    /// Fingerprint combining schedule id and due time
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            schedule_id: self.schedule_id(),
            due: self.due(),
        }
    }
}

/// Selects the earliest due run among `schedules`
///
/// Returns `None` when no schedule is enabled and valid ("no schedule
/// configured"). Ties are broken by schedule id for determinism.
pub fn next_due<Tz: TimeZone>(schedules: &[Schedule], now: &DateTime<Tz>) -> Option<NextSync> {
    let (schedule, due) = schedules
        .iter()
        .filter_map(|s| s.next_run_after(now).map(|due| (s, due)))
        .min_by(|(a, da), (b, db)| da.cmp(db).then(a.id.cmp(&b.id)))?;

    // A run exactly on the boundary belongs to the next week but is still a
    // real run; only later ones are deferred behind the sentinel.
    let boundary = next_week_start(now);
    if due > boundary {
        return Some(NextSync::Rollover {
            due: boundary.with_timezone(&Utc),
        });
    }

    Some(NextSync::Scheduled {
        schedule_id: schedule.id,
        endpoint_id: schedule.endpoint_id,
        name: schedule.name.clone(),
        due: due.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(day: Weekday, hour: u32, minute: u32) -> WeekPoint {
        WeekPoint::new(day, hour, minute).unwrap()
    }

    fn schedule(start: WeekPoint, stop: WeekPoint, stride: u32) -> Schedule {
        Schedule::new(
            ScheduleId::new(1),
            EndpointId::new(10),
            "office hours",
            start,
            stop,
            stride,
        )
    }

    /// 2024-01-01 was a Monday
    fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_week_point_minutes() {
        assert_eq!(point(Weekday::Mon, 0, 0).minute_of_week(), 0);
        assert_eq!(point(Weekday::Tue, 1, 30).minute_of_week(), 1440 + 90);
        let p = WeekPoint::from_minute_of_week(1440 + 90);
        assert_eq!(p, point(Weekday::Tue, 1, 30));
        assert_eq!(WeekPoint::from_minute_of_week(MINUTES_PER_WEEK), point(Weekday::Mon, 0, 0));
    }

    #[test]
    fn test_repeats_formula() {
        // Mon 08:00 .. Mon 09:00 every 15 minutes: 08:00, 08:15, 08:30, 08:45, 09:00
        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        assert_eq!(s.repeats(), 5);

        // Stride does not divide span: floor
        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 25);
        assert_eq!(s.repeats(), 3);

        // Single-point window
        let s = schedule(point(Weekday::Fri, 17, 0), point(Weekday::Fri, 17, 0), 5);
        assert_eq!(s.repeats(), 1);
    }

    #[test]
    fn test_repeats_at_least_one_for_all_valid_windows() {
        for stride in [5u32, 7, 60, 1440, 10_080] {
            for span in [0i64, 4, 5, 59, 600, 10_079] {
                let s = schedule(
                    point(Weekday::Mon, 0, 0),
                    WeekPoint::from_minute_of_week(span),
                    stride,
                );
                let expected = 1 + (span / i64::from(stride)) as u32;
                assert_eq!(s.repeats(), expected, "stride {stride} span {span}");
                assert!(s.repeats() >= 1);
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let s = schedule(point(Weekday::Tue, 8, 0), point(Weekday::Mon, 9, 0), 15);
        assert!(matches!(s.validate(), Err(DomainError::InvalidSchedule(_))));
        assert_eq!(s.repeats(), 0);

        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 4);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_next_run_within_window() {
        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        assert_eq!(s.next_run_after(&monday(7, 0)), Some(monday(8, 0)));
        assert_eq!(s.next_run_after(&monday(8, 0)), Some(monday(8, 0)));
        assert_eq!(s.next_run_after(&monday(8, 1)), Some(monday(8, 15)));
        assert_eq!(s.next_run_after(&monday(9, 0)), Some(monday(9, 0)));
    }

    #[test]
    fn test_next_run_partial_minute_counts_as_passed() {
        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        let now = monday(8, 0) + Duration::seconds(10);
        assert_eq!(s.next_run_after(&now), Some(monday(8, 15)));
    }

    #[test]
    fn test_next_run_wraps_to_next_week() {
        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        let after = monday(9, 1);
        assert_eq!(s.next_run_after(&after), Some(monday(8, 0) + Duration::days(7)));
    }

    #[test]
    fn test_disabled_schedule_has_no_next_run() {
        let mut s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        s.enabled = false;
        assert_eq!(s.next_run_after(&monday(7, 0)), None);
    }

    #[test]
    fn test_next_due_picks_earliest() {
        let a = schedule(point(Weekday::Mon, 10, 0), point(Weekday::Mon, 11, 0), 30);
        let mut b = schedule(point(Weekday::Mon, 9, 0), point(Weekday::Mon, 9, 0), 5);
        b.id = ScheduleId::new(2);
        b.endpoint_id = EndpointId::new(20);

        let next = next_due(&[a, b], &monday(8, 0)).unwrap();
        match next {
            NextSync::Scheduled {
                schedule_id,
                endpoint_id,
                due,
                ..
            } => {
                assert_eq!(schedule_id, ScheduleId::new(2));
                assert_eq!(endpoint_id, EndpointId::new(20));
                assert_eq!(due, monday(9, 0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_next_due_rollover_sentinel() {
        // Only runs Monday morning; asked on Monday afternoon the next run is
        // next week, so the boundary sentinel is returned.
        let s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        let next = next_due(&[s], &monday(15, 0)).unwrap();
        assert!(next.is_rollover());
        assert_eq!(next.due(), monday(0, 0) + Duration::days(7));
        assert_eq!(next.schedule_id(), None);
    }

    #[test]
    fn test_next_due_monday_midnight_run_on_week_boundary() {
        let s = schedule(point(Weekday::Mon, 0, 0), point(Weekday::Mon, 1, 0), 5);
        // Sunday 2024-01-07 23:00
        let sunday_night = monday(23, 0) + Duration::days(6);
        let next_monday = monday(0, 0) + Duration::days(7);

        let next = next_due(&[s.clone()], &sunday_night).unwrap();
        assert!(!next.is_rollover(), "boundary run deferred: {next:?}");
        assert_eq!(next.schedule_id(), Some(ScheduleId::new(1)));
        assert_eq!(next.due(), next_monday);

        // polled on the boundary itself the run is due immediately
        let at_boundary = next_due(&[s], &next_monday).unwrap();
        assert_eq!(at_boundary.schedule_id(), Some(ScheduleId::new(1)));
        assert_eq!(at_boundary.due(), next_monday);
    }

    #[test]
    fn test_next_due_none_without_enabled_schedules() {
        let mut s = schedule(point(Weekday::Mon, 8, 0), point(Weekday::Mon, 9, 0), 15);
        s.enabled = false;
        assert!(next_due(&[s], &monday(7, 0)).is_none());
        assert!(next_due(&[], &monday(7, 0)).is_none());
    }

    #[test]
    fn test_fingerprint_equality() {
        let a = NextSync::Scheduled {
            schedule_id: ScheduleId::new(1),
            endpoint_id: EndpointId::new(1),
            name: "a".into(),
            due: monday(8, 0),
        };
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = NextSync::Scheduled {
            schedule_id: ScheduleId::new(1),
            endpoint_id: EndpointId::new(1),
            name: "a".into(),
            due: monday(8, 15),
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
