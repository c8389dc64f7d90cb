// libs/scheduling-cell/src/services/window.rs
//
// Pure time arithmetic for appointment windows. Everything here is
// deterministic given its inputs and the caller-supplied `now`; no clock or
// store access.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Appointment, SchedulingError};

/// Primary deployment region, minutes ahead of UTC. Used whenever a record
/// carries no offset of its own.
pub const DEFAULT_REGION_OFFSET_MINUTES: i32 = 300;

/// How many minutes before the start instant the access window opens.
pub const DEFAULT_ACCESS_BUFFER_MINUTES: i64 = 2;

/// An explicit end time more than this many minutes before the start is an
/// overnight slot ending on the following day.
const OVERNIGHT_ROLLOVER_MINUTES: i64 = 12 * 60;

// ==============================================================================
// LEGACY OFFSET COMPATIBILITY SHIM
// ==============================================================================

/// Compensates for historically mis-stored timezone offsets. A batch of old
/// records persisted +60 for what was actually a +300 region; those records
/// are recognizable by an afternoon/evening wall-clock hour. Retire this once
/// the data is backfilled. Do NOT extend the heuristic to other offsets.
pub fn legacy_offset_shim(stored_offset: Option<i32>, start_hour: u32) -> i32 {
    match stored_offset {
        None => DEFAULT_REGION_OFFSET_MINUTES,
        Some(60) if start_hour >= 12 => DEFAULT_REGION_OFFSET_MINUTES,
        Some(offset) => offset,
    }
}

// ==============================================================================
// RESOLVER TYPES
// ==============================================================================

#[derive(Debug, Clone, Copy)]
pub struct WindowInputs<'a> {
    /// The calendar date as persisted (local midnight shifted into UTC, or
    /// plain UTC midnight for records written by older code).
    pub stored_date: DateTime<Utc>,
    pub start_time: &'a str,
    pub end_time: Option<&'a str>,
    pub timezone_offset_minutes: Option<i32>,
    pub duration_minutes: i32,
}

impl<'a> WindowInputs<'a> {
    pub fn from_appointment(appointment: &'a Appointment) -> Self {
        Self {
            stored_date: appointment.appointment_date,
            start_time: &appointment.start_time,
            end_time: appointment.end_time.as_deref(),
            timezone_offset_minutes: appointment.timezone_offset_minutes,
            duration_minutes: appointment.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub earliest_allowed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowDenial {
    BeforeStart { opens_at: DateTime<Utc> },
    AfterEnd { closed_at: DateTime<Utc> },
}

impl WindowDenial {
    /// Caller-facing description of the window the request missed.
    pub fn description(&self) -> String {
        match self {
            WindowDenial::BeforeStart { opens_at } => format!(
                "The session is not open yet; access opens at {}",
                opens_at.format("%Y-%m-%d %H:%M UTC")
            ),
            WindowDenial::AfterEnd { closed_at } => format!(
                "The session window closed at {}",
                closed_at.format("%Y-%m-%d %H:%M UTC")
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowCheck {
    pub is_valid: bool,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub reason: Option<WindowDenial>,
}

// ==============================================================================
// RESOLUTION
// ==============================================================================

pub fn parse_wall_clock(value: &str) -> Result<(u32, u32), SchedulingError> {
    let mut parts = value.splitn(2, ':');
    let hour = parts
        .next()
        .and_then(|h| h.parse::<u32>().ok())
        .filter(|h| *h < 24);
    let minute = parts
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .filter(|m| *m < 60);

    match (hour, minute) {
        (Some(h), Some(m)) => Ok((h, m)),
        _ => Err(SchedulingError::Validation(format!(
            "Invalid wall-clock time '{}', expected HH:MM",
            value
        ))),
    }
}

/// Recovers the intended local calendar date from the stored instant.
///
/// A record stored as UTC midnight sits exactly on 00:00:00 and its UTC date
/// is the intended one. A record stored as local midnight was shifted by its
/// offset on the way in, so shifting it back recovers the local date. Same-day
/// cases resolve identically through either branch.
pub fn intended_calendar_date(stored: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
    if stored.time() == NaiveTime::MIN {
        stored.date_naive()
    } else {
        (stored + Duration::minutes(offset_minutes as i64)).date_naive()
    }
}

/// Resolves absolute start/end instants and the access-window opening for an
/// appointment-like record.
pub fn resolve_window(
    inputs: WindowInputs<'_>,
    buffer_minutes: i64,
) -> Result<ResolvedWindow, SchedulingError> {
    let (start_hour, start_minute) = parse_wall_clock(inputs.start_time)?;
    let offset = legacy_offset_shim(inputs.timezone_offset_minutes, start_hour);
    let offset_duration = Duration::minutes(offset as i64);

    let date = intended_calendar_date(inputs.stored_date, offset);

    let start_naive = date
        .and_hms_opt(start_hour, start_minute, 0)
        .ok_or_else(|| SchedulingError::Validation("Invalid start time".to_string()))?;
    let start_utc = Utc.from_utc_datetime(&start_naive) - offset_duration;

    let end_utc = match inputs.end_time {
        Some(end_raw) => {
            let (end_hour, end_minute) = parse_wall_clock(end_raw)?;
            let mut end_naive = date
                .and_hms_opt(end_hour, end_minute, 0)
                .ok_or_else(|| SchedulingError::Validation("Invalid end time".to_string()))?;

            // Overnight slot: an end wall-clock far before the start belongs
            // to the next calendar day.
            if (start_naive - end_naive) > Duration::minutes(OVERNIGHT_ROLLOVER_MINUTES) {
                end_naive += Duration::days(1);
            }
            Utc.from_utc_datetime(&end_naive) - offset_duration
        }
        None => {
            if inputs.duration_minutes <= 0 {
                return Err(SchedulingError::Validation(
                    "Appointment duration must be positive".to_string(),
                ));
            }
            start_utc + Duration::minutes(inputs.duration_minutes as i64)
        }
    };

    Ok(ResolvedWindow {
        start_utc,
        end_utc,
        earliest_allowed: start_utc - Duration::minutes(buffer_minutes),
    })
}

/// `is_valid = now ∈ [earliest_allowed, end_utc]`.
pub fn check_access(
    inputs: WindowInputs<'_>,
    buffer_minutes: i64,
    now: DateTime<Utc>,
) -> Result<WindowCheck, SchedulingError> {
    let window = resolve_window(inputs, buffer_minutes)?;

    let reason = if now < window.earliest_allowed {
        Some(WindowDenial::BeforeStart {
            opens_at: window.earliest_allowed,
        })
    } else if now > window.end_utc {
        Some(WindowDenial::AfterEnd {
            closed_at: window.end_utc,
        })
    } else {
        None
    };

    Ok(WindowCheck {
        is_valid: reason.is_none(),
        start_utc: window.start_utc,
        end_utc: window.end_utc,
        reason,
    })
}

/// Persisted form of an intended calendar date: local midnight shifted into
/// UTC, so the date component survives storage round-trips.
pub fn store_calendar_date(date: NaiveDate, offset_minutes: i32) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&local_midnight) - Duration::minutes(offset_minutes as i64)
}
