use crate::error::{EnsembleError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Calendars whose dates map one-to-one onto chrono's proleptic Gregorian calendar
pub const SUPPORTED_CALENDARS: &[&str] = &["standard", "gregorian", "proleptic_gregorian"];

/// Unit of a CF `<unit> since <epoch>` time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Days => 86400.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Seconds => 1.0,
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => Some(TimeUnit::Days),
            "hours" | "hour" | "hr" | "h" => Some(TimeUnit::Hours),
            "minutes" | "minute" | "min" => Some(TimeUnit::Minutes),
            "seconds" | "second" | "sec" | "s" => Some(TimeUnit::Seconds),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TimeUnit::Days => "days",
            TimeUnit::Hours => "hours",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Seconds => "seconds",
        }
    }
}

/// Parsed CF time units such as `days since 2016-01-01 00:00:00`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfTimeUnits {
    pub unit: TimeUnit,
    pub epoch: DateTime<Utc>,
}

impl CfTimeUnits {
    pub fn new(unit: TimeUnit, epoch: DateTime<Utc>) -> Self {
        Self { unit, epoch }
    }

    /// Parse a CF units string
    pub fn parse(units: &str) -> Result<Self> {
        let parts: Vec<&str> = units.trim().splitn(3, ' ').collect();
        if parts.len() < 3 || !parts[1].eq_ignore_ascii_case("since") {
            return Err(EnsembleError::InvalidTime {
                reason: format!("unexpected time units format: '{}'", units),
            });
        }

        let unit = TimeUnit::parse(parts[0]).ok_or_else(|| EnsembleError::InvalidTime {
            reason: format!("unsupported time unit '{}' in '{}'", parts[0], units),
        })?;
        let epoch = parse_epoch(parts[2])?;

        Ok(Self { unit, epoch })
    }

    /// Convert an offset along this axis into a UTC datetime
    pub fn decode(&self, offset: f64) -> Result<DateTime<Utc>> {
        if !offset.is_finite() {
            return Err(EnsembleError::InvalidTime {
                reason: format!("non-finite time offset {}", offset),
            });
        }
        let millis = (offset * self.unit.seconds() * 1000.0).round() as i64;
        Duration::try_milliseconds(millis)
            .and_then(|elapsed| self.epoch.checked_add_signed(elapsed))
            .ok_or_else(|| EnsembleError::InvalidTime {
                reason: format!("offset {} {} overflows the calendar", offset, self.unit.label()),
            })
    }

    /// Convert a UTC datetime into an offset along this axis
    pub fn encode(&self, datetime: &DateTime<Utc>) -> f64 {
        let elapsed = datetime.signed_duration_since(self.epoch);
        elapsed.num_milliseconds() as f64 / 1000.0 / self.unit.seconds()
    }
}

impl fmt::Display for CfTimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} since {}",
            self.unit.label(),
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn parse_epoch(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00")
        .trim();

    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| EnsembleError::InvalidTime {
            reason: format!("cannot parse time origin '{}'", text),
        })
}

/// Reject calendars that cannot be represented with chrono dates
pub fn check_calendar(calendar: Option<&str>) -> Result<()> {
    match calendar {
        None => Ok(()),
        Some(name) if SUPPORTED_CALENDARS.contains(&name.to_ascii_lowercase().as_str()) => Ok(()),
        Some(name) => Err(EnsembleError::InvalidTime {
            reason: format!("unsupported calendar '{}'", name),
        }),
    }
}

/// Decode raw CF offsets into UTC datetimes
pub fn decode_times(units: &str, calendar: Option<&str>, offsets: &[f64]) -> Result<Vec<DateTime<Utc>>> {
    check_calendar(calendar)?;
    let units = CfTimeUnits::parse(units)?;
    offsets.iter().map(|&offset| units.decode(offset)).collect()
}

/// True when every time step is later than the one before it
pub fn is_strictly_increasing(times: &[DateTime<Utc>]) -> bool {
    times.windows(2).all(|pair| pair[0] < pair[1])
}

/// Parse a user supplied datetime, either `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>> {
    parse_epoch(text).map_err(|_| EnsembleError::InvalidTime {
        reason: format!(
            "invalid datetime '{}'. Expected: YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
            text
        ),
    })
}

pub fn format_datetime(datetime: &DateTime<Utc>) -> String {
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Resampling period for temporal aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Monthly,
    Annual,
}

impl Period {
    /// Label of the period containing `datetime`, i.e. the start of that period
    pub fn start_of(&self, datetime: &DateTime<Utc>) -> DateTime<Utc> {
        let (year, month, day) = match self {
            Period::Daily => (datetime.year(), datetime.month(), datetime.day()),
            Period::Monthly => (datetime.year(), datetime.month(), 1),
            Period::Annual => (datetime.year(), 1, 1),
        };
        // the components come from a valid date, so midnight always exists
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .unwrap_or(*datetime)
    }
}

impl FromStr for Period {
    type Err = EnsembleError;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "d" | "day" | "daily" => Ok(Period::Daily),
            "m" | "ms" | "month" | "monthly" => Ok(Period::Monthly),
            "y" | "ys" | "a" | "as" | "year" | "yearly" | "annual" => Ok(Period::Annual),
            other => Err(EnsembleError::Config(format!(
                "unknown aggregation period '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Period::Daily => "daily",
            Period::Monthly => "monthly",
            Period::Annual => "annual",
        };
        f.write_str(name)
    }
}
