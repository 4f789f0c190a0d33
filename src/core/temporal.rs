// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Precision-aware temporal types for FHIRPath
//!
//! Dates, date-times and times remember how much of the value was written.
//! Comparisons work up to the coarser of the two precisions and come back
//! undetermined (`None`) when the values agree that far but one of them
//! carries more detail.

use std::cmp::Ordering;
use std::fmt;

use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeDelta, TimeZone, Timelike, Utc,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::core::error_code::{FP0051, FP0067};
use crate::core::{FhirPathError, Result};

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("valid date pattern")
});

static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2})(?::(\d{2})(?::(\d{2})(?:\.(\d+))?)?)?)?)?)?T?(Z|[+-]\d{2}:\d{2})?$",
    )
    .expect("valid datetime pattern")
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2})(?::(\d{2})(?::(\d{2})(?:\.(\d+))?)?)?$").expect("valid time pattern")
});

/// Precision levels for temporal values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum TemporalPrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl TemporalPrecision {
    /// Seconds and milliseconds count as one precision for comparison purposes
    fn comparison_level(self) -> Self {
        match self {
            Self::Millisecond => Self::Second,
            other => other,
        }
    }
}

impl fmt::Display for TemporalPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Millisecond => "millisecond",
        };
        f.write_str(name)
    }
}

/// Calendar duration units usable in date/time arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalendarUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl CalendarUnit {
    /// Parse a calendar keyword (`year`, `months`, ...) or its UCUM counterpart (`a`, `mo`, `d`, ...)
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = match unit {
            "a" => "year",
            "mo" => "month",
            "wk" => "week",
            "d" => "day",
            "h" => "hour",
            "min" => "minute",
            "s" => "second",
            "ms" => "millisecond",
            other => other,
        };
        match unit.strip_suffix('s').unwrap_or(unit) {
            "year" => Some(Self::Year),
            "month" => Some(Self::Month),
            "week" => Some(Self::Week),
            "day" => Some(Self::Day),
            "hour" => Some(Self::Hour),
            "minute" => Some(Self::Minute),
            "second" => Some(Self::Second),
            "millisecond" => Some(Self::Millisecond),
            _ => None,
        }
    }

    /// Calendar keyword in singular form
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Week => "week",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Millisecond => "millisecond",
        }
    }

    fn precision(self) -> TemporalPrecision {
        match self {
            Self::Year => TemporalPrecision::Year,
            Self::Month => TemporalPrecision::Month,
            Self::Week | Self::Day => TemporalPrecision::Day,
            Self::Hour => TemporalPrecision::Hour,
            Self::Minute => TemporalPrecision::Minute,
            Self::Second => TemporalPrecision::Second,
            Self::Millisecond => TemporalPrecision::Millisecond,
        }
    }

    /// Length in milliseconds for the fixed-length units
    fn millis(self) -> Option<i64> {
        match self {
            Self::Week => Some(7 * 86_400_000),
            Self::Day => Some(86_400_000),
            Self::Hour => Some(3_600_000),
            Self::Minute => Some(60_000),
            Self::Second => Some(1_000),
            Self::Millisecond => Some(1),
            Self::Year | Self::Month => None,
        }
    }
}

/// A signed amount of calendar time after unit normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shift {
    Months(i64),
    Millis(i64),
}

/// Express `amount unit` at no finer than `precision`, truncating the remainder
fn normalize_shift(amount: Decimal, unit: CalendarUnit, precision: TemporalPrecision) -> Result<Shift> {
    let Some(unit_millis) = unit.millis() else {
        let months = whole(amount, 1)?;
        return Ok(Shift::Months(if unit == CalendarUnit::Year { months * 12 } else { months }));
    };
    let total = amount * Decimal::from(unit_millis);
    let granularity = match precision {
        TemporalPrecision::Year => return Ok(Shift::Months(whole(total, 365 * 86_400_000)? * 12)),
        TemporalPrecision::Month => return Ok(Shift::Months(whole(total, 30 * 86_400_000)?)),
        TemporalPrecision::Day => 86_400_000,
        TemporalPrecision::Hour => 3_600_000,
        TemporalPrecision::Minute => 60_000,
        TemporalPrecision::Second => 1_000,
        TemporalPrecision::Millisecond => 1,
    };
    Ok(Shift::Millis(whole(total, granularity)? * granularity))
}

fn whole(millis: Decimal, step: i64) -> Result<i64> {
    (millis / Decimal::from(step))
        .trunc()
        .to_i64()
        .ok_or_else(|| FhirPathError::evaluation_error(FP0067, "Date/time arithmetic overflow"))
}

fn parse_millis(fraction: Option<regex::Match<'_>>) -> u32 {
    fraction
        .map(|m| {
            let digits: String = m.as_str().chars().chain("000".chars()).take(3).collect();
            digits.parse().unwrap_or(0)
        })
        .unwrap_or(0)
}

fn parse_offset(zone: Option<regex::Match<'_>>) -> Option<FixedOffset> {
    let zone = zone?.as_str();
    if zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let hours: i32 = zone[1..3].parse().ok()?;
    let minutes: i32 = zone[4..6].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn number(m: Option<regex::Match<'_>>) -> Option<u32> {
    m.and_then(|m| m.as_str().parse().ok())
}

fn compare_components(a: &[i64], b: &[i64], len: usize) -> Ordering {
    a.iter().take(len).cmp(b.iter().take(len))
}

/// Precision-aware comparison shared by all three temporal types
fn compare_with_precision(
    a: &[i64; 7],
    a_precision: TemporalPrecision,
    b: &[i64; 7],
    b_precision: TemporalPrecision,
    first_component: TemporalPrecision,
) -> Option<Ordering> {
    let a_level = a_precision.comparison_level();
    let b_level = b_precision.comparison_level();
    let common = a_level.min(b_level);
    // Components are indexed from `first_component`; seconds include milliseconds.
    let len = common as usize - first_component as usize + 1
        + usize::from(common == TemporalPrecision::Second);
    let ordering = compare_components(a, b, len);
    if ordering != Ordering::Equal || a_level == b_level {
        Some(ordering)
    } else {
        None
    }
}

/// Date with year, month or day precision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrecisionDate {
    pub date: NaiveDate,
    pub precision: TemporalPrecision,
}

impl PrecisionDate {
    pub fn new(date: NaiveDate, precision: TemporalPrecision) -> Self {
        Self {
            date,
            precision: precision.min(TemporalPrecision::Day),
        }
    }

    /// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`
    pub fn parse(s: &str) -> Option<Self> {
        let caps = DATE_RE.captures(s)?;
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let (month, precision) = match number(caps.get(2)) {
            Some(month) => (month, TemporalPrecision::Month),
            None => (1, TemporalPrecision::Year),
        };
        let (day, precision) = match number(caps.get(3)) {
            Some(day) => (day, TemporalPrecision::Day),
            None => (1, precision),
        };
        NaiveDate::from_ymd_opt(year, month, day).map(|date| Self::new(date, precision))
    }

    fn components(&self) -> [i64; 7] {
        [
            self.date.year() as i64,
            self.date.month() as i64,
            self.date.day() as i64,
            0,
            0,
            0,
            0,
        ]
    }

    /// Ordering up to the common precision, `None` when undetermined
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        compare_with_precision(
            &self.components(),
            self.precision,
            &other.components(),
            other.precision,
            TemporalPrecision::Year,
        )
    }

    /// Date/time equality: `None` when precisions differ but the shared part matches
    pub fn equals(&self, other: &Self) -> Option<bool> {
        self.compare(other).map(|o| o == Ordering::Equal)
    }

    pub fn equivalent(&self, other: &Self) -> bool {
        self.precision == other.precision && self.date == other.date
    }

    /// Promote to a date-time at the same precision with no time zone
    pub fn to_datetime(&self) -> PrecisionDateTime {
        let naive = self.date.and_time(NaiveTime::MIN);
        PrecisionDateTime::from_naive(naive, None, self.precision)
    }

    pub fn add_duration(&self, amount: Decimal, unit: CalendarUnit) -> Result<Self> {
        let date = match normalize_shift(amount, unit, self.precision)? {
            Shift::Months(months) => add_months(self.date, months),
            Shift::Millis(millis) => TimeDelta::try_milliseconds(millis)
                .and_then(|delta| self.date.checked_add_signed(delta)),
        };
        date.map(|date| Self::new(date, self.precision))
            .ok_or_else(|| FhirPathError::evaluation_error(FP0067, "Date arithmetic overflow"))
    }

    pub fn component(&self, precision: TemporalPrecision) -> Option<i64> {
        if precision > self.precision {
            return None;
        }
        match precision {
            TemporalPrecision::Year => Some(self.date.year() as i64),
            TemporalPrecision::Month => Some(self.date.month() as i64),
            TemporalPrecision::Day => Some(self.date.day() as i64),
            _ => None,
        }
    }
}

impl fmt::Display for PrecisionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precision {
            TemporalPrecision::Year => write!(f, "{:04}", self.date.year()),
            TemporalPrecision::Month => write!(f, "{:04}-{:02}", self.date.year(), self.date.month()),
            _ => write!(f, "{}", self.date.format("%Y-%m-%d")),
        }
    }
}

fn add_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        date.checked_add_months(Months::new(magnitude))
    } else {
        date.checked_sub_months(Months::new(magnitude))
    }
}

/// Date-time with any precision from year to millisecond and an optional offset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrecisionDateTime {
    pub datetime: DateTime<FixedOffset>,
    pub precision: TemporalPrecision,
    /// Whether the offset was written explicitly
    pub tz_specified: bool,
}

impl PrecisionDateTime {
    pub fn new(datetime: DateTime<FixedOffset>, precision: TemporalPrecision) -> Self {
        Self {
            datetime,
            precision,
            tz_specified: true,
        }
    }

    fn from_naive(
        naive: NaiveDateTime,
        offset: Option<FixedOffset>,
        precision: TemporalPrecision,
    ) -> Self {
        let utc = Utc.fix();
        let zone = offset.unwrap_or(utc);
        let datetime = zone
            .from_local_datetime(&naive)
            .single()
            .unwrap_or_else(|| utc.from_utc_datetime(&naive));
        Self {
            datetime,
            precision,
            tz_specified: offset.is_some(),
        }
    }

    /// Parse a partial ISO 8601 date-time (`2019`, `2019-02-03T10:00+01:00`, `2019T`)
    pub fn parse(s: &str) -> Option<Self> {
        let caps = DATETIME_RE.captures(s)?;
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let fields = [
            (2, TemporalPrecision::Month),
            (3, TemporalPrecision::Day),
            (4, TemporalPrecision::Hour),
            (5, TemporalPrecision::Minute),
            (6, TemporalPrecision::Second),
            (7, TemporalPrecision::Millisecond),
        ];
        let mut precision = TemporalPrecision::Year;
        for (group, level) in fields {
            if caps.get(group).is_some() {
                precision = level;
            }
        }
        let date = NaiveDate::from_ymd_opt(
            year,
            number(caps.get(2)).unwrap_or(1),
            number(caps.get(3)).unwrap_or(1),
        )?;
        let time = NaiveTime::from_hms_milli_opt(
            number(caps.get(4)).unwrap_or(0),
            number(caps.get(5)).unwrap_or(0),
            number(caps.get(6)).unwrap_or(0),
            parse_millis(caps.get(7)),
        )?;
        let offset = parse_offset(caps.get(8));
        Some(Self::from_naive(date.and_time(time), offset, precision))
    }

    /// Components compared in UTC at hour precision and above, as written below that
    fn components(&self, common: TemporalPrecision) -> [i64; 7] {
        let naive = if common >= TemporalPrecision::Hour && self.tz_specified {
            self.datetime.naive_utc()
        } else {
            self.datetime.naive_local()
        };
        [
            naive.year() as i64,
            naive.month() as i64,
            naive.day() as i64,
            naive.hour() as i64,
            naive.minute() as i64,
            naive.second() as i64,
            (naive.nanosecond() / 1_000_000) as i64,
        ]
    }

    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        let common = self.precision.min(other.precision);
        compare_with_precision(
            &self.components(common),
            self.precision,
            &other.components(common),
            other.precision,
            TemporalPrecision::Year,
        )
    }

    pub fn equals(&self, other: &Self) -> Option<bool> {
        self.compare(other).map(|o| o == Ordering::Equal)
    }

    pub fn equivalent(&self, other: &Self) -> bool {
        self.precision.comparison_level() == other.precision.comparison_level()
            && self.compare(other) == Some(Ordering::Equal)
    }

    pub fn date(&self) -> PrecisionDate {
        PrecisionDate::new(self.datetime.date_naive(), self.precision)
    }

    pub fn add_duration(&self, amount: Decimal, unit: CalendarUnit) -> Result<Self> {
        let datetime = match normalize_shift(amount, unit, self.precision)? {
            Shift::Months(months) => {
                let magnitude = u32::try_from(months.unsigned_abs()).ok();
                magnitude.and_then(|m| {
                    if months >= 0 {
                        self.datetime.checked_add_months(Months::new(m))
                    } else {
                        self.datetime.checked_sub_months(Months::new(m))
                    }
                })
            }
            Shift::Millis(millis) => TimeDelta::try_milliseconds(millis)
                .and_then(|delta| self.datetime.checked_add_signed(delta)),
        };
        datetime
            .map(|datetime| Self {
                datetime,
                precision: self.precision,
                tz_specified: self.tz_specified,
            })
            .ok_or_else(|| FhirPathError::evaluation_error(FP0067, "DateTime arithmetic overflow"))
    }

    pub fn component(&self, precision: TemporalPrecision) -> Option<i64> {
        if precision > self.precision {
            return None;
        }
        let dt = &self.datetime;
        Some(match precision {
            TemporalPrecision::Year => dt.year() as i64,
            TemporalPrecision::Month => dt.month() as i64,
            TemporalPrecision::Day => dt.day() as i64,
            TemporalPrecision::Hour => dt.hour() as i64,
            TemporalPrecision::Minute => dt.minute() as i64,
            TemporalPrecision::Second => dt.second() as i64,
            TemporalPrecision::Millisecond => (dt.nanosecond() / 1_000_000) as i64,
        })
    }
}

impl fmt::Display for PrecisionDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = &self.datetime;
        write!(f, "{:04}", dt.year())?;
        if self.precision >= TemporalPrecision::Month {
            write!(f, "-{:02}", dt.month())?;
        }
        if self.precision >= TemporalPrecision::Day {
            write!(f, "-{:02}", dt.day())?;
        }
        if self.precision >= TemporalPrecision::Hour {
            write!(f, "T{:02}", dt.hour())?;
        }
        if self.precision >= TemporalPrecision::Minute {
            write!(f, ":{:02}", dt.minute())?;
        }
        if self.precision >= TemporalPrecision::Second {
            write!(f, ":{:02}", dt.second())?;
        }
        if self.precision >= TemporalPrecision::Millisecond {
            write!(f, ".{:03}", dt.nanosecond() / 1_000_000)?;
        }
        if self.tz_specified && self.precision >= TemporalPrecision::Hour {
            let offset = dt.offset().local_minus_utc();
            if offset == 0 {
                f.write_str("Z")?;
            } else {
                let sign = if offset < 0 { '-' } else { '+' };
                let offset = offset.abs();
                write!(f, "{sign}{:02}:{:02}", offset / 3600, (offset % 3600) / 60)?;
            }
        }
        Ok(())
    }
}

/// Time of day with hour to millisecond precision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrecisionTime {
    pub time: NaiveTime,
    pub precision: TemporalPrecision,
}

impl PrecisionTime {
    pub fn new(time: NaiveTime, precision: TemporalPrecision) -> Self {
        Self {
            time,
            precision: precision.max(TemporalPrecision::Hour),
        }
    }

    /// Parse `hh`, `hh:mm`, `hh:mm:ss` or `hh:mm:ss.fff`
    pub fn parse(s: &str) -> Option<Self> {
        let caps = TIME_RE.captures(s)?;
        let mut precision = TemporalPrecision::Hour;
        for (group, level) in [
            (2, TemporalPrecision::Minute),
            (3, TemporalPrecision::Second),
            (4, TemporalPrecision::Millisecond),
        ] {
            if caps.get(group).is_some() {
                precision = level;
            }
        }
        let time = NaiveTime::from_hms_milli_opt(
            number(caps.get(1))?,
            number(caps.get(2)).unwrap_or(0),
            number(caps.get(3)).unwrap_or(0),
            parse_millis(caps.get(4)),
        )?;
        Some(Self::new(time, precision))
    }

    fn components(&self) -> [i64; 7] {
        [
            self.time.hour() as i64,
            self.time.minute() as i64,
            self.time.second() as i64,
            (self.time.nanosecond() / 1_000_000) as i64,
            0,
            0,
            0,
        ]
    }

    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        compare_with_precision(
            &self.components(),
            self.precision,
            &other.components(),
            other.precision,
            TemporalPrecision::Hour,
        )
    }

    pub fn equals(&self, other: &Self) -> Option<bool> {
        self.compare(other).map(|o| o == Ordering::Equal)
    }

    pub fn equivalent(&self, other: &Self) -> bool {
        self.precision.comparison_level() == other.precision.comparison_level()
            && self.compare(other) == Some(Ordering::Equal)
    }

    pub fn add_duration(&self, amount: Decimal, unit: CalendarUnit) -> Result<Self> {
        if unit.millis().is_none() || unit.precision() < TemporalPrecision::Hour {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("Cannot add {} to a time", unit.keyword()),
            ));
        }
        match normalize_shift(amount, unit, self.precision)? {
            Shift::Millis(millis) => {
                let delta = TimeDelta::try_milliseconds(millis).ok_or_else(|| {
                    FhirPathError::evaluation_error(FP0067, "Time arithmetic overflow")
                })?;
                let (time, _) = self.time.overflowing_add_signed(delta);
                Ok(Self::new(time, self.precision))
            }
            Shift::Months(_) => Err(FhirPathError::type_error(FP0051, "Cannot add months to a time")),
        }
    }

    pub fn component(&self, precision: TemporalPrecision) -> Option<i64> {
        if precision > self.precision || precision < TemporalPrecision::Hour {
            return None;
        }
        Some(match precision {
            TemporalPrecision::Hour => self.time.hour() as i64,
            TemporalPrecision::Minute => self.time.minute() as i64,
            TemporalPrecision::Second => self.time.second() as i64,
            _ => (self.time.nanosecond() / 1_000_000) as i64,
        })
    }
}

impl fmt::Display for PrecisionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.time.hour())?;
        if self.precision >= TemporalPrecision::Minute {
            write!(f, ":{:02}", self.time.minute())?;
        }
        if self.precision >= TemporalPrecision::Second {
            write!(f, ":{:02}", self.time.second())?;
        }
        if self.precision >= TemporalPrecision::Millisecond {
            write!(f, ".{:03}", self.time.nanosecond() / 1_000_000)?;
        }
        Ok(())
    }
}
