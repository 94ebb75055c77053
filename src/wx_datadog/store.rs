// wx_datadog - Forward weather station observations to Datadog as metrics
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::record::{Record, Value};
use chrono::{Local, TimeZone};
use std::collections::VecDeque;
use std::error;
use std::fmt;
use std::ops::RangeInclusive;

const FIELD_RAIN: &str = "rain";
const FIELD_HOUR_RAIN: &str = "hourRain";
const FIELD_RAIN_24: &str = "rain24";
const FIELD_DAY_RAIN: &str = "dayRain";

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86400;
// A calendar day can be longer than 24 hours when clocks change.
const RETAIN_SECS: i64 = 2 * DAY_SECS;

#[derive(Debug)]
pub enum StoreError {
    MissingTimestamp,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTimestamp => write!(f, "record has no dateTime"),
        }
    }
}

impl error::Error for StoreError {}

/// Source of complete archive records.
///
/// The worker shows every archive record it takes off the queue to `observe`,
/// including records it goes on to discard, and asks `full_record` for the
/// complete version of each record it submits. Implementations may add fields
/// the host left out of the event.
pub trait RecordStore: Send {
    fn observe(&mut self, _record: &Record) {}

    fn full_record(&mut self, record: &Record) -> Result<Record, StoreError>;
}

/// Store that returns every record unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl RecordStore for Passthrough {
    fn full_record(&mut self, record: &Record) -> Result<Record, StoreError> {
        Ok(record.clone())
    }
}

/// Store that remembers recent archive rainfall to fill in rolling totals.
///
/// Every observed archive record is remembered by its `rain` value. Unless the
/// record already has them, `hourRain` and `rain24` are set to the sum of
/// `rain` over the hour and the day ending at the record, and `dayRain` to the
/// sum since midnight of the record's day in the store's time zone. All ranges
/// include the record itself.
#[derive(Debug)]
pub struct ArchiveHistory<Tz: TimeZone = Local> {
    rain: VecDeque<(i64, f64)>,
    tz: Tz,
}

impl ArchiveHistory {
    pub fn new() -> Self {
        Self::with_timezone(Local)
    }
}

impl Default for ArchiveHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tz: TimeZone> ArchiveHistory<Tz> {
    /// History that computes `dayRain` from midnight in `tz`.
    pub fn with_timezone(tz: Tz) -> Self {
        ArchiveHistory {
            rain: VecDeque::new(),
            tz,
        }
    }

    fn remember(&mut self, timestamp: i64, rain: f64) {
        // Records normally arrive in order, keep the deque sorted if not.
        let pos = self.rain.partition_point(|(ts, _)| *ts <= timestamp);
        self.rain.insert(pos, (timestamp, rain));

        let newest = self.rain.back().map(|(ts, _)| *ts).unwrap_or(timestamp);
        let cutoff = newest.saturating_sub(RETAIN_SECS);
        while let Some((ts, _)) = self.rain.front() {
            if *ts <= cutoff {
                self.rain.pop_front();
            } else {
                break;
            }
        }
    }

    fn sum(&self, range: RangeInclusive<i64>) -> f64 {
        self.rain
            .iter()
            .filter(|(ts, _)| range.contains(ts))
            .map(|(_, v)| v)
            .sum()
    }

    /// Start of the calendar day containing `timestamp`, `None` when local
    /// midnight does not exist or the timestamp cannot be represented.
    fn start_of_day(&self, timestamp: i64) -> Option<i64> {
        let midnight = self
            .tz
            .timestamp_opt(timestamp, 0)
            .single()?
            .date_naive()
            .and_hms_opt(0, 0, 0)?;

        self.tz
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.timestamp())
    }
}

impl<Tz> RecordStore for ArchiveHistory<Tz>
where
    Tz: TimeZone + Send,
    Tz::Offset: Send,
{
    fn observe(&mut self, record: &Record) {
        if let (Some(timestamp), Some(Value::Number(rain))) = (record.timestamp(), record.get(FIELD_RAIN)) {
            self.remember(timestamp, *rain);
        }
    }

    fn full_record(&mut self, record: &Record) -> Result<Record, StoreError> {
        let timestamp = record.timestamp().ok_or(StoreError::MissingTimestamp)?;

        let mut full = record.clone();
        if !full.contains(FIELD_HOUR_RAIN) {
            let start = timestamp.saturating_sub(HOUR_SECS - 1);
            full.insert(FIELD_HOUR_RAIN, self.sum(start..=timestamp));
        }
        if !full.contains(FIELD_RAIN_24) {
            let start = timestamp.saturating_sub(DAY_SECS - 1);
            full.insert(FIELD_RAIN_24, self.sum(start..=timestamp));
        }
        if !full.contains(FIELD_DAY_RAIN) {
            if let Some(start) = self.start_of_day(timestamp) {
                full.insert(FIELD_DAY_RAIN, self.sum(start..=timestamp));
            }
        }

        Ok(full)
    }
}
