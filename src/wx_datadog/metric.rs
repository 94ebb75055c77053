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

use crate::record::{Record, FIELD_DATE_TIME, FIELD_INTERVAL, FIELD_US_UNITS};

/// Observations that are never converted to metrics.
pub const FIELDS_TO_SKIP: &[&str] = &[FIELD_DATE_TIME, FIELD_INTERVAL, FIELD_US_UNITS];

/// A single gauge value derived from one field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
}

/// All points derived from a single record along with the static tags that
/// are attached to each of them when submitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub points: Vec<MetricPoint>,
    pub tags: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Convert a camel case observation name to snake case, e.g. `outTemp` to `out_temp`.
///
/// A separator is inserted before every uppercase character except one that
/// starts the name, so runs of capitals are split per character (`UV` becomes `u_v`).
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }

    out
}

/// Builds metric points from records using a name prefix and static tags.
#[derive(Debug, Clone)]
pub struct MetricBuilder {
    prefix: String,
    tags: Vec<String>,
}

impl MetricBuilder {
    pub fn new<S: Into<String>>(prefix: S, tags: Vec<String>) -> Self {
        MetricBuilder {
            prefix: prefix.into(),
            tags,
        }
    }

    pub fn metric_name(&self, field: &str) -> String {
        let name = normalize_name(field);
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Convert every numeric field of the record into a point stamped with the
    /// record timestamp. Null values become `0.0`, anything else non-numeric is
    /// dropped.
    pub fn points(&self, record: &Record, timestamp: i64) -> Vec<MetricPoint> {
        record
            .iter()
            .filter(|(k, _)| !FIELDS_TO_SKIP.contains(&k.as_str()))
            .filter_map(|(k, v)| {
                v.as_metric().map(|value| MetricPoint {
                    name: self.metric_name(k),
                    value,
                    timestamp,
                })
            })
            .collect()
    }

    pub fn batch(&self, record: &Record, timestamp: i64) -> Batch {
        Batch {
            points: self.points(record, timestamp),
            tags: self.tags.clone(),
        }
    }
}
