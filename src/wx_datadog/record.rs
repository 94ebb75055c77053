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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const FIELD_DATE_TIME: &str = "dateTime";
pub const FIELD_US_UNITS: &str = "usUnits";
pub const FIELD_INTERVAL: &str = "interval";
pub const FIELD_BINDING: &str = "binding";

/// Largest magnitude accepted for `dateTime`, leaving room for arithmetic on
/// timestamps without overflow.
const MAX_TIMESTAMP: f64 = (i64::MAX / 4) as f64;

/// Field name to value mapping as delivered by the host for a single event.
pub type Fields = BTreeMap<String, Value>;

/// A single observation value.
///
/// Hosts send numbers, strings, and nulls. Booleans are accepted so that a
/// record containing one can still be parsed but they are never treated as
/// numeric.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric value of this field, with null coerced to `0.0`. Non-numeric
    /// values yield `None`.
    pub fn as_metric(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Null => Some(0.0),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// Which host event a record originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Loop,
    Archive,
}

impl Binding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "loop" => Some(Self::Loop),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observation record: live packet or archive record plus the `binding`
/// marker added when it was queued.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    pub fn new(fields: Fields) -> Self {
        Record { fields }
    }

    /// Copy the fields of a host event and mark them with the binding they
    /// arrived on.
    pub fn from_event(binding: Binding, fields: &Fields) -> Self {
        let mut fields = fields.clone();
        fields.insert(FIELD_BINDING.to_owned(), Value::from(binding.as_str()));
        Record { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Timestamp of the observation in UNIX seconds, `None` if `dateTime` is
    /// missing, not a number, or absurdly far from the epoch.
    pub fn timestamp(&self) -> Option<i64> {
        match self.fields.get(FIELD_DATE_TIME) {
            Some(Value::Number(v)) if v.is_finite() && v.abs() <= MAX_TIMESTAMP => Some(*v as i64),
            _ => None,
        }
    }

    pub fn binding(&self) -> Option<Binding> {
        match self.fields.get(FIELD_BINDING) {
            Some(Value::Text(s)) => Binding::parse(s),
            _ => None,
        }
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self::new(fields)
    }
}
