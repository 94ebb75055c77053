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

use crate::record::Binding;
use serde::{Deserialize, Deserializer};
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_HOST: &str = "https://api.datadoghq.com/";
pub const DEFAULT_PREFIX: &str = "weewx";
pub const DEFAULT_POST_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_TRIES: u32 = 3;
pub const DEFAULT_RETRY_WAIT_SECS: u64 = 5;
pub const DEFAULT_STATION_TYPE: &str = "unknown";

const PLACEHOLDERS: &[&str] = &["replace_me", "INSERT_API_KEY_HERE", "INSERT_APP_KEY_HERE"];

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
    Disabled,
    MissingSection,
    MissingOption(&'static str),
    InvalidBinding(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "unable to read config: {}", e),
            Self::Parse(e) => write!(f, "unable to parse config: {}", e),
            Self::Disabled => write!(f, "service is disabled"),
            Self::MissingSection => write!(f, "no [StdRESTful.Datadog] section"),
            Self::MissingOption(o) => write!(f, "missing option {}", o),
            Self::InvalidBinding(b) => write!(f, "invalid binding {}", b),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl ConfigError {
    /// True if the error means the service should simply stay inactive
    /// rather than the configuration being unusable.
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Disabled | Self::MissingSection | Self::MissingOption(_))
    }
}

/// The parts of the host configuration file this service reads.
#[derive(Deserialize, Debug, Default)]
pub struct HostConfig {
    #[serde(rename = "Station", default)]
    pub station: StationSection,
    #[serde(rename = "StdRESTful", default)]
    pub restful: RestfulSection,
}

impl HostConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::Parse)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct StationSection {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<Altitude>,
    pub station_type: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct RestfulSection {
    #[serde(rename = "Datadog")]
    pub datadog: Option<DatadogSection>,
}

/// Station altitude, either a bare number or a `[value, unit]` pair.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Altitude {
    Value(f64),
    WithUnit(f64, String),
}

impl Altitude {
    pub fn value(&self) -> f64 {
        match self {
            Self::Value(v) => *v,
            Self::WithUnit(v, _) => *v,
        }
    }
}

/// Raw `[StdRESTful.Datadog]` options exactly as they appear in the file.
#[derive(Deserialize, Debug, Default)]
pub struct DatadogSection {
    pub enable: Option<bool>,
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    pub station_name: Option<String>,
    pub api_host: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub binding: Option<Vec<String>>,
    pub prefix: Option<String>,
    pub post_interval: Option<u64>,
    pub max_backlog: Option<usize>,
    pub stale: Option<u64>,
    pub log_success: Option<bool>,
    pub log_failure: Option<bool>,
    pub timeout: Option<u64>,
    pub max_tries: Option<u32>,
    pub retry_wait: Option<u64>,
    pub skip_upload: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub station_type: Option<String>,
    pub altitude: Option<Altitude>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

/// Accept either `"a, b"` or `["a", "b"]`, producing trimmed non-empty items.
fn string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<StringOrList>::deserialize(deserializer)?;
    Ok(raw.map(|v| {
        let items = match v {
            StringOrList::One(s) => s.split(',').map(str::to_owned).collect(),
            StringOrList::Many(v) => v,
        };

        items
            .into_iter()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }))
}

/// Which host events are forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bindings {
    pub loop_packets: bool,
    pub archive_records: bool,
}

impl Bindings {
    pub fn archive() -> Self {
        Bindings {
            loop_packets: false,
            archive_records: true,
        }
    }

    pub fn all() -> Self {
        Bindings {
            loop_packets: true,
            archive_records: true,
        }
    }

    pub fn none() -> Self {
        Bindings {
            loop_packets: false,
            archive_records: false,
        }
    }

    pub fn contains(&self, binding: Binding) -> bool {
        match binding {
            Binding::Loop => self.loop_packets,
            Binding::Archive => self.archive_records,
        }
    }

    fn parse(items: &[String]) -> Result<Self, ConfigError> {
        let mut out = Self::none();
        for item in items {
            match Binding::parse(item) {
                Some(Binding::Loop) => out.loop_packets = true,
                Some(Binding::Archive) => out.archive_records = true,
                None => return Err(ConfigError::InvalidBinding(item.clone())),
            }
        }

        Ok(out)
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::archive()
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.loop_packets, self.archive_records) {
            (true, true) => f.write_str("loop,archive"),
            (true, false) => f.write_str("loop"),
            (false, true) => f.write_str("archive"),
            (false, false) => f.write_str("none"),
        }
    }
}

/// Validated configuration for the service, fixed for the life of the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteConfig {
    pub api_key: String,
    pub app_key: String,
    pub station_name: String,
    pub api_host: String,
    pub tags: Vec<String>,
    pub bindings: Bindings,
    pub prefix: String,
    pub post_interval: Option<Duration>,
    pub max_backlog: usize,
    pub stale: Option<Duration>,
    pub log_success: bool,
    pub log_failure: bool,
    pub timeout: Duration,
    pub max_tries: u32,
    pub retry_wait: Duration,
    pub skip_upload: bool,
}

impl SiteConfig {
    /// Build the service configuration from the host config.
    ///
    /// Station location and type default to the values from the `[Station]`
    /// section when not given in the service section. Required options that
    /// are missing, empty, or still the installer placeholder result in a
    /// `ConfigError::MissingOption`.
    pub fn from_host(host: &HostConfig) -> Result<Self, ConfigError> {
        let section = host.restful.datadog.as_ref().ok_or(ConfigError::MissingSection)?;
        if section.enable == Some(false) {
            return Err(ConfigError::Disabled);
        }

        let api_key = required("api_key", &section.api_key)?;
        let app_key = required("app_key", &section.app_key)?;
        let station_name = required("station_name", &section.station_name)?;

        let bindings = match &section.binding {
            Some(items) => Bindings::parse(items)?,
            None => Bindings::default(),
        };

        let mut tags = section.tags.clone().unwrap_or_default();
        tags.extend(station_tags(
            section.latitude.or(host.station.latitude),
            section.longitude.or(host.station.longitude),
            section
                .station_type
                .as_deref()
                .or(host.station.station_type.as_deref())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_STATION_TYPE),
            section.altitude.as_ref().or(host.station.altitude.as_ref()),
        ));

        Ok(SiteConfig {
            api_key,
            app_key,
            station_name,
            api_host: section
                .api_host
                .clone()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_HOST.to_owned()),
            tags,
            bindings,
            prefix: section.prefix.clone().unwrap_or_else(|| DEFAULT_PREFIX.to_owned()),
            post_interval: section
                .post_interval
                .or(Some(DEFAULT_POST_INTERVAL_SECS))
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            max_backlog: section.max_backlog.unwrap_or(usize::MAX),
            stale: section.stale.filter(|s| *s > 0).map(Duration::from_secs),
            log_success: section.log_success.unwrap_or(true),
            log_failure: section.log_failure.unwrap_or(true),
            timeout: Duration::from_secs(section.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_tries: section.max_tries.unwrap_or(DEFAULT_MAX_TRIES).max(1),
            retry_wait: Duration::from_secs(section.retry_wait.unwrap_or(DEFAULT_RETRY_WAIT_SECS)),
            skip_upload: section.skip_upload.unwrap_or(false),
        })
    }
}

fn required(name: &'static str, value: &Option<String>) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() && !PLACEHOLDERS.contains(&v) => Ok(v.to_owned()),
        _ => Err(ConfigError::MissingOption(name)),
    }
}

/// Tags describing the station itself. The station type is always present,
/// the rest are only added when their own value is known.
fn station_tags(
    latitude: Option<f64>,
    longitude: Option<f64>,
    station_type: &str,
    altitude: Option<&Altitude>,
) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(v) = latitude {
        tags.push(format!("latitude:{}", v));
    }
    if let Some(v) = longitude {
        tags.push(format!("longitude:{}", v));
    }
    tags.push(format!("station_type:{}", station_type));
    if let Some(v) = altitude {
        tags.push(format!("altitude:{}", v.value()));
    }

    tags
}
