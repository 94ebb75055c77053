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

//! Forward weather station observations to Datadog as metrics
//!
//! ## Features
//!
//! `wx_datadog` receives observations from a weather station host such as [WeeWX] (live "loop" packets
//! and periodic archive records), converts every numeric observation into a Datadog gauge, and submits
//! them to the [Datadog metrics API]. Observation names are converted from camel case to snake case and
//! prefixed, so `outTemp` is submitted as `weewx.out_temp`. Each record is submitted in a single request
//! with a set of static tags attached.
//!
//! Uploads happen in the background. Failed submissions are retried a limited number of times and
//! records that are too old or arrive while the upload queue is backed up are discarded.
//!
//! [WeeWX]: https://weewx.com/
//! [Datadog metrics API]: https://docs.datadoghq.com/api/latest/metrics/
//!
//! ## Build
//!
//! `wx_datadog` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/wx_datadog.git && cd wx_datadog
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! `wx_datadog` reads the same sections of the host configuration that the host itself uses, written
//! as TOML. An API key, an application key, and a station name are required. Print the default stanza
//! with `wx_datadog --default-config` and fill it in.
//!
//! ```toml
//! [Station]
//! latitude = 42.36
//! longitude = -71.06
//! altitude = [700, "foot"]
//! station_type = "Vantage"
//!
//! [StdRESTful.Datadog]
//! api_key = "..."
//! app_key = "..."
//! station_name = "backyard"
//! binding = "loop, archive"
//! tags = "env:home"
//! ```
//!
//! ### Run
//!
//! ```text
//! ./wx_datadog --config /etc/weewx/datadog.toml
//! ```
//!
//! The host delivers events as JSON objects with `POST /loop` and `POST /archive`. Metrics about
//! `wx_datadog` itself are exposed at `/metrics` on the same address (`127.0.0.1:9783` by default).
//!

pub mod bridge;
pub mod client;
pub mod config;
pub mod extension;
pub mod http;
pub mod metric;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod store;
pub mod worker;
