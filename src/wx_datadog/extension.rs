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

/// Packaging metadata registered with the host's extension installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub author: &'static str,
    pub restful_service: &'static str,
    pub files: &'static [(&'static str, &'static [&'static str])],
}

pub const EXTENSION: Extension = Extension {
    name: "wx_datadog",
    version: env!("CARGO_PKG_VERSION"),
    description: "send weather data as datadog metrics.",
    author: env!("CARGO_PKG_AUTHORS"),
    restful_service: "Datadog",
    files: &[("bin", &["wx_datadog"])],
};

impl Extension {
    /// Config stanza the installer adds to the host config. The placeholder
    /// keys must be replaced before the service will activate.
    pub fn default_config(&self) -> String {
        format!(
            "[StdRESTful.{}]\napi_key = \"INSERT_API_KEY_HERE\"\napp_key = \"INSERT_APP_KEY_HERE\"\n",
            self.restful_service
        )
    }
}
