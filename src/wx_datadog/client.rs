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

use crate::metric::Batch;
use crate::worker::Submitter;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::error;
use std::fmt;

const HEADER_API_KEY: &str = "DD-API-KEY";
const HEADER_APP_KEY: &str = "DD-APPLICATION-KEY";
const METRIC_TYPE_GAUGE: &str = "gauge";

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    Unauthorized(StatusCode),
    Rejected(StatusCode, Url),
    Unexpected(StatusCode, Url),
}

impl ClientError {
    /// True if sending the same request again might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Internal(_) | Self::Unexpected(_, _) => true,
            Self::InvalidUrl(_) | Self::Unauthorized(_) | Self::Rejected(_, _) => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(s) => write!(f, "invalid API host {}", s),
            Self::Unauthorized(status) => write!(f, "API key rejected with status {}", status),
            Self::Rejected(status, url) => write!(f, "payload rejected with status {} for {}", status, url),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for the Datadog metrics submission API.
#[derive(Debug)]
pub struct DatadogClient {
    client: Client,
    series_url: Url,
    api_key: String,
    app_key: String,
    host: String,
}

impl DatadogClient {
    const USER_AGENT: &'static str = "wx_datadog (https://github.com/56quarters/wx_datadog)";

    /// Create a client posting to `base_url`. Every series submitted is attributed
    /// to `host`, the name of the weather station.
    pub fn new<S: Into<String>>(
        client: Client,
        base_url: &str,
        api_key: S,
        app_key: S,
        host: S,
    ) -> Result<Self, ClientError> {
        let series_url = Self::series_url(base_url)?;
        Ok(DatadogClient {
            client,
            series_url,
            api_key: api_key.into(),
            app_key: app_key.into(),
            host: host.into(),
        })
    }

    /// Send every point in the batch as a gauge in a single request.
    pub async fn send(&self, batch: &Batch) -> Result<(), ClientError> {
        let payload = SeriesPayload::new(batch, &self.host);
        tracing::debug!(message = "making series request", url = %self.series_url, num_series = payload.series.len());

        let res = self
            .client
            .post(self.series_url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(HEADER_API_KEY, &self.api_key)
            .header(HEADER_APP_KEY, &self.app_key)
            .json(&payload)
            .send()
            .await
            .map_err(ClientError::Internal)?;

        let status = res.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ClientError::Unauthorized(status))
        } else if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            Err(ClientError::Rejected(status, self.series_url.clone()))
        } else {
            Err(ClientError::Unexpected(status, self.series_url.clone()))
        }
    }

    fn series_url(base_url: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        {
            url.path_segments_mut()
                .map(|mut p| {
                    p.pop_if_empty().push("api").push("v1").push("series");
                })
                .map_err(|_| ClientError::InvalidUrl(base_url.to_owned()))?;
        }

        Ok(url)
    }
}

impl Submitter for DatadogClient {
    type Error = ClientError;

    async fn submit(&self, batch: &Batch) -> Result<(), Self::Error> {
        self.send(batch).await
    }

    fn is_retryable(err: &Self::Error) -> bool {
        err.is_retryable()
    }
}

#[derive(Serialize, Debug)]
pub struct SeriesPayload<'a> {
    pub series: Vec<Series<'a>>,
}

impl<'a> SeriesPayload<'a> {
    pub fn new(batch: &'a Batch, host: &'a str) -> Self {
        let series = batch
            .points
            .iter()
            .map(|p| Series {
                metric: &p.name,
                type_: METRIC_TYPE_GAUGE,
                points: vec![(p.timestamp, p.value)],
                tags: &batch.tags,
                host,
            })
            .collect();

        SeriesPayload { series }
    }
}

#[derive(Serialize, Debug)]
pub struct Series<'a> {
    pub metric: &'a str,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub points: Vec<(i64, f64)>,
    pub tags: &'a [String],
    pub host: &'a str,
}
