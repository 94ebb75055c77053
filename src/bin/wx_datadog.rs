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

use clap::Parser;
use prometheus_client::registry::Registry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};
use tokio::task::JoinHandle;
use tracing::Level;
use wx_datadog::bridge::EventBridge;
use wx_datadog::client::DatadogClient;
use wx_datadog::config::{HostConfig, SiteConfig};
use wx_datadog::extension::EXTENSION;
use wx_datadog::http::RequestContext;
use wx_datadog::metric::MetricBuilder;
use wx_datadog::metrics::UploaderMetrics;
use wx_datadog::queue;
use wx_datadog::record::{Binding, Fields, Value};
use wx_datadog::store::ArchiveHistory;
use wx_datadog::worker::{unix_now, Worker, WorkerOptions};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9783);

#[derive(Debug, Parser)]
#[clap(name = "wx_datadog", version = clap::crate_version!())]
struct WxDatadogApplication {
    /// Path to the host configuration file (TOML). Service options are read from the
    /// [StdRESTful.Datadog] section and station location from the [Station] section.
    #[clap(long, required_unless_present = "default_config")]
    config: Option<PathBuf>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. The host posts events here and metrics about wx_datadog
    /// itself are exposed at /metrics.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,

    /// Print the default configuration stanza and exit.
    #[clap(long)]
    default_config: bool,

    /// Upload a single sample record, wait for it to be handled, and exit.
    #[clap(long)]
    test_record: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = WxDatadogApplication::parse();
    if opts.default_config {
        print!("{}", EXTENSION.default_config());
        return Ok(());
    }

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    tracing::info!(message = "service starting", version = EXTENSION.version);

    let host = match &opts.config {
        Some(path) => HostConfig::from_file(path).unwrap_or_else(|e| {
            tracing::error!(message = "unable to load configuration", path = %path.display(), error = %e);
            process::exit(1)
        }),
        None => {
            tracing::error!(message = "no configuration file provided");
            process::exit(1)
        }
    };

    let mut registry = Registry::default();
    let metrics = UploaderMetrics::new(&mut registry);

    // Missing credentials mean the service stays inactive: events are still
    // accepted from the host but nothing is uploaded.
    let (bridge, worker) = match SiteConfig::from_host(&host) {
        Ok(site) => {
            let (bridge, handle) = start_worker(&site, metrics.clone());
            (bridge, Some(handle))
        }
        Err(e) if e.is_inactive() => {
            tracing::info!(message = "data will not be posted", reason = %e);
            (EventBridge::inactive(metrics.clone()), None)
        }
        Err(e) => {
            tracing::error!(message = "invalid configuration", error = %e);
            process::exit(1)
        }
    };

    if opts.test_record {
        return send_test_record(bridge, worker).await;
    }

    let context = Arc::new(RequestContext::new(registry, bridge.clone()));
    let app = wx_datadog::http::app(context);
    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        });

    tracing::info!(message = "server started", address = %opts.bind);
    server.await?;

    // Anything queued before shutdown is handled before the worker exits.
    bridge.shutdown();
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            tracing::error!(message = "upload worker failed", error = %e);
        }
    }

    tracing::info!("server shutdown");
    Ok(())
}

/// Build the Datadog client and start the upload worker in the background,
/// returning a bridge that feeds its queue.
fn start_worker(site: &SiteConfig, metrics: UploaderMetrics) -> (EventBridge, JoinHandle<()>) {
    let http_client = Client::builder().timeout(site.timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = DatadogClient::new(
        http_client,
        &site.api_host,
        site.api_key.clone(),
        site.app_key.clone(),
        site.station_name.clone(),
    )
    .unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize Datadog client", error = %e);
        process::exit(1)
    });

    tracing::info!(message = "using tags", tags = ?site.tags);
    tracing::info!(message = "binding", binding = %site.bindings);

    let (tx, rx) = queue::queue();
    let builder = MetricBuilder::new(site.prefix.clone(), site.tags.clone());
    let worker = Worker::new(
        rx,
        client,
        ArchiveHistory::new(),
        builder,
        WorkerOptions::from(site),
        metrics.clone(),
    );

    let handle = tokio::spawn(worker.run());
    (EventBridge::new(tx, site.bindings, metrics), handle)
}

/// Queue one sample record through the first enabled binding and wait for the
/// worker to finish with it.
async fn send_test_record(
    bridge: EventBridge,
    worker: Option<JoinHandle<()>>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let handle = match worker {
        Some(h) => h,
        None => {
            tracing::error!(message = "service is not configured, no record will be sent");
            process::exit(1)
        }
    };

    let mut fields = Fields::new();
    fields.insert("dateTime".to_owned(), Value::Number(unix_now() as f64));
    fields.insert("usUnits".to_owned(), Value::Number(1.0));
    fields.insert("outTemp".to_owned(), Value::Number(32.5));
    fields.insert("inTemp".to_owned(), Value::Number(75.8));
    fields.insert("outHumidity".to_owned(), Value::Number(24.0));

    let binding = if bridge.bindings().archive_records {
        Binding::Archive
    } else {
        Binding::Loop
    };

    bridge.dispatch(binding, &fields);
    bridge.shutdown();
    handle.await?;

    tracing::info!(message = "test record handled");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
