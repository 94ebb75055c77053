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

use crate::config::SiteConfig;
use crate::metric::{Batch, MetricBuilder};
use crate::metrics::{Outcome, UploaderMetrics};
use crate::queue::{Envelope, QueueReceiver};
use crate::record::{Binding, Record};
use crate::store::RecordStore;
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Destination for batches of metric points.
pub trait Submitter: Send + Sync {
    type Error: fmt::Display + Send;

    /// Submit every point in the batch in a single call.
    fn submit(&self, batch: &Batch) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether a failed submission is worth attempting again.
    fn is_retryable(_err: &Self::Error) -> bool {
        true
    }
}

/// Policy for how the worker treats queued records.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOptions {
    pub post_interval: Option<Duration>,
    pub max_backlog: usize,
    pub stale: Option<Duration>,
    pub log_success: bool,
    pub log_failure: bool,
    pub max_tries: u32,
    pub retry_wait: Duration,
    pub skip_upload: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            post_interval: None,
            max_backlog: usize::MAX,
            stale: None,
            log_success: true,
            log_failure: true,
            max_tries: 3,
            retry_wait: Duration::from_secs(5),
            skip_upload: false,
        }
    }
}

impl WorkerOptions {
    /// Whether a record that ended with `outcome` gets an info or error log
    /// line. Only uploads are logged, according to `log_success` and
    /// `log_failure`.
    pub fn logs(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Published => self.log_success,
            Outcome::Failed => self.log_failure,
            _ => false,
        }
    }
}

impl From<&SiteConfig> for WorkerOptions {
    fn from(site: &SiteConfig) -> Self {
        WorkerOptions {
            post_interval: site.post_interval,
            max_backlog: site.max_backlog,
            stale: site.stale,
            log_success: site.log_success,
            log_failure: site.log_failure,
            max_tries: site.max_tries,
            retry_wait: site.retry_wait,
            skip_upload: site.skip_upload,
        }
    }
}

/// Background loop that drains the queue and uploads each record.
///
/// The worker exits when it takes the stop marker off the queue or when all
/// senders are gone. Failures are logged and counted, never returned.
pub struct Worker<S, R> {
    queue: QueueReceiver,
    submitter: S,
    store: R,
    builder: MetricBuilder,
    options: WorkerOptions,
    metrics: UploaderMetrics,
    last_post: Option<i64>,
}

impl<S, R> Worker<S, R>
where
    S: Submitter,
    R: RecordStore,
{
    pub fn new(
        queue: QueueReceiver,
        submitter: S,
        store: R,
        builder: MetricBuilder,
        options: WorkerOptions,
        metrics: UploaderMetrics,
    ) -> Self {
        Worker {
            queue,
            submitter,
            store,
            builder,
            options,
            metrics,
            last_post: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            message = "upload worker started",
            max_tries = self.options.max_tries,
            skip_upload = self.options.skip_upload,
        );

        while let Some(record) = self.next_record().await {
            let outcome = self.process(record).await;
            self.metrics.handled(outcome);
        }

        tracing::info!(message = "upload worker stopped");
    }

    /// Next record to process, discarding the oldest records while the backlog
    /// is over the limit. `None` when the worker should exit. Archive records
    /// are shown to the store before anything is discarded.
    async fn next_record(&mut self) -> Option<Record> {
        loop {
            let envelope = self.queue.get().await;
            let depth = self.queue.depth();
            self.metrics.depth(depth);

            match envelope {
                None | Some(Envelope::Stop) => return None,
                Some(Envelope::Record(record)) => {
                    if record.binding() == Some(Binding::Archive) {
                        self.store.observe(&record);
                    }

                    if depth > self.options.max_backlog {
                        tracing::debug!(message = "backlog over limit, discarding record", depth = depth);
                        self.metrics.handled(Outcome::Trimmed);
                        continue;
                    }

                    return Some(record);
                }
            }
        }
    }

    async fn process(&mut self, record: Record) -> Outcome {
        let timestamp = match record.timestamp() {
            Some(ts) => ts,
            None => {
                tracing::warn!(message = "record has no usable dateTime, discarding", record = ?record);
                return Outcome::Invalid;
            }
        };

        if let Some(stale) = self.options.stale {
            let age = unix_now().saturating_sub(timestamp);
            if age > stale.as_secs() as i64 {
                tracing::debug!(message = "record is stale, discarding", timestamp = timestamp, age_secs = age);
                return Outcome::Stale;
            }
        }

        if let (Some(interval), Some(last)) = (self.options.post_interval, self.last_post) {
            if timestamp.saturating_sub(last) < interval.as_secs() as i64 {
                tracing::debug!(message = "record too soon after last post, skipping", timestamp = timestamp, last_post = last);
                return Outcome::TooSoon;
            }
        }

        let record = if record.binding() == Some(Binding::Archive) {
            match self.store.full_record(&record) {
                Ok(full) => full,
                Err(e) => {
                    tracing::warn!(message = "unable to get full record, using partial record", error = %e);
                    record
                }
            }
        } else {
            record
        };

        let batch = self.builder.batch(&record, timestamp);
        if batch.is_empty() {
            tracing::debug!(message = "record has no numeric observations", timestamp = timestamp);
            return Outcome::Empty;
        }

        if self.options.skip_upload {
            tracing::debug!(message = "skip_upload set, skipping upload", timestamp = timestamp, batch = ?batch);
            self.last_post = Some(timestamp);
            return Outcome::Skipped;
        }

        match submit_with_retries(&self.submitter, &batch, &self.options, &self.metrics).await {
            Ok(()) => {
                self.last_post = Some(timestamp);
                if self.options.logs(Outcome::Published) {
                    tracing::info!(message = "published record", timestamp = timestamp, num_metrics = batch.len());
                }

                Outcome::Published
            }
            Err(e) => {
                if self.options.logs(Outcome::Failed) {
                    tracing::error!(message = "failed to publish record", timestamp = timestamp, error = %e);
                }

                Outcome::Failed
            }
        }
    }
}

/// Submit the batch, trying up to `max_tries` times with `retry_wait` between
/// attempts. Errors the submitter considers permanent are returned at once.
async fn submit_with_retries<S: Submitter>(
    submitter: &S,
    batch: &Batch,
    options: &WorkerOptions,
    metrics: &UploaderMetrics,
) -> Result<(), S::Error> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        metrics.attempt();

        match submitter.submit(batch).await {
            Ok(()) => return Ok(()),
            Err(e) if !S::is_retryable(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(message = "failed upload attempt", attempt = attempt, error = %e);
                if attempt >= options.max_tries {
                    return Err(e);
                }

                tokio::time::sleep(options.retry_wait).await;
            }
        }
    }
}

/// Current time as UNIX seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::{unix_now, Submitter, Worker, WorkerOptions};
    use crate::metric::{Batch, MetricBuilder};
    use crate::metrics::{Outcome, UploaderMetrics};
    use crate::queue::{queue, QueueSender};
    use crate::record::{Binding, Fields, Record, Value};
    use crate::store::{ArchiveHistory, Passthrough};
    use chrono::Utc;
    use prometheus_client::registry::Registry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct MockSubmitter {
        fail_times: usize,
        fatal: bool,
        calls: Arc<AtomicUsize>,
        batches: Arc<Mutex<Vec<Batch>>>,
    }

    impl MockSubmitter {
        fn failing(fail_times: usize) -> Self {
            MockSubmitter {
                fail_times,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn timestamps(&self) -> Vec<i64> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|b| b.points[0].timestamp)
                .collect()
        }
    }

    impl Submitter for MockSubmitter {
        type Error = String;

        async fn submit(&self, batch: &Batch) -> Result<(), Self::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return if self.fatal {
                    Err("fatal: unauthorized".to_owned())
                } else {
                    Err("retry: service unavailable".to_owned())
                };
            }

            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        }

        fn is_retryable(err: &Self::Error) -> bool {
            err.starts_with("retry")
        }
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            retry_wait: Duration::ZERO,
            ..Default::default()
        }
    }

    fn record(ts: i64) -> Record {
        let mut record = Record::default();
        record.insert("dateTime", ts as f64);
        record.insert("usUnits", 1.0);
        record.insert("outTemp", 32.5);
        record
    }

    fn archive(ts: f64, rain: f64) -> Record {
        let mut fields = Fields::new();
        fields.insert("dateTime".to_owned(), Value::Number(ts));
        fields.insert("rain".to_owned(), Value::Number(rain));
        Record::from_event(Binding::Archive, &fields)
    }

    async fn run_archive(
        submitter: MockSubmitter,
        options: WorkerOptions,
        records: Vec<Record>,
    ) -> UploaderMetrics {
        let mut reg = Registry::default();
        let metrics = UploaderMetrics::new(&mut reg);
        let (tx, rx) = queue();
        for record in records {
            tx.put(record);
        }
        tx.stop();

        let store = ArchiveHistory::with_timezone(Utc);
        Worker::new(rx, submitter, store, MetricBuilder::new("weewx", vec![]), options, metrics.clone())
            .run()
            .await;

        metrics
    }

    fn hour_rain(batch: &Batch) -> Option<f64> {
        batch.points.iter().find(|p| p.name == "weewx.hour_rain").map(|p| p.value)
    }

    async fn run_with(
        submitter: MockSubmitter,
        options: WorkerOptions,
        fill: impl FnOnce(&QueueSender),
    ) -> UploaderMetrics {
        let mut reg = Registry::default();
        let metrics = UploaderMetrics::new(&mut reg);
        let (tx, rx) = queue();
        fill(&tx);
        tx.stop();

        let builder = MetricBuilder::new("weewx", vec![]);
        Worker::new(rx, submitter, Passthrough, builder, options, metrics.clone())
            .run()
            .await;

        metrics
    }

    #[tokio::test]
    async fn test_stop_after_records() {
        let submitter = MockSubmitter::default();
        let now = unix_now();
        let metrics = run_with(submitter.clone(), options(), |tx| {
            for i in 0..3 {
                tx.put(record(now + i));
            }
        })
        .await;

        assert_eq!(3, submitter.calls());
        assert_eq!(vec![now, now + 1, now + 2], submitter.timestamps());
        assert_eq!(3, metrics.handled_count(Outcome::Published));
    }

    #[tokio::test]
    async fn test_stale_record_not_submitted() {
        let submitter = MockSubmitter::default();
        let opts = WorkerOptions {
            stale: Some(Duration::from_secs(60)),
            ..options()
        };
        let now = unix_now();
        let metrics = run_with(submitter.clone(), opts, |tx| {
            tx.put(record(1000));
            tx.put(record(now));
        })
        .await;

        assert_eq!(vec![now], submitter.timestamps());
        assert_eq!(1, metrics.handled_count(Outcome::Stale));
    }

    #[tokio::test]
    async fn test_dropped_after_max_tries() {
        let submitter = MockSubmitter::failing(10);
        let metrics = run_with(submitter.clone(), options(), |tx| {
            tx.put(record(unix_now()));
        })
        .await;

        assert_eq!(3, submitter.calls());
        assert_eq!(3, metrics.attempt_count());
        assert_eq!(1, metrics.handled_count(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let submitter = MockSubmitter::failing(2);
        let metrics = run_with(submitter.clone(), options(), |tx| {
            tx.put(record(unix_now()));
        })
        .await;

        assert_eq!(3, submitter.calls());
        assert_eq!(1, metrics.handled_count(Outcome::Published));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let submitter = MockSubmitter {
            fail_times: 10,
            fatal: true,
            ..Default::default()
        };
        let metrics = run_with(submitter.clone(), options(), |tx| {
            tx.put(record(unix_now()));
        })
        .await;

        assert_eq!(1, submitter.calls());
        assert_eq!(1, metrics.handled_count(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_backlog_discards_oldest() {
        let submitter = MockSubmitter::default();
        let opts = WorkerOptions {
            max_backlog: 2,
            ..options()
        };
        let now = unix_now();
        let metrics = run_with(submitter.clone(), opts, |tx| {
            for i in 0..5 {
                tx.put(record(now + i));
            }
        })
        .await;

        assert_eq!(vec![now + 3, now + 4], submitter.timestamps());
        assert_eq!(3, metrics.handled_count(Outcome::Trimmed));
    }

    #[tokio::test]
    async fn test_post_interval() {
        let submitter = MockSubmitter::default();
        let opts = WorkerOptions {
            post_interval: Some(Duration::from_secs(10)),
            ..options()
        };
        let now = unix_now();
        let metrics = run_with(submitter.clone(), opts, |tx| {
            tx.put(record(now));
            tx.put(record(now + 5));
            tx.put(record(now + 20));
        })
        .await;

        assert_eq!(vec![now, now + 20], submitter.timestamps());
        assert_eq!(1, metrics.handled_count(Outcome::TooSoon));
    }

    #[tokio::test]
    async fn test_skip_upload() {
        let submitter = MockSubmitter::default();
        let opts = WorkerOptions {
            skip_upload: true,
            ..options()
        };
        let metrics = run_with(submitter.clone(), opts, |tx| {
            tx.put(record(unix_now()));
        })
        .await;

        assert_eq!(0, submitter.calls());
        assert_eq!(1, metrics.handled_count(Outcome::Skipped));
    }

    #[tokio::test]
    async fn test_non_numeric_and_invalid_records() {
        let submitter = MockSubmitter::default();
        let metrics = run_with(submitter.clone(), options(), |tx| {
            let mut text = Record::default();
            text.insert("dateTime", unix_now() as f64);
            text.insert("forecast", "sunny");
            tx.put(text);

            let mut missing = Record::default();
            missing.insert("outTemp", 1.0);
            tx.put(missing);
        })
        .await;

        assert_eq!(0, submitter.calls());
        assert_eq!(1, metrics.handled_count(Outcome::Empty));
        assert_eq!(1, metrics.handled_count(Outcome::Invalid));
    }

    #[tokio::test]
    async fn test_archive_records_enriched() {
        let mut reg = Registry::default();
        let metrics = UploaderMetrics::new(&mut reg);
        let submitter = MockSubmitter::default();
        let (tx, rx) = queue();
        let now = unix_now();

        let mut fields = Fields::new();
        fields.insert("dateTime".to_owned(), Value::Number(now as f64));
        fields.insert("rain".to_owned(), Value::Number(0.5));
        tx.put(Record::from_event(Binding::Loop, &fields));
        tx.put(archive((now + 1) as f64, 0.5));
        tx.stop();

        let builder = MetricBuilder::new("weewx", vec!["env:test".to_owned()]);
        Worker::new(rx, submitter.clone(), ArchiveHistory::with_timezone(Utc), builder, options(), metrics)
            .run()
            .await;

        let batches = submitter.batches.lock().unwrap();
        let names = |b: &Batch| b.points.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        assert_eq!(vec!["weewx.rain".to_owned()], names(&batches[0]));
        assert_eq!(
            vec![
                "weewx.day_rain".to_owned(),
                "weewx.hour_rain".to_owned(),
                "weewx.rain".to_owned(),
                "weewx.rain24".to_owned(),
            ],
            names(&batches[1])
        );
        assert_eq!(vec!["env:test".to_owned()], batches[1].tags);
    }

    #[tokio::test]
    async fn test_rain_totals_count_records_skipped_for_interval() {
        let submitter = MockSubmitter::default();
        let opts = WorkerOptions {
            post_interval: Some(Duration::from_secs(600)),
            ..options()
        };
        let now = unix_now();
        let records = vec![
            archive((now - 600) as f64, 1.0),
            archive((now - 300) as f64, 1.0),
            archive(now as f64, 1.0),
        ];
        let metrics = run_archive(submitter.clone(), opts, records).await;

        let batches = submitter.batches.lock().unwrap();
        assert_eq!(2, batches.len());
        assert_eq!(1, metrics.handled_count(Outcome::TooSoon));
        assert_eq!(Some(3.0), hour_rain(&batches[1]));
    }

    #[tokio::test]
    async fn test_rain_totals_count_trimmed_records() {
        let submitter = MockSubmitter::default();
        let opts = WorkerOptions {
            max_backlog: 1,
            ..options()
        };
        let now = unix_now();
        let records = vec![
            archive((now - 600) as f64, 1.0),
            archive((now - 300) as f64, 1.0),
            archive(now as f64, 1.0),
        ];
        let metrics = run_archive(submitter.clone(), opts, records).await;

        let batches = submitter.batches.lock().unwrap();
        assert_eq!(1, batches.len());
        assert_eq!(2, metrics.handled_count(Outcome::Trimmed));
        assert_eq!(Some(3.0), hour_rain(&batches[0]));
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_discarded() {
        let submitter = MockSubmitter::default();
        let now = unix_now();
        let records = vec![archive(-1e30, 1.0), archive(1e30, 1.0), archive(now as f64, 0.5)];
        let metrics = run_archive(submitter.clone(), options(), records).await;

        let batches = submitter.batches.lock().unwrap();
        assert_eq!(1, batches.len());
        assert_eq!(Some(0.5), hour_rain(&batches[0]));
        assert_eq!(2, metrics.handled_count(Outcome::Invalid));
        assert_eq!(1, metrics.handled_count(Outcome::Published));
    }

    #[test]
    fn test_log_toggles() {
        let opts = WorkerOptions::default();
        assert!(opts.logs(Outcome::Published));
        assert!(opts.logs(Outcome::Failed));
        assert!(!opts.logs(Outcome::Stale));

        let quiet = WorkerOptions {
            log_success: false,
            log_failure: false,
            ..WorkerOptions::default()
        };
        assert!(!quiet.logs(Outcome::Published));
        assert!(!quiet.logs(Outcome::Failed));

        let failures_only = WorkerOptions {
            log_success: false,
            ..WorkerOptions::default()
        };
        assert!(!failures_only.logs(Outcome::Published));
        assert!(failures_only.logs(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_exits_when_senders_dropped() {
        let mut reg = Registry::default();
        let metrics = UploaderMetrics::new(&mut reg);
        let submitter = MockSubmitter::default();
        let (tx, rx) = queue();
        tx.put(record(unix_now()));
        drop(tx);

        Worker::new(rx, submitter.clone(), Passthrough, MetricBuilder::new("weewx", vec![]), options(), metrics)
            .run()
            .await;

        assert_eq!(1, submitter.calls());
    }

    #[tokio::test]
    async fn test_runs_as_task() {
        let mut reg = Registry::default();
        let metrics = UploaderMetrics::new(&mut reg);
        let submitter = MockSubmitter::default();
        let (tx, rx) = queue();

        let worker = Worker::new(rx, submitter.clone(), Passthrough, MetricBuilder::new("weewx", vec![]), options(), metrics);
        let handle = tokio::spawn(worker.run());

        tx.put(record(unix_now()));
        tx.stop();
        handle.await.unwrap();

        assert_eq!(1, submitter.calls());
    }
}
