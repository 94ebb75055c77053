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
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum BindingLabel {
    Loop,
    Archive,
}

impl From<Binding> for BindingLabel {
    fn from(b: Binding) -> Self {
        match b {
            Binding::Loop => Self::Loop,
            Binding::Archive => Self::Archive,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BindingLabels {
    pub binding: BindingLabel,
}

/// What the worker ended up doing with a record.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Published,
    Skipped,
    Failed,
    Stale,
    TooSoon,
    Trimmed,
    Empty,
    Invalid,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

/// Metrics describing the forwarder itself.
///
/// All metrics are created and registered upon call to `UploaderMetrics::new()`
/// and share the prefix "wx_datadog_".
#[derive(Debug, Clone)]
pub struct UploaderMetrics {
    records_queued: Family<BindingLabels, Counter>,
    records_handled: Family<OutcomeLabels, Counter>,
    submit_attempts: Counter,
    queue_depth: Gauge,
}

impl UploaderMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let records_queued = Family::<BindingLabels, Counter>::default();
        let records_handled = Family::<OutcomeLabels, Counter>::default();
        let submit_attempts = Counter::default();
        let queue_depth = Gauge::default();

        reg.register(
            "wx_datadog_records_queued",
            "Records placed on the upload queue, by binding",
            records_queued.clone(),
        );
        reg.register(
            "wx_datadog_records_handled",
            "Records taken off the upload queue, by outcome",
            records_handled.clone(),
        );
        reg.register(
            "wx_datadog_submit_attempts",
            "Calls made to the metrics API",
            submit_attempts.clone(),
        );
        reg.register(
            "wx_datadog_queue_depth",
            "Entries waiting on the upload queue",
            queue_depth.clone(),
        );

        Self {
            records_queued,
            records_handled,
            submit_attempts,
            queue_depth,
        }
    }

    pub fn queued(&self, binding: Binding) {
        self.records_queued
            .get_or_create(&BindingLabels {
                binding: binding.into(),
            })
            .inc();
    }

    pub fn handled(&self, outcome: Outcome) {
        self.records_handled.get_or_create(&OutcomeLabels { outcome }).inc();
    }

    pub fn attempt(&self) {
        self.submit_attempts.inc();
    }

    pub fn depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn handled_count(&self, outcome: Outcome) -> u64 {
        self.records_handled.get_or_create(&OutcomeLabels { outcome }).get()
    }

    pub fn attempt_count(&self) -> u64 {
        self.submit_attempts.get()
    }
}
