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

use crate::config::Bindings;
use crate::metrics::UploaderMetrics;
use crate::queue::QueueSender;
use crate::record::{Binding, Fields, Record};

/// Entry point for host events.
///
/// Live packets and archive records are copied, marked with the binding they
/// arrived on, and placed on the worker queue. Events for a binding that is
/// not enabled, or any event when no worker is running, are ignored.
#[derive(Debug, Clone)]
pub struct EventBridge {
    sender: Option<QueueSender>,
    bindings: Bindings,
    metrics: UploaderMetrics,
}

impl EventBridge {
    pub fn new(sender: QueueSender, bindings: Bindings, metrics: UploaderMetrics) -> Self {
        tracing::info!(message = "event bridge active", binding = %bindings);
        EventBridge {
            sender: Some(sender),
            bindings,
            metrics,
        }
    }

    /// Bridge for a service that declined to start. Every event is ignored.
    pub fn inactive(metrics: UploaderMetrics) -> Self {
        EventBridge {
            sender: None,
            bindings: Bindings::none(),
            metrics,
        }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    pub fn bindings(&self) -> Bindings {
        self.bindings
    }

    /// Handle a `NEW_LOOP_PACKET` event. Returns `true` if the packet was queued.
    pub fn new_loop_packet(&self, packet: &Fields) -> bool {
        self.dispatch(Binding::Loop, packet)
    }

    /// Handle a `NEW_ARCHIVE_RECORD` event. Returns `true` if the record was queued.
    pub fn new_archive_record(&self, record: &Fields) -> bool {
        self.dispatch(Binding::Archive, record)
    }

    pub fn dispatch(&self, binding: Binding, fields: &Fields) -> bool {
        let sender = match &self.sender {
            Some(s) if self.bindings.contains(binding) => s,
            _ => return false,
        };

        if sender.put(Record::from_event(binding, fields)) {
            self.metrics.queued(binding);
            self.metrics.depth(sender.depth());
            true
        } else {
            tracing::warn!(message = "upload worker is gone, dropping event", binding = %binding);
            false
        }
    }

    /// Ask the worker to exit once everything queued so far is handled.
    pub fn shutdown(&self) {
        if let Some(sender) = &self.sender {
            sender.stop();
        }
    }
}
