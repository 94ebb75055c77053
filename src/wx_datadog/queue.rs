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

use crate::record::Record;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An entry on the work queue: either a record to upload or the marker
/// telling the worker to exit once everything before it is handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Record(Record),
    Stop,
}

/// Create an unbounded queue with a depth counter shared by both ends.
pub fn queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));

    (
        QueueSender {
            tx,
            depth: depth.clone(),
        },
        QueueReceiver { rx, depth },
    )
}

/// Producer side of the queue. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<Envelope>,
    depth: Arc<AtomicUsize>,
}

impl QueueSender {
    /// Enqueue a record, returning `false` if the receiving side is gone.
    pub fn put(&self, record: Record) -> bool {
        self.send(Envelope::Record(record))
    }

    /// Enqueue the stop marker.
    pub fn stop(&self) -> bool {
        self.send(Envelope::Stop)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn send(&self, envelope: Envelope) -> bool {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(envelope).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            false
        } else {
            true
        }
    }
}

/// Consumer side of the queue, owned by the worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
    depth: Arc<AtomicUsize>,
}

impl QueueReceiver {
    /// Wait for the next entry. `None` means every sender has been dropped
    /// and the queue is drained.
    pub async fn get(&mut self) -> Option<Envelope> {
        let envelope = self.rx.recv().await;
        if envelope.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }

        envelope
    }

    /// Number of entries still waiting behind the most recently received one.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}
