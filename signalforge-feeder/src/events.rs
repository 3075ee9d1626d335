//! Events emitted by supervisors and the SBS bridge.
//!
//! Producers hold an `EventSink` (a clone of one bounded mpsc sender); the
//! manager's aggregator task is the only receiver and re-publishes on a
//! broadcast channel for subscribers.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use signalforge_core::OutputRecord;

/// Capacity of the producer → aggregator channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the aggregator → subscribers broadcast channel.
pub const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecoderEvent {
    /// A parsed record from a decoder or the SBS feed.
    Message { decoder: String, data: OutputRecord },
    DecoderStarted {
        decoder: String,
        pid: Option<u32>,
    },
    DecoderStopped {
        decoder: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        restart_in_ms: Option<u64>,
    },
    DecoderError { decoder: String, error: String },
}

impl DecoderEvent {
    pub fn decoder(&self) -> &str {
        match self {
            DecoderEvent::Message { decoder, .. }
            | DecoderEvent::DecoderStarted { decoder, .. }
            | DecoderEvent::DecoderStopped { decoder, .. }
            | DecoderEvent::DecoderError { decoder, .. } => decoder,
        }
    }
}

/// Sending half handed to every event producer.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<DecoderEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<DecoderEvent>) -> Self {
        EventSink { tx }
    }

    pub fn channel(capacity: usize) -> (EventSink, mpsc::Receiver<DecoderEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventSink::new(tx), rx)
    }

    /// Send a record, waiting for room. A slow consumer throttles the
    /// reader, which in turn leaves the child blocked on its pipe.
    pub async fn record(&self, event: DecoderEvent) {
        if self.tx.send(event).await.is_err() {
            trace!("Event channel closed, dropping record");
        }
    }

    /// Send a lifecycle event without waiting; dropped if the channel is full.
    pub fn lifecycle(&self, event: DecoderEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(decoder = %event.decoder(), "Event channel full, dropping lifecycle event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
