//! TCP client for dump1090's BaseStation (SBS) port.
//!
//! Records are tagged with the dump1090 decoder's name and land in its ring
//! buffer. While active the bridge reconnects with exponential backoff.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use signalforge_core::config::SbsConfig;
use signalforge_core::lines::clean_line;
use signalforge_core::parse::parse_sbs;
use signalforge_core::{now, Backoff, OutputRecord};

use crate::events::{DecoderEvent, EventSink};
use crate::stream::for_each_line;
use crate::supervisor::{push_output, SharedOutput};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SbsStatus {
    pub addr: String,
    pub active: bool,
    pub connected: bool,
    pub messages: u64,
    pub connect_attempts: u32,
    pub last_message_at: Option<f64>,
    pub last_error: Option<String>,
    pub current_backoff_ms: u64,
}

struct BridgeState {
    task: Option<JoinHandle<()>>,
    connected: bool,
    messages: u64,
    connect_attempts: u32,
    last_message_at: Option<f64>,
    last_error: Option<String>,
    backoff: Backoff,
}

#[derive(Clone)]
pub struct SbsBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    decoder_name: String,
    addr: String,
    connect_delay: Duration,
    output: SharedOutput,
    sink: EventSink,
    state: Mutex<BridgeState>,
}

impl SbsBridge {
    pub fn new(
        decoder_name: &str,
        config: &SbsConfig,
        backoff: Backoff,
        output: SharedOutput,
        sink: EventSink,
    ) -> Self {
        SbsBridge {
            inner: Arc::new(BridgeInner {
                decoder_name: decoder_name.to_string(),
                addr: config.addr(),
                connect_delay: Duration::from_millis(config.connect_delay_ms),
                output,
                sink,
                state: Mutex::new(BridgeState {
                    task: None,
                    connected: false,
                    messages: 0,
                    connect_attempts: 0,
                    last_message_at: None,
                    last_error: None,
                    backoff,
                }),
            }),
        }
    }

    pub fn decoder_name(&self) -> &str {
        &self.inner.decoder_name
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the connect loop after the configured delay. No-op if active.
    pub fn activate(&self) {
        let mut st = self.state();
        if st.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        st.backoff.reset();
        debug!(
            addr = %self.inner.addr,
            delay_ms = self.inner.connect_delay.as_millis() as u64,
            "SBS bridge activated"
        );
        st.task = Some(tokio::spawn(self.clone().run()));
    }

    /// Drop the connection and stop reconnecting.
    pub fn deactivate(&self) {
        let mut st = self.state();
        if let Some(task) = st.task.take() {
            task.abort();
            debug!(addr = %self.inner.addr, "SBS bridge deactivated");
        }
        st.connected = false;
    }

    pub fn is_active(&self) -> bool {
        self.state().task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn status(&self) -> SbsStatus {
        let active = self.is_active();
        let st = self.state();
        SbsStatus {
            addr: self.inner.addr.clone(),
            active,
            connected: st.connected,
            messages: st.messages,
            connect_attempts: st.connect_attempts,
            last_message_at: st.last_message_at,
            last_error: st.last_error.clone(),
            current_backoff_ms: st.backoff.current_ms(),
        }
    }

    async fn run(self) {
        tokio::time::sleep(self.inner.connect_delay).await;

        loop {
            self.state().connect_attempts += 1;

            match TcpStream::connect(&self.inner.addr).await {
                Ok(stream) => {
                    {
                        let mut st = self.state();
                        st.connected = true;
                        st.backoff.reset();
                    }
                    info!(addr = %self.inner.addr, "Connected to SBS feed");

                    let result = for_each_line(stream, |line| self.handle_line(line)).await;
                    let msg = match result {
                        Ok(()) => "SBS connection closed".to_string(),
                        Err(e) => format!("SBS connection error: {e}"),
                    };
                    {
                        let mut st = self.state();
                        st.connected = false;
                        st.last_error = Some(msg.clone());
                    }
                    warn!(addr = %self.inner.addr, error = %msg, "SBS feed lost");
                    self.inner.sink.lifecycle(DecoderEvent::DecoderError {
                        decoder: self.inner.decoder_name.clone(),
                        error: msg,
                    });
                }
                Err(e) => {
                    debug!(addr = %self.inner.addr, error = %e, "SBS connect failed");
                    self.state().last_error = Some(format!("SBS connect failed: {e}"));
                }
            }

            let delay = self.state().backoff.next_delay();
            tokio::time::sleep(delay).await;
        }
    }

    async fn handle_line(&self, raw: String) {
        let Some(line) = clean_line(&raw) else {
            return;
        };
        let timestamp = now();
        let Some(payload) = parse_sbs(line, timestamp) else {
            return;
        };
        let record = OutputRecord::new(&self.inner.decoder_name, payload, timestamp);

        {
            let mut st = self.state();
            st.messages += 1;
            st.last_message_at = Some(timestamp);
        }
        push_output(&self.inner.output, record.clone());
        self.inner
            .sink
            .record(DecoderEvent::Message {
                decoder: self.inner.decoder_name.clone(),
                data: record,
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
