//! Decoder registry: the public surface over supervisors, ring buffers and
//! the SBS bridge.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use signalforge_core::config::{Config, SbsConfig};
use signalforge_core::{
    default_decoders, Backoff, DecoderKind, DecoderSpec, OutputRecord, Result, SignalError,
};

use crate::events::{DecoderEvent, EventSink, BROADCAST_CAPACITY, EVENT_CHANNEL_CAPACITY};
use crate::sbs::{SbsBridge, SbsStatus};
use crate::supervisor::{new_output, ProcessSupervisor, SupervisorStatus};

/// Status of one registered decoder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderStatus {
    #[serde(flatten)]
    pub supervisor: SupervisorStatus,
    /// Records currently held in the ring buffer.
    pub buffered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbs: Option<SbsStatus>,
}

pub struct DecoderManager {
    decoders: Vec<ProcessSupervisor>,
    bridge: Option<SbsBridge>,
    events: broadcast::Sender<DecoderEvent>,
    aggregator: JoinHandle<()>,
}

impl DecoderManager {
    /// Register `specs` in order. The first `dump1090`-kind decoder gets an
    /// SBS bridge reading from `sbs`; its supervisor switches the bridge on
    /// and off with the process.
    ///
    /// Must be called inside a tokio runtime; the event aggregator is spawned
    /// here.
    pub fn new(specs: Vec<DecoderSpec>, sbs: &SbsConfig) -> Result<Self> {
        for (i, spec) in specs.iter().enumerate() {
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(SignalError::DuplicateDecoder(spec.name.clone()));
            }
        }

        let (sink, rx) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

        let mut bridge: Option<SbsBridge> = None;
        let decoders: Vec<ProcessSupervisor> = specs
            .into_iter()
            .map(|spec| {
                let output = new_output();
                let own_bridge = if bridge.is_none() && spec.kind == DecoderKind::Dump1090 {
                    let b = SbsBridge::new(
                        &spec.name,
                        sbs,
                        Backoff::new(spec.base_backoff_ms, spec.max_backoff_ms),
                        output.clone(),
                        sink.clone(),
                    );
                    bridge = Some(b.clone());
                    Some(b)
                } else {
                    None
                };
                ProcessSupervisor::with_bridge(spec, output, sink.clone(), own_bridge)
            })
            .collect();

        let aggregator = tokio::spawn(aggregate(rx, events.clone()));

        debug!(count = decoders.len(), "Decoder manager ready");
        Ok(DecoderManager {
            decoders,
            bridge,
            events,
            aggregator,
        })
    }

    /// Manager over the standard three decoders.
    pub fn from_config(config: &Config) -> Result<Self> {
        DecoderManager::new(default_decoders(config), &config.sbs)
    }

    fn find(&self, name: &str) -> Option<&ProcessSupervisor> {
        self.decoders.iter().find(|d| d.name() == name)
    }

    /// Registered names, in registration order.
    pub fn decoder_names(&self) -> Vec<&str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    pub fn get_decoders(&self) -> Vec<DecoderStatus> {
        self.decoders.iter().map(|d| self.status_of(d)).collect()
    }

    pub fn get_decoder(&self, name: &str) -> Option<DecoderStatus> {
        self.find(name).map(|d| self.status_of(d))
    }

    fn status_of(&self, decoder: &ProcessSupervisor) -> DecoderStatus {
        let buffered = decoder
            .output()
            .lock()
            .map(|ring| ring.len())
            .unwrap_or_else(|e| e.into_inner().len());
        let mut supervisor = decoder.get_status();
        let sbs = decoder.bridge().map(SbsBridge::status);
        // dump1090's records arrive over the bridge, not its stdout.
        if let Some(sbs) = &sbs {
            supervisor.messages_decoded += sbs.messages;
            supervisor.last_message_at = match (supervisor.last_message_at, sbs.last_message_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        DecoderStatus {
            supervisor,
            buffered,
            sbs,
        }
    }

    /// `false` for unknown names or when the decoder could not be started.
    pub fn start_decoder(&self, name: &str) -> bool {
        match self.find(name) {
            Some(d) => d.start(),
            None => false,
        }
    }

    /// `false` for unknown names.
    pub fn stop_decoder(&self, name: &str) -> bool {
        match self.find(name) {
            Some(d) => {
                d.stop();
                true
            }
            None => false,
        }
    }

    /// Up to `limit` most recent records, oldest first. Empty for unknown names.
    pub fn get_output(&self, name: &str, limit: usize) -> Vec<OutputRecord> {
        match self.find(name) {
            Some(d) => {
                let ring = d.output().lock().unwrap_or_else(|e| e.into_inner());
                ring.recent(limit)
            }
            None => Vec::new(),
        }
    }

    /// Stop every decoder and the SBS bridge. Safe to call repeatedly.
    pub fn stop_all(&self) {
        if let Some(bridge) = &self.bridge {
            bridge.deactivate();
        }
        for decoder in &self.decoders {
            decoder.stop();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.events.subscribe()
    }

    /// Wait until every decoder process has been reaped.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        for decoder in &self.decoders {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if !decoder.wait_idle(left).await {
                return false;
            }
        }
        true
    }
}

impl Drop for DecoderManager {
    fn drop(&mut self) {
        self.stop_all();
        self.aggregator.abort();
    }
}

/// Drain producer events and fan them out to subscribers.
async fn aggregate(
    mut rx: mpsc::Receiver<DecoderEvent>,
    events: broadcast::Sender<DecoderEvent>,
) {
    let mut forwarded = 0u64;
    while let Some(event) = rx.recv().await {
        forwarded += 1;
        // No subscribers is fine.
        let _ = events.send(event);
    }
    info!(forwarded, "Event aggregator finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use signalforge_core::Payload;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn sh(name: &str, kind: DecoderKind, script: &str) -> DecoderSpec {
        DecoderSpec::new(name, kind, "sh", &["-c", script])
    }

    fn no_sbs() -> SbsConfig {
        SbsConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_delay_ms: 10,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..250 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let specs = vec![
            sh("a", DecoderKind::Rtl433, "true"),
            sh("a", DecoderKind::Multimon, "true"),
        ];
        match DecoderManager::new(specs, &no_sbs()) {
            Err(SignalError::DuplicateDecoder(name)) => assert_eq!(name, "a"),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("duplicate accepted"),
        }
    }

    #[tokio::test]
    async fn test_default_registry_order() {
        let manager = DecoderManager::from_config(&Config::default()).unwrap();
        assert_eq!(manager.decoder_names(), vec!["rtl_433", "multimon", "dump1090"]);

        let statuses = manager.get_decoders();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| !s.supervisor.running));
        assert!(statuses[0].sbs.is_none());
        assert!(statuses[2].sbs.is_some());
    }

    #[tokio::test]
    async fn test_stop_all_idempotent() {
        let manager = DecoderManager::from_config(&Config::default()).unwrap();
        manager.stop_all();
        manager.stop_all();
        assert!(manager.get_decoders().iter().all(|s| !s.supervisor.running));

        let manager = DecoderManager::new(
            vec![sh("s", DecoderKind::Rtl433, "sleep 30")],
            &no_sbs(),
        )
        .unwrap();
        assert!(manager.start_decoder("s"));
        manager.stop_all();
        manager.stop_all();
        assert!(!manager.get_decoder("s").unwrap().supervisor.running);
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_unknown_names() {
        let manager = DecoderManager::new(vec![], &no_sbs()).unwrap();
        assert!(!manager.start_decoder("nope"));
        assert!(!manager.stop_decoder("nope"));
        assert!(manager.get_decoder("nope").is_none());
        assert!(manager.get_output("nope", 10).is_empty());
    }

    #[tokio::test]
    async fn test_output_keeps_most_recent_200() {
        let script = "i=0; while [ $i -lt 250 ]; do echo \"FLEX: msg $i\"; i=$((i+1)); done; sleep 5";
        let manager =
            DecoderManager::new(vec![sh("pager", DecoderKind::Multimon, script)], &no_sbs())
                .unwrap();
        assert!(manager.start_decoder("pager"));

        wait_until(|| {
            manager
                .get_decoder("pager")
                .is_some_and(|s| s.supervisor.messages_decoded == 250)
        })
        .await;

        let records = manager.get_output("pager", 500);
        assert_eq!(records.len(), 200);
        let contents: Vec<String> = records
            .iter()
            .map(|r| match &r.payload {
                Payload::Pager(ev) => ev.content.clone(),
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert_eq!(contents[0], "msg 50");
        assert_eq!(contents[199], "msg 249");

        let last_two = manager.get_output("pager", 2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1], records[199]);
        assert_eq!(manager.get_decoder("pager").unwrap().buffered, 200);

        manager.stop_all();
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_subscribe_sees_lifecycle_and_messages() {
        let manager = DecoderManager::new(
            vec![sh("pager", DecoderKind::Multimon, "echo 'FLEX: hello'; sleep 5")],
            &no_sbs(),
        )
        .unwrap();
        let mut rx = manager.subscribe();
        assert!(manager.start_decoder("pager"));

        match rx.recv().await.unwrap() {
            DecoderEvent::DecoderStarted { decoder, pid } => {
                assert_eq!(decoder, "pager");
                assert!(pid.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            DecoderEvent::Message { decoder, data } => {
                assert_eq!(decoder, "pager");
                assert_eq!(data.payload.kind(), "pager");
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(manager.stop_decoder("pager"));
        match rx.recv().await.unwrap() {
            DecoderEvent::DecoderStopped { reason, .. } => assert_eq!(reason, "stopped"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_sbs_bridge_follows_dump1090() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sbs = SbsConfig {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
            connect_delay_ms: 10,
        };
        let manager = DecoderManager::new(
            vec![sh("dump1090", DecoderKind::Dump1090, "echo 'not a record'; sleep 30")],
            &sbs,
        )
        .unwrap();

        assert!(manager.start_decoder("dump1090"));
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"MSG,4,1,1,ABC123,1,,,,,,,420,90,,,-64,,,,,0\n")
            .await
            .unwrap();

        wait_until(|| manager.get_output("dump1090", 10).len() == 1).await;
        let records = manager.get_output("dump1090", 10);
        match &records[0].payload {
            Payload::Adsb(ev) => {
                assert_eq!(ev.icao, "ABC123");
                assert_eq!(ev.speed, Some(420.0));
                assert_eq!(ev.vertical_rate, Some(-64));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let status = manager.get_decoder("dump1090").unwrap();
        let sbs_status = status.sbs.unwrap();
        assert!(sbs_status.connected);
        assert_eq!(sbs_status.messages, 1);
        assert_eq!(status.supervisor.messages_decoded, 1);
        assert_eq!(status.supervisor.last_message_at, sbs_status.last_message_at);
        assert!(status.supervisor.last_message_at.is_some());

        assert!(manager.stop_decoder("dump1090"));
        wait_until(|| {
            manager
                .get_decoder("dump1090")
                .and_then(|s| s.sbs)
                .is_some_and(|s| !s.active)
        })
        .await;
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_status_json_is_flat() {
        let manager =
            DecoderManager::new(vec![sh("a", DecoderKind::Rtl433, "true")], &no_sbs()).unwrap();
        let v = serde_json::to_value(manager.get_decoder("a").unwrap()).unwrap();
        assert_eq!(v["name"], "a");
        assert_eq!(v["kind"], "rtl_433");
        assert_eq!(v["running"], false);
        assert_eq!(v["buffered"], 0);
        assert!(v.get("sbs").is_none());
    }
}
