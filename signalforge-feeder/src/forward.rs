//! HTTP forwarding of decoded records.
//!
//! Fire-and-forget POST of each `OutputRecord` as JSON, optionally limited to
//! a set of decoders.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use signalforge_core::OutputRecord;

use crate::events::DecoderEvent;

/// Per-request timeout.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// Posts decoded records to a URL via HTTP POST.
#[derive(Clone)]
pub struct Forwarder {
    url: String,
    decoders: Vec<String>,
    client: reqwest::Client,
}

impl Forwarder {
    /// `decoders` empty means forward everything.
    pub fn new(url: &str, decoders: &[String]) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Forwarder {
            url: url.to_string(),
            decoders: decoders.to_vec(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn accepts(&self, decoder: &str) -> bool {
        self.decoders.is_empty() || self.decoders.iter().any(|d| d == decoder)
    }

    /// Fire-and-forget POST of a record as JSON.
    pub fn forward(&self, record: &OutputRecord) {
        if !self.accepts(&record.decoder_name) {
            return;
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let record = record.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&record).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(url = %url, status = %resp.status(), "Forward rejected");
                }
                Ok(_) => debug!(url = %url, decoder = %record.decoder_name, "Forwarded record"),
                Err(e) => warn!(url = %url, error = %e, "Forward POST failed"),
            }
        });
    }

    /// Forward every `Message` event from `rx` until the channel closes.
    pub fn spawn(self, mut rx: broadcast::Receiver<DecoderEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DecoderEvent::Message { data, .. }) => self.forward(&data),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Forwarder lagging, records dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalforge_core::{PagerEncoding, PagerEvent, Payload};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn record(decoder: &str) -> OutputRecord {
        OutputRecord::new(
            decoder,
            Payload::Pager(PagerEvent {
                protocol: "POCSAG1200".into(),
                address: Some(1234567),
                capcode: Some(1234567),
                function: Some(0),
                encoding: Some(PagerEncoding::Alpha),
                content: "Fire at Main St".into(),
                baud_rate: Some(1200),
                timestamp: 1700000000.0,
            }),
            1700000000.0,
        )
    }

    #[test]
    fn test_forwarder_creation() {
        let fw = Forwarder::new("http://127.0.0.1:8080/ingest", &[]);
        assert_eq!(fw.url(), "http://127.0.0.1:8080/ingest");
        assert!(fw.accepts("multimon"));
    }

    #[test]
    fn test_decoder_filter() {
        let fw = Forwarder::new("http://localhost/", &["multimon".to_string()]);
        assert!(fw.accepts("multimon"));
        assert!(!fw.accepts("rtl_433"));
    }

    #[test]
    fn test_record_json_shape() {
        let v = serde_json::to_value(record("multimon")).unwrap();
        assert_eq!(v["decoderName"], "multimon");
        assert_eq!(v["payload"]["kind"], "pager");
        assert_eq!(v["payload"]["content"], "Fire at Main St");
    }

    #[tokio::test]
    async fn test_posts_record() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ingest", listener.local_addr().unwrap());

        let (tx, rx) = broadcast::channel(16);
        let handle = Forwarder::new(&url, &[]).spawn(rx);
        tx.send(DecoderEvent::Message {
            decoder: "multimon".into(),
            data: record("multimon"),
        })
        .unwrap();

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !String::from_utf8_lossy(&request).contains("Fire at Main St") {
            let n = sock.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before body arrived");
            request.extend_from_slice(&buf[..n]);
        }
        sock.write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();

        let request = String::from_utf8_lossy(&request);
        assert!(request.starts_with("POST /ingest"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));

        drop(tx);
        handle.await.unwrap();
    }
}
