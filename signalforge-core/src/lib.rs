//! signalforge-core: Pure framing + parsing library for radio decoder output.
//!
//! No async, no process or socket I/O. Just line framing, the per-tool
//! parsers, and the data types. This crate is the shared core used by
//! `signalforge-feeder`, which supervises the actual decoder processes.

pub mod backoff;
pub mod config;
pub mod decoder;
pub mod lines;
pub mod parse;
pub mod ring;
pub mod types;

// Re-export commonly used types at crate root
pub use backoff::Backoff;
pub use decoder::{default_decoders, DecoderKind, DecoderSpec, PipeSource};
pub use lines::{LineSplitter, MAX_LINE_LEN};
pub use ring::{RingBuffer, MAX_OUTPUT};
pub use types::*;
