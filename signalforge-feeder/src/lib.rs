//! signalforge-feeder: supervision of external radio decoders.
//!
//! Runs `rtl_433`, `rtl_fm | multimon-ng` and `dump1090` as child processes,
//! reads dump1090's SBS port, and turns everything into typed
//! `OutputRecord`s held in per-decoder ring buffers and published as
//! `DecoderEvent`s. `DecoderManager` is the entry point.

pub mod discovery;
pub mod events;
pub mod forward;
pub mod manager;
pub mod sbs;
mod stream;
pub mod supervisor;

pub use events::DecoderEvent;
pub use forward::Forwarder;
pub use manager::{DecoderManager, DecoderStatus};
pub use sbs::{SbsBridge, SbsStatus};
pub use supervisor::{Phase, ProcessSupervisor, SupervisorStatus};
