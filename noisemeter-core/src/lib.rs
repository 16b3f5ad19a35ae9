//! # noisemeter-core
//!
//! Ambient noise level measurement from a PDM microphone.
//!
//! ## Architecture
//!
//! ```text
//! PDM mic → PDM-PCM block → DMA ring (2 slots) → PdmDriver::handle_interrupt
//!                                                      │
//!                                          CaptureSession (lock, deep-sleep)
//!                                                      │
//!                                     CompletionHandler → bounded ready queue
//!                                                      │
//!                                 LevelWorker: FIR → mean |x| → avg → peak hold
//!                                                      │
//!                                            NoiseMeter::read() → dB
//! ```
//!
//! The interrupt side never blocks and never allocates: buffers come from a
//! fixed pool and move by value between the ring, the queue and the worker.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod hal;
pub mod pdm;
pub mod power;
pub mod session;

// Convenience re-exports for downstream crates
pub use buffering::{BufferPool, SampleBuffer};
pub use config::{NoiseConfig, PdmConfig};
pub use engine::pipeline::{DiagnosticsSnapshot, PipelineDiagnostics};
pub use engine::NoiseMeter;
pub use error::{NoiseError, Result, RingBusy};
pub use hal::{PdmHardware, PdmPins, PinName};
pub use pdm::{CaptureEvent, EventMask, PdmDriver, StreamState};
pub use power::PowerManager;
pub use session::CaptureSession;

#[cfg(feature = "sim")]
pub use hal::sim::{SignalSource, SimControl, SimulatedPdm};
