use thiserror::Error;

use crate::buffering::SampleBuffer;

/// All errors produced by noisemeter-core.
#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pin pair ({data:?}, {clk:?}) cannot be routed to the PDM peripheral")]
    PinMap {
        data: crate::hal::PinName,
        clk: crate::hal::PinName,
    },

    #[error("PDM pin reservation conflict on {0:?}")]
    PinReserved(crate::hal::PinName),

    #[error("no clock divider settings produce a total divider of {0}")]
    ClockDivider(u32),

    #[error("PDM peripheral instance {0} is already claimed by another session")]
    PeripheralBusy(u32),

    #[error("noise meter is already running")]
    AlreadyRunning,

    #[error("noise meter is not running")]
    NotRunning,

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NoiseError>;

/// A capture request was rejected because both ring slots are occupied.
///
/// Carries the rejected buffer back so the caller can retry or return it
/// to its pool.
#[derive(Debug, Error)]
#[error("both capture ring slots are busy")]
pub struct RingBusy {
    pub buffer: SampleBuffer,
}

impl RingBusy {
    pub fn into_buffer(self) -> SampleBuffer {
        self.buffer
    }
}
