//! Events raised by the streaming driver's completion interrupt.

use bitflags::bitflags;

use crate::buffering::SampleBuffer;

bitflags! {
    /// Bit set of capture events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u16 {
        /// A transfer completed; its buffer is attached to the event.
        const RX_COMPLETE = 1 << 0;
        /// The ring drained with nothing scheduled.
        const STREAM_STOPPED = 1 << 4;
        /// The RX FIFO overflowed; samples were lost.
        const OVERRUN = 1 << 8;
        /// The DMA channel faulted; the transfer was abandoned.
        const DMA_ERROR = 1 << 9;

        /// Everything the noise pipeline subscribes to.
        const CAPTURE = Self::RX_COMPLETE.bits() | Self::OVERRUN.bits() | Self::DMA_ERROR.bits();
    }
}

/// What one serviced interrupt resolved.
///
/// `events` is already filtered by the mask the request was issued with.
/// `buffer` is the completed transfer's buffer; it is handed back even when
/// `RX_COMPLETE` was not subscribed, so ownership never leaks.
#[derive(Debug)]
pub struct CaptureEvent {
    pub events: EventMask,
    pub buffer: Option<SampleBuffer>,
}
