//! DMA-driven PDM microphone streaming driver.
//!
//! ## Ring
//!
//! Two slots keep the DMA channel fed. A slot moves
//! `Free → Scheduled → Armed → Free`; at most two slots are ever occupied.
//! A request claims the next slot round-robin; if the DMA channel is idle the
//! slot is armed immediately, otherwise it waits `Scheduled` until the
//! running transfer completes and the interrupt handler arms it.
//!
//! ```text
//!   request ──► [slot 0: Armed ]──DMA──► complete ──► RX_COMPLETE (+buffer)
//!   request ──► [slot 1: Sched.]           │
//!                     └──── armed by the interrupt ┘
//! ```
//!
//! ## Stream state
//!
//! - `Idle`: nothing has been armed since init/abort. The FIFO and status
//!   flags are flushed before the next arm.
//! - `Stopped`: the ring drained (or the DMA faulted). The FIFO is left
//!   alone; the next request re-arms directly.
//! - `Streaming`: a slot is being filled.
//!
//! The driver never retries. Faults surface as event bits and the layer
//! above decides what to do.

pub mod clock;
pub mod event;

use tracing::{debug, error, info, trace, warn};

use crate::buffering::SampleBuffer;
use crate::config::PdmConfig;
use crate::error::{Result, RingBusy};
use crate::hal::{DmaCause, PdmHardware, PdmPins};

pub use event::{CaptureEvent, EventMask};

/// Number of hardware ring slots (and DMA descriptors).
pub const RING_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Scheduled,
    Armed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Stopped,
    Streaming,
}

#[derive(Debug)]
struct RingSlot {
    state: SlotState,
    buffer: Option<SampleBuffer>,
    count: usize,
    /// Events the requester subscribed to for this transfer.
    events: EventMask,
}

impl RingSlot {
    const fn free() -> Self {
        Self {
            state: SlotState::Free,
            buffer: None,
            count: 0,
            events: EventMask::empty(),
        }
    }
}

/// Streaming driver for one PDM-PCM peripheral instance.
pub struct PdmDriver<H: PdmHardware> {
    hw: H,
    config: PdmConfig,
    slots: [RingSlot; RING_DEPTH],
    state: StreamState,
    /// Slots in `Scheduled` state (claimed but not yet armed).
    num_scheduled: usize,
    /// Next slot a request will claim.
    current_scheduled: usize,
    /// Slot the DMA channel is (or will next be) filling.
    current_completed: usize,
    irq_enabled: bool,
}

impl<H: PdmHardware> PdmDriver<H> {
    /// Reserve pins, program the peripheral and wire up the DMA ring.
    pub fn init(mut hw: H, config: PdmConfig, pins: PdmPins) -> Result<Self> {
        config.validate()?;
        pins.validate()?;
        hw.reserve_pins(pins)?;

        let dividers = clock::find_divider_settings(config.clock_divider)?;
        hw.configure(&config, dividers)?;
        hw.init_dma(RING_DEPTH);
        hw.set_irq_priority(config.irq_priority);

        info!(
            instance = hw.instance(),
            sample_rate = config.sample_rate(),
            oversample = config.oversample,
            data_bits = config.data_bits,
            clk = dividers.clk,
            mclk = dividers.mclk,
            cko = dividers.cko,
            "PDM peripheral initialised"
        );

        Ok(Self {
            hw,
            config,
            slots: [RingSlot::free(), RingSlot::free()],
            state: StreamState::Idle,
            num_scheduled: 0,
            current_scheduled: 0,
            current_completed: 0,
            irq_enabled: false,
        })
    }

    /// Queue `buffer` to be filled with `buffer.len()` samples.
    ///
    /// # Errors
    /// `RingBusy` (carrying the buffer back) when both slots are occupied.
    pub fn request(
        &mut self,
        buffer: SampleBuffer,
        events: EventMask,
    ) -> std::result::Result<(), RingBusy> {
        if self.outstanding() >= RING_DEPTH {
            warn!(id = buffer.id(), "capture request rejected: ring full");
            return Err(RingBusy { buffer });
        }

        let index = self.current_scheduled;
        let slot = &mut self.slots[index];
        debug_assert_eq!(slot.state, SlotState::Free);
        slot.state = SlotState::Scheduled;
        slot.count = buffer.len();
        slot.events = events;
        slot.buffer = Some(buffer);
        self.current_scheduled = (index + 1) % RING_DEPTH;
        self.num_scheduled += 1;

        if self.state == StreamState::Idle {
            self.hw.clear_fifo();
            let _ = self.hw.take_rx_overflow();
        }
        if matches!(self.state, StreamState::Idle | StreamState::Stopped) {
            self.arm_next();
        }
        Ok(())
    }

    /// Arm the slot at `current_completed` if it is waiting.
    fn arm_next(&mut self) {
        let index = self.current_completed;
        let slot = &mut self.slots[index];
        if slot.state != SlotState::Scheduled {
            // Only reachable after a DMA fault left the slot armed.
            debug!(slot = index, state = ?slot.state, "ring needs abort before re-arm");
            return;
        }
        slot.state = SlotState::Armed;
        self.num_scheduled -= 1;
        self.state = StreamState::Streaming;
        self.hw.start_dma(index, slot.count);
        self.hw.enable_irq();
        self.irq_enabled = true;
        trace!(slot = index, count = slot.count, "DMA armed");
    }

    /// Service the DMA completion interrupt.
    ///
    /// Returns `None` for masked or spurious interrupts.
    pub fn handle_interrupt(&mut self) -> Option<CaptureEvent> {
        if !self.irq_enabled {
            return None;
        }

        let index = self.current_completed;
        let mut events = EventMask::empty();
        let mut completed = None;
        let enabled = self.slots[index].events;

        match self.hw.dma_cause() {
            DmaCause::NoInterrupt => {
                trace!("spurious DMA interrupt");
                return None;
            }
            DmaCause::Completion => {
                let slot = std::mem::replace(&mut self.slots[index], RingSlot::free());
                debug_assert_eq!(slot.state, SlotState::Armed);
                if let Some(mut buffer) = slot.buffer {
                    let count = slot.count.min(buffer.len());
                    self.hw.complete_dma(index, &mut buffer.samples_mut()[..count]);
                    completed = Some(buffer);
                }
                self.current_completed = (index + 1) % RING_DEPTH;

                if self.num_scheduled > 0 {
                    self.arm_next();
                } else {
                    self.hw.disable_irq();
                    self.irq_enabled = false;
                    self.state = StreamState::Stopped;
                    events |= EventMask::STREAM_STOPPED;
                }
                events |= EventMask::RX_COMPLETE;
            }
            cause => {
                self.hw.disable_irq();
                self.irq_enabled = false;
                self.hw.abort_dma();
                self.state = StreamState::Stopped;
                events |= EventMask::DMA_ERROR;
                error!(slot = index, ?cause, "DMA transfer failed");
            }
        }

        if self.hw.take_rx_overflow() {
            warn!(slot = index, "PDM RX FIFO overrun");
            events |= EventMask::OVERRUN;
        }

        Some(CaptureEvent {
            events: events & enabled,
            buffer: completed,
        })
    }

    /// Stop the DMA channel and release every slot.
    ///
    /// Returns the buffers that were still in the ring. Safe to call when
    /// nothing is outstanding.
    pub fn abort(&mut self) -> [Option<SampleBuffer>; RING_DEPTH] {
        if self.state != StreamState::Idle {
            self.hw.disable_irq();
            self.irq_enabled = false;
            self.hw.abort_dma();
        }
        let released = [self.slots[0].buffer.take(), self.slots[1].buffer.take()];
        self.reset();
        debug!(
            released = released.iter().flatten().count(),
            "capture ring aborted"
        );
        released
    }

    fn reset(&mut self) {
        self.slots = [RingSlot::free(), RingSlot::free()];
        self.state = StreamState::Idle;
        self.num_scheduled = 0;
        self.current_scheduled = 0;
        self.current_completed = 0;
    }

    /// Slots currently `Scheduled` or `Armed`.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != SlotState::Free)
            .count()
    }

    pub fn slot_states(&self) -> [SlotState; RING_DEPTH] {
        [self.slots[0].state, self.slots[1].state]
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// `true` once a transfer has been armed since init or the last abort.
    pub fn is_active(&self) -> bool {
        self.state != StreamState::Idle
    }

    pub fn config(&self) -> &PdmConfig {
        &self.config
    }

    pub fn instance(&self) -> u32 {
        self.hw.instance()
    }
}
