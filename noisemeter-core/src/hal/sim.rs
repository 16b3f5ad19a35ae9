//! Host-side PDM peripheral model.
//!
//! Behaves like the PDM-PCM block plus one DMA channel: a started transfer
//! stays pending until the interrupt is serviced, at which point the
//! completed samples are generated from a [`SignalSource`]. Faults are
//! injected through [`SimControl`], which stays usable after the hardware
//! has been moved into a driver.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ClockDividers, DmaCause, PdmHardware, PdmPins, PinName};
use crate::config::PdmConfig;
use crate::error::{NoiseError, Result};

/// First instance id handed out by [`SimulatedPdm::new`]; real silicon uses 0.
const FIRST_SIM_INSTANCE: u32 = 0x100;

static NEXT_INSTANCE: AtomicU32 = AtomicU32::new(FIRST_SIM_INSTANCE);

/// Waveform produced by the simulated microphone.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalSource {
    Silence,
    /// Every sample has the same value.
    Constant(i32),
    /// Sine at `frequency_hz`, continuous across transfers.
    Sine {
        amplitude: f64,
        frequency_hz: f64,
        sample_rate: u32,
    },
    /// Every sample of transfer `n` equals `n` (starting at 0).
    TransferIndex,
}

#[derive(Debug)]
struct SimState {
    source: SignalSource,
    pin_conflict: Option<PinName>,
    reserved_pins: Option<PdmPins>,
    dividers: Option<ClockDividers>,
    descriptors: usize,
    irq_priority: Option<u8>,
    irq_enabled: bool,
    /// Running transfer: (descriptor, count).
    active: Option<(usize, usize)>,
    pending_fault: Option<DmaCause>,
    rx_overflow: bool,
    sample_clock: u64,
    transfers_completed: u64,
    fifo_clears: u32,
    dma_starts: u32,
    dma_aborts: u32,
}

/// Simulated PDM-PCM peripheral.
pub struct SimulatedPdm {
    instance: u32,
    state: Arc<Mutex<SimState>>,
}

/// Test/board handle onto a [`SimulatedPdm`].
#[derive(Clone)]
pub struct SimControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPdm {
    /// Create a peripheral with a fresh, process-unique instance id.
    pub fn new(source: SignalSource) -> Self {
        Self::with_instance(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed), source)
    }

    pub fn with_instance(instance: u32, source: SignalSource) -> Self {
        Self {
            instance,
            state: Arc::new(Mutex::new(SimState {
                source,
                pin_conflict: None,
                reserved_pins: None,
                dividers: None,
                descriptors: 0,
                irq_priority: None,
                irq_enabled: false,
                active: None,
                pending_fault: None,
                rx_overflow: false,
                sample_clock: 0,
                transfers_completed: 0,
                fifo_clears: 0,
                dma_starts: 0,
                dma_aborts: 0,
            })),
        }
    }

    pub fn control(&self) -> SimControl {
        SimControl {
            state: Arc::clone(&self.state),
        }
    }
}

impl SimControl {
    pub fn set_source(&self, source: SignalSource) {
        self.state.lock().source = source;
    }

    /// Make the next pending DMA interrupt report a bus error.
    pub fn inject_dma_error(&self) {
        self.state.lock().pending_fault = Some(DmaCause::DestinationBusError);
    }

    /// Raise the RX FIFO overflow flag.
    pub fn inject_overrun(&self) {
        self.state.lock().rx_overflow = true;
    }

    /// Make pin reservation fail on `pin`.
    pub fn fail_pin_reservation(&self, pin: PinName) {
        self.state.lock().pin_conflict = Some(pin);
    }

    pub fn reserved_pins(&self) -> Option<PdmPins> {
        self.state.lock().reserved_pins
    }

    pub fn dividers(&self) -> Option<ClockDividers> {
        self.state.lock().dividers
    }

    pub fn descriptors(&self) -> usize {
        self.state.lock().descriptors
    }

    pub fn irq_priority(&self) -> Option<u8> {
        self.state.lock().irq_priority
    }

    pub fn irq_enabled(&self) -> bool {
        self.state.lock().irq_enabled
    }

    pub fn dma_active(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn fifo_clears(&self) -> u32 {
        self.state.lock().fifo_clears
    }

    pub fn dma_starts(&self) -> u32 {
        self.state.lock().dma_starts
    }

    pub fn dma_aborts(&self) -> u32 {
        self.state.lock().dma_aborts
    }

    pub fn transfers_completed(&self) -> u64 {
        self.state.lock().transfers_completed
    }
}

impl SimState {
    fn fill(&mut self, dst: &mut [i32]) {
        match &self.source {
            SignalSource::Silence => dst.fill(0),
            SignalSource::Constant(value) => dst.fill(*value),
            SignalSource::Sine {
                amplitude,
                frequency_hz,
                sample_rate,
            } => {
                let step = TAU * frequency_hz / *sample_rate as f64;
                for (i, sample) in dst.iter_mut().enumerate() {
                    let t = (self.sample_clock + i as u64) as f64;
                    *sample = (amplitude * (step * t).sin()).round() as i32;
                }
            }
            SignalSource::TransferIndex => dst.fill(self.transfers_completed as i32),
        }
        self.sample_clock += dst.len() as u64;
    }
}

impl PdmHardware for SimulatedPdm {
    fn instance(&self) -> u32 {
        self.instance
    }

    fn reserve_pins(&mut self, pins: PdmPins) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(pin) = state.pin_conflict {
            if pin == pins.data || pin == pins.clk {
                return Err(NoiseError::PinReserved(pin));
            }
        }
        state.reserved_pins = Some(pins);
        Ok(())
    }

    fn configure(&mut self, config: &PdmConfig, dividers: ClockDividers) -> Result<()> {
        config.validate()?;
        self.state.lock().dividers = Some(dividers);
        Ok(())
    }

    fn init_dma(&mut self, descriptors: usize) {
        self.state.lock().descriptors = descriptors;
    }

    fn set_irq_priority(&mut self, priority: u8) {
        self.state.lock().irq_priority = Some(priority);
    }

    fn clear_fifo(&mut self) {
        self.state.lock().fifo_clears += 1;
    }

    fn take_rx_overflow(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().rx_overflow)
    }

    fn start_dma(&mut self, descriptor: usize, count: usize) {
        let mut state = self.state.lock();
        state.active = Some((descriptor, count));
        state.dma_starts += 1;
    }

    fn dma_cause(&mut self) -> DmaCause {
        let mut state = self.state.lock();
        if state.active.is_none() {
            return DmaCause::NoInterrupt;
        }
        state.pending_fault.take().unwrap_or(DmaCause::Completion)
    }

    fn complete_dma(&mut self, descriptor: usize, dst: &mut [i32]) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.active.map(|(d, _)| d), Some(descriptor));
        let count = state.active.map(|(_, c)| c).unwrap_or(dst.len()).min(dst.len());
        state.fill(&mut dst[..count]);
        state.active = None;
        state.transfers_completed += 1;
    }

    fn abort_dma(&mut self) {
        let mut state = self.state.lock();
        state.active = None;
        state.dma_aborts += 1;
    }

    fn enable_irq(&mut self) {
        self.state.lock().irq_enabled = true;
    }

    fn disable_irq(&mut self) {
        self.state.lock().irq_enabled = false;
    }
}
