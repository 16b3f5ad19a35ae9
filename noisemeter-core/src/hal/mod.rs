//! Register-level seam between the streaming driver and the silicon.
//!
//! [`PdmHardware`] is the only place the driver touches the PDM-PCM block,
//! the DMA channel and the interrupt controller. Firmware builds implement it
//! over the vendor register blocks; host builds use [`sim::SimulatedPdm`].

#[cfg(feature = "sim")]
pub mod sim;

use serde::{Deserialize, Serialize};

use crate::config::PdmConfig;
use crate::error::{NoiseError, Result};

/// GPIO pins that can carry a PDM signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinName {
    P10_4,
    P10_5,
    P12_4,
    P12_5,
    P9_0,
    P9_1,
}

/// Data/clock pin pair for one PDM microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdmPins {
    pub data: PinName,
    pub clk: PinName,
}

impl PdmPins {
    pub const fn new(data: PinName, clk: PinName) -> Self {
        Self { data, clk }
    }

    /// Check the pair against the peripheral's pin map.
    pub fn validate(&self) -> Result<()> {
        let routed = PDM_PIN_MAP
            .iter()
            .any(|&(data, clk)| data == self.data && clk == self.clk);
        if routed {
            Ok(())
        } else {
            Err(NoiseError::PinMap {
                data: self.data,
                clk: self.clk,
            })
        }
    }
}

impl Default for PdmPins {
    fn default() -> Self {
        Self::new(PinName::P10_5, PinName::P10_4)
    }
}

/// (data, clock) pairs wired to the PDM0 block.
pub const PDM_PIN_MAP: [(PinName, PinName); 2] = [
    (PinName::P10_5, PinName::P10_4),
    (PinName::P12_5, PinName::P12_4),
];

/// Hardware clock divider chain: `clk · mclk · cko` == total divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDividers {
    pub clk: u32,
    pub mclk: u32,
    pub cko: u32,
}

impl ClockDividers {
    pub fn total(&self) -> u32 {
        self.clk * self.mclk * self.cko
    }
}

/// Cause reported by the DMA channel when its interrupt fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaCause {
    /// No pending cause (spurious interrupt).
    NoInterrupt,
    /// The current descriptor finished.
    Completion,
    SourceBusError,
    DestinationBusError,
    DescriptorBusError,
}

/// Register-level operations the streaming driver needs.
///
/// Calls arrive either from the capture session's critical section or from
/// interrupt context, never both at once.
pub trait PdmHardware: Send + 'static {
    /// Physical peripheral instance number.
    fn instance(&self) -> u32;

    /// Reserve the I/O pins and route them to the peripheral.
    fn reserve_pins(&mut self, pins: PdmPins) -> Result<()>;

    /// Program clocking, decimation, word length and the high-pass filter.
    fn configure(&mut self, config: &PdmConfig, dividers: ClockDividers) -> Result<()>;

    /// Initialise `descriptors` DMA descriptors wired to the RX FIFO trigger.
    fn init_dma(&mut self, descriptors: usize);

    fn set_irq_priority(&mut self, priority: u8);

    /// Discard everything in the RX FIFO.
    fn clear_fifo(&mut self);

    /// Read and clear the RX overflow status flag.
    fn take_rx_overflow(&mut self) -> bool;

    /// Start moving `count` samples from the RX FIFO on `descriptor`.
    fn start_dma(&mut self, descriptor: usize, count: usize);

    /// Read the cause of the pending DMA interrupt.
    fn dma_cause(&mut self) -> DmaCause;

    /// Land the samples of a completed transfer in `dst`.
    fn complete_dma(&mut self, descriptor: usize, dst: &mut [i32]);

    fn abort_dma(&mut self);

    fn enable_irq(&mut self);

    fn disable_irq(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_pairs_validate() {
        assert!(PdmPins::new(PinName::P10_5, PinName::P10_4).validate().is_ok());
        assert!(PdmPins::new(PinName::P12_5, PinName::P12_4).validate().is_ok());
    }

    #[test]
    fn mixed_port_pair_rejected() {
        let err = PdmPins::new(PinName::P10_5, PinName::P12_4)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            NoiseError::PinMap {
                data: PinName::P10_5,
                clk: PinName::P12_4
            }
        ));
    }

    #[test]
    fn swapped_pair_rejected() {
        assert!(PdmPins::new(PinName::P10_4, PinName::P10_5).validate().is_err());
    }
}
