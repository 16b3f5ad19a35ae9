//! Capture session: the synchronisation layer above [`PdmDriver`].
//!
//! One session exists per physical peripheral instance, enforced by an
//! [`InstanceClaim`] held for the session's lifetime. `read`/`abort` and the
//! interrupt relay all go through one lock, so the ring slots and the
//! peripheral registers are never touched concurrently.
//!
//! The session also keeps the deep-sleep inhibit count: one lock per
//! accepted transfer, released when that transfer completes or faults, and
//! drained to zero by `abort`.

use std::sync::Arc;

use parking_lot::{const_mutex, Mutex};
use tracing::{debug, info};

use crate::buffering::SampleBuffer;
use crate::config::PdmConfig;
use crate::error::{NoiseError, Result, RingBusy};
use crate::hal::PdmHardware;
use crate::pdm::{CaptureEvent, EventMask, PdmDriver, SlotState, StreamState, RING_DEPTH};
use crate::power::PowerManager;

static CLAIMED_INSTANCES: Mutex<Vec<u32>> = const_mutex(Vec::new());

/// Ownership token for one peripheral instance. Released on drop.
#[derive(Debug)]
pub struct InstanceClaim {
    instance: u32,
}

impl InstanceClaim {
    pub fn acquire(instance: u32) -> Result<Self> {
        let mut claimed = CLAIMED_INSTANCES.lock();
        if claimed.contains(&instance) {
            return Err(NoiseError::PeripheralBusy(instance));
        }
        claimed.push(instance);
        Ok(Self { instance })
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }
}

impl Drop for InstanceClaim {
    fn drop(&mut self) {
        CLAIMED_INSTANCES.lock().retain(|&i| i != self.instance);
    }
}

struct SessionInner<H: PdmHardware> {
    driver: PdmDriver<H>,
    /// Deep-sleep locks held on behalf of outstanding transfers.
    deep_sleep_locked: u32,
}

/// Serialised access to one PDM peripheral.
pub struct CaptureSession<H: PdmHardware> {
    inner: Mutex<SessionInner<H>>,
    power: Arc<PowerManager>,
    claim: InstanceClaim,
}

impl<H: PdmHardware> CaptureSession<H> {
    /// Claim the driver's peripheral instance and open a session on it.
    ///
    /// # Errors
    /// `NoiseError::PeripheralBusy` if another live session owns the instance.
    pub fn open(driver: PdmDriver<H>, power: Arc<PowerManager>) -> Result<Self> {
        let claim = InstanceClaim::acquire(driver.instance())?;
        info!(instance = claim.instance(), "capture session opened");
        Ok(Self {
            inner: Mutex::new(SessionInner {
                driver,
                deep_sleep_locked: 0,
            }),
            power,
            claim,
        })
    }

    /// Schedule `buffer` to be filled and lock deep sleep until it resolves.
    ///
    /// Only the bits in `events` are reported for this transfer.
    ///
    /// # Errors
    /// `RingBusy` (with the buffer) if both ring slots are occupied. No
    /// deep-sleep lock is taken for a rejected request.
    pub fn read(&self, buffer: SampleBuffer, events: EventMask) -> std::result::Result<(), RingBusy> {
        let mut inner = self.inner.lock();
        inner.driver.request(buffer, events)?;
        inner.deep_sleep_locked += 1;
        self.power.lock_deep_sleep();
        Ok(())
    }

    /// Interrupt entry: service the driver and release one deep-sleep lock.
    ///
    /// The lock is dropped before returning, so the caller may call
    /// [`read`](Self::read) or [`abort`](Self::abort) while handling the event.
    pub fn on_interrupt(&self) -> Option<CaptureEvent> {
        let mut inner = self.inner.lock();
        let event = inner.driver.handle_interrupt()?;
        if inner.deep_sleep_locked > 0 {
            inner.deep_sleep_locked -= 1;
            self.power.unlock_deep_sleep();
        }
        Some(event)
    }

    /// Abort the ring and drain every deep-sleep lock this session holds.
    ///
    /// Returns the buffers that were still in the ring.
    pub fn abort(&self) -> [Option<SampleBuffer>; RING_DEPTH] {
        let mut inner = self.inner.lock();
        let released = inner.driver.abort();
        let drained = inner.deep_sleep_locked;
        while inner.deep_sleep_locked > 0 {
            self.power.unlock_deep_sleep();
            inner.deep_sleep_locked -= 1;
        }
        debug!(drained, "capture session aborted");
        released
    }

    /// Deep-sleep locks currently held by this session.
    pub fn deep_sleep_locked(&self) -> u32 {
        self.inner.lock().deep_sleep_locked
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().driver.is_active()
    }

    pub fn stream_state(&self) -> StreamState {
        self.inner.lock().driver.state()
    }

    pub fn slot_states(&self) -> [SlotState; RING_DEPTH] {
        self.inner.lock().driver.slot_states()
    }

    /// Copy of the peripheral configuration the driver was initialised with.
    pub fn pdm_config(&self) -> PdmConfig {
        self.inner.lock().driver.config().clone()
    }

    pub fn power(&self) -> &Arc<PowerManager> {
        &self.power
    }

    pub fn instance(&self) -> u32 {
        self.claim.instance()
    }
}

impl<H: PdmHardware> Drop for CaptureSession<H> {
    fn drop(&mut self) {
        self.abort();
        info!(instance = self.claim.instance(), "capture session closed");
    }
}
