//! The two halves of the level pipeline.
//!
//! ## Stages
//!
//! ```text
//! interrupt side (CompletionHandler, O(1), never waits)
//!   1. RX_COMPLETE → filled buffer onto the ready queue
//!   2. OVERRUN     → counter
//!   3. DMA_ERROR   → counter, session abort, ring buffers back to the pool
//!   4. allocate a fresh buffer and re-issue the read
//!
//! worker side (LevelWorker, blocking recv)
//!   1. FIR low-pass in place
//!   2. mean magnitude → moving average → peak hold
//!   3. publish the level, buffer back to the pool
//! ```
//!
//! A full ready queue or an empty pool on the interrupt side means the pool
//! is undersized for the worker's latency. Both are fatal.

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::TrySendError;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{BufferPool, ReadyReceiver, ReadySender, SampleBuffer},
    dsp::{FirFilter, LevelDetector},
    hal::PdmHardware,
    pdm::{CaptureEvent, EventMask},
    session::CaptureSession,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub buffers_captured: AtomicUsize,
    pub buffers_processed: AtomicUsize,
    pub overruns: AtomicUsize,
    pub dma_errors: AtomicUsize,
    pub aborts: AtomicUsize,
    pub rearms: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.buffers_captured.store(0, Ordering::Relaxed);
        self.buffers_processed.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.dma_errors.store(0, Ordering::Relaxed);
        self.aborts.store(0, Ordering::Relaxed);
        self.rearms.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            buffers_captured: self.buffers_captured.load(Ordering::Relaxed),
            buffers_processed: self.buffers_processed.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            dma_errors: self.dma_errors.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            rearms: self.rearms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub buffers_captured: usize,
    pub buffers_processed: usize,
    pub overruns: usize,
    pub dma_errors: usize,
    pub aborts: usize,
    pub rearms: usize,
}

/// Interrupt-side consumer of [`CaptureEvent`]s.
pub struct CompletionHandler {
    pool: BufferPool,
    /// `None` once the pipeline is closing; no further reads are issued.
    ready_tx: Option<ReadySender>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl CompletionHandler {
    pub fn new(pool: BufferPool, ready_tx: ReadySender, diagnostics: Arc<PipelineDiagnostics>) -> Self {
        Self {
            pool,
            ready_tx: Some(ready_tx),
            diagnostics,
        }
    }

    /// Allocate a buffer and hand it to the session.
    ///
    /// # Panics
    /// If the pool is exhausted or both ring slots are busy.
    pub fn start_reading<H: PdmHardware>(&mut self, session: &CaptureSession<H>) {
        let Some(buffer) = self.pool.alloc() else {
            error!(depth = self.pool.depth(), "buffer pool exhausted");
            panic!("noise pipeline: buffer pool exhausted");
        };
        if let Err(busy) = session.read(buffer, EventMask::CAPTURE) {
            error!(id = busy.buffer.id(), "capture ring busy on re-arm");
            self.pool.free(busy.into_buffer());
            panic!("noise pipeline: capture ring busy");
        }
        self.diagnostics.rearms.fetch_add(1, Ordering::Relaxed);
    }

    /// Handle one resolved transfer and keep the stream alive.
    pub fn on_event<H: PdmHardware>(&mut self, session: &CaptureSession<H>, event: CaptureEvent) {
        let CaptureEvent { events, buffer } = event;

        if let Some(buffer) = buffer {
            if events.contains(EventMask::RX_COMPLETE) {
                self.enqueue(buffer);
            } else {
                self.pool.free(buffer);
            }
        }

        if events.contains(EventMask::OVERRUN) {
            self.diagnostics.overruns.fetch_add(1, Ordering::Relaxed);
            debug!("rx fifo overrun");
        }

        if events.contains(EventMask::DMA_ERROR) {
            self.diagnostics.dma_errors.fetch_add(1, Ordering::Relaxed);
            self.release(session.abort());
            self.diagnostics.aborts.fetch_add(1, Ordering::Relaxed);
            warn!("capture aborted after DMA error");
        }

        if self.ready_tx.is_some() {
            self.start_reading(session);
        }
    }

    /// Stop re-arming and disconnect the worker's queue.
    pub fn close(&mut self) {
        self.ready_tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.ready_tx.is_none()
    }

    /// Return buffers handed back by a session abort.
    pub fn release<I>(&self, buffers: I)
    where
        I: IntoIterator<Item = Option<SampleBuffer>>,
    {
        for buffer in buffers.into_iter().flatten() {
            self.pool.free(buffer);
        }
    }

    fn enqueue(&mut self, buffer: SampleBuffer) {
        let Some(tx) = &self.ready_tx else {
            self.pool.free(buffer);
            return;
        };
        match tx.try_send(buffer) {
            Ok(()) => {
                self.diagnostics.buffers_captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(buffer)) => {
                error!(id = buffer.id(), "ready queue full");
                panic!("noise pipeline: ready queue full");
            }
            Err(TrySendError::Disconnected(buffer)) => {
                // Worker gone; nothing will consume further buffers.
                self.pool.free(buffer);
            }
        }
    }
}

/// Worker-side state: filter history, detector and the published level.
pub struct LevelWorker {
    pub filter: FirFilter,
    pub detector: LevelDetector,
    pub level: Arc<AtomicU32>,
    pub pool: BufferPool,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

impl LevelWorker {
    pub fn process(&mut self, mut buffer: SampleBuffer) {
        self.filter.process_buffer(buffer.samples_mut());
        let level = self.detector.process(buffer.samples());
        self.level.store(level, Ordering::Release);
        self.diagnostics.buffers_processed.fetch_add(1, Ordering::Relaxed);
        self.pool.free(buffer);
    }

    /// Process buffers until every sender of `ready_rx` is dropped.
    pub fn run(mut self, ready_rx: ReadyReceiver) {
        info!("level worker started");
        for buffer in ready_rx.iter() {
            self.process(buffer);
        }
        info!(
            processed = self.diagnostics.buffers_processed.load(Ordering::Relaxed),
            level = self.level.load(Ordering::Acquire),
            "level worker stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::ready_queue;
    use crate::config::{PdmConfig, DEFAULT_FIR_TAPS};
    use crate::hal::sim::{SignalSource, SimControl, SimulatedPdm};
    use crate::hal::PdmPins;
    use crate::pdm::{PdmDriver, StreamState};
    use crate::power::PowerManager;

    struct Rig {
        session: CaptureSession<SimulatedPdm>,
        ctl: SimControl,
        pool: BufferPool,
        ready_rx: ReadyReceiver,
        handler: CompletionHandler,
        diagnostics: Arc<PipelineDiagnostics>,
    }

    fn rig() -> Rig {
        let hw = SimulatedPdm::new(SignalSource::Constant(7));
        let ctl = hw.control();
        let driver = PdmDriver::init(hw, PdmConfig::default(), PdmPins::default()).unwrap();
        let session = CaptureSession::open(driver, Arc::new(PowerManager::new())).unwrap();
        let pool = BufferPool::new(4, 32);
        let (ready_tx, ready_rx) = ready_queue(4);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let handler = CompletionHandler::new(pool.clone(), ready_tx, Arc::clone(&diagnostics));
        Rig {
            session,
            ctl,
            pool,
            ready_rx,
            handler,
            diagnostics,
        }
    }

    fn service(rig: &mut Rig) {
        let ev = rig.session.on_interrupt().expect("interrupt pending");
        rig.handler.on_event(&rig.session, ev);
    }

    #[test]
    fn completion_queues_buffer_and_rearms() {
        let mut rig = rig();
        rig.handler.start_reading(&rig.session);
        assert_eq!(rig.pool.available(), 3);

        service(&mut rig);
        let buf = rig.ready_rx.try_recv().unwrap();
        assert!(buf.samples().iter().all(|&s| s == 7));
        assert_eq!(rig.pool.available(), 2);
        assert_eq!(rig.session.deep_sleep_locked(), 1);

        let snap = rig.diagnostics.snapshot();
        assert_eq!(snap.buffers_captured, 1);
        assert_eq!(snap.rearms, 2);
    }

    #[test]
    fn overrun_is_counted_without_breaking_the_stream() {
        let mut rig = rig();
        rig.handler.start_reading(&rig.session);
        rig.ctl.inject_overrun();
        service(&mut rig);

        let snap = rig.diagnostics.snapshot();
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.buffers_captured, 1);
        assert!(rig.session.is_active());
    }

    #[test]
    fn dma_error_aborts_once_and_rearms_once() {
        let mut rig = rig();
        rig.handler.start_reading(&rig.session);
        let before = rig.diagnostics.snapshot();

        rig.ctl.inject_dma_error();
        service(&mut rig);

        let after = rig.diagnostics.snapshot();
        assert_eq!(after.dma_errors - before.dma_errors, 1);
        assert_eq!(after.aborts - before.aborts, 1);
        assert_eq!(after.rearms - before.rearms, 1);
        assert_eq!(after.buffers_captured, 0);
        // Faulted buffer went back to the pool; one fresh buffer is armed.
        assert_eq!(rig.pool.available(), 3);
        assert_eq!(rig.session.deep_sleep_locked(), 1);
        assert_eq!(rig.ctl.fifo_clears(), 2);
    }

    #[test]
    fn closed_handler_stops_rearming() {
        let mut rig = rig();
        rig.handler.start_reading(&rig.session);
        rig.handler.close();
        assert!(rig.handler.is_closed());

        service(&mut rig);
        assert!(rig.ready_rx.try_recv().is_err());
        assert_eq!(rig.pool.available(), 4);
        assert_eq!(rig.session.stream_state(), StreamState::Stopped);
        assert_eq!(rig.session.deep_sleep_locked(), 0);
    }

    #[test]
    #[should_panic(expected = "buffer pool exhausted")]
    fn exhausted_pool_is_fatal() {
        let mut rig = rig();
        let _held: Vec<_> = std::iter::from_fn(|| rig.pool.alloc()).collect();
        rig.handler.start_reading(&rig.session);
    }

    #[test]
    fn worker_publishes_level_and_frees_buffer() {
        let pool = BufferPool::new(2, 64);
        let level = Arc::new(AtomicU32::new(0));
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let mut worker = LevelWorker {
            filter: FirFilter::new(DEFAULT_FIR_TAPS),
            detector: LevelDetector::new(1, 125, 128),
            level: Arc::clone(&level),
            pool: pool.clone(),
            diagnostics: Arc::clone(&diagnostics),
        };

        let mut buf = pool.alloc().unwrap();
        buf.samples_mut().fill(-500);
        worker.process(buf);

        // First 8 samples carry the filter's start-up transient.
        let got = level.load(Ordering::Acquire);
        assert!((460..=480).contains(&got), "level={got}");
        assert_eq!(pool.available(), 2);
        assert_eq!(diagnostics.snapshot().buffers_processed, 1);
    }

    #[test]
    fn worker_exits_when_queue_disconnects() {
        let pool = BufferPool::new(2, 16);
        let (tx, rx) = ready_queue(2);
        let worker = LevelWorker {
            filter: FirFilter::new(DEFAULT_FIR_TAPS),
            detector: LevelDetector::new(2, 125, 128),
            level: Arc::new(AtomicU32::new(0)),
            pool: pool.clone(),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };
        tx.send(pool.alloc().unwrap()).unwrap();
        drop(tx);
        worker.run(rx);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let diagnostics = PipelineDiagnostics::default();
        diagnostics.dma_errors.fetch_add(2, Ordering::Relaxed);
        let json = serde_json::to_value(diagnostics.snapshot()).unwrap();
        assert_eq!(json["dmaErrors"], 2);
        assert_eq!(json["buffersCaptured"], 0);
        diagnostics.reset();
        assert_eq!(diagnostics.snapshot().dma_errors, 0);
    }
}
