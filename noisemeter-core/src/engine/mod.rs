//! `NoiseMeter`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! NoiseMeter::new(config, session)
//!     └─► start_measurement()  → worker spawned, first read issued
//!         ├─► on_interrupt()   → called from the DMA completion interrupt
//!         ├─► read()           → last level in dB, any thread
//!         └─► stop()           → re-arming stops, ring aborted, worker joined
//! ```
//!
//! There is no restart: `start_measurement()` after the first call returns
//! `AlreadyRunning`, even once stopped.
//!
//! ## Threading
//!
//! `NoiseMeter` is `Send + Sync`. The completion handler sits behind its own
//! lock, taken only by `on_interrupt`, `start_measurement` and `stop`. The
//! session lock is always taken inside it, never around it, and the session
//! has already released its lock when the event reaches the handler.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    buffering::{ready_queue, BufferPool, ReadyReceiver},
    config::NoiseConfig,
    dsp::{to_decibels, FirFilter, LevelDetector},
    error::{NoiseError, Result},
    hal::PdmHardware,
    session::CaptureSession,
};

use pipeline::{CompletionHandler, DiagnosticsSnapshot, LevelWorker, PipelineDiagnostics};

const WORKER_THREAD_NAME: &str = "noise-level";

/// The top-level noise meter handle.
///
/// Wrap in `Arc<NoiseMeter<_>>` to share between the interrupt context and
/// whoever polls [`read`](Self::read).
pub struct NoiseMeter<H: PdmHardware> {
    config: NoiseConfig,
    session: CaptureSession<H>,
    handler: Mutex<CompletionHandler>,
    /// Worker state built in `new`, moved onto its thread by `start_measurement`.
    pending_worker: Mutex<Option<(LevelWorker, ReadyReceiver)>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pool: BufferPool,
    level: Arc<AtomicU32>,
    started: AtomicBool,
    running: AtomicBool,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl<H: PdmHardware> NoiseMeter<H> {
    /// Build the pool, queue, filter and detector. Does not start capturing.
    ///
    /// # Errors
    /// `NoiseError::Config` if `config` fails validation.
    pub fn new(config: NoiseConfig, session: CaptureSession<H>) -> Result<Self> {
        config.validate()?;

        let pdm = session.pdm_config();
        if pdm.oversample != config.decimation_rate {
            warn!(
                pdm = pdm.oversample,
                pipeline = config.decimation_rate,
                "decimation rate differs from the PDM oversampling ratio"
            );
        }

        let pool = BufferPool::new(config.pool_depth, config.buffer_size);
        let (ready_tx, ready_rx) = ready_queue(config.pool_depth);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let level = Arc::new(AtomicU32::new(0));

        let worker = LevelWorker {
            filter: FirFilter::new(config.fir_kernel()?),
            detector: LevelDetector::new(
                config.average_over_buffers,
                config.fading_numerator,
                config.fading_denominator,
            ),
            level: Arc::clone(&level),
            pool: pool.clone(),
            diagnostics: Arc::clone(&diagnostics),
        };
        let handler = CompletionHandler::new(pool.clone(), ready_tx, Arc::clone(&diagnostics));

        info!(
            buffer_size = config.buffer_size,
            pool_depth = config.pool_depth,
            sample_rate = pdm.sample_rate(),
            "noise meter ready"
        );

        Ok(Self {
            config,
            session,
            handler: Mutex::new(handler),
            pending_worker: Mutex::new(Some((worker, ready_rx))),
            worker: Mutex::new(None),
            pool,
            level,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            diagnostics,
        })
    }

    /// Spawn the worker thread and issue the first read.
    ///
    /// # Errors
    /// - `NoiseError::AlreadyRunning` on any call after the first.
    /// - `NoiseError::WorkerSpawn` if the OS refuses the thread.
    pub fn start_measurement(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NoiseError::AlreadyRunning);
        }
        let Some((worker, ready_rx)) = self.pending_worker.lock().take() else {
            return Err(NoiseError::AlreadyRunning);
        };

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || worker.run(ready_rx))
            .map_err(|e| NoiseError::WorkerSpawn(e.to_string()))?;
        *self.worker.lock() = Some(handle);

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.handler.lock().start_reading(&self.session);
        info!(instance = self.session.instance(), "noise measurement started");
        Ok(())
    }

    /// DMA completion interrupt entry point.
    pub fn on_interrupt(&self) {
        let Some(event) = self.session.on_interrupt() else {
            return;
        };
        self.handler.lock().on_event(&self.session, event);
    }

    /// Last level in dB relative to the configured reference. 0 until the
    /// first buffer has been processed.
    pub fn read(&self) -> i16 {
        to_decibels(self.level(), self.config.reference_level)
    }

    /// Last linear level (peak-held moving average of mean magnitudes).
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Acquire)
    }

    /// Stop re-arming, abort the ring and join the worker once it has drained
    /// the ready queue.
    ///
    /// # Errors
    /// - `NoiseError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(NoiseError::NotRunning);
        }

        {
            let mut handler = self.handler.lock();
            handler.close();
            handler.release(self.session.abort());
        }

        if let Some(handle) = self.worker.lock().take() {
            handle
                .join()
                .map_err(|_| NoiseError::Other(anyhow::anyhow!("level worker panicked")))?;
        }

        info!(
            diagnostics = ?self.diagnostics.snapshot(),
            "noise measurement stopped"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Buffers currently on the pool's free list.
    pub fn pool_available(&self) -> usize {
        self.pool.available()
    }

    pub fn session(&self) -> &CaptureSession<H> {
        &self.session
    }

    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }
}

impl<H: PdmHardware> Drop for NoiseMeter<H> {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("noise meter stop on drop failed: {e}");
            }
        }
    }
}
