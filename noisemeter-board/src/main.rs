//! Noise meter board host.
//!
//! Wires the simulated PDM peripheral, the capture session and the noise
//! pipeline together the way the firmware composition layer does, then
//! drives the completion interrupt from a pacing thread at the real buffer
//! period and polls the dB reading.

mod settings;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use noisemeter_core::{
    CaptureSession, NoiseMeter, PdmDriver, PowerManager, SignalSource, SimulatedPdm,
};
use settings::{default_settings_path, load_settings, save_settings, BoardSettings};
use tracing::{info, warn};

fn build_meter(settings: &BoardSettings) -> anyhow::Result<NoiseMeter<SimulatedPdm>> {
    let hw = SimulatedPdm::new(SignalSource::Sine {
        amplitude: settings.signal.amplitude,
        frequency_hz: settings.signal.frequency_hz,
        sample_rate: settings.pdm.sample_rate(),
    });
    let driver = PdmDriver::init(hw, settings.pdm.clone(), settings.pins)
        .context("PDM driver init failed")?;
    let power = Arc::new(PowerManager::new());
    let session = CaptureSession::open(driver, power).context("capture session open failed")?;
    NoiseMeter::new(settings.noise.clone(), session).context("noise meter setup failed")
}

/// Stand-in for the DMA completion IRQ: one call per buffer period.
fn spawn_interrupt_pacer(
    meter: Arc<NoiseMeter<SimulatedPdm>>,
    period: Duration,
    running: Arc<AtomicBool>,
) -> anyhow::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("pdm-irq".into())
        .spawn(move || {
            let mut next = Instant::now() + period;
            while running.load(Ordering::Relaxed) {
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                }
                meter.on_interrupt();
                next += period;
            }
        })
        .context("failed to spawn interrupt thread")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("noisemeter=info")),
        )
        .init();

    info!("noise meter starting");

    let settings_path = default_settings_path();
    let settings = load_settings(&settings_path);
    if !settings_path.exists() {
        match save_settings(&settings_path, &settings) {
            Ok(()) => info!(path = %settings_path.display(), "wrote default settings"),
            Err(e) => warn!("could not write {}: {e}", settings_path.display()),
        }
    }
    info!(
        path = %settings_path.display(),
        sample_rate = settings.pdm.sample_rate(),
        buffer_size = settings.noise.buffer_size,
        "settings loaded"
    );

    let meter = Arc::new(build_meter(&settings)?);
    meter.start_measurement()?;

    let running = Arc::new(AtomicBool::new(true));
    let period = Duration::from_micros(settings.buffer_period_us());
    let pacer = spawn_interrupt_pacer(Arc::clone(&meter), period, Arc::clone(&running))?;

    let deadline = Instant::now() + Duration::from_secs(settings.run_seconds);
    let poll = Duration::from_millis(settings.poll_interval_ms);
    while Instant::now() < deadline {
        thread::sleep(poll);
        let diagnostics = meter.diagnostics_snapshot();
        info!(
            db = meter.read(),
            level = meter.level(),
            captured = diagnostics.buffers_captured,
            processed = diagnostics.buffers_processed,
            overruns = diagnostics.overruns,
            dma_errors = diagnostics.dma_errors,
            deep_sleep_allowed = meter.session().power().deep_sleep_allowed(),
            "noise level"
        );
    }

    running.store(false, Ordering::Relaxed);
    if pacer.join().is_err() {
        warn!("interrupt thread panicked");
    }
    meter.stop()?;

    let summary = serde_json::to_string(&meter.diagnostics_snapshot())?;
    info!(final_db = meter.read(), diagnostics = %summary, "noise meter stopped");
    Ok(())
}
