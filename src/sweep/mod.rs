//! Sweep execution: the sequencer loop and the controller around it.
//!
//! [`run_sweep`] drives one end-to-end sweep from a validated
//! [`MeasurementConfig`] to a terminal [`MeasurementResult`], emitting
//! [`SweepEvent`]s over an mpsc channel as it goes. [`SweepController`] is
//! the consumer entry point: it owns the instruments, moves them into a
//! spawned worker task for the duration of a sweep, and refuses to start a
//! second sweep while one is live. Exclusive instrument access is structural
//! (single owner, single caller), not lock-based.
//!
//! Cancellation is cooperative: a [`CancelToken`] checked between stimulus
//! points. An in-flight instrument call is allowed to finish before the
//! sequencer observes the token. Event delivery applies backpressure to a
//! live consumer, but cancellation also interrupts a notification send that
//! is parked on a full channel, so a caller that stopped draining can still
//! cancel and shut down without deadlocking the worker.

use crate::config::MeasurementConfig;
use crate::error::{DaqError, DaqResult};
use crate::instrument::{OpticalPowerMeter, SourceMeter};
use crate::measurement::{MeasurementResult, Sample, SweepStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod stimulus;
pub use stimulus::stimulus_points;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cooperative cancellation flag shared between a caller and the sweep
/// worker.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Sender<bool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The worker observes it before the next
    /// stimulus point, or immediately if it is parked on a notification
    /// send.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // Cannot fail: `self` keeps the sender side alive.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self(watch::channel(false).0)
    }
}

/// Notifications emitted by the sweep worker. Exactly one terminal variant
/// (`Completed`, `Aborted`, or `Failed`) ends every sweep; the three
/// outcomes are never collapsed into one.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    /// Instruments are configured and the stimulus sequence is known.
    Started {
        /// Number of stimulus points that will be visited.
        total_points: usize,
    },
    /// One sample was collected.
    Progress {
        /// Zero-based point index.
        index: usize,
        /// Total stimulus points.
        total: usize,
        /// The collected sample.
        sample: Sample,
    },
    /// Every point was visited.
    Completed(MeasurementResult),
    /// Stopped on request; carries the samples collected so far.
    Aborted(MeasurementResult),
    /// Stopped by a hardware or communication failure.
    Failed {
        /// The partial result, status `Failed`.
        result: MeasurementResult,
        /// Description of what went wrong.
        error: String,
    },
}

/// Drives a single sweep to a terminal state.
///
/// Configuration errors, communication failures and cancellation all
/// resolve into the returned result's status; the same terminal information
/// is mirrored on the event channel. Compliance trips are recorded inline
/// (flagged sample) and do not stop the sweep.
pub async fn run_sweep(
    config: &MeasurementConfig,
    source: &mut dyn SourceMeter,
    mut power: Option<&mut (dyn OpticalPowerMeter + '_)>,
    events: &mpsc::Sender<SweepEvent>,
    cancel: &CancelToken,
) -> MeasurementResult {
    let mut result = MeasurementResult::new(config.clone());

    // Validation failures happen before any instrument traffic, so there is
    // nothing to tear down yet.
    if let Err(e) = config.validate() {
        return fail(result, events, cancel, e).await;
    }
    if config.optical.is_some() && power.is_none() {
        return fail(
            result,
            events,
            cancel,
            DaqError::Configuration(
                "an optical channel is configured but no power meter is connected".into(),
            ),
        )
        .await;
    }

    if let Err(e) = source.configure(config.compliance_a).await {
        teardown(source).await;
        return fail(result, events, cancel, e).await;
    }
    if let Some(optical) = &config.optical {
        if let Some(pm) = power.as_mut() {
            if let Err(e) = pm.configure(optical).await {
                teardown(source).await;
                return fail(result, events, cancel, e).await;
            }
        }
    }

    let points = stimulus_points(config);
    let total = points.len();
    info!(
        total,
        start = config.start_voltage,
        stop = config.stop_voltage,
        bidirectional = config.bidirectional,
        "sweep started"
    );
    emit(events, cancel, SweepEvent::Started { total_points: total }).await;

    for (index, &voltage) in points.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(collected = result.samples.len(), "sweep cancelled");
            teardown(source).await;
            result.finish(SweepStatus::Aborted, None);
            emit(events, cancel, SweepEvent::Aborted(result.clone())).await;
            return result;
        }

        let reverse = index >= config.points;
        let (reading_voltage, current, in_compliance) =
            match source.set_voltage_and_read(voltage).await {
                Ok(reading) => (reading.voltage, reading.current, false),
                Err(DaqError::Compliance { voltage, current }) => {
                    warn!(voltage, current, "compliance limit reached, continuing");
                    (voltage, current, true)
                }
                Err(e) => {
                    teardown(source).await;
                    return fail(result, events, cancel, e).await;
                }
            };

        let measured_power = if config.optical.is_some() {
            match power.as_mut() {
                Some(pm) => match pm.read_power().await {
                    Ok(watts) => Some(watts),
                    Err(e) => {
                        teardown(source).await;
                        return fail(result, events, cancel, e).await;
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let sample = Sample {
            voltage: reading_voltage,
            current,
            power: measured_power,
            in_compliance,
            reverse,
        };
        result.push(sample);
        debug!(index, total, voltage, current, "sample collected");
        emit(
            events,
            cancel,
            SweepEvent::Progress {
                index,
                total,
                sample,
            },
        )
        .await;
    }

    if let Err(e) = source.finish().await {
        return fail(result, events, cancel, e).await;
    }
    result.finish(SweepStatus::Completed, None);
    info!(samples = result.samples.len(), "sweep completed");
    emit(events, cancel, SweepEvent::Completed(result.clone())).await;
    result
}

/// Sends a notification, backing off if cancellation arrives while the send
/// is parked on a full channel. A cancelled send still makes one last
/// non-blocking attempt so terminal events reach a consumer that is merely
/// slow, not gone.
async fn emit(events: &mpsc::Sender<SweepEvent>, cancel: &CancelToken, event: SweepEvent) {
    let fallback = event.clone();
    tokio::select! {
        sent = events.send(event) => {
            let _ = sent;
        }
        () = cancel.cancelled() => {
            let _ = events.try_send(fallback);
        }
    }
}

/// Best-effort output-off after an abnormal end; a teardown failure must not
/// mask the original outcome.
async fn teardown(source: &mut dyn SourceMeter) {
    if let Err(e) = source.finish().await {
        warn!(error = %e, "instrument teardown after abnormal sweep end failed");
    }
}

async fn fail(
    mut result: MeasurementResult,
    events: &mpsc::Sender<SweepEvent>,
    cancel: &CancelToken,
    error: DaqError,
) -> MeasurementResult {
    warn!(error = %error, collected = result.samples.len(), "sweep failed");
    let message = error.to_string();
    result.finish(SweepStatus::Failed, Some(message.clone()));
    emit(
        events,
        cancel,
        SweepEvent::Failed {
            result: result.clone(),
            error: message,
        },
    )
    .await;
    result
}

/// The instrument set a controller owns: one source meter, optionally one
/// optical power meter.
pub struct SweepInstruments {
    /// Voltage source / current meter.
    pub source: Box<dyn SourceMeter>,
    /// Optical power channel, when attached.
    pub power: Option<Box<dyn OpticalPowerMeter>>,
}

/// Handle to an in-flight sweep: the event stream plus its cancel token.
#[derive(Debug)]
pub struct SweepHandle {
    /// Receives progress and exactly one terminal event.
    pub events: mpsc::Receiver<SweepEvent>,
    cancel: CancelToken,
}

impl SweepHandle {
    /// Requests cooperative cancellation of the sweep.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the next event; `None` once the worker is done.
    pub async fn next_event(&mut self) -> Option<SweepEvent> {
        self.events.recv().await
    }
}

/// Consumer entry point: starts sweeps on a dedicated worker task and
/// enforces at-most-one sweep per instrument set.
pub struct SweepController {
    idle: Option<SweepInstruments>,
    active: Option<(CancelToken, JoinHandle<SweepInstruments>)>,
}

impl SweepController {
    /// Creates a controller owning the given instruments.
    pub fn new(source: Box<dyn SourceMeter>, power: Option<Box<dyn OpticalPowerMeter>>) -> Self {
        Self {
            idle: Some(SweepInstruments { source, power }),
            active: None,
        }
    }

    /// Starts a sweep with a fresh cancel token. Rejects invalid
    /// configurations and concurrent sweeps synchronously, before any
    /// instrument contact.
    pub async fn start(&mut self, config: MeasurementConfig) -> DaqResult<SweepHandle> {
        self.start_with_cancel(config, CancelToken::new()).await
    }

    /// Starts a sweep observing an externally supplied cancel token.
    pub async fn start_with_cancel(
        &mut self,
        config: MeasurementConfig,
        cancel: CancelToken,
    ) -> DaqResult<SweepHandle> {
        config.validate()?;
        let mut instruments = self.reclaim().await?;
        if config.optical.is_some() && instruments.power.is_none() {
            self.idle = Some(instruments);
            return Err(DaqError::Configuration(
                "an optical channel is configured but no power meter is connected".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(async move {
            run_sweep(
                &config,
                &mut *instruments.source,
                instruments.power.as_deref_mut(),
                &tx,
                &worker_cancel,
            )
            .await;
            instruments
        });
        self.active = Some((cancel.clone(), worker));
        Ok(SweepHandle { events: rx, cancel })
    }

    /// Whether a sweep worker is currently live.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|(_, worker)| !worker.is_finished())
    }

    /// Takes the instruments back, failing fast with `Busy` while a sweep
    /// worker is live.
    async fn reclaim(&mut self) -> DaqResult<SweepInstruments> {
        if let Some((cancel, worker)) = self.active.take() {
            if !worker.is_finished() {
                self.active = Some((cancel, worker));
                return Err(DaqError::Busy);
            }
            let instruments = worker.await.map_err(|e| {
                DaqError::Communication(format!("sweep worker panicked: {e}"))
            })?;
            self.idle = Some(instruments);
        }
        self.idle.take().ok_or(DaqError::Busy)
    }

    /// Cancels any in-flight sweep, waits for the worker, and disconnects
    /// both instruments.
    pub async fn shutdown(mut self) -> DaqResult<()> {
        if let Some((cancel, worker)) = self.active.take() {
            cancel.cancel();
            let instruments = worker.await.map_err(|e| {
                DaqError::Communication(format!("sweep worker panicked: {e}"))
            })?;
            self.idle = Some(instruments);
        }
        if let Some(mut instruments) = self.idle.take() {
            instruments.source.disconnect().await?;
            if let Some(mut pm) = instruments.power.take() {
                pm.disconnect().await?;
            }
        }
        Ok(())
    }
}
