//! End-to-end sweep behavior against the simulated bench: sample counts and
//! ordering, bidirectional legs, cancellation, fault injection, compliance
//! handling, and the optical power channel.

use async_trait::async_trait;
use sweep_daq::config::{MeasurementConfig, OpticalConfig, PowerRange};
use sweep_daq::error::DaqResult;
use sweep_daq::instrument::{
    Keithley2400, MockLab, OpticalPowerMeter, Pm100d, SourceMeter, SourceReading,
};
use sweep_daq::sweep::{CancelToken, SweepController, SweepEvent, SweepHandle};
use sweep_daq::{DaqError, SweepStatus};

fn config(points: usize, bidirectional: bool) -> MeasurementConfig {
    MeasurementConfig {
        start_voltage: 0.0,
        stop_voltage: 1.0,
        points,
        compliance_a: 0.01,
        bidirectional,
        optical: None,
    }
}

async fn source_meter(lab: &MockLab) -> Keithley2400 {
    Keithley2400::connect(Box::new(lab.source_transport()))
        .await
        .unwrap()
}

async fn controller(lab: &MockLab) -> SweepController {
    SweepController::new(Box::new(source_meter(lab).await), None)
}

/// Drains the handle, returning progress event count and the terminal event.
async fn drain(handle: &mut SweepHandle) -> (usize, SweepEvent) {
    let mut progress = 0;
    let mut terminal = None;
    while let Some(event) = handle.next_event().await {
        match event {
            SweepEvent::Started { .. } => {}
            SweepEvent::Progress { .. } => progress += 1,
            other => {
                assert!(terminal.is_none(), "more than one terminal event");
                terminal = Some(other);
            }
        }
    }
    (progress, terminal.expect("sweep ended without a terminal event"))
}

#[tokio::test]
async fn forward_sweep_produces_n_monotonic_samples() {
    let lab = MockLab::new(1000.0);
    let mut controller = controller(&lab).await;
    let mut handle = controller.start(config(5, false)).await.unwrap();
    let (progress, terminal) = drain(&mut handle).await;

    let result = match terminal {
        SweepEvent::Completed(result) => result,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(progress, 5);
    assert_eq!(result.status, SweepStatus::Completed);
    assert_eq!(result.samples.len(), 5);

    let voltages: Vec<f64> = result.samples.iter().map(|s| s.voltage).collect();
    assert_eq!(voltages, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    for pair in result.samples.windows(2) {
        assert!(pair[1].voltage > pair[0].voltage);
    }
    // 1 kOhm device: current tracks voltage/1000.
    for sample in &result.samples {
        assert!((sample.current - sample.voltage / 1000.0).abs() < 1e-12);
        assert!(sample.power.is_none());
        assert!(!sample.in_compliance);
        assert!(!sample.reverse);
    }
}

#[tokio::test]
async fn bidirectional_sweep_yields_2n_minus_1_samples() {
    let lab = MockLab::new(1000.0);
    let mut controller = controller(&lab).await;
    let mut handle = controller.start(config(5, true)).await.unwrap();
    let (_, terminal) = drain(&mut handle).await;

    let result = match terminal {
        SweepEvent::Completed(result) => result,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(result.samples.len(), 9);
    let voltages: Vec<f64> = result.samples.iter().map(|s| s.voltage).collect();
    assert_eq!(
        voltages,
        vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.75, 0.5, 0.25, 0.0]
    );

    // The reverse leg is the forward leg reversed, minus the apex.
    let forward: Vec<f64> = voltages[..5].to_vec();
    let mut expected_reverse: Vec<f64> = forward[..4].to_vec();
    expected_reverse.reverse();
    assert_eq!(voltages[5..], expected_reverse[..]);

    for (i, sample) in result.samples.iter().enumerate() {
        assert_eq!(sample.reverse, i >= 5, "sample {i}");
    }
    assert_eq!(result.forward_leg().len(), 5);
    assert_eq!(result.reverse_leg().len(), 5);
}

/// Source meter wrapper that requests cancellation once it has served a
/// fixed number of stimulus points, making the abort point deterministic.
struct CancelAfter {
    inner: Keithley2400,
    token: CancelToken,
    remaining: usize,
}

#[async_trait]
impl SourceMeter for CancelAfter {
    fn identity(&self) -> &str {
        self.inner.identity()
    }

    async fn configure(&mut self, compliance_a: f64) -> DaqResult<()> {
        self.inner.configure(compliance_a).await
    }

    async fn set_voltage_and_read(&mut self, voltage: f64) -> DaqResult<SourceReading> {
        let reading = self.inner.set_voltage_and_read(voltage).await;
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.token.cancel();
            }
        }
        reading
    }

    async fn finish(&mut self) -> DaqResult<()> {
        self.inner.finish().await
    }

    async fn disconnect(&mut self) -> DaqResult<()> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

#[tokio::test]
async fn cancellation_after_k_samples_aborts_with_k_samples() {
    let k = 2;
    let lab = MockLab::new(1000.0);
    let token = CancelToken::new();
    let source = CancelAfter {
        inner: source_meter(&lab).await,
        token: token.clone(),
        remaining: k,
    };
    let mut controller = SweepController::new(Box::new(source), None);
    let mut handle = controller
        .start_with_cancel(config(5, false), token)
        .await
        .unwrap();
    let (progress, terminal) = drain(&mut handle).await;

    let result = match terminal {
        SweepEvent::Aborted(result) => result,
        other => panic!("expected Aborted, got {other:?}"),
    };
    assert_eq!(progress, k);
    assert_eq!(result.samples.len(), k);
    assert_eq!(result.status, SweepStatus::Aborted);
    assert!(result.error.is_none());
    // The source output was turned off on the way out.
    assert!(!lab.output_on().await);
}

#[tokio::test]
async fn cancellation_before_the_first_point_collects_nothing() {
    let lab = MockLab::new(1000.0);
    let mut controller = controller(&lab).await;
    let token = CancelToken::new();
    token.cancel();
    let mut handle = controller
        .start_with_cancel(config(5, false), token)
        .await
        .unwrap();
    let (progress, terminal) = drain(&mut handle).await;

    assert_eq!(progress, 0);
    match terminal {
        SweepEvent::Aborted(result) => assert!(result.samples.is_empty()),
        other => panic!("expected Aborted, got {other:?}"),
    }
    // No stimulus was ever applied.
    assert_eq!(lab.read_attempts().await, 0);
}

#[tokio::test]
async fn communication_failure_at_k_fails_with_k_samples() {
    let k = 3;
    let lab = MockLab::new(1000.0);
    lab.fail_read_at(k).await;
    let mut controller = controller(&lab).await;
    let mut handle = controller.start(config(5, false)).await.unwrap();
    let (progress, terminal) = drain(&mut handle).await;

    let (result, error) = match terminal {
        SweepEvent::Failed { result, error } => (result, error),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert_eq!(progress, k);
    assert_eq!(result.samples.len(), k);
    assert_eq!(result.status, SweepStatus::Failed);
    assert!(error.contains("timeout"));
    assert_eq!(result.error.as_deref(), Some(error.as_str()));
    // No measurement traffic after the failed read.
    assert_eq!(lab.read_attempts().await, k + 1);
    let log = lab.command_log().await;
    let last_read = log.iter().rposition(|c| c == ":READ?").unwrap();
    assert!(!log[last_read..].iter().any(|c| c.starts_with(":SOUR:VOLT")));
}

#[tokio::test]
async fn compliance_is_recorded_and_the_sweep_continues() {
    // 100 ohm device with 5 mA compliance: points above 0.5 V limit.
    let lab = MockLab::new(100.0);
    let mut controller = controller(&lab).await;
    let mut cfg = config(5, false);
    cfg.compliance_a = 0.005;
    let mut handle = controller.start(cfg).await.unwrap();
    let (_, terminal) = drain(&mut handle).await;

    let result = match terminal {
        SweepEvent::Completed(result) => result,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(result.samples.len(), 5);
    let flagged: Vec<bool> = result.samples.iter().map(|s| s.in_compliance).collect();
    assert_eq!(flagged, vec![false, false, false, true, true]);
    for sample in result.samples.iter().filter(|s| s.in_compliance) {
        assert!((sample.current - 0.005).abs() < 1e-12);
    }
    assert_eq!(result.summary().unwrap().compliance_hits, 2);
}

#[tokio::test]
async fn piv_sweep_collects_power_per_point() {
    let lab = MockLab::new(1000.0);
    lab.set_responsivity(0.8).await;
    let source = source_meter(&lab).await;
    let power: Box<dyn OpticalPowerMeter> = Box::new(
        Pm100d::connect(Box::new(lab.power_transport())).await.unwrap(),
    );
    let mut controller = SweepController::new(Box::new(source), Some(power));

    let mut cfg = config(5, false);
    cfg.optical = Some(OpticalConfig {
        wavelength_nm: 1310.0,
        range: PowerRange::Auto,
    });
    let mut handle = controller.start(cfg).await.unwrap();
    let (_, terminal) = drain(&mut handle).await;

    let result = match terminal {
        SweepEvent::Completed(result) => result,
        other => panic!("expected Completed, got {other:?}"),
    };
    for sample in &result.samples {
        let power = sample.power.expect("optical channel sample without power");
        assert!((power - sample.current.abs() * 0.8).abs() < 1e-12);
    }
    assert_eq!(lab.wavelength_nm().await, 1310.0);
    let log = lab.command_log().await;
    assert!(log.contains(&"SENS:CORR:WAV 1310".to_string()));
}

#[tokio::test]
async fn busy_rejection_leaves_the_running_sweep_untouched() {
    let lab = MockLab::new(1000.0);
    let mut controller = controller(&lab).await;
    let mut handle = controller.start(config(50, true)).await.unwrap();

    assert!(matches!(
        controller.start(config(5, false)).await,
        Err(DaqError::Busy)
    ));

    let (progress, terminal) = drain(&mut handle).await;
    assert_eq!(progress, 99);
    assert!(matches!(terminal, SweepEvent::Completed(_)));
}

#[tokio::test]
async fn a_new_sweep_gets_a_new_result_identity() {
    let lab = MockLab::new(1000.0);
    let mut controller = controller(&lab).await;

    let mut handle = controller.start(config(3, false)).await.unwrap();
    let (_, first) = drain(&mut handle).await;
    let mut handle = controller.start(config(3, false)).await.unwrap();
    let (_, second) = drain(&mut handle).await;

    match (first, second) {
        (SweepEvent::Completed(a), SweepEvent::Completed(b)) => {
            assert_ne!(a.id, b.id);
        }
        other => panic!("expected two completed sweeps, got {other:?}"),
    }
}
