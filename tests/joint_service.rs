//! End-to-end tests through JointService and the request channel
//!
//! Run with:
//! ```bash
//! cargo test --test joint_service
//! ```

use async_trait::async_trait;
use jointd::{
    winding::wrap_counter, BroadcastTelemetry, Capability, CapabilitySet, DaemonConfig, ErrorKind, JointService,
    QuantityKind, RawDevice, Request, Result, SimulatedDevice, Target, TelemetrySink,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

const PERMUTED: &str = r#"
device:
  name: permuted
  axes: 3
  axis_map: [2, 0, 1]
  units:
    position:
      scales: [1000.0, 1000.0, 1000.0]
publishing:
  pub_rate_hz: 50
"#;

/// Position-only device that records every raw write in hardware order
struct RecordingDevice {
    positions: Vec<f64>,
    writes: Arc<Mutex<Vec<(usize, f64)>>>,
}

#[async_trait]
impl RawDevice for RecordingDevice {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Encoders)
            .with(Capability::PositionControl)
    }

    fn axis_count(&self) -> usize {
        self.positions.len()
    }

    async fn get_raw(&mut self, _kind: QuantityKind, axis: usize) -> Result<f64> {
        Ok(self.positions[axis])
    }

    async fn set_raw(&mut self, _kind: QuantityKind, axis: usize, value: f64) -> Result<()> {
        self.writes.lock().unwrap().push((axis, value));
        self.positions[axis] = value;
        Ok(())
    }
}

fn recording_service() -> (JointService, Arc<Mutex<Vec<(usize, f64)>>>) {
    let config = DaemonConfig::load_from_str(PERMUTED).unwrap();
    let writes = Arc::new(Mutex::new(Vec::new()));
    let device = RecordingDevice {
        positions: vec![0.0; 3],
        writes: Arc::clone(&writes),
    };
    (JointService::start(&config, Box::new(device), None).unwrap(), writes)
}

#[tokio::test]
async fn test_logical_axis_lands_on_mapped_hardware_axis() {
    let (service, writes) = recording_service();

    assert!(service.execute("set ref 0 1.0").await.unwrap().is_ok());
    assert_eq!(*writes.lock().unwrap(), vec![(2, 1000.0)]);

    let reply = service.execute("get enc 0").await.unwrap();
    assert_eq!(reply.numbers(), vec![1.0]);

    writes.lock().unwrap().clear();
    assert!(service.execute("set refs 1.0 2.0 3.0").await.unwrap().is_ok());
    let mut recorded = writes.lock().unwrap().clone();
    recorded.sort_by_key(|(axis, _)| *axis);
    assert_eq!(recorded, vec![(0, 2000.0), (1, 3000.0), (2, 1000.0)]);

    let reply = service.execute("get encs").await.unwrap();
    assert_eq!(reply.numbers(), vec![1.0, 2.0, 3.0]);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_capability_reports_unsupported() {
    let (service, writes) = recording_service();

    for line in ["get trq 0", "set vmos 1 1 1", "get pid 0", "calibrate 1"] {
        let reply = service.execute(line).await.unwrap();
        assert!(!reply.is_ok(), "{} should fail", line);
        assert_eq!(reply.error.unwrap().kind, ErrorKind::Unsupported, "{}", line);
    }
    assert!(writes.lock().unwrap().is_empty());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_gated_requests_make_no_raw_calls() {
    let yaml = PERMUTED.replace("  axis_map:", "  capabilities: [encoders, position_control]\n  axis_map:");
    let config = DaemonConfig::load_from_str(&yaml).unwrap();

    let device = SimulatedDevice::with_axes(3);
    let probe = device.probe();
    let service = JointService::start(&config, Box::new(device), None).unwrap();
    assert!(!service.board().capabilities().contains(Capability::Torque));

    let before = probe.calls();
    let reply = service.call(Request::get(Target::Trqs)).await.unwrap();
    assert_eq!(reply.error.unwrap().kind, ErrorKind::Unsupported);
    let reply = service.execute("set trq 1 0.5").await.unwrap();
    assert_eq!(reply.error.unwrap().kind, ErrorKind::Unsupported);
    assert_eq!(probe.calls(), before);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_axis_and_bad_json() {
    let (service, writes) = recording_service();

    let reply = service.execute("set ref 3 1.0").await.unwrap();
    assert_eq!(reply.error.unwrap().kind, ErrorKind::Range);

    let reply = service.execute(r#"{"op":"set","target":"refs","payload":[1.0, 2.0]}"#).await.unwrap();
    assert!(!reply.is_ok());

    let reply = service.execute(r#"{"op":"get""#).await.unwrap();
    assert_eq!(reply.error.unwrap().kind, ErrorKind::Protocol);

    assert!(writes.lock().unwrap().is_empty());
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_default_config_tracks_position_across_counter_wraps() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default_config.yaml");
    let config = DaemonConfig::load_from_path(path).unwrap();
    assert_eq!(config.device.counter_bits, Some(16));
    let service = JointService::start_simulated(&config, None).unwrap();

    // one radian per step stays well inside a quarter of the counter range
    for step in 1..=10 {
        let target = step as f64;
        assert!(service.execute(&format!("set ref 0 {}", target)).await.unwrap().is_ok());
        let position = service.execute("get enc 0").await.unwrap().numbers()[0];
        assert!((position - target).abs() < 1e-6, "step {}: {}", step, position);
    }

    for step in (-10..10).rev() {
        let target = step as f64;
        assert!(service.execute(&format!("set ref 0 {}", target)).await.unwrap().is_ok());
        let position = service.execute("get enc 0").await.unwrap().numbers()[0];
        assert!((position - target).abs() < 1e-6, "step {}: {}", step, position);
    }

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_encoder_redefinition_survives_wraps() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default_config.yaml");
    let config = DaemonConfig::load_from_path(path).unwrap();
    let service = JointService::start_simulated(&config, None).unwrap();

    assert!(service.execute("set ref 1 2.0").await.unwrap().is_ok());
    assert!(service.execute("set enc 1 0.0").await.unwrap().is_ok());
    let position = service.execute("get enc 1").await.unwrap().numbers()[0];
    assert!(position.abs() < 1e-6, "{}", position);

    for step in 1..=8 {
        let target = step as f64;
        assert!(service.execute(&format!("set ref 1 {}", target)).await.unwrap().is_ok());
        let position = service.execute("get enc 1").await.unwrap().numbers()[0];
        assert!((position - target).abs() < 1e-6, "step {}: {}", step, position);
    }

    service.shutdown().await.unwrap();
}

const WRAPPING: &str = r#"
device:
  name: wrapping
  axes: 1
  counter_bits: 16
  units:
    position:
      scales: [10430.378]
publishing:
  pub_rate_hz: 50
"#;

/// One axis whose encoder is a 16-bit view of an unwrapped position
struct WrappingDevice {
    position: Arc<Mutex<f64>>,
}

#[async_trait]
impl RawDevice for WrappingDevice {
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Encoders)
            .with(Capability::PositionControl)
    }

    fn axis_count(&self) -> usize {
        1
    }

    async fn get_raw(&mut self, _kind: QuantityKind, _axis: usize) -> Result<f64> {
        Ok(wrap_counter(*self.position.lock().unwrap(), 65536.0))
    }

    async fn set_raw(&mut self, _kind: QuantityKind, _axis: usize, value: f64) -> Result<()> {
        *self.position.lock().unwrap() = value;
        Ok(())
    }

    async fn get_reference_raw(&mut self, _kind: QuantityKind, _axis: usize) -> Result<f64> {
        Ok(*self.position.lock().unwrap())
    }
}

#[tokio::test]
async fn test_redefined_encoder_after_wrap_commands_the_real_axis() {
    let config = DaemonConfig::load_from_str(WRAPPING).unwrap();
    let position = Arc::new(Mutex::new(0.0));
    let device = WrappingDevice { position: Arc::clone(&position) };
    let service = JointService::start(&config, Box::new(device), None).unwrap();
    let radians = |position: &Arc<Mutex<f64>>| *position.lock().unwrap() / 10430.378;

    // five radians is past one wrap of the 16-bit counter
    for step in 1..=5 {
        assert!(service.execute(&format!("set ref 0 {}", step)).await.unwrap().is_ok());
        service.execute("get enc 0").await.unwrap();
    }
    assert!((radians(&position) - 5.0).abs() < 1e-9);

    assert!(service.execute("set enc 0 0.0").await.unwrap().is_ok());
    assert!(service.execute("get enc 0").await.unwrap().numbers()[0].abs() < 1e-9);

    assert!(service.execute("set ref 0 0.5").await.unwrap().is_ok());
    assert!((radians(&position) - 5.5).abs() < 1e-9, "axis at {} rad", radians(&position));
    let reading = service.execute("get enc 0").await.unwrap().numbers()[0];
    assert!((reading - 0.5).abs() < 1e-9, "{}", reading);
    let reference = service.execute("get ref 0").await.unwrap().numbers()[0];
    assert!((reference - 0.5).abs() < 1e-9, "{}", reference);

    assert!(service.execute("set ref 0 -0.5").await.unwrap().is_ok());
    assert!((radians(&position) - 4.5).abs() < 1e-9);

    service.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_sequence_is_contiguous() {
    let config = DaemonConfig::load_from_str(PERMUTED).unwrap();
    let sink = Arc::new(BroadcastTelemetry::new(64));
    let mut frames = sink.subscribe();
    let service = JointService::start_simulated(&config, Some(sink as Arc<dyn TelemetrySink>)).unwrap();

    let first = frames.recv().await.unwrap();
    let started = tokio::time::Instant::now();
    let mut last = first.sequence;
    for _ in 0..25 {
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.sequence, last + 1);
        assert_eq!(frame.position.len(), 3);
        last = frame.sequence;
    }
    assert!(started.elapsed() >= Duration::from_millis(25 * 20 - 1));

    let stats = service.shutdown().await.unwrap();
    assert_eq!(stats.publisher.unwrap().overruns, 0);
}
