//! Streaming joint-state publisher
//!
//! Samples the control board once per period and hands a [`JointState`]
//! frame to a [`TelemetrySink`]. Each cycle sleeps only for what is left
//! of the period; a cycle that runs long is logged as an overrun and the
//! next one starts immediately. Sampling and publishing are each bounded by
//! a timeout so a stalled device or transport lowers the frame rate instead
//! of blocking the loop.

use crate::{
    config::PublishingConfig,
    controller::{ControlBoard, JointSample},
    error::JointError,
    telemetry::{JointState, TelemetrySink},
};
use chrono::Utc;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tracing::{debug, info, warn};

/// Counters reported when the publisher stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub overruns: u64,
    pub failed: u64,
    pub timeouts: u64,
}

pub struct StreamingPublisher {
    board: ControlBoard,
    sink: Arc<dyn TelemetrySink>,
    period: Duration,
    sample_timeout: Duration,
    decimal_places: Option<u32>,
    extended: bool,
    stop: Arc<AtomicBool>,
}

impl StreamingPublisher {
    pub fn new(board: ControlBoard, sink: Arc<dyn TelemetrySink>, config: &PublishingConfig) -> Self {
        Self {
            board,
            sink,
            period: config.period(),
            sample_timeout: config.sample_timeout(),
            decimal_places: config.decimal_places,
            extended: config.extended(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative stop flag, checked once per cycle
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn spawn(self) -> PublisherHandle {
        let stop = self.stop_flag();
        let task = tokio::spawn(self.run());
        PublisherHandle { stop, task }
    }

    pub async fn run(self) -> PublisherStats {
        info!(
            "Streaming joint state every {:?} (sample timeout {:?})",
            self.period, self.sample_timeout
        );

        let mut stats = PublisherStats::default();
        let mut sequence: u64 = 0;
        let mut sample = JointSample::new(self.board.axes());
        let mut failing = false;

        while !self.stop.load(Ordering::SeqCst) {
            let started = Instant::now();

            match timeout(self.sample_timeout, self.board.sample_into(self.extended, &mut sample)).await {
                Ok(Ok(())) => {
                    if failing {
                        info!("Joint sampling recovered");
                        failing = false;
                    }
                    sequence += 1;
                    let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
                    let frame = JointState::from_sample(sequence, timestamp, &sample, self.decimal_places);
                    match timeout(self.period, self.sink.publish_joint_state(&frame)).await {
                        Ok(Ok(())) => stats.published += 1,
                        Ok(Err(e)) => {
                            stats.failed += 1;
                            warn!("Failed to publish frame {}: {}", sequence, e);
                        }
                        Err(_) => {
                            stats.failed += 1;
                            warn!("Publishing frame {} exceeded {:?}", sequence, self.period);
                        }
                    }
                }
                Ok(Err(e)) => {
                    if matches!(e, JointError::HardwareTimeout(_)) {
                        stats.timeouts += 1;
                    } else {
                        stats.failed += 1;
                    }
                    if failing {
                        debug!("Joint sampling still failing: {}", e);
                    } else {
                        warn!("Joint sampling failed: {}", e);
                        failing = true;
                    }
                }
                Err(_) => {
                    stats.timeouts += 1;
                    warn!("Joint sample exceeded {:?}", self.sample_timeout);
                }
            }

            let elapsed = started.elapsed();
            if elapsed < self.period {
                sleep(self.period - elapsed).await;
            } else {
                stats.overruns += 1;
                warn!("Publish cycle overran: {:?} > {:?}", elapsed, self.period);
            }
        }

        info!(
            "Publisher stopped: {} published, {} overruns, {} failed, {} timed out",
            stats.published, stats.overruns, stats.failed, stats.timeouts
        );
        stats
    }
}

/// Running publisher task
pub struct PublisherHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<PublisherStats>,
}

impl PublisherHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and wait for the in-flight cycle to finish
    pub async fn shutdown(self) -> anyhow::Result<PublisherStats> {
        self.stop();
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DeviceConfig,
        sim::{SimProbe, SimulatedDevice},
        telemetry::BroadcastTelemetry,
        units::UnitsConfig,
    };
    use async_trait::async_trait;

    /// Hangs on the first frame, forwards the rest
    struct StallingSink {
        stalled: AtomicBool,
        inner: BroadcastTelemetry,
    }

    #[async_trait]
    impl TelemetrySink for StallingSink {
        async fn publish_joint_state(&self, frame: &JointState) -> anyhow::Result<()> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                sleep(Duration::from_secs(60)).await;
            }
            self.inner.publish_joint_state(frame).await
        }
    }

    const PERIOD: Duration = Duration::from_millis(20);

    fn setup(latency: Duration) -> (ControlBoard, Arc<SimProbe>) {
        let config = DeviceConfig {
            name: "cadence".to_string(),
            axes: 2,
            axis_map: None,
            units: UnitsConfig::default(),
            counter_bits: None,
            capabilities: None,
            call_timeout_ms: Some(1000),
        };
        let device = SimulatedDevice::with_axes(2).with_latency(latency);
        let probe = device.probe();
        (ControlBoard::open(&config, Box::new(device)).unwrap(), probe)
    }

    fn publishing() -> PublishingConfig {
        PublishingConfig {
            pub_rate_hz: 50,
            decimal_places: None,
            sample_timeout_ms: None,
            extended: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_with_one_stalled_sample() {
        let (board, probe) = setup(Duration::from_millis(5));
        let sink = Arc::new(BroadcastTelemetry::new(256));
        let mut frames = sink.subscribe();
        let handle = StreamingPublisher::new(board, sink, &publishing()).spawn();

        let mut arrivals = Vec::new();
        let mut sequences = Vec::new();
        while sequences.len() < 100 {
            let frame = frames.recv().await.unwrap();
            arrivals.push(Instant::now());
            sequences.push(frame.sequence);
            if sequences.len() == 50 {
                probe.stall_next(2 * PERIOD);
            }
        }

        for pair in sequences.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }

        let intervals: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
        let long: Vec<&Duration> = intervals.iter().filter(|d| **d > PERIOD + Duration::from_millis(1)).collect();
        assert_eq!(long.len(), 1, "intervals: {:?}", intervals);
        assert!(*long[0] <= 2 * PERIOD + Duration::from_millis(1));
        for interval in &intervals {
            assert!(*interval >= PERIOD - Duration::from_millis(1), "interval {:?}", interval);
        }

        let stats = handle.shutdown().await.unwrap();
        assert!(stats.published >= 100);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.overruns, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_is_abandoned_after_one_period() {
        let (board, _probe) = setup(Duration::ZERO);
        let inner = BroadcastTelemetry::new(16);
        let mut frames = inner.subscribe();
        let sink = Arc::new(StallingSink { stalled: AtomicBool::new(false), inner });
        let started = Instant::now();
        let handle = StreamingPublisher::new(board, sink, &publishing()).spawn();

        let first = frames.recv().await.unwrap();
        assert_eq!(first.sequence, 2);
        assert!(started.elapsed() <= 2 * PERIOD + Duration::from_millis(1), "{:?}", started.elapsed());
        assert_eq!(frames.recv().await.unwrap().sequence, 3);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(stats.published >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_ends_loop() {
        let (board, _probe) = setup(Duration::ZERO);
        let sink = Arc::new(BroadcastTelemetry::new(16));
        let mut frames = sink.subscribe();
        let publisher = StreamingPublisher::new(board, sink, &publishing());
        let stop = publisher.stop_flag();
        let task = tokio::spawn(publisher.run());

        frames.recv().await.unwrap();
        stop.store(true, Ordering::SeqCst);
        let stats = task.await.unwrap();
        assert!(stats.published >= 1);
        assert_eq!(stats.overruns, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_encoders_are_counted_not_fatal() {
        let config = DeviceConfig {
            name: "blind".to_string(),
            axes: 1,
            axis_map: None,
            units: UnitsConfig::default(),
            counter_bits: None,
            capabilities: Some(vec![crate::capability::Capability::Torque]),
            call_timeout_ms: None,
        };
        let board = ControlBoard::open(&config, Box::new(SimulatedDevice::with_axes(1))).unwrap();
        let handle = StreamingPublisher::new(board, Arc::new(crate::telemetry::NoOpTelemetry), &publishing()).spawn();

        tokio::time::sleep(PERIOD * 5).await;
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.published, 0);
        assert!(stats.failed >= 5);
    }
}
