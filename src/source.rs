use crate::error::{Result, TrackerError};
use crate::sample::Sample;
use crate::statistics::distance_meters;
use chrono::Utc;
use std::sync::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Cadence requested from the position provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateParams {
    /// 0 = only the distance filter applies
    pub min_time_ms: u64,
    /// 0 = only the time filter applies
    pub min_distance_m: f32,
}

/// Events pushed by a position source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Fix(Sample),
    ProviderAvailability(bool),
}

/// Push-based position provider.
///
/// `subscribe` replaces any existing subscription; `unsubscribe` stops
/// delivery immediately and is a no-op when nothing is subscribed.
pub trait PositionSource: Send + Sync {
    fn subscribe(&self, params: UpdateParams, sink: Sender<SourceEvent>) -> Result<()>;
    fn unsubscribe(&self);
}

/// Synthetic GPS provider drifting slowly away from a start point.
pub struct SimulatedSource {
    start_lat: f64,
    start_lon: f64,
    /// Overrides `UpdateParams::min_time_ms` when set
    interval_override: Option<Duration>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSource {
    pub fn new(start_lat: f64, start_lon: f64) -> Self {
        Self {
            start_lat,
            start_lon,
            interval_override: None,
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, period: Duration) -> Self {
        self.interval_override = Some(period);
        self
    }

    fn period_for(&self, params: &UpdateParams) -> Duration {
        self.interval_override
            .unwrap_or_else(|| Duration::from_millis(params.min_time_ms.max(1_000)))
    }
}

impl PositionSource for SimulatedSource {
    fn subscribe(&self, params: UpdateParams, sink: Sender<SourceEvent>) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| {
            TrackerError::Source(format!("Simulated source needs a tokio runtime: {}", e))
        })?;
        let mut task = self
            .task
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire source lock".to_string()))?;
        if let Some(old) = task.take() {
            old.abort();
        }

        let period = self.period_for(&params);
        let (lat0, lon0) = (self.start_lat, self.start_lon);
        log::debug!(
            "Simulated source: fix every {:.1}s, min distance {}m",
            period.as_secs_f64(),
            params.min_distance_m
        );

        *task = Some(runtime.spawn(async move {
            if sink.send(SourceEvent::ProviderAvailability(true)).await.is_err() {
                return;
            }

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seq = 0u64;
            let mut last_sent: Option<Sample> = None;

            loop {
                ticker.tick().await;
                let fix = mock_fix(lat0, lon0, seq);
                seq += 1;

                if let Some(prev) = &last_sent {
                    if distance_meters(prev, &fix) < params.min_distance_m as f64 {
                        continue;
                    }
                }

                if sink.send(SourceEvent::Fix(fix)).await.is_err() {
                    log::debug!("Simulated source: sink closed after {} fixes", seq);
                    break;
                }
                last_sent = Some(fix);
            }
        }));

        Ok(())
    }

    fn unsubscribe(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn mock_fix(lat0: f64, lon0: f64, seq: u64) -> Sample {
    let t = seq as f64;
    let speed = 10.0 + (t * 0.5).sin() * 5.0;
    let accuracy = 5.0 + (t * 0.1).sin() * 2.0;

    Sample::new(
        lat0 + t * 0.00001,
        lon0 + t * 0.00001,
        Utc::now().timestamp_millis(),
    )
    .with_speed(speed as f32)
    .with_accuracy(accuracy as f32)
}
