//! Rolling-average proximity detection on top of a ranging sensor.
//!
//! [`ProximityDetector`] owns the bounded sample window and the warm-up gate.
//! [`spawn_sampler`] runs the dedicated sampling thread that feeds it.

use crate::activation::RangeSignal;
use crate::clock::Clock;
use crate::error::AppError;
use crate::sensor::{DistanceSensor, RangingMode};
use crate::state::{MirrorState, ProximityState};
use crate::stop::StopFlag;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{Span, debug, error, info, trace, warn};

pub const DEFAULT_SAMPLE_COUNT: usize = 15;
pub const DEFAULT_DISTANCE_THRESHOLD_MM: u16 = 1000;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_FAR_DISTANCE_MM: u16 = 4000;

pub type SharedDetector = Arc<Mutex<ProximityDetector>>;

#[derive(Debug)]
pub struct ProximityDetector {
    samples: VecDeque<u16>,
    sample_count: usize,
    distance_threshold_mm: u16,
    ready: bool,
    span: Span,
}

impl ProximityDetector {
    pub fn new(sample_count: usize, distance_threshold_mm: u16, span: Span) -> Self {
        let sample_count = sample_count.max(1);
        Self {
            samples: VecDeque::with_capacity(sample_count),
            sample_count,
            distance_threshold_mm,
            ready: false,
            span,
        }
    }

    pub fn shared(self) -> SharedDetector {
        Arc::new(Mutex::new(self))
    }

    /// Append a sample, evicting the oldest once the window is full.
    pub fn push_sample(&mut self, distance_mm: u16) {
        if self.samples.len() >= self.sample_count {
            self.samples.pop_front();
        }
        self.samples.push_back(distance_mm);

        if !self.ready && self.samples.len() >= self.sample_count {
            self.ready = true;
            info!(
                parent: &self.span,
                samples = self.samples.len(),
                sample_count = self.sample_count,
                "Sample threshold reached"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Mean of the current window. Only meaningful after warm-up.
    pub fn average(&self) -> Result<f64, AppError> {
        if self.samples.is_empty() {
            return Err(AppError::EmptyBuffer);
        }
        let sum: u64 = self.samples.iter().map(|sample| u64::from(*sample)).sum();
        Ok(sum as f64 / self.samples.len() as f64)
    }

    pub fn in_range(&self) -> bool {
        if self.samples.len() < self.sample_count {
            info!(
                parent: &self.span,
                samples = self.samples.len(),
                sample_count = self.sample_count,
                "Not enough samples"
            );
            return false;
        }
        self.average()
            .map(|average| average < f64::from(self.distance_threshold_mm))
            .unwrap_or(false)
    }

    pub fn state(&self) -> ProximityState {
        let average = self.average().ok();
        ProximityState {
            average,
            ready: self.ready,
            in_range: self.ready
                && average.is_some_and(|average| average < f64::from(self.distance_threshold_mm)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub ranging_mode: RangingMode,
    /// Substituted for readings the sensor flags as invalid.
    pub far_distance_mm: u16,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLE_INTERVAL,
            ranging_mode: RangingMode::default(),
            far_distance_mm: DEFAULT_FAR_DISTANCE_MM,
        }
    }
}

/// Handle to the running sampling thread.
pub struct ProximitySampler {
    detector: SharedDetector,
    stop: StopFlag,
    handle: Option<JoinHandle<Result<(), AppError>>>,
    span: Span,
}

/// Spawn the sampling thread. Ranging is stopped exactly once when it exits.
pub fn spawn_sampler<S>(
    sensor: S,
    detector: SharedDetector,
    settings: SamplerSettings,
    clock: Arc<dyn Clock>,
    state: Option<Arc<MirrorState>>,
    span: Span,
) -> ProximitySampler
where
    S: DistanceSensor + Send + 'static,
{
    let stop = StopFlag::new();
    let handle = {
        let detector = Arc::clone(&detector);
        let stop = stop.clone();
        let span = span.clone();
        std::thread::spawn(move || {
            let _enter = span.enter();
            let mut sensor = sensor;
            let result = run_sampler(&mut sensor, &detector, settings, clock.as_ref(), state, &stop);
            if let Err(ref err) = result {
                error!(error = %err, "Proximity sampler stopped on error");
            }
            result
        })
    };
    ProximitySampler {
        detector,
        stop,
        handle: Some(handle),
        span,
    }
}

fn run_sampler<S>(
    sensor: &mut S,
    detector: &SharedDetector,
    settings: SamplerSettings,
    clock: &dyn Clock,
    state: Option<Arc<MirrorState>>,
    stop: &StopFlag,
) -> Result<(), AppError>
where
    S: DistanceSensor,
{
    sensor.start_ranging(settings.ranging_mode)?;
    info!(mode = ?settings.ranging_mode, "Ranging started");
    let mut ranging = RangingGuard { sensor };

    while !stop.is_set() {
        let measurement = ranging.sensor.get_distance()?;
        let distance_mm = measurement.effective_distance(settings.far_distance_mm);
        if !measurement.range_status.is_valid() {
            debug!(
                distance_mm = measurement.distance_mm,
                range_status = ?measurement.range_status,
                "Invalid reading treated as far"
            );
        }

        let snapshot = {
            let mut guard = detector
                .lock()
                .map_err(|_| AppError::Lock("proximity detector"))?;
            guard.push_sample(distance_mm);
            guard.state()
        };
        trace!(distance_mm, average = ?snapshot.average, "Sample recorded");
        if let Some(state) = &state {
            state.set_proximity(snapshot);
        }

        stop.sleep(clock, settings.interval);
    }
    Ok(())
}

/// Stops ranging when dropped, on every exit path out of the sampling loop.
struct RangingGuard<'a, S: DistanceSensor> {
    sensor: &'a mut S,
}

impl<S: DistanceSensor> Drop for RangingGuard<'_, S> {
    fn drop(&mut self) {
        match self.sensor.stop_ranging() {
            Ok(()) => info!("Ranging stopped"),
            Err(err) => warn!(error = %err, "Failed to stop ranging"),
        }
    }
}

impl ProximitySampler {
    pub fn detector(&self) -> &SharedDetector {
        &self.detector
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn join(&mut self) -> Result<(), AppError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AppError::ThreadPanic("proximity sampler"))?,
            None => Ok(()),
        }
    }
}

impl RangeSignal for ProximitySampler {
    fn in_range(&self) -> bool {
        match self.detector.lock() {
            Ok(guard) => guard.in_range(),
            Err(_) => {
                warn!(parent: &self.span, "Proximity detector lock poisoned");
                false
            }
        }
    }

    fn health(&mut self) -> Result<(), AppError> {
        let finished = self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if !finished {
            return Ok(());
        }
        self.join()?;
        if self.stop.is_set() {
            Ok(())
        } else {
            Err(AppError::SensorUnavailable(
                "sampler exited unexpectedly".to_string(),
            ))
        }
    }

    fn stop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.stop.request();
        match self.join() {
            Ok(()) => info!(parent: &self.span, "Proximity sampler stopped"),
            Err(err) => warn!(parent: &self.span, error = %err, "Proximity sampler ended with error"),
        }
    }
}

impl Drop for ProximitySampler {
    fn drop(&mut self) {
        RangeSignal::stop(self);
    }
}
