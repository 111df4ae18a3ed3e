use crate::error::AppError;
use crate::sensor::{DistanceMeasurement, DistanceSensor, RangingMode, SensorRangeStatus};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Call counters shared with the test that owns the mock.
#[derive(Debug, Default)]
pub struct MockSensorCalls {
    pub starts: AtomicUsize,
    pub reads: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockSensorCalls {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Scripted sensor: replays `readings` in order, then repeats the last one.
pub struct MockSensor {
    readings: VecDeque<u16>,
    last: u16,
    start_ok: bool,
    fail_after: Option<usize>,
    calls: Arc<MockSensorCalls>,
}

impl MockSensor {
    pub fn with_readings(readings: impl IntoIterator<Item = u16>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: 0,
            start_ok: true,
            fail_after: None,
            calls: Arc::new(MockSensorCalls::default()),
        }
    }

    pub fn constant(distance_mm: u16) -> Self {
        Self::with_readings([distance_mm])
    }

    /// Fail every read after `reads` successful ones.
    pub fn fail_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.start_ok = false;
        self
    }

    pub fn calls(&self) -> Arc<MockSensorCalls> {
        Arc::clone(&self.calls)
    }
}

impl DistanceSensor for MockSensor {
    fn start_ranging(&mut self, _mode: RangingMode) -> Result<(), AppError> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if self.start_ok {
            Ok(())
        } else {
            Err(AppError::SensorUnavailable("mock start failed".to_string()))
        }
    }

    fn get_distance(&mut self) -> Result<DistanceMeasurement, AppError> {
        let previous_reads = self.calls.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| previous_reads >= limit) {
            return Err(AppError::SensorUnavailable("mock read failed".to_string()));
        }
        if let Some(next) = self.readings.pop_front() {
            self.last = next;
        }
        Ok(DistanceMeasurement {
            distance_mm: self.last,
            range_status: SensorRangeStatus::Valid,
        })
    }

    fn stop_ranging(&mut self) -> Result<(), AppError> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_then_repeats_last() -> Result<(), AppError> {
        let mut sensor = MockSensor::with_readings([300, 900]);

        assert_eq!(sensor.get_distance()?.distance_mm, 300);
        assert_eq!(sensor.get_distance()?.distance_mm, 900);
        assert_eq!(sensor.get_distance()?.distance_mm, 900);
        assert_eq!(sensor.calls().reads(), 3);
        Ok(())
    }

    #[test]
    fn read_can_fail() {
        let mut sensor = MockSensor::constant(500).fail_after(0);

        let err = sensor.get_distance().unwrap_err();

        assert_eq!(err.to_string(), "sensor unavailable: mock read failed");
    }
}
