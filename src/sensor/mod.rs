use crate::error::AppError;
use serde::Deserialize;

pub mod mock;
pub mod vl53l1x;

// VL53L1X default is 0x52 in 8-bit notation; use 0x29 for 7-bit addressing.
pub const DEFAULT_I2C_ADDRESS_7BIT: u8 = 0x29;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangingMode {
    /// Up to ~1.3 m, better ambient immunity.
    Short,
    /// Up to ~4 m.
    #[default]
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorRangeStatus {
    Valid,
    SigmaFailure,
    SignalFailure,
    MinRangeClipped,
    OutOfBounds,
    HardwareFailure,
    WrapCheckFail,
    Wraparound,
    ProcessingFailure,
    CrosstalkSignal,
    Synchronisation,
    MergedPulse,
    LackOfSignal,
    MinRangeFail,
    InvalidRange,
    None,
}

impl SensorRangeStatus {
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceMeasurement {
    pub distance_mm: u16,
    pub range_status: SensorRangeStatus,
}

impl DistanceMeasurement {
    /// Distance to feed into smoothing. Readings the sensor flags as invalid
    /// usually mean nothing is in front of it, so they count as `far_mm`.
    pub fn effective_distance(&self, far_mm: u16) -> u16 {
        if self.range_status.is_valid() {
            self.distance_mm
        } else {
            far_mm
        }
    }
}

/// Ranging sensor collaborator, only ever driven from the sampler thread.
pub trait DistanceSensor {
    fn start_ranging(&mut self, mode: RangingMode) -> Result<(), AppError>;
    fn get_distance(&mut self) -> Result<DistanceMeasurement, AppError>;
    fn stop_ranging(&mut self) -> Result<(), AppError>;
}

impl<S: DistanceSensor + ?Sized> DistanceSensor for Box<S> {
    fn start_ranging(&mut self, mode: RangingMode) -> Result<(), AppError> {
        (**self).start_ranging(mode)
    }
    fn get_distance(&mut self) -> Result<DistanceMeasurement, AppError> {
        (**self).get_distance()
    }
    fn stop_ranging(&mut self) -> Result<(), AppError> {
        (**self).stop_ranging()
    }
}
