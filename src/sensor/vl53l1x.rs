use crate::error::AppError;
use crate::sensor::{DistanceMeasurement, DistanceSensor, RangingMode};

#[cfg(target_os = "linux")]
use crate::sensor::{DEFAULT_I2C_ADDRESS_7BIT, SensorRangeStatus};
#[cfg(target_os = "linux")]
use rppal::i2c::I2c;
#[cfg(target_os = "linux")]
use vl53l1x_uld::{DistanceMode, IOVoltage, RangeStatus as Vl53l1xRangeStatus, VL53L1X};

#[cfg(target_os = "linux")]
pub struct Vl53l1xSensor {
    driver: VL53L1X<I2c>,
}

#[cfg(target_os = "linux")]
impl Vl53l1xSensor {
    /// Open the default I2C bus and boot the sensor at its factory address.
    pub fn open() -> Result<Self, AppError> {
        Self::open_at(DEFAULT_I2C_ADDRESS_7BIT, IOVoltage::Volt2_8)
    }

    pub fn open_at(address: u8, io_voltage: IOVoltage) -> Result<Self, AppError> {
        let i2c = I2c::new().map_err(|err| AppError::SensorUnavailable(format!("i2c: {err}")))?;
        let mut driver = VL53L1X::new(i2c, address);
        driver
            .init(io_voltage)
            .map_err(|err| AppError::SensorUnavailable(format!("init: {err:?}")))?;
        driver
            .get_sensor_id()
            .map_err(|err| AppError::SensorUnavailable(format!("verify: {err:?}")))?;
        Ok(Self { driver })
    }
}

#[cfg(target_os = "linux")]
impl DistanceSensor for Vl53l1xSensor {
    fn start_ranging(&mut self, mode: RangingMode) -> Result<(), AppError> {
        let distance_mode = match mode {
            RangingMode::Short => DistanceMode::Short,
            RangingMode::Long => DistanceMode::Long,
        };
        self.driver
            .set_distance_mode(distance_mode)
            .map_err(|err| AppError::SensorUnavailable(format!("distance mode: {err:?}")))?;
        self.driver
            .start_ranging()
            .map_err(|err| AppError::SensorUnavailable(format!("start ranging: {err:?}")))
    }

    fn get_distance(&mut self) -> Result<DistanceMeasurement, AppError> {
        let result = self
            .driver
            .get_result()
            .map_err(|err| AppError::SensorUnavailable(format!("{err:?}")))?;
        // Clear interrupt to trigger next measurement
        self.driver
            .clear_interrupt()
            .map_err(|err| AppError::SensorUnavailable(format!("clear_interrupt: {err:?}")))?;
        Ok(DistanceMeasurement {
            distance_mm: result.distance_mm,
            range_status: SensorRangeStatus::from(result.status),
        })
    }

    fn stop_ranging(&mut self) -> Result<(), AppError> {
        self.driver
            .stop_ranging()
            .map_err(|err| AppError::SensorUnavailable(format!("stop ranging: {err:?}")))
    }
}

#[cfg(not(target_os = "linux"))]
pub struct Vl53l1xSensor;

#[cfg(not(target_os = "linux"))]
impl Vl53l1xSensor {
    pub fn open() -> Result<Self, AppError> {
        Err(AppError::SensorUnavailable(
            "VL53L1X driver requires Linux/Raspberry Pi".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl DistanceSensor for Vl53l1xSensor {
    fn start_ranging(&mut self, _mode: RangingMode) -> Result<(), AppError> {
        Err(AppError::SensorUnavailable(
            "VL53L1X driver requires Linux/Raspberry Pi".to_string(),
        ))
    }

    fn get_distance(&mut self) -> Result<DistanceMeasurement, AppError> {
        Err(AppError::SensorUnavailable(
            "VL53L1X driver requires Linux/Raspberry Pi".to_string(),
        ))
    }

    fn stop_ranging(&mut self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl From<Vl53l1xRangeStatus> for SensorRangeStatus {
    fn from(status: Vl53l1xRangeStatus) -> Self {
        match status {
            Vl53l1xRangeStatus::Valid => Self::Valid,
            Vl53l1xRangeStatus::SigmaFailure => Self::SigmaFailure,
            Vl53l1xRangeStatus::SignalFailure => Self::SignalFailure,
            Vl53l1xRangeStatus::MinRangeClipped => Self::MinRangeClipped,
            Vl53l1xRangeStatus::OutOfBounds => Self::OutOfBounds,
            Vl53l1xRangeStatus::HardwareFailure => Self::HardwareFailure,
            Vl53l1xRangeStatus::WrapCheckFail => Self::WrapCheckFail,
            Vl53l1xRangeStatus::Wraparound => Self::Wraparound,
            Vl53l1xRangeStatus::ProcessingFailure => Self::ProcessingFailure,
            Vl53l1xRangeStatus::CrosstalkSignal => Self::CrosstalkSignal,
            Vl53l1xRangeStatus::Synchronisation => Self::Synchronisation,
            Vl53l1xRangeStatus::MergedPulse => Self::MergedPulse,
            Vl53l1xRangeStatus::LackOfSignal => Self::LackOfSignal,
            Vl53l1xRangeStatus::MinRangeFail => Self::MinRangeFail,
            Vl53l1xRangeStatus::InvalidRange => Self::InvalidRange,
            Vl53l1xRangeStatus::None => Self::None,
        }
    }
}
