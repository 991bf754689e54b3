use crate::bus::RegisterBus;
use crate::error::SensorError;
use crate::mag::{MagMode, MagResolution, AK8963_ADDR, REG_CNTL2};
use chrono::{DateTime, Local};
use log::info;
use std::thread;
use std::time::Duration;

/// 7-bit bus address of the MPU-9250.
pub const MPU9250_ADDR: u8 = 0x68;

const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_INT_PIN_CFG: u8 = 0x37;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_GYRO_XOUT_H: u8 = 0x43;
const REG_PWR_MGMT_1: u8 = 0x6B;

const PWR_MGMT_1_RESET: u8 = 0x80;
const INT_PIN_CFG_BYPASS_EN: u8 = 0x02;

/// Register settle time after reset/wake/range writes. A hardware
/// requirement, not cosmetic.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Accelerometer full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    /// Map a range in g to the enum. Unsupported values fall back to the
    /// smallest range; this silent default is kept for compatibility.
    pub fn from_g(g: u32) -> Self {
        match g {
            16 => Self::G16,
            8 => Self::G8,
            4 => Self::G4,
            _ => Self::G2,
        }
    }

    /// 2-bit ACCEL_FS_SEL encoding, pre-shifted into bits 4:3.
    pub fn register_value(self) -> u8 {
        match self {
            Self::G2 => 0x00,
            Self::G4 => 0x08,
            Self::G8 => 0x10,
            Self::G16 => 0x18,
        }
    }

    pub fn full_scale_g(self) -> f64 {
        match self {
            Self::G2 => 2.0,
            Self::G4 => 4.0,
            Self::G8 => 8.0,
            Self::G16 => 16.0,
        }
    }

    /// g per LSB at this range.
    pub fn coefficient(self) -> f64 {
        self.full_scale_g() / 32768.0
    }
}

/// Gyroscope full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl GyroRange {
    /// Map a range in dps to the enum, falling back to the smallest range
    /// for unsupported values (kept for compatibility).
    pub fn from_dps(dps: u32) -> Self {
        match dps {
            2000 => Self::Dps2000,
            1000 => Self::Dps1000,
            500 => Self::Dps500,
            _ => Self::Dps250,
        }
    }

    /// 2-bit GYRO_FS_SEL encoding, pre-shifted into bits 4:3.
    pub fn register_value(self) -> u8 {
        match self {
            Self::Dps250 => 0x00,
            Self::Dps500 => 0x08,
            Self::Dps1000 => 0x10,
            Self::Dps2000 => 0x18,
        }
    }

    pub fn full_scale_dps(self) -> f64 {
        match self {
            Self::Dps250 => 250.0,
            Self::Dps500 => 500.0,
            Self::Dps1000 => 1000.0,
            Self::Dps2000 => 2000.0,
        }
    }

    /// dps per LSB at this range.
    pub fn coefficient(self) -> f64 {
        self.full_scale_dps() / 32768.0
    }
}

/// IMU power state: `reset()` moves to `Asleep`, `wake_up()` to `Awake`.
/// Range configuration is only meaningful while awake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Reset,
    Asleep,
    Awake,
}

/// One acquisition tick's worth of calibrated readings. Immutable after
/// creation; appended to the IMU log.
#[derive(Debug, Clone)]
pub struct ImuSample {
    pub timestamp: DateTime<Local>,
    /// Acceleration per axis in g.
    pub accel: [f64; 3],
    /// Angular rate per axis in dps.
    pub gyro: [f64; 3],
    /// Magnetic flux per axis in µT.
    pub mag: [f64; 3],
}

/// MPU-9250 9-axis IMU driven at the register level.
///
/// Owns the bus for the lifetime of the process. The AK8963 magnetometer
/// behind the pass-through is driven by the impl block in [`crate::mag`];
/// the calibration engine lives in [`crate::calibration`].
pub struct Mpu9250<B> {
    pub(crate) bus: B,
    pub(crate) state: PowerState,
    accel_range: AccelRange,
    gyro_range: GyroRange,
    pub(crate) accel_offset: [f64; 3],
    pub(crate) gyro_offset: [f64; 3],
    pub(crate) mag_access: bool,
    pub(crate) mag_mode: MagMode,
    pub(crate) mag_resolution: MagResolution,
    pub(crate) ready_poll_limit: usize,
}

impl<B: RegisterBus> Mpu9250<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            state: PowerState::Reset,
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps250,
            accel_offset: [0.0; 3],
            gyro_offset: [0.0; 3],
            mag_access: false,
            mag_mode: MagMode::PowerDown,
            mag_resolution: MagResolution::Bits16,
            ready_poll_limit: 100,
        }
    }

    /// Bound on data-ready polls in [`Mpu9250::read_mag`] (10 ms apart).
    pub fn set_ready_poll_limit(&mut self, limit: usize) {
        self.ready_poll_limit = limit;
    }

    /// Soft-reset the device back to its power-on register defaults.
    ///
    /// If the magnetometer was reachable it is soft-reset first, since the
    /// bypass disappears with the IMU reset.
    pub fn reset(&mut self) -> Result<(), SensorError> {
        if self.mag_access {
            self.bus.write_register(AK8963_ADDR, REG_CNTL2, 0x01)?;
        }
        self.bus
            .write_register(MPU9250_ADDR, REG_PWR_MGMT_1, PWR_MGMT_1_RESET)?;
        self.mag_access = false;
        self.state = PowerState::Asleep;
        thread::sleep(SETTLE_DELAY);
        Ok(())
    }

    /// Leave sleep mode and enable bypass so the magnetometer becomes
    /// independently addressable on the bus.
    pub fn wake_up(&mut self) -> Result<(), SensorError> {
        self.bus.write_register(MPU9250_ADDR, REG_PWR_MGMT_1, 0x00)?;
        thread::sleep(SETTLE_DELAY);
        self.bus
            .write_register(MPU9250_ADDR, REG_INT_PIN_CFG, INT_PIN_CFG_BYPASS_EN)?;
        self.mag_access = true;
        self.state = PowerState::Awake;
        thread::sleep(SETTLE_DELAY);
        Ok(())
    }

    fn require_awake(&self) -> Result<(), SensorError> {
        if self.state != PowerState::Awake {
            return Err(SensorError::Asleep);
        }
        Ok(())
    }

    /// Configure the accelerometer full-scale range and recompute the
    /// per-LSB coefficient. `calibration` runs the zero-offset routine with
    /// that many samples right after the range takes effect.
    pub fn set_accel_range(
        &mut self,
        range: AccelRange,
        calibration: Option<usize>,
    ) -> Result<(), SensorError> {
        self.require_awake()?;
        info!("set accel range = {} g", range.full_scale_g());
        self.bus
            .write_register(MPU9250_ADDR, REG_ACCEL_CONFIG, range.register_value())?;
        self.accel_range = range;
        thread::sleep(SETTLE_DELAY);
        if let Some(samples) = calibration {
            self.calibrate_accel(samples)?;
        }
        Ok(())
    }

    /// Configure the gyroscope full-scale range; see [`Mpu9250::set_accel_range`].
    pub fn set_gyro_range(
        &mut self,
        range: GyroRange,
        calibration: Option<usize>,
    ) -> Result<(), SensorError> {
        self.require_awake()?;
        info!("set gyro range = {} dps", range.full_scale_dps());
        self.bus
            .write_register(MPU9250_ADDR, REG_GYRO_CONFIG, range.register_value())?;
        self.gyro_range = range;
        thread::sleep(SETTLE_DELAY);
        if let Some(samples) = calibration {
            self.calibrate_gyro(samples)?;
        }
        Ok(())
    }

    pub fn accel_range(&self) -> AccelRange {
        self.accel_range
    }

    pub fn gyro_range(&self) -> GyroRange {
        self.gyro_range
    }

    pub fn accel_offset(&self) -> [f64; 3] {
        self.accel_offset
    }

    pub fn gyro_offset(&self) -> [f64; 3] {
        self.gyro_offset
    }

    /// Read one axis from an H/L register pair (high byte first).
    fn read_axis_be(&mut self, base: u8) -> Result<i16, SensorError> {
        let high = self.bus.read_register(MPU9250_ADDR, base)?;
        let low = self.bus.read_register(MPU9250_ADDR, base + 1)?;
        Ok(decode_signed16(u16::from(high) << 8 | u16::from(low)))
    }

    fn read_vector_be(&mut self, base: u8, coefficient: f64) -> Result<[f64; 3], SensorError> {
        let x = self.read_axis_be(base)?;
        let y = self.read_axis_be(base + 2)?;
        let z = self.read_axis_be(base + 4)?;
        Ok([
            coefficient * f64::from(x),
            coefficient * f64::from(y),
            coefficient * f64::from(z),
        ])
    }

    /// Scaled acceleration without the calibration offsets applied; the
    /// calibration engine samples through this.
    pub(crate) fn read_accel_uncorrected(&mut self) -> Result<[f64; 3], SensorError> {
        self.read_vector_be(REG_ACCEL_XOUT_H, self.accel_range.coefficient())
    }

    pub(crate) fn read_gyro_uncorrected(&mut self) -> Result<[f64; 3], SensorError> {
        self.read_vector_be(REG_GYRO_XOUT_H, self.gyro_range.coefficient())
    }

    /// Calibrated acceleration in g per axis.
    pub fn read_accel(&mut self) -> Result<[f64; 3], SensorError> {
        let raw = self.read_accel_uncorrected()?;
        Ok([
            raw[0] + self.accel_offset[0],
            raw[1] + self.accel_offset[1],
            raw[2] + self.accel_offset[2],
        ])
    }

    /// Calibrated angular rate in dps per axis.
    pub fn read_gyro(&mut self) -> Result<[f64; 3], SensorError> {
        let raw = self.read_gyro_uncorrected()?;
        Ok([
            raw[0] + self.gyro_offset[0],
            raw[1] + self.gyro_offset[1],
            raw[2] + self.gyro_offset[2],
        ])
    }
}

/// Reconstruct the signed meaning of a 16-bit two's-complement register pair.
pub fn decode_signed16(raw: u16) -> i16 {
    if raw & 0x8000 != 0 {
        (-(i32::from(raw ^ 0xFFFF) + 1)) as i16
    } else {
        raw as i16
    }
}
