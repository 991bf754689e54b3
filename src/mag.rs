//! AK8963 magnetometer sub-driver.
//!
//! The AK8963 sits behind the MPU-9250's pass-through: it only answers on
//! the bus after [`Mpu9250::wake_up`](crate::imu::Mpu9250::wake_up) has set
//! the bypass-enable bit, so its operations live in an impl block on the
//! IMU driver and share its bus handle.

use crate::bus::RegisterBus;
use crate::error::SensorError;
use crate::imu::{decode_signed16, Mpu9250};
use std::thread;
use std::time::Duration;

/// 7-bit bus address of the AK8963.
pub const AK8963_ADDR: u8 = 0x0C;

pub(crate) const REG_ST1: u8 = 0x02;
pub(crate) const REG_HXL: u8 = 0x03;
pub(crate) const REG_ST2: u8 = 0x09;
pub(crate) const REG_CNTL1: u8 = 0x0A;
pub(crate) const REG_CNTL2: u8 = 0x0B;

const ST1_DRDY: u8 = 0x01;
const ST1_DOR: u8 = 0x02;
const ST2_HOFL: u8 = 0x08;

/// Measurable range of the AK8963 in µT.
pub const MAG_FULL_SCALE_UT: f64 = 4912.0;

/// Interval between data-ready polls.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// AK8963 operating mode (CNTL1 bits 3:0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagMode {
    PowerDown,
    SingleShot,
    Continuous8Hz,
    Continuous100Hz,
    ExternalTrigger,
    SelfTest,
}

impl MagMode {
    pub fn bits(self) -> u8 {
        match self {
            Self::PowerDown => 0x00,
            Self::SingleShot => 0x01,
            Self::Continuous8Hz => 0x02,
            Self::ExternalTrigger => 0x04,
            Self::Continuous100Hz => 0x06,
            Self::SelfTest => 0x08,
        }
    }

    /// Map an operator-facing mode label. Unrecognized labels default to
    /// single-shot; this fallback is kept for compatibility.
    pub fn from_label(label: &str) -> Self {
        match label {
            "8Hz" => Self::Continuous8Hz,
            "100Hz" => Self::Continuous100Hz,
            "POWER_DOWN" => Self::PowerDown,
            "EX_TRIGGER" => Self::ExternalTrigger,
            "SELF_TEST" => Self::SelfTest,
            _ => Self::SingleShot,
        }
    }
}

/// Output resolution (CNTL1 bit 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagResolution {
    Bits14,
    Bits16,
}

impl MagResolution {
    pub fn bits(self) -> u8 {
        match self {
            Self::Bits14 => 0x00,
            Self::Bits16 => 0x10,
        }
    }

    /// Defaults to 16-bit for anything that is not 14.
    pub fn from_bits(bits: u32) -> Self {
        if bits == 14 {
            Self::Bits14
        } else {
            Self::Bits16
        }
    }

    /// µT per LSB at this resolution.
    pub fn coefficient(self) -> f64 {
        match self {
            Self::Bits14 => MAG_FULL_SCALE_UT / 8190.0,
            Self::Bits16 => MAG_FULL_SCALE_UT / 32760.0,
        }
    }
}

impl<B: RegisterBus> Mpu9250<B> {
    fn require_mag_access(&self) -> Result<(), SensorError> {
        if !self.mag_access {
            return Err(SensorError::AccessDenied);
        }
        Ok(())
    }

    pub fn mag_mode(&self) -> MagMode {
        self.mag_mode
    }

    pub fn mag_resolution(&self) -> MagResolution {
        self.mag_resolution
    }

    /// Program the magnetometer mode and output resolution with a single
    /// control-register write.
    pub fn set_mag_mode(
        &mut self,
        mode: MagMode,
        resolution: MagResolution,
    ) -> Result<(), SensorError> {
        self.require_mag_access()?;
        self.bus
            .write_register(AK8963_ADDR, REG_CNTL1, mode.bits() | resolution.bits())?;
        self.mag_mode = mode;
        self.mag_resolution = resolution;
        Ok(())
    }

    /// Read the magnetic flux per axis in µT.
    ///
    /// Returns `Ok(None)` in external-trigger mode, which produces no data.
    /// A sample whose trailing status byte reports overflow is invalid and
    /// is discarded, never zeroed.
    pub fn read_mag(&mut self) -> Result<Option<[f64; 3]>, SensorError> {
        self.require_mag_access()?;

        match self.mag_mode {
            MagMode::SingleShot => {
                // A hardware single read auto-powers-down, so re-arm the
                // mode register before each measurement.
                let value = MagMode::SingleShot.bits() | self.mag_resolution.bits();
                self.bus.write_register(AK8963_ADDR, REG_CNTL1, value)?;
                thread::sleep(READY_POLL_INTERVAL);
            }
            MagMode::Continuous8Hz | MagMode::Continuous100Hz => {
                let status = self.bus.read_register(AK8963_ADDR, REG_ST1)?;
                if status & ST1_DOR == ST1_DOR {
                    // Data overran; a dummy read of ST2 clears it.
                    self.bus.read_register(AK8963_ADDR, REG_ST2)?;
                }
            }
            MagMode::ExternalTrigger => return Ok(None),
            MagMode::PowerDown => return Err(SensorError::PoweredDown),
            MagMode::SelfTest => {}
        }

        let mut ready = false;
        for _ in 0..self.ready_poll_limit {
            let status = self.bus.read_register(AK8963_ADDR, REG_ST1)?;
            if status & ST1_DRDY == ST1_DRDY {
                ready = true;
                break;
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
        if !ready {
            return Err(SensorError::ReadyTimeout(self.ready_poll_limit));
        }

        // Low byte first on this device, then the trailing status byte.
        let mut raw = [0i16; 3];
        for (axis, value) in raw.iter_mut().enumerate() {
            let base = REG_HXL + 2 * axis as u8;
            let low = self.bus.read_register(AK8963_ADDR, base)?;
            let high = self.bus.read_register(AK8963_ADDR, base + 1)?;
            *value = decode_signed16(u16::from(high) << 8 | u16::from(low));
        }
        let st2 = self.bus.read_register(AK8963_ADDR, REG_ST2)?;

        if st2 & ST2_HOFL == ST2_HOFL {
            return Err(SensorError::Overflow);
        }

        let coefficient = self.mag_resolution.coefficient();
        Ok(Some([
            coefficient * f64::from(raw[0]),
            coefficient * f64::from(raw[1]),
            coefficient * f64::from(raw[2]),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;

    fn awake_imu() -> Mpu9250<MockBus> {
        let mut imu = Mpu9250::new(MockBus::new());
        imu.reset().unwrap();
        imu.wake_up().unwrap();
        imu
    }

    fn load_mag_axes(bus: &mut MockBus, x: i16, y: i16, z: i16) {
        for (axis, value) in [x, y, z].into_iter().enumerate() {
            let bytes = value.to_le_bytes();
            bus.set(AK8963_ADDR, REG_HXL + 2 * axis as u8, bytes[0]);
            bus.set(AK8963_ADDR, REG_HXL + 2 * axis as u8 + 1, bytes[1]);
        }
    }

    #[test]
    fn mode_encodings_and_label_fallback() {
        assert_eq!(MagMode::PowerDown.bits(), 0x00);
        assert_eq!(MagMode::SingleShot.bits(), 0x01);
        assert_eq!(MagMode::Continuous8Hz.bits(), 0x02);
        assert_eq!(MagMode::ExternalTrigger.bits(), 0x04);
        assert_eq!(MagMode::Continuous100Hz.bits(), 0x06);
        assert_eq!(MagMode::SelfTest.bits(), 0x08);
        assert_eq!(MagMode::from_label("100Hz"), MagMode::Continuous100Hz);
        assert_eq!(MagMode::from_label("bogus"), MagMode::SingleShot);
    }

    #[test]
    fn set_mode_requires_bus_access() {
        let mut imu = Mpu9250::new(MockBus::new());
        assert!(matches!(
            imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16),
            Err(SensorError::AccessDenied)
        ));
    }

    #[test]
    fn set_mode_composes_control_byte() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)
            .unwrap();
        assert_eq!(imu.bus.writes_to(AK8963_ADDR, REG_CNTL1), vec![0x16]);
    }

    #[test]
    fn read_fails_when_powered_down_and_leaves_bus_untouched() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::PowerDown, MagResolution::Bits16)
            .unwrap();
        imu.bus.reads.clear();
        assert!(matches!(imu.read_mag(), Err(SensorError::PoweredDown)));
        assert!(imu.bus.reads.is_empty());
    }

    #[test]
    fn external_trigger_yields_no_data() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::ExternalTrigger, MagResolution::Bits16)
            .unwrap();
        assert_eq!(imu.read_mag().unwrap(), None);
    }

    #[test]
    fn single_shot_rearms_before_reading() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::SingleShot, MagResolution::Bits16)
            .unwrap();
        imu.bus.set(AK8963_ADDR, REG_ST1, ST1_DRDY);
        load_mag_axes(&mut imu.bus, 0, 0, 0);
        imu.read_mag().unwrap();
        // initial mode write, then the re-arm with the same byte
        assert_eq!(imu.bus.writes_to(AK8963_ADDR, REG_CNTL1), vec![0x11, 0x11]);
    }

    #[test]
    fn continuous_overrun_triggers_dummy_status_read() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)
            .unwrap();
        imu.bus.queue(AK8963_ADDR, REG_ST1, &[ST1_DOR, ST1_DRDY]);
        load_mag_axes(&mut imu.bus, 0, 0, 0);
        imu.bus.reads.clear();
        imu.read_mag().unwrap();
        // pre-step: ST1 then the clearing ST2 read
        assert_eq!(imu.bus.reads[0], (AK8963_ADDR, REG_ST1));
        assert_eq!(imu.bus.reads[1], (AK8963_ADDR, REG_ST2));
    }

    #[test]
    fn ready_poll_is_bounded() {
        let mut imu = awake_imu();
        imu.set_ready_poll_limit(3);
        imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)
            .unwrap();
        // ST1 never reports data ready
        assert!(matches!(
            imu.read_mag(),
            Err(SensorError::ReadyTimeout(3))
        ));
    }

    #[test]
    fn overflow_discards_the_sample() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)
            .unwrap();
        imu.bus.set(AK8963_ADDR, REG_ST1, ST1_DRDY);
        load_mag_axes(&mut imu.bus, 100, 200, 300);
        imu.bus.set(AK8963_ADDR, REG_ST2, ST2_HOFL);
        assert!(matches!(imu.read_mag(), Err(SensorError::Overflow)));
    }

    #[test]
    fn low_byte_first_reconstruction_and_scaling() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)
            .unwrap();
        imu.bus.set(AK8963_ADDR, REG_ST1, ST1_DRDY);
        load_mag_axes(&mut imu.bus, 32760, -8190, 1);
        let mag = imu.read_mag().unwrap().unwrap();
        assert!((mag[0] - MAG_FULL_SCALE_UT).abs() < 1e-9);
        assert!((mag[1] - (-8190.0 * MAG_FULL_SCALE_UT / 32760.0)).abs() < 1e-9);
        assert!((mag[2] - MAG_FULL_SCALE_UT / 32760.0).abs() < 1e-9);
    }

    #[test]
    fn fourteen_bit_scaling() {
        let mut imu = awake_imu();
        imu.set_mag_mode(MagMode::Continuous8Hz, MagResolution::Bits14)
            .unwrap();
        assert_eq!(imu.bus.writes_to(AK8963_ADDR, REG_CNTL1), vec![0x02]);
        imu.bus.set(AK8963_ADDR, REG_ST1, ST1_DRDY);
        load_mag_axes(&mut imu.bus, 8190, 0, 0);
        let mag = imu.read_mag().unwrap().unwrap();
        assert!((mag[0] - MAG_FULL_SCALE_UT).abs() < 1e-9);
    }
}
