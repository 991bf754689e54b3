use anyhow::{Context, Result};
use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use thiserror::Error;

/// A failed bus transaction (NACK, timeout, bus not ready).
///
/// No retries happen at this layer; retry policy belongs to callers.
#[derive(Debug, Clone, Error)]
#[error("bus transfer failed at device 0x{device:02X} register 0x{register:02X}: {detail}")]
pub struct BusError {
    pub device: u8,
    pub register: u8,
    pub detail: String,
}

/// Raw 8-bit register access to a device on a two-wire bus.
///
/// `device` is the 7-bit bus address. Writes to mode-trigger registers have
/// side effects and are not idempotent.
pub trait RegisterBus {
    fn read_register(&mut self, device: u8, register: u8) -> Result<u8, BusError>;
    fn write_register(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError>;
}

/// Register bus over a Linux I2C character device (e.g. `/dev/i2c-1`).
pub struct I2cBus {
    dev: I2cdev,
}

impl I2cBus {
    pub fn open(path: &str) -> Result<Self> {
        let dev = I2cdev::new(path)
            .with_context(|| format!("failed to open I2C device: {path}"))?;
        Ok(Self { dev })
    }
}

impl RegisterBus for I2cBus {
    fn read_register(&mut self, device: u8, register: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.dev
            .write_read(device, &[register], &mut buf)
            .map_err(|e| BusError {
                device,
                register,
                detail: format!("{e:?}"),
            })?;
        Ok(buf[0])
    }

    fn write_register(&mut self, device: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.dev
            .write(device, &[register, value])
            .map_err(|e| BusError {
                device,
                register,
                detail: format!("{e:?}"),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockBus;
    use super::*;

    #[test]
    fn mock_bus_records_and_replays() {
        let mut bus = MockBus::new();
        bus.write_register(0x68, 0x6B, 0x80).unwrap();
        assert_eq!(bus.read_register(0x68, 0x6B).unwrap(), 0x80);
        assert_eq!(bus.writes, vec![(0x68, 0x6B, 0x80)]);

        bus.queue(0x0C, 0x02, &[0x00, 0x01]);
        bus.set(0x0C, 0x02, 0x01);
        assert_eq!(bus.read_register(0x0C, 0x02).unwrap(), 0x00);
        assert_eq!(bus.read_register(0x0C, 0x02).unwrap(), 0x01);
        // queue drained, falls back to the stored value
        assert_eq!(bus.read_register(0x0C, 0x02).unwrap(), 0x01);
    }

    #[test]
    fn mock_bus_injected_failure() {
        let mut bus = MockBus::new();
        bus.fail_after_reads(1);
        assert!(bus.read_register(0x68, 0x3B).is_ok());
        let err = bus.read_register(0x68, 0x3C).unwrap_err();
        assert_eq!(err.device, 0x68);
        assert_eq!(err.register, 0x3C);
    }
}
