use crate::bus::BusError;
use thiserror::Error;

/// Failures surfaced by the IMU and magnetometer drivers.
///
/// Callers branch on the kind: bus and precondition errors are fatal to the
/// triggering operation, data-validity errors mean the sample must be
/// discarded and the read retried on the next scheduled tick.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Magnetometer register accessed before the IMU's bypass mode enabled
    /// direct bus access to it.
    #[error("magnetometer bus access is not enabled; call wake_up() first")]
    AccessDenied,

    /// Range configuration attempted before the IMU left sleep mode.
    #[error("sensor is not awake; call wake_up() before configuring ranges")]
    Asleep,

    /// Magnetometer read attempted while the device is in power-down mode.
    #[error("magnetometer is powered down")]
    PoweredDown,

    /// The magnetic flux exceeded the measurable range; the sample is
    /// invalid and must be discarded.
    #[error("magnetometer measurement overflowed; sample discarded")]
    Overflow,

    /// The data-ready poll exhausted its retry budget.
    #[error("magnetometer data-ready poll exhausted {0} attempts")]
    ReadyTimeout(usize),
}

impl SensorError {
    /// True for data-validity failures: the caller discards the sample and
    /// may retry on the next tick instead of terminating the loop.
    pub fn is_data_validity(&self) -> bool {
        matches!(
            self,
            Self::PoweredDown | Self::Overflow | Self::ReadyTimeout(_)
        )
    }
}
