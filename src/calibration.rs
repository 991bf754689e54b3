//! Zero-offset calibration for the accelerometer and gyroscope.
//!
//! Both routines assume the device is stationary during sampling, with
//! gravity aligned to the z axis. They block for `sample_count` register
//! round trips; if a read fails mid-run the stored offsets keep their
//! pre-call values (failure is "no mutation occurred").

use crate::bus::RegisterBus;
use crate::error::SensorError;
use crate::imu::Mpu9250;
use log::info;

impl<B: RegisterBus> Mpu9250<B> {
    /// Compute accelerometer zero offsets by averaging `sample_count` raw
    /// readings. x/y offsets cancel the mean; the z offset cancels the mean
    /// minus the 1 g the axis carries at rest.
    pub fn calibrate_accel(&mut self, sample_count: usize) -> Result<[f64; 3], SensorError> {
        info!("accel calibration start ({sample_count} samples)");
        let mean = self.sample_mean(sample_count, Mpu9250::read_accel_uncorrected)?;
        self.accel_offset = [-mean[0], -mean[1], -(mean[2] - 1.0)];
        info!("accel calibration complete");
        Ok(self.accel_offset)
    }

    /// Compute gyroscope zero offsets by averaging `sample_count` raw
    /// readings, assuming zero angular rate on every axis.
    pub fn calibrate_gyro(&mut self, sample_count: usize) -> Result<[f64; 3], SensorError> {
        info!("gyro calibration start ({sample_count} samples)");
        let mean = self.sample_mean(sample_count, Mpu9250::read_gyro_uncorrected)?;
        self.gyro_offset = [-mean[0], -mean[1], -mean[2]];
        info!("gyro calibration complete");
        Ok(self.gyro_offset)
    }

    fn sample_mean(
        &mut self,
        sample_count: usize,
        read: fn(&mut Self) -> Result<[f64; 3], SensorError>,
    ) -> Result<[f64; 3], SensorError> {
        let mut sum = [0.0; 3];
        for _ in 0..sample_count {
            let sample = read(self)?;
            sum[0] += sample[0];
            sum[1] += sample[1];
            sum[2] += sample[2];
        }
        let n = sample_count.max(1) as f64;
        Ok([sum[0] / n, sum[1] / n, sum[2] / n])
    }
}
