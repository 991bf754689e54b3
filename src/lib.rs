//! Sensor acquisition runtime for a Raspberry Pi payload: an MPU-9250
//! nine-axis IMU (with its AK8963 magnetometer) on the I2C bus and an
//! NMEA-0183 GPS receiver on a serial port, each sampled by its own loop
//! and logged to CSV.

pub mod bus;
pub mod calibration;
pub mod error;
pub mod imu;
pub mod logfile;
pub mod mag;
pub mod nmea;
pub mod scheduler;
