use anyhow::Result;
use clap::Parser;
use payload_runtime::bus::I2cBus;
use payload_runtime::imu::{AccelRange, GyroRange, Mpu9250};
use std::thread;
use std::time::Duration;

/// Run the accelerometer and gyroscope zero-offset calibration and print
/// the resulting offsets.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// I2C character device carrying the MPU-9250
    #[arg(long, default_value = "/dev/i2c-1")]
    i2c_dev: String,

    /// Accelerometer full-scale range in g
    #[arg(long, default_value_t = 8)]
    accel_range: u32,

    /// Gyroscope full-scale range in dps
    #[arg(long, default_value_t = 1000)]
    gyro_range: u32,

    /// Number of samples averaged per run
    #[arg(short, long, default_value_t = 1000)]
    samples: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    println!("MPU-9250 Zero-Offset Calibration Tool");
    println!("=====================================\n");
    println!("Place the device on a level surface with the z axis pointing up");
    println!("and keep it completely still until calibration finishes.");
    println!();
    println!("Starting in 3 seconds...");
    thread::sleep(Duration::from_secs(3));

    let args = Args::parse();
    let mut imu = Mpu9250::new(I2cBus::open(&args.i2c_dev)?);
    imu.reset()?;
    imu.wake_up()?;
    println!("✓ MPU-9250 initialized on {}", args.i2c_dev);

    imu.set_accel_range(AccelRange::from_g(args.accel_range), Some(args.samples))?;
    println!("✓ Accel offsets: {:?} g", imu.accel_offset());

    imu.set_gyro_range(GyroRange::from_dps(args.gyro_range), Some(args.samples))?;
    println!("✓ Gyro offsets:  {:?} dps", imu.gyro_offset());

    println!();
    println!("Calibration complete. Pass --calibrate to the runtime to rerun");
    println!("these routines at startup; offsets are not persisted.");
    Ok(())
}
