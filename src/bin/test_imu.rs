use anyhow::Result;
use clap::Parser;
use payload_runtime::bus::I2cBus;
use payload_runtime::imu::{AccelRange, GyroRange, Mpu9250};
use payload_runtime::mag::{MagMode, MagResolution};
use std::thread;
use std::time::Duration;

/// Continuously print IMU readings for a quick bench check.
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
}

fn main() -> Result<()> {
    env_logger::init();
    println!("MPU-9250 IMU Test Program");
    println!("=========================\n");

    let args = Args::parse();
    println!("Initializing MPU-9250 on {} at address 0x68...", args.i2c_dev);
    let mut imu = Mpu9250::new(I2cBus::open(&args.i2c_dev)?);
    imu.reset()?;
    imu.wake_up()?;
    imu.set_accel_range(AccelRange::from_g(args.accel_range), None)?;
    imu.set_gyro_range(GyroRange::from_dps(args.gyro_range), None)?;
    imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)?;
    println!("✓ MPU-9250 initialized successfully\n");

    println!("Reading IMU data (Ctrl+C to stop):\n");
    println!(
        "{:>8} {:>8} {:>8} | {:>8} {:>8} {:>8} | {:>8} {:>8} {:>8}",
        "Acc X", "Acc Y", "Acc Z", "Gyro X", "Gyro Y", "Gyro Z", "Mag X", "Mag Y", "Mag Z"
    );
    println!("{}", "-".repeat(90));

    loop {
        let accel = imu.read_accel()?;
        let gyro = imu.read_gyro()?;
        let mag = imu.read_mag()?.unwrap_or([0.0; 3]);

        println!(
            "{:8.3} {:8.3} {:8.3} | {:8.3} {:8.3} {:8.3} | {:8.3} {:8.3} {:8.3}",
            accel[0], accel[1], accel[2], gyro[0], gyro[1], gyro[2], mag[0], mag[1], mag[2]
        );

        thread::sleep(Duration::from_millis(50)); // 20 Hz
    }
}
