use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::error;
use payload_runtime::bus::I2cBus;
use payload_runtime::imu::{AccelRange, GyroRange, Mpu9250};
use payload_runtime::logfile::{
    timestamped_path, LogSink, FIX_LOG_HEADER, IMU_LOG_HEADER, SAT_LOG_HEADER,
};
use payload_runtime::mag::{MagMode, MagResolution};
use payload_runtime::nmea::NmeaAggregator;
use payload_runtime::scheduler::{run_gps_loop, run_imu_loop, ImuLoopConfig};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Payload Sensor Acquisition Runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// I2C character device carrying the MPU-9250
    #[arg(long, default_value = "/dev/i2c-1")]
    i2c_dev: String,

    /// Serial port the GPS receiver is attached to
    #[arg(short, long, default_value = "/dev/ttyS0")]
    port: String,

    /// GPS serial baudrate
    #[arg(short, long, default_value_t = 9600)]
    baudrate: u32,

    /// IMU sampling interval in seconds
    #[arg(short = 'i', long, default_value_t = 0.1)]
    sampling_interval: f64,

    /// Number of IMU samples to take (0 = run until Ctrl+C)
    #[arg(short = 'n', long, default_value_t = 100)]
    samples: u64,

    /// Accelerometer full-scale range in g (2, 4, 8 or 16)
    #[arg(long, default_value_t = 8)]
    accel_range: u32,

    /// Gyroscope full-scale range in dps (250, 500, 1000 or 2000)
    #[arg(long, default_value_t = 1000)]
    gyro_range: u32,

    /// Magnetometer mode: 8Hz, 100Hz, SINGLE, POWER_DOWN, EX_TRIGGER or SELF_TEST
    #[arg(long, default_value = "100Hz")]
    mag_mode: String,

    /// Magnetometer output resolution in bits (14 or 16)
    #[arg(long, default_value_t = 16)]
    mag_bits: u32,

    /// Run zero-offset calibration after setting each range (keep the device
    /// level and stationary)
    #[arg(short, long)]
    calibrate: bool,

    /// Number of samples averaged per calibration run
    #[arg(long, default_value_t = 1000)]
    calibration_samples: usize,

    /// Directory the CSV log files are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Skip the GPS loop and only acquire IMU data
    #[arg(long)]
    no_gps: bool,
}

fn setup_imu(args: &Args) -> Result<Mpu9250<I2cBus>> {
    let bus = I2cBus::open(&args.i2c_dev)?;
    let mut imu = Mpu9250::new(bus);

    imu.reset().context("failed to reset the MPU-9250")?;
    imu.wake_up().context("failed to wake the MPU-9250")?;
    println!("✓ MPU-9250 initialized on {}", args.i2c_dev);

    let calibration = args.calibrate.then_some(args.calibration_samples);
    imu.set_accel_range(AccelRange::from_g(args.accel_range), calibration)
        .context("failed to configure the accelerometer")?;
    imu.set_gyro_range(GyroRange::from_dps(args.gyro_range), calibration)
        .context("failed to configure the gyroscope")?;
    imu.set_mag_mode(
        MagMode::from_label(&args.mag_mode),
        MagResolution::from_bits(args.mag_bits),
    )
    .context("failed to configure the AK8963 magnetometer")?;
    println!(
        "✓ Ranges set: accel ±{} g, gyro ±{} dps, mag {} at {} bits",
        args.accel_range, args.gyro_range, args.mag_mode, args.mag_bits
    );
    if args.calibrate {
        println!(
            "✓ Calibrated over {} samples: accel offsets {:?}, gyro offsets {:?}",
            args.calibration_samples,
            imu.accel_offset(),
            imu.gyro_offset()
        );
    }
    Ok(imu)
}

fn spawn_gps_thread(
    args: &Args,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let start = Local::now();
    let fix_path = timestamped_path(&args.output_dir, "datagga", &start);
    let sat_path = timestamped_path(&args.output_dir, "datagsv", &start);
    let mut fix_log = LogSink::create(&fix_path, FIX_LOG_HEADER)?;
    let mut sat_log = LogSink::create(&sat_path, SAT_LOG_HEADER)?;
    println!("✓ GPS logs: {} and {}", fix_path.display(), sat_path.display());
    println!("{FIX_LOG_HEADER}");
    println!("{SAT_LOG_HEADER}");

    // The receiver streams continuously; the timeout only bounds how long a
    // quiet port delays the stop-flag check.
    let port = serialport::new(&args.port, args.baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_secs(1))
        .open()
        .with_context(|| format!("failed to open GPS serial port: {}", args.port))?;
    println!("✓ GPS receiver on {} at {} baud", args.port, args.baudrate);

    let handle = thread::spawn(move || {
        let mut reader = BufReader::new(port);
        let mut aggregator = NmeaAggregator::new();
        if let Err(e) = run_gps_loop(&mut reader, &mut aggregator, &mut fix_log, &mut sat_log, &stop)
        {
            error!("GPS loop failed: {e:#}");
        }
    });
    Ok(handle)
}

fn main() -> Result<()> {
    env_logger::init();
    println!("=== Payload Sensor Acquisition Runtime ===\n");

    let args = Args::parse();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping acquisition...");
        stop_handler.store(true, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let mut imu = setup_imu(&args)?;

    let gps_handle = if args.no_gps {
        None
    } else {
        Some(spawn_gps_thread(&args, stop.clone())?)
    };

    let imu_path = timestamped_path(&args.output_dir, "mpu9250_logs", &Local::now());
    let mut imu_log = LogSink::create(&imu_path, IMU_LOG_HEADER)?;
    println!("✓ IMU log: {}", imu_path.display());
    println!("{IMU_LOG_HEADER}");

    let config = ImuLoopConfig {
        interval: Duration::from_secs_f64(args.sampling_interval),
        iterations: (args.samples > 0).then_some(args.samples),
    };
    let imu_result = run_imu_loop(&mut imu, &mut imu_log, &config, &stop);

    // the GPS thread keeps running for open-ended captures; stop it once the
    // IMU loop is done either way
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = gps_handle {
        if handle.join().is_err() {
            error!("GPS thread panicked");
        }
    }
    imu_result?;

    println!("✓ Acquisition complete");
    Ok(())
}
