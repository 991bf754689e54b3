//! The two acquisition loops.
//!
//! The IMU loop ticks on a fixed sampling interval; the GPS loop is
//! event-driven on serial line arrival. They run on separate threads,
//! share no sensor state, and each appends to its own log files. Both
//! observe the stop flag at the top of each iteration; cancellation never
//! preempts an in-flight register poll or serial read.

use crate::bus::RegisterBus;
use crate::error::SensorError;
use crate::imu::{ImuSample, Mpu9250};
use crate::logfile::{format_fix_row, format_imu_row, LogSink};
use crate::nmea::{NmeaAggregator, Update};
use anyhow::{bail, Context, Result};
use chrono::Local;
use log::{info, warn};
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// IMU loop pacing and lifetime.
pub struct ImuLoopConfig {
    /// Target time between samples.
    pub interval: Duration,
    /// Number of samples to take; `None` runs until the stop flag is set.
    pub iterations: Option<u64>,
}

/// Time left in the current tick, or `None` if the tick overran and the
/// next one starts immediately (no catch-up skew correction).
pub fn remaining_sleep(interval: Duration, elapsed: Duration) -> Option<Duration> {
    interval.checked_sub(elapsed).filter(|d| !d.is_zero())
}

fn read_sample<B: RegisterBus>(
    imu: &mut Mpu9250<B>,
) -> Result<Option<ImuSample>, SensorError> {
    let timestamp = Local::now();
    let accel = imu.read_accel()?;
    let gyro = imu.read_gyro()?;
    let mag = match imu.read_mag()? {
        Some(mag) => mag,
        // external-trigger mode yields no magnetometer data
        None => return Ok(None),
    };
    Ok(Some(ImuSample {
        timestamp,
        accel,
        gyro,
        mag,
    }))
}

/// Sample the IMU at a fixed interval, appending one row per tick.
///
/// Data-validity errors discard the tick (no row is written) and the next
/// tick retries; bus failures terminate the loop.
pub fn run_imu_loop<B: RegisterBus>(
    imu: &mut Mpu9250<B>,
    log: &mut LogSink,
    config: &ImuLoopConfig,
    stop: &AtomicBool,
) -> Result<()> {
    let mut iteration: u64 = 0;
    while !stop.load(Ordering::SeqCst) {
        if let Some(limit) = config.iterations {
            if iteration >= limit {
                break;
            }
        }
        let tick_start = Instant::now();

        match read_sample(imu) {
            Ok(Some(sample)) => {
                let row = format_imu_row(&sample);
                println!("{row}");
                log.append(&row).context("failed to append to the IMU log")?;
            }
            Ok(None) => {}
            Err(e) if e.is_data_validity() => warn!("discarding IMU sample: {e}"),
            Err(e) => return Err(e).context("IMU acquisition failed"),
        }

        iteration += 1;
        if let Some(sleep) = remaining_sleep(config.interval, tick_start.elapsed()) {
            thread::sleep(sleep);
        }
    }
    log.flush().context("failed to flush the IMU log")?;
    info!("IMU loop finished after {iteration} iterations");
    Ok(())
}

/// Consume serial lines and route parser updates to the GPS logs.
///
/// Read timeouts surface as the non-fatal "no data" event; parse errors
/// skip the line; a closed stream is fatal and reported to the operator.
pub fn run_gps_loop<R: BufRead>(
    reader: &mut R,
    aggregator: &mut NmeaAggregator,
    fix_log: &mut LogSink,
    sat_log: &mut LogSink,
    stop: &AtomicBool,
) -> Result<()> {
    let mut line = String::new();
    while !stop.load(Ordering::SeqCst) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => bail!("GPS serial stream closed"),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e).context("GPS serial read failed"),
        }

        match aggregator.feed(line.trim_end_matches(['\r', '\n'])) {
            Ok(Update::None | Update::Position) => {}
            Ok(Update::NoData) => warn!("no data"),
            Ok(Update::Satellites(rows)) => {
                for row in rows {
                    sat_log
                        .append(&row)
                        .context("failed to append to the satellite log")?;
                }
            }
            Ok(Update::Fix(record)) => {
                let row = format_fix_row(&record);
                println!("{row}");
                fix_log
                    .append(&row)
                    .context("failed to append to the fix log")?;
            }
            Err(e) => warn!("discarding GPS line: {e}"),
        }
    }
    fix_log.flush()?;
    sat_log.flush()?;
    info!("GPS loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::imu::{AccelRange, GyroRange, MPU9250_ADDR};
    use crate::mag::{MagMode, MagResolution, AK8963_ADDR};
    use std::fs;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn temp_log(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("payload_runtime_{name}_{}.csv", std::process::id()))
    }

    #[test]
    fn overrunning_tick_skips_the_sleep() {
        let interval = Duration::from_millis(100);
        assert_eq!(remaining_sleep(interval, Duration::from_millis(150)), None);
        assert_eq!(remaining_sleep(interval, interval), None);
        assert_eq!(
            remaining_sleep(interval, Duration::from_millis(40)),
            Some(Duration::from_millis(60))
        );
    }

    #[test]
    fn imu_loop_writes_one_row_per_iteration() {
        let mut imu = Mpu9250::new(MockBus::new());
        imu.reset().unwrap();
        imu.wake_up().unwrap();
        imu.set_accel_range(AccelRange::G8, None).unwrap();
        imu.set_gyro_range(GyroRange::Dps1000, None).unwrap();
        imu.set_mag_mode(MagMode::Continuous100Hz, MagResolution::Bits16)
            .unwrap();
        imu.bus.set(AK8963_ADDR, 0x02, 0x01); // always data ready
        imu.bus.set(MPU9250_ADDR, 0x3F, 0x10); // some accel z

        let path = temp_log("imu_loop");
        let mut log = LogSink::create(&path, crate::logfile::IMU_LOG_HEADER).unwrap();
        let config = ImuLoopConfig {
            interval: Duration::from_millis(1),
            iterations: Some(3),
        };
        run_imu_loop(&mut imu, &mut log, &config, &AtomicBool::new(false)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4); // header + 3 rows
        fs::remove_file(&path).ok();
    }

    #[test]
    fn imu_loop_skips_ticks_while_powered_down() {
        let mut imu = Mpu9250::new(MockBus::new());
        imu.reset().unwrap();
        imu.wake_up().unwrap();
        imu.set_mag_mode(MagMode::PowerDown, MagResolution::Bits16)
            .unwrap();

        let path = temp_log("imu_loop_powerdown");
        let mut log = LogSink::create(&path, crate::logfile::IMU_LOG_HEADER).unwrap();
        let config = ImuLoopConfig {
            interval: Duration::from_millis(1),
            iterations: Some(2),
        };
        run_imu_loop(&mut imu, &mut log, &config, &AtomicBool::new(false)).unwrap();

        // no data rows were written
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn gps_loop_flushes_fixes_and_fails_on_stream_close() {
        let stream = "\
$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,\n\
$GPGSV,1,1,04,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00\n\
not an nmea sentence\n\
$GPZDA,123519.00,15,09,2025,00,00\n";
        let mut reader = Cursor::new(stream);
        let mut aggregator = NmeaAggregator::new();

        let fix_path = temp_log("gps_fix");
        let sat_path = temp_log("gps_sat");
        let mut fix_log = LogSink::create(&fix_path, crate::logfile::FIX_LOG_HEADER).unwrap();
        let mut sat_log = LogSink::create(&sat_path, crate::logfile::SAT_LOG_HEADER).unwrap();

        // the cursor reaches EOF, which counts as a dropped connection
        let err = run_gps_loop(
            &mut reader,
            &mut aggregator,
            &mut fix_log,
            &mut sat_log,
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(err.to_string().contains("closed"));

        let fixes = fs::read_to_string(&fix_path).unwrap();
        let fix_rows: Vec<&str> = fixes.lines().skip(1).collect();
        assert_eq!(fix_rows.len(), 1);
        assert_eq!(
            fix_rows[0],
            "2025-09-15 12:35:19.000000,4,545.40,48.117300,11.516667"
        );

        let sats = fs::read_to_string(&sat_path).unwrap();
        assert_eq!(sats.lines().count(), 1 + 5); // header + group row + 4 satellites
        fs::remove_file(&fix_path).ok();
        fs::remove_file(&sat_path).ok();
    }

    #[test]
    fn gps_loop_stops_on_flag_before_reading() {
        let mut reader = Cursor::new("");
        let mut aggregator = NmeaAggregator::new();
        let fix_path = temp_log("gps_stop_fix");
        let sat_path = temp_log("gps_stop_sat");
        let mut fix_log = LogSink::create(&fix_path, crate::logfile::FIX_LOG_HEADER).unwrap();
        let mut sat_log = LogSink::create(&sat_path, crate::logfile::SAT_LOG_HEADER).unwrap();

        let stop = AtomicBool::new(true);
        run_gps_loop(&mut reader, &mut aggregator, &mut fix_log, &mut sat_log, &stop).unwrap();
        fs::remove_file(&fix_path).ok();
        fs::remove_file(&sat_path).ok();
    }
}
