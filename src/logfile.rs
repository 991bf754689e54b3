//! CSV log sinks with the fixed headers and row formats the downstream
//! tooling expects. Each sink owns its file handle exclusively; the two
//! acquisition loops never share a writer.

use crate::imu::ImuSample;
use crate::nmea::GpsFixRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const IMU_LOG_HEADER: &str =
    "yyyy-mm-dd hh:mm:ss.mmmmmm, x[g],y[g],z[g],x[dps],y[dps],z[dps],x[uT],y[uT],z[uT]";
pub const FIX_LOG_HEADER: &str =
    "yyyy-mm-dd HH:MM:SS.ffffff ,a number of satellites ,high ,latitude ,longitude ";
pub const SAT_LOG_HEADER: &str = "No. ,Elevation in degrees ,degrees in true north ";

/// Build a log path carrying the acquisition start time, e.g.
/// `datagga_20250915-123519.csv`.
pub fn timestamped_path(dir: &Path, prefix: &str, now: &DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.csv", prefix, now.format("%Y%m%d-%H%M%S")))
}

/// An append-only CSV file owned by exactly one acquisition loop.
pub struct LogSink {
    file: File,
}

impl LogSink {
    /// Create the file and write its header row.
    pub fn create(path: &Path, header: &str) -> Result<Self> {
        let mut file = File::create(path)
            .with_context(|| format!("failed to create log file: {}", path.display()))?;
        writeln!(file, "{header}")?;
        Ok(Self { file })
    }

    pub fn append(&mut self, row: &str) -> io::Result<()> {
        writeln!(self.file, "{row}")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Local timestamp then nine fields at 3 decimal places, width 6.
pub fn format_imu_row(sample: &ImuSample) -> String {
    format!(
        "{},{:6.3},{:6.3},{:6.3},{:6.3},{:6.3},{:6.3},{:6.3},{:6.3},{:6.3}",
        sample.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
        sample.accel[0],
        sample.accel[1],
        sample.accel[2],
        sample.gyro[0],
        sample.gyro[1],
        sample.gyro[2],
        sample.mag[0],
        sample.mag[1],
        sample.mag[2],
    )
}

/// UTC fix timestamp, satellite count, altitude at 2 decimals and
/// latitude/longitude at 6.
pub fn format_fix_row(record: &GpsFixRecord) -> String {
    format!(
        "{},{},{:3.2},{:5.6},{:5.6}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
        record.satellite_count,
        record.altitude_m,
        record.latitude_deg,
        record.longitude_deg,
    )
}
