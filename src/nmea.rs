//! NMEA-0183 sentence parsing and per-fix aggregation.
//!
//! The GPS receiver streams GGA (position), GSV (satellites in view) and
//! ZDA (date/time) sentences. Position and satellite state accumulate in
//! the aggregator; a ZDA sentence carries the authoritative UTC timestamp
//! and finalizes the pending fix record.

use chrono::NaiveDateTime;
use thiserror::Error;

/// A failure scoped to a single input line; the stream continues.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{sentence} sentence has {got} fields, expected at least {want}")]
    TooShort {
        sentence: &'static str,
        want: usize,
        got: usize,
    },
    #[error("malformed numeric field {index} in {sentence}: {value:?}")]
    BadNumber {
        sentence: &'static str,
        index: usize,
        value: String,
    },
    #[error("malformed ZDA timestamp {value:?}")]
    BadTimestamp { value: String },
}

/// One satellite from a GSV group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteEntry {
    pub prn: u32,
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
}

/// A finalized GPS fix, flushed on ZDA.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFixRecord {
    pub timestamp: NaiveDateTime,
    pub satellite_count: u32,
    pub altitude_m: f64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

/// What one input line produced.
#[derive(Debug, PartialEq)]
pub enum Update {
    /// Unknown or ignored sentence type.
    None,
    /// Empty line (read timeout); non-fatal.
    NoData,
    /// A GGA sentence updated the pending position.
    Position,
    /// A GSV sentence; the raw rows go to the satellite log.
    Satellites(Vec<String>),
    /// A ZDA sentence finalized the pending fix.
    Fix(GpsFixRecord),
}

/// Accumulates position and satellite state between fix flushes.
///
/// Owned exclusively by the GPS acquisition loop; not shared across
/// threads.
#[derive(Debug, Default)]
pub struct NmeaAggregator {
    altitude_m: f64,
    latitude_deg: f64,
    longitude_deg: f64,
    satellite_count: u32,
    satellites: Vec<SatelliteEntry>,
}

impl NmeaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn satellite_count(&self) -> u32 {
        self.satellite_count
    }

    pub fn satellites(&self) -> &[SatelliteEntry] {
        &self.satellites
    }

    /// Consume one newline-stripped line from the serial stream.
    pub fn feed(&mut self, line: &str) -> Result<Update, ParseError> {
        if line.is_empty() {
            return Ok(Update::NoData);
        }
        let fields: Vec<&str> = line.split(',').collect();
        match fields[0].strip_prefix('$').unwrap_or(fields[0]) {
            "GPGGA" => self.handle_gga(&fields).map(|()| Update::Position),
            "GPGSV" => self.handle_gsv(&fields).map(Update::Satellites),
            "GPZDA" => self.handle_zda(&fields).map(Update::Fix),
            _ => Ok(Update::None),
        }
    }

    /// GGA: latitude (f2, ddmm.mmmm), N/S (f3), longitude (f4, dddmm.mmmm),
    /// E/W (f5), altitude (f9). An empty latitude field means no fix and
    /// zeros out all three values.
    fn handle_gga(&mut self, fields: &[&str]) -> Result<(), ParseError> {
        require_fields("GGA", fields, 10)?;
        if fields[2].is_empty() {
            self.altitude_m = 0.0;
            self.latitude_deg = 0.0;
            self.longitude_deg = 0.0;
            return Ok(());
        }
        let mut latitude = parse_f64("GGA", fields, 2)?;
        let mut longitude = parse_f64("GGA", fields, 4)?;
        let altitude = parse_f64("GGA", fields, 9)?;
        if fields[3] == "S" {
            latitude = -latitude;
        }
        if fields[5] == "W" {
            longitude = -longitude;
        }
        self.latitude_deg = sexagesimal_to_decimal(latitude / 100.0);
        self.longitude_deg = sexagesimal_to_decimal(longitude / 100.0);
        self.altitude_m = altitude;
        Ok(())
    }

    /// GSV: total sentences (f1), sentence index (f2), declared satellite
    /// total (f3), then up to four (PRN, elevation, azimuth, SNR) groups.
    /// Returns the raw concatenated rows for the satellite log.
    fn handle_gsv(&mut self, fields: &[&str]) -> Result<Vec<String>, ParseError> {
        require_fields("GSV", fields, 4)?;
        let mut rows = Vec::new();

        if fields[2] == "1" {
            // First sentence of a group: restart accumulation with the
            // declared total.
            self.satellite_count = parse_u32("GSV", fields, 3)?;
            self.satellites.clear();
            rows.push(format!("{}{}", fields[1], fields[3]));
        }
        if fields.len() == 4 {
            self.satellite_count = 0;
            return Ok(rows);
        }

        for (threshold, start) in [(8, 4), (12, 8), (16, 12), (20, 16)] {
            if fields.len() < threshold {
                break;
            }
            rows.push(format!(
                "{}{}{}",
                fields[start],
                fields[start + 1],
                fields[start + 2]
            ));
            self.satellites.push(SatelliteEntry {
                prn: parse_u32("GSV", fields, start)?,
                elevation_deg: parse_f64("GSV", fields, start + 1)?,
                azimuth_deg: parse_f64("GSV", fields, start + 2)?,
            });
        }
        Ok(rows)
    }

    /// ZDA: UTC time (f1, hhmmss.ff), day (f2), month (f3), year (f4).
    /// Finalizes and resets the pending fix.
    fn handle_zda(&mut self, fields: &[&str]) -> Result<GpsFixRecord, ParseError> {
        require_fields("ZDA", fields, 5)?;
        let combined = format!("{}/{}/{} {}", fields[4], fields[3], fields[2], fields[1]);
        let timestamp = NaiveDateTime::parse_from_str(&combined, "%Y/%m/%d %H%M%S%.f")
            .map_err(|_| ParseError::BadTimestamp { value: combined })?;

        let record = GpsFixRecord {
            timestamp,
            satellite_count: self.satellite_count,
            altitude_m: self.altitude_m,
            latitude_deg: self.latitude_deg,
            longitude_deg: self.longitude_deg,
        };
        // Position does not carry forward across flushes: a fix without a
        // fresh GGA reports zeros.
        self.altitude_m = 0.0;
        self.latitude_deg = 0.0;
        self.longitude_deg = 0.0;
        Ok(record)
    }
}

/// Convert a coordinate from sexagesimal degrees-and-minutes (already
/// divided by 100, so `dd.mmmmmm`) to decimal degrees.
pub fn sexagesimal_to_decimal(value: f64) -> f64 {
    value.trunc() + (value - value.trunc()) * 100.0 / 60.0
}

fn require_fields(
    sentence: &'static str,
    fields: &[&str],
    want: usize,
) -> Result<(), ParseError> {
    if fields.len() < want {
        return Err(ParseError::TooShort {
            sentence,
            want,
            got: fields.len(),
        });
    }
    Ok(())
}

fn parse_f64(sentence: &'static str, fields: &[&str], index: usize) -> Result<f64, ParseError> {
    fields[index].parse().map_err(|_| ParseError::BadNumber {
        sentence,
        index,
        value: fields[index].to_string(),
    })
}

fn parse_u32(sentence: &'static str, fields: &[&str], index: usize) -> Result<u32, ParseError> {
    fields[index].parse().map_err(|_| ParseError::BadNumber {
        sentence,
        index,
        value: fields[index].to_string(),
    })
}
