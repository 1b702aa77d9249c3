//! HTTP date parsing and formatting.
//!
//! Two legacy grammars are accepted, matched case-insensitively and in full:
//! ```text
//! rfc822:  Sun, 06 Nov 1994 08:49:37 GMT
//! rfc850:  Sunday, 06-Nov-94 08:49:37 GMT
//! ```
//! Output is always the rfc822 form. Anything unparseable (or a calendar
//! value that does not exist) parses to `0`, which callers treat as "no date".
//!
//! `parse` and `format` are exact inverses on the canonical form. The
//! calibration offset only enters through `parse_calibrated`, which the
//! conditional-GET comparison uses.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, NaiveDate};
use regex::{Captures, Regex};

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parser/formatter for HTTP dates with a calibrated clock offset.
#[derive(Debug)]
pub struct DateCodec {
    rfc822: Regex,
    rfc850: Regex,
    /// Seconds added by `parse_calibrated`.
    offset: AtomicI64,
}

impl DateCodec {
    pub fn new() -> Self {
        let months = MONTHS.join("|");
        let hms = "([0-9][0-9]):([0-9][0-9]):([0-9][0-9])";
        let rfc822 = format!(
            "^(sun|mon|tue|wed|thu|fri|sat), ([0-9][0-9]?) ({}) ([0-9]+) {} gmt$",
            months, hms
        );
        let rfc850 = format!(
            "^(sunday|monday|tuesday|wednesday|thursday|friday|saturday), ([0-9][0-9]?)-({})-([0-9]+) {} gmt$",
            months, hms
        );
        Self {
            rfc822: Regex::new(&rfc822).expect("rfc822 date pattern"),
            rfc850: Regex::new(&rfc850).expect("rfc850 date pattern"),
            offset: AtomicI64::new(0),
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, seconds: i64) {
        self.offset.store(seconds, Ordering::Relaxed);
    }

    /// Format epoch seconds as `Sun, 06 Nov 1994 08:49:37 GMT`.
    pub fn format(&self, epoch: i64) -> String {
        DateTime::from_timestamp(epoch, 0)
            .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
            .unwrap_or_default()
    }

    /// Parse either grammar to epoch seconds, `0` on failure.
    pub fn parse(&self, value: &str) -> i64 {
        let lower = value.trim().to_ascii_lowercase();
        let parsed = if let Some(caps) = self.rfc850.captures(&lower) {
            to_epoch(&caps, true)
        } else if let Some(caps) = self.rfc822.captures(&lower) {
            to_epoch(&caps, false)
        } else {
            None
        };
        parsed.unwrap_or(0)
    }

    /// `parse` corrected by the calibration offset, `0` on failure.
    pub fn parse_calibrated(&self, value: &str) -> i64 {
        match self.parse(value) {
            0 => 0,
            epoch => epoch + self.offset(),
        }
    }

    /// Measure the difference between filesystem timestamps and a
    /// format/parse round trip and store it as the calibration offset.
    ///
    /// Runs once at startup, before conditional GETs are served.
    pub fn calibrate(&self, temp_dir: &Path) -> io::Result<i64> {
        let probe = temp_dir.join(format!(".clock-probe-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&probe, b"")?;
        let modified = fs::metadata(&probe).and_then(|m| m.modified());
        let _ = fs::remove_file(&probe);

        let mtime = modified?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let delta = mtime - self.parse(&self.format(mtime));
        self.set_offset(delta);

        if delta != 0 {
            tracing::warn!(offset_secs = delta, "HTTP date round trip disagrees with filesystem clock");
        } else {
            tracing::debug!("HTTP date codec calibrated");
        }
        Ok(delta)
    }
}

impl Default for DateCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_epoch(caps: &Captures<'_>, two_digit_years: bool) -> Option<i64> {
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let day = num(2)?;
    let month = MONTHS.iter().position(|m| *m == &caps[3])? as u32 + 1;
    let mut year = i32::try_from(num(4)?).ok()?;
    if two_digit_years && caps[4].len() <= 2 {
        year += if year < 70 { 2000 } else { 1900 };
    }

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(num(5)?, num(6)?, num(7)?)
        .map(|naive| naive.and_utc().timestamp())
}
