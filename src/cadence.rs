//! Epoch handling and the nominal sampling cadence.
//!
//! Runner products index their rows by seconds since J2000 (2000-01-01
//! 12:00:00). Date ranges are given as calendar days and labelled as `YYYYDOY`
//! in cache file names.

use hifitime::{Duration, Epoch};
use lazy_static::lazy_static;
use log::debug;
use ndarray::prelude::*;
use thiserror::Error;

use crate::table::{TableError, TimeTable};

const NANOS_PER_DAY: i128 = 86_400_000_000_000;

lazy_static! {
    static ref J2000: Epoch = Epoch::from_gregorian_utc_hms(2000, 1, 1, 12, 0, 0);
}

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Couldn't parse '{0}' as a YYYY-MM-DD date")]
    BadDate(String),

    #[error("The date range begins ({begin}) after it ends ({end})")]
    Reversed { begin: String, end: String },

    #[error("No years were supplied to default the date range from")]
    NoYears,

    #[error("The sampling interval must be a positive number of seconds (got {0})")]
    BadSampling(i64),

    #[error(transparent)]
    Table(#[from] TableError),
}

pub fn j2000_seconds_to_epoch(seconds: i64) -> Epoch {
    *J2000 + Duration::from_seconds(seconds as f64)
}

/// Parse a `YYYY-MM-DD` string into the epoch at midnight (UTC) of that day.
pub fn parse_date(s: &str) -> Result<Epoch, CadenceError> {
    let bad = || CadenceError::BadDate(s.to_string());
    let mut parts = s.trim().splitn(3, '-');
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let month: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let day: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    Epoch::maybe_from_gregorian_utc(year, month, day, 0, 0, 0, 0).map_err(|_| bad())
}

/// The `YYYYDOY` label of the day containing `epoch`, e.g. `2014001`.
pub fn yyyydoy(epoch: Epoch) -> String {
    let (year, month, day, ..) = epoch.to_gregorian_utc();
    let midnight = Epoch::from_gregorian_utc_at_midnight(year, month, day);
    let new_year = Epoch::from_gregorian_utc_at_midnight(year, 1, 1);
    let doy = (midnight - new_year).total_nanoseconds() / NANOS_PER_DAY + 1;
    format!("{year}{doy:03}")
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub begin: Epoch,
    pub end: Epoch,
}

impl DateRange {
    /// Use the supplied boundaries, or default to the first day of the earliest
    /// year through the last day of the latest year.
    pub fn resolve(
        begin: Option<Epoch>,
        end: Option<Epoch>,
        years: &[i32],
    ) -> Result<DateRange, CadenceError> {
        let begin = match begin {
            Some(b) => b,
            None => {
                let first = years.iter().min().ok_or(CadenceError::NoYears)?;
                Epoch::from_gregorian_utc_at_midnight(*first, 1, 1)
            }
        };
        let end = match end {
            Some(e) => e,
            None => {
                let last = years.iter().max().ok_or(CadenceError::NoYears)?;
                Epoch::from_gregorian_utc_at_midnight(*last, 12, 31)
            }
        };
        if begin > end {
            return Err(CadenceError::Reversed {
                begin: yyyydoy(begin),
                end: yyyydoy(end),
            });
        }
        Ok(DateRange { begin, end })
    }

    pub fn begin_label(&self) -> String {
        yyyydoy(self.begin)
    }

    pub fn end_label(&self) -> String {
        yyyydoy(self.end)
    }
}

/// Re-index `table` onto a regular grid of `sampling` seconds spanning its
/// first to last epoch. Grid points without data are NaN; rows off the grid
/// are dropped.
pub fn regularize(table: &TimeTable, sampling: i64) -> Result<TimeTable, CadenceError> {
    if sampling <= 0 {
        return Err(CadenceError::BadSampling(sampling));
    }
    let (first, last) = match (table.index().iter().min(), table.index().iter().max()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return Ok(table.clone()),
    };
    let num_rows = ((last - first) / sampling + 1) as usize;
    let mut data = Array2::from_elem((num_rows, table.num_cols()), f64::NAN);
    let mut off_grid = 0;
    for (row, &t) in table.data().outer_iter().zip(table.index()) {
        if (t - first) % sampling != 0 {
            off_grid += 1;
            continue;
        }
        data.row_mut(((t - first) / sampling) as usize).assign(&row);
    }
    if off_grid > 0 {
        debug!(
            "Dropped {off_grid} of {} epochs not on the {sampling} s grid",
            table.num_rows()
        );
    }
    let index = (0..num_rows as i64).map(|i| first + i * sampling).collect();
    Ok(TimeTable::new(index, table.columns().to_vec(), data)?)
}
