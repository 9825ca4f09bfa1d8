//! Gather, align, cache and analyse multi-constellation (mGNSS) station
//! solutions.

pub mod align;
pub mod analyze;
pub mod cache;
pub mod cadence;
pub mod config;
pub mod gather;
pub mod identity;
pub mod pipeline;
pub mod products;
pub mod spectral;
pub mod table;
pub mod write;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use pipeline::{Pipeline, PipelineError};
use table::TimeTable;

/// Label of the synthetic ocean-tide-loading reference in analysis tables.
pub const OTL_LABEL: &str = "OTL";

/// The satellite systems a solution was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constellation {
    Gps,
    Glonass,
    /// Both systems combined.
    GpsGlonass,
}

impl Constellation {
    /// All modes, in the order their columns appear in gathers.
    pub const ALL: [Constellation; 3] = [
        Constellation::Gps,
        Constellation::Glonass,
        Constellation::GpsGlonass,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Constellation::Gps => "GPS",
            Constellation::Glonass => "GLONASS",
            Constellation::GpsGlonass => "GPS+GLONASS",
        }
    }

    /// A filesystem-friendly name.
    pub fn dir_name(self) -> &'static str {
        match self {
            Constellation::Gps => "gps",
            Constellation::Glonass => "glo",
            Constellation::GpsGlonass => "gps_glo",
        }
    }
}

impl fmt::Display for Constellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The gathered table of a single station. Columns are labelled by
/// constellation first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationGather {
    pub station: String,
    pub table: TimeTable,
}

impl StationGather {
    /// The columns of one constellation, without the constellation level.
    pub fn mode(&self, mode: Constellation) -> TimeTable {
        self.table.xs(mode.label())
    }
}
