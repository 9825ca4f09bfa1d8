//! The collaborators the pipeline drives: a GNSS solution runner and a
//! synthetic tide-loading generator.
//!
//! Neither is implemented here; [`archive`] reads products a runner has
//! already exported, and [`hardisp`] shells out to the IERS `hardisp` program.

pub mod archive;
pub mod hardisp;

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cache::CacheError,
    cadence::DateRange,
    table::{AnalysisTable, TableError, TimeTable},
    Constellation, StationGather,
};

#[derive(Error, Debug)]
pub enum ProductError {
    #[error("Invalid {field} '{value}'; expected one of: {}", .expected.join(", "))]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static [&'static str],
    },

    #[error("Expected product {} doesn't exist", .0.display())]
    Missing(PathBuf),

    #[error("{0} isn't configured")]
    NotConfigured(&'static str),

    #[error("Station {station} has no block in {}", .blq.display())]
    NoBlq { station: String, blq: PathBuf },

    #[error("Malformed BLQ block for station {station}: {reason}")]
    BadBlq { station: String, reason: String },

    #[error("Couldn't run {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("hardisp exited with {status}: {stderr}")]
    HardispFailed { status: String, stderr: String },

    #[error("Couldn't parse hardisp output line {line}: '{text}'")]
    HardispOutput { line: usize, text: String },

    #[error("Asked for {expected} synthetic samples but got {got}")]
    SampleCount { expected: usize, got: usize },

    #[error("The dataset is not on a regular {0} s cadence")]
    Irregular(i64),

    #[error("Couldn't build a worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Blob(#[from] CacheError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where the displacement series handed to a tide analysis come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    /// The modelled ocean-tide-loading displacement at each station.
    SyntheticOtl,
    /// The estimated displacement, with the modelled loading optionally added
    /// back in.
    Estimated { restore_otl: bool },
}

/// Troposphere and clock parameters that can be analysed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxParameter {
    GradEast,
    GradNorth,
    WetZ,
    Clk,
}

impl AuxParameter {
    pub const NAMES: &'static [&'static str] = &["GradEast", "GradNorth", "WetZ", "Clk"];

    pub fn as_str(self) -> &'static str {
        match self {
            AuxParameter::GradEast => "GradEast",
            AuxParameter::GradNorth => "GradNorth",
            AuxParameter::WetZ => "WetZ",
            AuxParameter::Clk => "Clk",
        }
    }
}

impl FromStr for AuxParameter {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GradEast" => Ok(AuxParameter::GradEast),
            "GradNorth" => Ok(AuxParameter::GradNorth),
            "WetZ" => Ok(AuxParameter::WetZ),
            "Clk" => Ok(AuxParameter::Clk),
            _ => Err(ProductError::InvalidValue {
                field: "parameter",
                value: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for AuxParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of an estimate to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Value,
    Sigma,
}

impl ValueType {
    pub const NAMES: &'static [&'static str] = &["value", "sigma"];

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Value => "value",
            ValueType::Sigma => "sigma",
        }
    }

    pub fn initial(self) -> char {
        match self {
            ValueType::Value => 'v',
            ValueType::Sigma => 's',
        }
    }
}

impl FromStr for ValueType {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "value" => Ok(ValueType::Value),
            "sigma" => Ok(ValueType::Sigma),
            _ => Err(ProductError::InvalidValue {
                field: "value_type",
                value: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GNSS solution engine. Every method takes the constellation mode it
/// should act for; one runner serves all three.
pub trait Runner {
    /// Per-station displacement series, in the order of `stations`. Columns are
    /// `[observable, value|sigma]`. Epochs whose sigma exceeds `sigma_cut` are
    /// dropped.
    ///
    /// # Arguments
    ///
    /// * `force` - recompute even if the runner has the series already.
    /// * `num_workers` - how many stations may be processed concurrently.
    fn retrieve_series(
        &self,
        mode: Constellation,
        stations: &[String],
        force: bool,
        sigma_cut: f64,
        num_workers: usize,
    ) -> Result<Vec<TimeTable>, ProductError>;

    /// Every parameter the filter estimated for `station`. Columns are
    /// `[value_type, parameter]` where parameter is a dotted name such as
    /// `.Station.LERI.Trop.WetZ`.
    fn filtered_solution(&self, mode: Constellation, station: &str) -> Result<TimeTable, ProductError>;

    /// Tidal analysis of displacement series over `range`. With `envs` of
    /// `None` the runner uses its own series of every station.
    fn analyze_environment(
        &self,
        mode: Constellation,
        envs: Option<&[StationGather]>,
        source: EnvSource,
        force: bool,
        range: &DateRange,
    ) -> Result<AnalysisTable, ProductError>;

    /// Tidal analysis of one auxiliary parameter over `range`.
    fn analyze_parameter(
        &self,
        mode: Constellation,
        aux: &[StationGather],
        parameter: AuxParameter,
        value_type: ValueType,
        force: bool,
        range: &DateRange,
    ) -> Result<AnalysisTable, ProductError>;
}

/// Generates modelled ocean-tide-loading displacement.
pub trait Synthesizer {
    /// A table with the same epochs as `dataset` and `east`, `north` and `up`
    /// columns, ready to be added to it.
    fn generate_reference(
        &self,
        dataset: &TimeTable,
        station: &str,
        sampling: i64,
    ) -> Result<TimeTable, ProductError>;
}
