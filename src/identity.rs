//! Reproducible project names.
//!
//! Every cached product lives under a name derived from the processing
//! parameters, so that changing any of them never reuses stale results.

use std::{fmt, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wet zenith delay sigma used for static processing \[mm/sqrt(s)\].
pub const STATIC_WETZ_SIGMA: f64 = 0.05;

#[derive(Error, Debug, PartialEq)]
pub enum IdentityError {
    #[error("Invalid {field} '{value}'; expected one of: {}", .expected.join(", "))]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static [&'static str],
    },

    #[error("The project name must be non-empty and free of path separators (got '{0}')")]
    BadProjectName(String),

    #[error("{field} must be a positive, finite number (got {value})")]
    BadSigma { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PppType {
    Kinematic,
    Static,
}

impl PppType {
    pub const NAMES: &'static [&'static str] = &["static", "kinematic"];

    pub fn as_str(self) -> &'static str {
        match self {
            PppType::Kinematic => "kinematic",
            PppType::Static => "static",
        }
    }
}

impl FromStr for PppType {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kinematic" => Ok(PppType::Kinematic),
            "static" => Ok(PppType::Static),
            _ => Err(IdentityError::InvalidValue {
                field: "ppp_type",
                value: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for PppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tropospheric nominals the runner was fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TropNominal {
    /// VMF1-derived nominals only.
    Trop,
    /// VMF1 nominals plus the synthetic station signal.
    TropPenna,
}

impl TropNominal {
    pub const NAMES: &'static [&'static str] = &["trop", "trop+penna"];

    pub fn as_str(self) -> &'static str {
        match self {
            TropNominal::Trop => "trop",
            TropNominal::TropPenna => "trop+penna",
        }
    }
}

impl FromStr for TropNominal {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trop" => Ok(TropNominal::Trop),
            "trop+penna" => Ok(TropNominal::TropPenna),
            _ => Err(IdentityError::InvalidValue {
                field: "trop_nominal",
                value: s.to_string(),
                expected: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for TropNominal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The processing parameters that distinguish one project from another.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingParams {
    pub ppp_type: PppType,
    /// Position random-walk sigma \[mm/sqrt(s)\]. Ignored for static
    /// processing.
    pub pos_sigma: f64,
    /// Wet zenith delay random-walk sigma \[mm/sqrt(s)\]. Replaced by
    /// [`STATIC_WETZ_SIGMA`] for static processing.
    pub wetz_sigma: f64,
    pub trop_nominal: TropNominal,
    /// Elevation mask \[degrees\].
    pub elevation_mask: u32,
    /// Whether integer ambiguities were resolved.
    pub ambres: bool,
}

impl ProcessingParams {
    /// The position sigma actually used; `None` when not applicable.
    pub fn effective_pos_sigma(&self) -> Option<f64> {
        match self.ppp_type {
            PppType::Kinematic => Some(self.pos_sigma),
            PppType::Static => None,
        }
    }

    pub fn effective_wetz_sigma(&self) -> f64 {
        match self.ppp_type {
            PppType::Kinematic => self.wetz_sigma,
            PppType::Static => STATIC_WETZ_SIGMA,
        }
    }
}

/// A project's name, safe to use as a path component.
///
/// The suffix following the base name always has the same number of `_`
/// separated tokens, and no token contains `_`, so distinct parameter sets
/// never produce the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentity(String);

impl ProjectIdentity {
    pub fn new(base: &str, params: &ProcessingParams) -> Result<ProjectIdentity, IdentityError> {
        if base.is_empty() || base.contains(['/', '\\']) || base == "." || base == ".." {
            return Err(IdentityError::BadProjectName(base.to_string()));
        }
        let pos = match params.effective_pos_sigma() {
            Some(s) => {
                check_sigma("pos_sigma", s)?;
                s.to_string()
            }
            None => "na".to_string(),
        };
        let wetz = params.effective_wetz_sigma();
        check_sigma("wetz_sigma", wetz)?;

        let tokens = [
            base.to_string(),
            params.ppp_type.to_string(),
            pos,
            wetz.to_string(),
            params.trop_nominal.to_string(),
            format!("el{}", params.elevation_mask),
            if params.ambres { "ar" } else { "noar" }.to_string(),
        ];
        Ok(ProjectIdentity(tokens.iter().join("_")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_sigma(field: &'static str, value: f64) -> Result<(), IdentityError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(IdentityError::BadSigma { field, value })
    }
}
