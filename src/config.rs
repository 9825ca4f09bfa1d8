//! Project configuration.
//!
//! Configuration is read from a TOML file and validated eagerly; a
//! [`ProjectConfig`] that exists is always usable as a cache key source.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use vec1::Vec1;

use crate::identity::{IdentityError, PppType, ProcessingParams, ProjectIdentity, TropNominal};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Couldn't read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("'{0}' must not be empty")]
    Empty(&'static str),

    #[error("num_cores must be at least 1")]
    NoCores,

    #[error("sampling must be a positive number of seconds (got {0})")]
    BadSampling(i64),
}

fn default_num_cores() -> usize {
    8
}

fn default_elevation_mask() -> u32 {
    7
}

fn default_pos_sigma() -> f64 {
    0.57
}

fn default_wetz_sigma() -> f64 {
    0.1
}

fn default_ppp_type() -> String {
    "kinematic".to_string()
}

fn default_trop_nominal() -> String {
    "trop".to_string()
}

fn default_sampling() -> i64 {
    1800
}

fn default_sigma_cut() -> f64 {
    0.05
}

/// The file layout, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub project_name: String,
    pub stations: Vec<String>,
    pub years: Vec<i32>,
    /// Root of the on-disk cache.
    pub tmp_dir: PathBuf,
    /// Where the runner's exported products live.
    pub products_dir: Option<PathBuf>,
    #[serde(default = "default_num_cores")]
    pub num_cores: usize,
    #[serde(default = "default_elevation_mask")]
    pub elevation_mask: u32,
    #[serde(default = "default_pos_sigma")]
    pub pos_sigma: f64,
    #[serde(default = "default_wetz_sigma")]
    pub wetz_sigma: f64,
    #[serde(default = "default_ppp_type")]
    pub ppp_type: String,
    #[serde(default = "default_trop_nominal")]
    pub trop_nominal: String,
    #[serde(default)]
    pub ambres: bool,
    #[serde(default = "default_sampling")]
    pub sampling: i64,
    #[serde(default = "default_sigma_cut")]
    pub sigma_cut: f64,
    pub hardisp_path: Option<PathBuf>,
    pub blq_file: Option<PathBuf>,
}

/// A validated configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub project_name: String,
    pub stations: Vec1<String>,
    pub years: Vec1<i32>,
    pub tmp_dir: PathBuf,
    pub products_dir: Option<PathBuf>,
    /// The worker-pool width handed to collaborators. Also the chunk size for
    /// range analyses.
    pub num_cores: usize,
    pub params: ProcessingParams,
    /// Nominal sampling interval of runner series \[s\].
    pub sampling: i64,
    /// Outlier cutoff forwarded to the runner \[m\].
    pub sigma_cut: f64,
    pub hardisp_path: Option<PathBuf>,
    pub blq_file: Option<PathBuf>,
}

impl ProjectConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ProjectConfig, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<ProjectConfig, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        Self::try_from(raw)
    }

    pub fn identity(&self) -> Result<ProjectIdentity, ConfigError> {
        Ok(ProjectIdentity::new(&self.project_name, &self.params)?)
    }

    /// Check the values the pipeline relies on, returning the project identity.
    /// Fields are public, so this runs again whenever a pipeline is built.
    pub fn validate(&self) -> Result<ProjectIdentity, ConfigError> {
        if self.num_cores == 0 {
            return Err(ConfigError::NoCores);
        }
        if self.sampling <= 0 {
            return Err(ConfigError::BadSampling(self.sampling));
        }
        self.identity()
    }
}

impl TryFrom<RawConfig> for ProjectConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let stations = Vec1::try_from_vec(raw.stations).map_err(|_| ConfigError::Empty("stations"))?;
        let years = Vec1::try_from_vec(raw.years).map_err(|_| ConfigError::Empty("years"))?;
        let params = ProcessingParams {
            ppp_type: raw.ppp_type.parse::<PppType>()?,
            pos_sigma: raw.pos_sigma,
            wetz_sigma: raw.wetz_sigma,
            trop_nominal: raw.trop_nominal.parse::<TropNominal>()?,
            elevation_mask: raw.elevation_mask,
            ambres: raw.ambres,
        };
        let config = ProjectConfig {
            project_name: raw.project_name,
            stations,
            years,
            tmp_dir: raw.tmp_dir,
            products_dir: raw.products_dir,
            num_cores: raw.num_cores,
            params,
            sampling: raw.sampling,
            sigma_cut: raw.sigma_cut,
            hardisp_path: raw.hardisp_path,
            blq_file: raw.blq_file,
        };
        // Fail here rather than at the first cache access.
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        project_name = "ga"
        stations = ["LERI", "ABER"]
        years = [2014, 2015]
        tmp_dir = "/tmp/mgnss"
    "#;

    #[test]
    fn defaults_are_applied() {
        let c = ProjectConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(c.num_cores, 8);
        assert_eq!(c.sampling, 1800);
        assert_eq!(c.params.ppp_type, PppType::Kinematic);
        assert_eq!(c.params.trop_nominal, TropNominal::Trop);
        assert_eq!(c.identity().unwrap().as_str(), "ga_kinematic_0.57_0.1_trop_el7_noar");
    }

    #[test]
    fn invalid_mode_names_the_field() {
        let toml = format!("{MINIMAL}\nppp_type = \"rapid\"\n");
        let err = ProjectConfig::from_toml(&toml).unwrap_err();
        match err {
            ConfigError::Identity(IdentityError::InvalidValue {
                field, expected, ..
            }) => {
                assert_eq!(field, "ppp_type");
                assert_eq!(expected, PppType::NAMES);
            }
            e => panic!("unexpected error {e}"),
        }

        let toml = format!("{MINIMAL}\ntrop_nominal = \"gpt3\"\n");
        let err = ProjectConfig::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("trop+penna"));
    }

    #[test]
    fn empty_lists_are_rejected() {
        let toml = r#"
            project_name = "ga"
            stations = []
            years = [2014]
            tmp_dir = "/tmp"
        "#;
        assert!(matches!(
            ProjectConfig::from_toml(toml),
            Err(ConfigError::Empty("stations"))
        ));
    }

    #[test]
    fn zero_cores_and_sampling_are_rejected() {
        let toml = format!("{MINIMAL}\nnum_cores = 0\n");
        assert!(matches!(ProjectConfig::from_toml(&toml), Err(ConfigError::NoCores)));
        let toml = format!("{MINIMAL}\nsampling = -30\n");
        assert!(matches!(
            ProjectConfig::from_toml(&toml),
            Err(ConfigError::BadSampling(-30))
        ));

        let mut c = ProjectConfig::from_toml(MINIMAL).unwrap();
        c.num_cores = 0;
        assert!(matches!(c.validate(), Err(ConfigError::NoCores)));
        c.num_cores = 1;
        c.sampling = 0;
        assert!(matches!(c.validate(), Err(ConfigError::BadSampling(0))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = format!("{MINIMAL}\nrnx_dir = \"/data\"\n");
        assert!(matches!(
            ProjectConfig::from_toml(&toml),
            Err(ConfigError::Parse(_))
        ));
    }
}
