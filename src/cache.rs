//! On-disk memoisation of gathers and analyses.
//!
//! Entries are bincode blobs compressed with zstd. The presence of an entry is
//! the only signal that a product doesn't need recomputing; `force` callers
//! invalidate first. File names follow the layout existing caches already use,
//! so they must not change.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, trace};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{
    cadence::DateRange,
    identity::ProjectIdentity,
    products::{AuxParameter, ValueType},
};

const ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't (de)serialise cache entry {}: {source}", .path.display())]
    Bincode {
        path: PathBuf,
        source: bincode::Error,
    },
}

/// What a cache entry holds, and the parameters that make it unique.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
    /// Aligned multi-constellation series of one station.
    EnvGather { station: String },

    /// Troposphere and clock estimates of one station.
    AuxGather { station: String, gps_only: bool },

    /// Tide-loading analyses over a date range.
    EternaGather {
        begin: String,
        end: String,
        gps_only: bool,
        restore_otl: bool,
    },

    /// Analyses of one auxiliary parameter over a date range.
    ParameterGather {
        begin: String,
        end: String,
        parameter: AuxParameter,
        value_type: ValueType,
        gps_only: bool,
    },
}

impl CacheKey {
    pub fn env_gather(station: &str) -> CacheKey {
        CacheKey::EnvGather {
            station: station.to_string(),
        }
    }

    pub fn aux_gather(station: &str, gps_only: bool) -> CacheKey {
        CacheKey::AuxGather {
            station: station.to_string(),
            gps_only,
        }
    }

    pub fn eterna_gather(range: &DateRange, gps_only: bool, restore_otl: bool) -> CacheKey {
        CacheKey::EternaGather {
            begin: range.begin_label(),
            end: range.end_label(),
            gps_only,
            restore_otl,
        }
    }

    pub fn parameter_gather(
        range: &DateRange,
        parameter: AuxParameter,
        value_type: ValueType,
        gps_only: bool,
    ) -> CacheKey {
        CacheKey::ParameterGather {
            begin: range.begin_label(),
            end: range.end_label(),
            parameter,
            value_type,
            gps_only,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    /// `<tmp_dir>/gd2e`
    root: PathBuf,
    identity: ProjectIdentity,
}

impl CacheStore {
    pub fn new<P: AsRef<Path>>(tmp_dir: P, identity: ProjectIdentity) -> CacheStore {
        CacheStore {
            root: tmp_dir.as_ref().join("gd2e"),
            identity,
        }
    }

    pub fn identity(&self) -> &ProjectIdentity {
        &self.identity
    }

    fn env_dir(&self) -> PathBuf {
        self.root.join("env_gathers").join(self.identity.as_str())
    }

    fn aux_dir(&self) -> PathBuf {
        self.root.join("aux_gathers").join(self.identity.as_str())
    }

    fn eterna_dir(&self) -> PathBuf {
        self.root.join("eterna_gathers")
    }

    /// Create the directories every kind of entry lives in.
    pub fn prepare(&self) -> Result<(), CacheError> {
        for dir in [self.env_dir(), self.aux_dir(), self.eterna_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io { path: dir, source })?;
        }
        Ok(())
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        let id = self.identity.as_str();
        match key {
            CacheKey::EnvGather { station } => {
                self.env_dir().join(format!("{}.zstd", station.to_lowercase()))
            }

            CacheKey::AuxGather { station, gps_only } => self.aux_dir().join(format!(
                "{id}_{}_aux{}.zstd",
                station.to_lowercase(),
                if *gps_only { "_gps" } else { "" }
            )),

            CacheKey::EternaGather {
                begin,
                end,
                gps_only,
                restore_otl,
            } => {
                let suffix = match (gps_only, restore_otl) {
                    (false, true) => ".zstd",
                    (false, false) => "nootl.zstd",
                    (true, true) => "gps.zstd",
                    (true, false) => "nootl_gps.zstd",
                };
                self.eterna_dir().join(format!("{id}_{begin}_{end}_{suffix}"))
            }

            CacheKey::ParameterGather {
                begin,
                end,
                parameter,
                value_type,
                gps_only,
            } => {
                let short: String = parameter.as_str().to_lowercase().chars().take(5).collect();
                let suffix = format!(
                    "{short}_{}{}.zstd",
                    value_type.initial(),
                    if *gps_only { "_gps" } else { "" }
                );
                self.eterna_dir().join(format!("{id}_{begin}_{end}_{suffix}"))
            }
        }
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.path(key).exists()
    }

    pub fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T, CacheError> {
        let path = self.path(key);
        debug!("Reading cache entry {}", path.display());
        read_blob(&path)
    }

    pub fn write<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), CacheError> {
        let path = self.path(key);
        debug!("Writing cache entry {}", path.display());
        write_blob(&path, value)
    }

    /// Remove an entry. Returns whether there was one.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Invalidated {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}

/// Decode a zstd-compressed bincode blob.
pub fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<T, CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let decoder = zstd::stream::read::Decoder::new(file).map_err(io_err)?;
    bincode::deserialize_from(decoder).map_err(|source| CacheError::Bincode {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode `value` as a zstd-compressed bincode blob at `path`.
///
/// The blob goes to a temporary file next to its final location and is renamed
/// into place, so readers only ever see complete blobs.
pub fn write_blob<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let writer = BufWriter::new(tmp.as_file_mut());
        let mut encoder = zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL).map_err(io_err)?;
        bincode::serialize_into(&mut encoder, value).map_err(|source| CacheError::Bincode {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = encoder.finish().map_err(io_err)?;
        writer.flush().map_err(io_err)?;
    }
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    trace!("Persisted {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cadence::parse_date,
        identity::{PppType, ProcessingParams, TropNominal},
        table::{label, TimeTable},
    };

    fn store(dir: &Path) -> CacheStore {
        let params = ProcessingParams {
            ppp_type: PppType::Kinematic,
            pos_sigma: 3.2,
            wetz_sigma: 0.1,
            trop_nominal: TropNominal::Trop,
            elevation_mask: 7,
            ambres: false,
        };
        CacheStore::new(dir, ProjectIdentity::new("ga", &params).unwrap())
    }

    fn range() -> DateRange {
        DateRange::resolve(parse_date("2014-01-01").ok(), parse_date("2020-12-31").ok(), &[]).unwrap()
    }

    #[test]
    fn file_names() {
        let s = store(Path::new("/tmp/x"));
        let id = "ga_kinematic_3.2_0.1_trop_el7_noar";
        assert_eq!(
            s.path(&CacheKey::env_gather("LERI")),
            PathBuf::from(format!("/tmp/x/gd2e/env_gathers/{id}/leri.zstd"))
        );
        assert_eq!(
            s.path(&CacheKey::aux_gather("LERI", true)),
            PathBuf::from(format!("/tmp/x/gd2e/aux_gathers/{id}/{id}_leri_aux_gps.zstd"))
        );
        assert_eq!(
            s.path(&CacheKey::aux_gather("Leri", false)),
            PathBuf::from(format!("/tmp/x/gd2e/aux_gathers/{id}/{id}_leri_aux.zstd"))
        );

        let r = range();
        let eterna = |gps_only, restore_otl| {
            s.path(&CacheKey::eterna_gather(&r, gps_only, restore_otl))
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        };
        assert_eq!(eterna(false, true), format!("{id}_2014001_2020366_.zstd"));
        assert_eq!(eterna(false, false), format!("{id}_2014001_2020366_nootl.zstd"));
        assert_eq!(eterna(true, true), format!("{id}_2014001_2020366_gps.zstd"));
        assert_eq!(eterna(true, false), format!("{id}_2014001_2020366_nootl_gps.zstd"));

        let p = s.path(&CacheKey::parameter_gather(
            &r,
            AuxParameter::GradNorth,
            ValueType::Value,
            true,
        ));
        assert!(p.ends_with(format!("{id}_2014001_2020366_gradn_v_gps.zstd")));
        let p = s.path(&CacheKey::parameter_gather(&r, AuxParameter::Clk, ValueType::Sigma, false));
        assert!(p.ends_with(format!("{id}_2014001_2020366_clk_s.zstd")));
    }

    #[test]
    fn write_read_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let key = CacheKey::env_gather("ABER");
        let table =
            TimeTable::from_columns(vec![0, 300, 600], vec![(label("up"), vec![0.1, f64::NAN, -0.3])]).unwrap();

        assert!(!s.exists(&key));
        s.write(&key, &table).unwrap();
        assert!(s.exists(&key));

        let back: TimeTable = s.read(&key).unwrap();
        assert_eq!(back.index(), table.index());
        let up = back.column(&label("up")).unwrap();
        assert_eq!(up[0], 0.1);
        assert!(up[1].is_nan());

        assert!(s.invalidate(&key).unwrap());
        assert!(!s.exists(&key));
        assert!(!s.invalidate(&key).unwrap());
    }

    #[test]
    fn corrupt_entries_fail_to_read() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.prepare().unwrap();
        let key = CacheKey::env_gather("ABER");
        std::fs::write(s.path(&key), b"not zstd").unwrap();
        assert!(s.read::<TimeTable>(&key).is_err());
    }
}
