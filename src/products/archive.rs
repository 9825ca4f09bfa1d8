//! A [`Runner`] over products a GNSS runner has already exported.
//!
//! Products are zstd-compressed bincode tables laid out per constellation:
//!
//! ```text
//! <root>/<mode>/envs/<station>.zstd                 displacement series
//! <root>/<mode>/solutions/<station>.zstd            filtered solutions
//! <root>/<mode>/analysis/<begin>_<end>_<kind>.zstd  tidal analyses
//! ```
//!
//! where `<mode>` is `gps`, `glo` or `gps_glo`, `<station>` is lower case and
//! `<kind>` is `otl`, `restored`, `nootl` or `<parameter>_<value type>` (e.g.
//! `wetz_value`). Analyses have rows labelled by station first.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use rayon::prelude::*;

use super::{AuxParameter, EnvSource, ProductError, Runner, ValueType};
use crate::{
    cache::read_blob,
    cadence::DateRange,
    table::{AnalysisTable, TimeTable},
    Constellation, StationGather,
};

#[derive(Debug, Clone)]
pub struct ArchiveRunner {
    root: PathBuf,
}

impl ArchiveRunner {
    pub fn new<P: AsRef<Path>>(root: P) -> ArchiveRunner {
        ArchiveRunner {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn env_path(&self, mode: Constellation, station: &str) -> PathBuf {
        self.root
            .join(mode.dir_name())
            .join("envs")
            .join(format!("{}.zstd", station.to_lowercase()))
    }

    pub fn solution_path(&self, mode: Constellation, station: &str) -> PathBuf {
        self.root
            .join(mode.dir_name())
            .join("solutions")
            .join(format!("{}.zstd", station.to_lowercase()))
    }

    pub fn analysis_path(&self, mode: Constellation, range: &DateRange, kind: &str) -> PathBuf {
        self.root.join(mode.dir_name()).join("analysis").join(format!(
            "{}_{}_{kind}.zstd",
            range.begin_label(),
            range.end_label()
        ))
    }

    fn read<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ProductError> {
        if !path.exists() {
            return Err(ProductError::Missing(path.to_path_buf()));
        }
        trace!("Reading {}", path.display());
        Ok(read_blob(path)?)
    }

    fn read_analysis(
        &self,
        mode: Constellation,
        range: &DateRange,
        kind: &str,
        stations: Option<HashSet<String>>,
    ) -> Result<AnalysisTable, ProductError> {
        let table: AnalysisTable = Self::read(&self.analysis_path(mode, range, kind))?;
        Ok(match stations {
            Some(stations) => restrict_to_stations(&table, &stations),
            None => table,
        })
    }
}

/// Drop the epochs where any `sigma` column exceeds `sigma_cut`.
pub fn remove_outliers(table: &TimeTable, sigma_cut: f64) -> TimeTable {
    let sigma_cols: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, l)| l.get(1).map(String::as_str) == Some("sigma"))
        .map(|(i, _)| i)
        .collect();
    let data = table.data();
    let keep: Vec<usize> = (0..table.num_rows())
        .filter(|&row| {
            sigma_cols.iter().all(|&col| {
                let sigma = data[[row, col]];
                sigma.is_nan() || sigma <= sigma_cut
            })
        })
        .collect();
    if keep.len() < table.num_rows() {
        debug!(
            "Removed {} of {} epochs with sigma above {sigma_cut}",
            table.num_rows() - keep.len(),
            table.num_rows()
        );
    }
    table.select_rows(&keep)
}

fn restrict_to_stations(table: &AnalysisTable, stations: &HashSet<String>) -> AnalysisTable {
    let rows: Vec<usize> = table
        .index()
        .iter()
        .enumerate()
        .filter(|(_, l)| stations.contains(&l.first().to_uppercase()))
        .map(|(i, _)| i)
        .collect();
    table.select_rows(&rows)
}

fn station_set(gathers: &[StationGather]) -> HashSet<String> {
    gathers.iter().map(|g| g.station.to_uppercase()).collect()
}

impl Runner for ArchiveRunner {
    fn retrieve_series(
        &self,
        mode: Constellation,
        stations: &[String],
        force: bool,
        sigma_cut: f64,
        num_workers: usize,
    ) -> Result<Vec<TimeTable>, ProductError> {
        if force {
            debug!("Archived series are never recomputed; ignoring force");
        }
        debug!("Reading {} {mode} series on {num_workers} threads", stations.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()?;
        pool.install(|| {
            stations
                .par_iter()
                .map(|station| -> Result<TimeTable, ProductError> {
                    let series: TimeTable = Self::read(&self.env_path(mode, station))?;
                    Ok(remove_outliers(&series, sigma_cut))
                })
                .collect()
        })
    }

    fn filtered_solution(&self, mode: Constellation, station: &str) -> Result<TimeTable, ProductError> {
        Self::read(&self.solution_path(mode, station))
    }

    fn analyze_environment(
        &self,
        mode: Constellation,
        envs: Option<&[StationGather]>,
        source: EnvSource,
        _force: bool,
        range: &DateRange,
    ) -> Result<AnalysisTable, ProductError> {
        let kind = match source {
            EnvSource::SyntheticOtl => "otl",
            EnvSource::Estimated { restore_otl: true } => "restored",
            EnvSource::Estimated { restore_otl: false } => "nootl",
        };
        self.read_analysis(mode, range, kind, envs.map(station_set))
    }

    fn analyze_parameter(
        &self,
        mode: Constellation,
        aux: &[StationGather],
        parameter: AuxParameter,
        value_type: ValueType,
        _force: bool,
        range: &DateRange,
    ) -> Result<AnalysisTable, ProductError> {
        let kind = format!("{}_{value_type}", parameter.as_str().to_lowercase());
        self.read_analysis(mode, range, &kind, Some(station_set(aux)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::write_blob,
        cadence::parse_date,
        table::{label, label_from},
    };

    fn env(index: Vec<i64>, up: Vec<f64>, sigma: Vec<f64>) -> TimeTable {
        TimeTable::from_columns(
            index,
            vec![
                (label_from(&["up", "value"]).unwrap(), up),
                (label_from(&["up", "sigma"]).unwrap(), sigma),
            ],
        )
        .unwrap()
    }

    fn analysis() -> AnalysisTable {
        let rows = vec![
            label_from(&["LERI", "up", "M2"]).unwrap(),
            label_from(&["ABER", "up", "M2"]).unwrap(),
            label_from(&["LERI", "east", "M2"]).unwrap(),
        ];
        AnalysisTable::from_columns(rows, vec![(label("amplitude"), vec![1.0, 2.0, 3.0])]).unwrap()
    }

    #[test]
    fn series_in_station_order_without_outliers() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ArchiveRunner::new(dir.path());
        write_blob(
            &runner.env_path(Constellation::Glonass, "LERI"),
            &env(vec![0, 300, 600], vec![1.0, 2.0, 3.0], vec![0.01, 0.2, 0.01]),
        )
        .unwrap();
        write_blob(
            &runner.env_path(Constellation::Glonass, "ABER"),
            &env(vec![0, 300], vec![4.0, 5.0], vec![0.01, 0.01]),
        )
        .unwrap();

        let stations = vec!["LERI".to_string(), "ABER".to_string()];
        let series = runner
            .retrieve_series(Constellation::Glonass, &stations, false, 0.05, 2)
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].index(), &[0, 600]);
        assert_eq!(series[1].index(), &[0, 300]);
    }

    #[test]
    fn missing_products_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ArchiveRunner::new(dir.path());
        let result = runner.filtered_solution(Constellation::Gps, "LERI");
        assert!(matches!(result, Err(ProductError::Missing(p)) if p.ends_with("gps/solutions/leri.zstd")));
    }

    #[test]
    fn analyses_are_restricted_to_the_gathered_stations() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ArchiveRunner::new(dir.path());
        let range = DateRange::resolve(parse_date("2014-01-01").ok(), parse_date("2014-12-31").ok(), &[])
            .unwrap();
        write_blob(
            &runner.analysis_path(Constellation::GpsGlonass, &range, "nootl"),
            &analysis(),
        )
        .unwrap();

        let envs = vec![StationGather {
            station: "leri".to_string(),
            table: TimeTable::empty(vec![]),
        }];
        let t = runner
            .analyze_environment(
                Constellation::GpsGlonass,
                Some(&envs),
                EnvSource::Estimated { restore_otl: false },
                false,
                &range,
            )
            .unwrap();
        assert_eq!(t.num_rows(), 2);
        assert!(t.index().iter().all(|l| l.first() == "LERI"));

        let all = runner
            .analyze_environment(
                Constellation::GpsGlonass,
                None,
                EnvSource::Estimated { restore_otl: false },
                false,
                &range,
            )
            .unwrap();
        assert_eq!(all.num_rows(), 3);

        assert!(runner
            .analyze_environment(Constellation::Gps, None, EnvSource::SyntheticOtl, false, &range)
            .is_err());
    }
}
