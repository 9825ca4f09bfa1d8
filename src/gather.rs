//! Per-station gathers: the three constellation solutions of a station side by
//! side, cached once built.

use log::{debug, info, trace};

use crate::{
    align::align,
    cache::CacheKey,
    products::Runner,
    table::{Label, TimeTable},
    Constellation, Pipeline, PipelineError, StationGather,
};

/// Filtered-solution parameters kept by [`Pipeline::gather_aux`], as the
/// fourth dotted component of the parameter name.
const AUX_KINDS: [&str; 2] = ["Trop", "Clk"];

/// Metres to millimetres.
const AUX_SCALE: f64 = 1000.0;

/// Whether a `[value_type, parameter]` column is a troposphere or clock
/// estimate, e.g. `.Station.LERI.Trop.WetZ`.
fn is_aux_column(label: &Label) -> bool {
    label
        .get(1)
        .and_then(|parameter| parameter.split('.').nth(3))
        .map(|kind| AUX_KINDS.contains(&kind))
        .unwrap_or(false)
}

impl<R: Runner> Pipeline<R> {
    /// Stations in `stations` without a cached gather.
    pub fn missing_gathers(&self, stations: &[String]) -> Vec<String> {
        stations
            .iter()
            .filter(|s| !self.cache.exists(&CacheKey::env_gather(s)))
            .cloned()
            .collect()
    }

    /// Gather the aligned series of all three constellations, per station.
    ///
    /// If any station lacks a cached gather, the runner's series of *every*
    /// requested station are retrieved in one batch per constellation, and
    /// every gather is rebuilt and rewritten. Otherwise all gathers come from
    /// the cache.
    ///
    /// # Arguments
    ///
    /// * `force` - discard the cached gathers first, and have the runner
    ///   recompute its series.
    /// * `stations` - the stations to gather; all configured stations if
    ///   `None`.
    ///
    /// # Returns
    ///
    /// * One gather per station, in the order of `stations`. Columns are
    ///   `[constellation, observable, value|sigma]`.
    pub fn gather_mgnss(
        &self,
        force: bool,
        stations: Option<&[String]>,
    ) -> Result<Vec<StationGather>, PipelineError> {
        let stations = stations.unwrap_or(self.config.stations.as_slice());
        self.cache.prepare()?;
        let keys: Vec<CacheKey> = stations.iter().map(|s| CacheKey::env_gather(s)).collect();
        if force {
            for key in &keys {
                self.cache.invalidate(key)?;
            }
        }

        let missing = self.missing_gathers(stations);
        if missing.is_empty() {
            debug!("All {} gathers are cached", stations.len());
            return stations
                .iter()
                .zip(&keys)
                .map(|(station, key)| {
                    Ok(StationGather {
                        station: station.clone(),
                        table: self.cache.read(key)?,
                    })
                })
                .collect();
        }

        info!(
            "{} of {} gathers missing ({}); retrieving series of all stations",
            missing.len(),
            stations.len(),
            missing.join(", ")
        );
        let mut per_mode = Vec::with_capacity(Constellation::ALL.len());
        for mode in Constellation::ALL {
            let series = self.runner.retrieve_series(
                mode,
                stations,
                force,
                self.config.sigma_cut,
                self.config.num_cores,
            )?;
            if series.len() != stations.len() {
                return Err(PipelineError::SeriesCount {
                    mode,
                    expected: stations.len(),
                    got: series.len(),
                });
            }
            per_mode.push(series);
        }

        let progress = self.progress_bar(stations.len(), "stations", "Gathering");
        let mut gathers = Vec::with_capacity(stations.len());
        for (i, (station, key)) in stations.iter().zip(&keys).enumerate() {
            let aligned = align(&per_mode[0][i], &per_mode[1][i], &per_mode[2][i]);
            trace!("{station}: {} common epochs", aligned.index().len());
            let table = TimeTable::concat_columns(vec![
                aligned.gps.with_prefix(Constellation::Gps.label()),
                aligned.glonass.with_prefix(Constellation::Glonass.label()),
                aligned.gps_glonass.with_prefix(Constellation::GpsGlonass.label()),
            ])?;
            self.cache.write(key, &table)?;
            gathers.push(StationGather {
                station: station.clone(),
                table,
            });
            progress.inc(1);
        }
        progress.finish();
        Ok(gathers)
    }

    /// Gather the troposphere and clock estimates of every configured station,
    /// in millimetres.
    ///
    /// Columns are `[constellation, STATION, value_type, parameter]`. Unless
    /// `gps_only`, the three constellations are aligned first.
    pub fn gather_aux(&self, gps_only: bool, force: bool) -> Result<Vec<StationGather>, PipelineError> {
        self.cache.prepare()?;
        let modes: &[Constellation] = if gps_only {
            &[Constellation::Gps]
        } else {
            &Constellation::ALL
        };

        let stations = self.config.stations.as_slice();
        let progress = self.progress_bar(stations.len(), "stations", "Gathering aux");
        let mut gathers = Vec::with_capacity(stations.len());
        for station in stations {
            let key = CacheKey::aux_gather(station, gps_only);
            if force {
                self.cache.invalidate(&key)?;
            }
            let table = if self.cache.exists(&key) {
                self.cache.read(&key)?
            } else {
                let table = self.extract_aux(station, modes)?;
                self.cache.write(&key, &table)?;
                table
            };
            gathers.push(StationGather {
                station: station.clone(),
                table,
            });
            progress.inc(1);
        }
        progress.finish();
        Ok(gathers)
    }

    fn extract_aux(&self, station: &str, modes: &[Constellation]) -> Result<TimeTable, PipelineError> {
        let mut extracted = Vec::with_capacity(modes.len());
        for &mode in modes {
            let solution = self.runner.filtered_solution(mode, station)?;
            extracted.push(
                solution
                    .filter_columns(is_aux_column)
                    .with_prefix(&station.to_uppercase()),
            );
        }
        if let [gps, glonass, gps_glonass] = extracted.as_slice() {
            let aligned = align(gps, glonass, gps_glonass);
            extracted = vec![aligned.gps, aligned.glonass, aligned.gps_glonass];
        }
        let labelled = extracted
            .into_iter()
            .zip(modes)
            .map(|(t, mode)| t.with_prefix(mode.label()))
            .collect();
        Ok(TimeTable::concat_columns(labelled)?.scale(AUX_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::label_from;

    #[test]
    fn aux_columns() {
        let keep = |p: &str| is_aux_column(&label_from(&["value", p]).unwrap());
        assert!(keep(".Station.LERI.Trop.WetZ"));
        assert!(keep(".Station.LERI.Trop.GradEast"));
        assert!(keep(".Station.LERI.Clk.Bias"));
        assert!(!keep(".Station.LERI.State.Pos.X"));
        assert!(!keep("WetZ"));
        assert!(!is_aux_column(&label_from(&["value"]).unwrap()));
    }
}
