//! Tide-loading analyses over a date range, and per-station spectra.

use log::{debug, info};

use crate::{
    cache::CacheKey,
    cadence::{regularize, DateRange},
    products::{AuxParameter, EnvSource, Runner, Synthesizer, ValueType},
    spectral::get_spectra,
    table::{AnalysisTable, SpectralTable, TimeTable},
    Constellation, Pipeline, PipelineError, StationGather, OTL_LABEL,
};

/// The spectra of one station, columns labelled by constellation first.
#[derive(Debug, Clone)]
pub struct StationSpectra {
    pub station: String,
    pub table: SpectralTable,
}

impl<R: Runner> Pipeline<R> {
    /// Compare the analyses of each constellation's displacement with that of
    /// the modelled ocean-tide loading, over `range`.
    ///
    /// Columns are labelled `OTL` for the model, then by constellation (`GPS`
    /// only, if `gps_only`). For all constellations, stations are processed in
    /// chunks of `num_cores` and the chunks stacked in order. The result is
    /// cached under the range and both flags.
    pub fn analyze(
        &self,
        range: &DateRange,
        gps_only: bool,
        restore_otl: bool,
        force: bool,
    ) -> Result<AnalysisTable, PipelineError> {
        self.cache.prepare()?;
        let key = CacheKey::eterna_gather(range, gps_only, restore_otl);
        if force {
            self.cache.invalidate(&key)?;
        }
        if self.cache.exists(&key) {
            info!("Found gather at {}", self.cache.path(&key).display());
            return Ok(self.cache.read(&key)?);
        }

        let estimated = EnvSource::Estimated { restore_otl };
        let table = if gps_only {
            let gps = Constellation::Gps;
            let otl = self
                .runner
                .analyze_environment(gps, None, EnvSource::SyntheticOtl, force, range)?;
            let est = self.runner.analyze_environment(gps, None, estimated, force, range)?;
            AnalysisTable::concat_columns(vec![otl.with_prefix(OTL_LABEL), est.with_prefix(gps.label())])?
        } else {
            let chunks: Vec<&[String]> = self.config.stations.chunks(self.config.num_cores).collect();
            let progress = self.progress_bar(chunks.len(), "chunks", "Analysing");
            let mut partials = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                info!("Processing {}", chunk.join(", "));
                let envs = self.gather_mgnss(false, Some(chunk))?;
                let otl = self.runner.analyze_environment(
                    Constellation::Gps,
                    Some(&envs),
                    EnvSource::SyntheticOtl,
                    force,
                    range,
                )?;
                let mut labelled = vec![otl.with_prefix(OTL_LABEL)];
                for mode in Constellation::ALL {
                    let est = self
                        .runner
                        .analyze_environment(mode, Some(&envs), estimated, force, range)?;
                    labelled.push(est.with_prefix(mode.label()));
                }
                partials.push(AnalysisTable::concat_columns(labelled)?);
                progress.inc(1);
            }
            progress.finish();
            AnalysisTable::concat_rows(partials)?
        };

        self.cache.write(&key, &table)?;
        Ok(table)
    }

    /// Analyse one troposphere or clock parameter of every constellation over
    /// `range`, labelled by constellation and cached.
    ///
    /// The runner always recomputes; its working directories are shared
    /// between value types.
    pub fn analyze_aux(
        &self,
        parameter: AuxParameter,
        value_type: ValueType,
        gps_only: bool,
        force: bool,
        range: &DateRange,
    ) -> Result<AnalysisTable, PipelineError> {
        self.cache.prepare()?;
        let key = CacheKey::parameter_gather(range, parameter, value_type, gps_only);
        if force {
            self.cache.invalidate(&key)?;
        }
        if self.cache.exists(&key) {
            info!("Found gather at {}", self.cache.path(&key).display());
            return Ok(self.cache.read(&key)?);
        }

        let aux = self.gather_aux(gps_only, false)?;
        let modes: &[Constellation] = if gps_only {
            &[Constellation::Gps]
        } else {
            &Constellation::ALL
        };
        let mut labelled = Vec::with_capacity(modes.len());
        for &mode in modes {
            debug!("Analysing {parameter} {value_type} for {mode}");
            let analysis = self
                .runner
                .analyze_parameter(mode, &aux, parameter, value_type, true, range)?;
            labelled.push(analysis.with_prefix(mode.label()));
        }
        let table = AnalysisTable::concat_columns(labelled)?;
        self.cache.write(&key, &table)?;
        Ok(table)
    }

    /// The spectra of every configured station's gather. See
    /// [`Pipeline::station_spectra`].
    pub fn spectra(
        &self,
        synthesizer: Option<&dyn Synthesizer>,
        window_size: usize,
    ) -> Result<Vec<StationSpectra>, PipelineError> {
        self.gather_mgnss(false, None)?
            .iter()
            .map(|gather| self.station_spectra(gather, synthesizer, window_size))
            .collect()
    }

    /// The spectrum of each constellation's position estimates.
    ///
    /// Each constellation's `value` columns are put on the nominal cadence.
    /// If a `synthesizer` is given, the modelled tide loading (on the GPS time
    /// frame, which all three share) is added back to every constellation.
    /// Gaps are then zero-filled before estimation.
    pub fn station_spectra(
        &self,
        gather: &StationGather,
        synthesizer: Option<&dyn Synthesizer>,
        window_size: usize,
    ) -> Result<StationSpectra, PipelineError> {
        let sampling = self.config.sampling;
        let mut series = Constellation::ALL
            .into_iter()
            .map(|mode| regularize(&gather.mode(mode).select_level(1, "value"), sampling))
            .collect::<Result<Vec<TimeTable>, _>>()?;

        if let Some(synthesizer) = synthesizer {
            let otl = synthesizer.generate_reference(&series[0], &gather.station, sampling)?;
            for s in &mut series {
                s.add_matching(&otl)?;
            }
        }

        let mut labelled = Vec::with_capacity(series.len());
        for (s, mode) in series.into_iter().zip(Constellation::ALL) {
            let filled = s.fill_nan(0.0);
            labelled.push(get_spectra(&filled, window_size)?.with_prefix(mode.label()));
        }
        Ok(StationSpectra {
            station: gather.station.clone(),
            table: SpectralTable::concat_columns(labelled)?,
        })
    }
}
