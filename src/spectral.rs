//! Power spectral densities of displacement series.
//!
//! Spectra are Welch estimates with a flat-topped window whose edges follow a
//! Parzen taper. Input must already be on the nominal cadence with gaps set
//! to zero.

use std::sync::Arc;

use log::trace;
use rayon::prelude::*;
use realfft::{num_complex::Complex, RealFftPlanner, RealToComplex};
use thiserror::Error;

use crate::table::{SpectralTable, TableError, TimeTable};

/// Samples per day at the nominal 30 minute cadence. Frequencies come out in
/// cycles per day.
pub const SAMPLING_FREQUENCY: f64 = 48.0;

/// Segment length of the Welch estimate \[samples\], a little under 292 days
/// at the nominal cadence.
pub const DEFAULT_WINDOW: usize = 14016;

/// How much of the window is tapered, split evenly between both ends.
pub const TAPER_FRACTION: f64 = 0.1;

#[derive(Error, Debug)]
pub enum SpectralError {
    #[error("A series of {len} samples is shorter than the {window} sample window")]
    TooShort { len: usize, window: usize },

    #[error("The spectral window must have at least one sample")]
    EmptyWindow,

    #[error("FFT failed: {0}")]
    Fft(String),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// The symmetric Parzen window of `m` samples.
pub fn parzen(m: usize) -> Vec<f64> {
    if m <= 1 {
        return vec![1.0; m];
    }
    let half = m as f64 / 2.0;
    let centre = (m as f64 - 1.0) / 2.0;
    (0..m)
        .map(|i| {
            let n = (i as f64 - centre).abs();
            let r = n / half;
            if n <= centre / 2.0 {
                1.0 - 6.0 * r.powi(2) + 6.0 * r.powi(3)
            } else {
                2.0 * (1.0 - r).powi(3)
            }
        })
        .collect()
}

/// A window of ones whose first and last few samples are replaced by the two
/// halves of a Parzen window of `round(samples * fraction)` samples.
pub fn flat_top_parzen(samples: usize, fraction: f64) -> Vec<f64> {
    let mut window = vec![1.0; samples];
    let taper_len = ((samples as f64 * fraction).round_ties_even() as usize).min(samples);
    if taper_len == 0 {
        return window;
    }
    let taper = parzen(taper_len);
    let split = (taper_len as f64 / 2.0).round_ties_even() as usize;
    let (left, right) = taper.split_at(split);
    window[..left.len()].copy_from_slice(left);
    window[samples - right.len()..].copy_from_slice(right);
    window
}

/// A one-sided Welch power spectral density estimator.
///
/// Segments are as long as the window and overlap by half. Each segment has
/// its mean removed before windowing, and the averaged periodogram is scaled
/// to a density.
pub struct Welch {
    window: Vec<f64>,
    fs: f64,
    r2c: Arc<dyn RealToComplex<f64>>,
}

impl Welch {
    pub fn new(window: Vec<f64>, fs: f64) -> Result<Welch, SpectralError> {
        if window.is_empty() {
            return Err(SpectralError::EmptyWindow);
        }
        let mut planner = RealFftPlanner::new();
        let r2c = planner.plan_fft_forward(window.len());
        Ok(Welch { window, fs, r2c })
    }

    pub fn nperseg(&self) -> usize {
        self.window.len()
    }

    /// The frequency of each output bin.
    pub fn frequencies(&self) -> Vec<f64> {
        let n = self.nperseg();
        (0..n / 2 + 1).map(|k| k as f64 * self.fs / n as f64).collect()
    }

    pub fn estimate(&self, values: &[f64]) -> Result<Vec<f64>, SpectralError> {
        let nperseg = self.nperseg();
        if values.len() < nperseg {
            return Err(SpectralError::TooShort {
                len: values.len(),
                window: nperseg,
            });
        }
        let noverlap = nperseg / 2;
        let step = nperseg - noverlap;
        let num_segments = (values.len() - noverlap) / step;
        let scale = 1.0 / (self.fs * self.window.iter().map(|w| w * w).sum::<f64>());

        let mut input = self.r2c.make_input_vec();
        let mut spectrum: Vec<Complex<f64>> = self.r2c.make_output_vec();
        let mut psd = vec![0.0; nperseg / 2 + 1];
        for segment in (0..num_segments).map(|i| &values[i * step..i * step + nperseg]) {
            let mean = segment.iter().sum::<f64>() / nperseg as f64;
            input
                .iter_mut()
                .zip(segment.iter().zip(&self.window))
                .for_each(|(x, (v, w))| *x = (v - mean) * w);
            self.r2c
                .process(&mut input, &mut spectrum)
                .map_err(|e| SpectralError::Fft(e.to_string()))?;
            psd.iter_mut()
                .zip(&spectrum)
                .for_each(|(p, c)| *p += c.norm_sqr());
        }

        // Everything but DC (and Nyquist, if there is one) also carries the
        // power of the negative frequencies.
        let last_doubled = if nperseg % 2 == 0 { psd.len() - 1 } else { psd.len() };
        for (k, p) in psd.iter_mut().enumerate() {
            *p *= scale / num_segments as f64;
            if k > 0 && k < last_doubled {
                *p *= 2.0;
            }
        }
        Ok(psd)
    }
}

/// The spectrum of every column of `table`, indexed by frequency.
pub fn get_spectra(table: &TimeTable, window_size: usize) -> Result<SpectralTable, SpectralError> {
    let welch = Welch::new(flat_top_parzen(window_size, TAPER_FRACTION), SAMPLING_FREQUENCY)?;
    trace!(
        "Estimating {} spectra from {} samples",
        table.num_cols(),
        table.num_rows()
    );
    let data = table.data();
    let spectra = (0..table.num_cols())
        .into_par_iter()
        .map(|i| welch.estimate(&data.column(i).to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    let columns = table.columns().iter().cloned().zip(spectra).collect();
    Ok(SpectralTable::from_columns(welch.frequencies(), columns)?)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::TAU;

    use super::*;
    use crate::table::label;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-12, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn parzen_shape() {
        assert_close(&parzen(5), &[0.016, 0.424, 1.0, 0.424, 0.016]);
        assert_close(&parzen(2), &[0.25, 0.25]);
        assert_eq!(parzen(1), vec![1.0]);
        assert!(parzen(0).is_empty());
    }

    #[test]
    fn flat_top_edges() {
        let w = flat_top_parzen(100, 0.1);
        let taper = parzen(10);
        assert_eq!(w.len(), 100);
        assert_close(&w[..5], &taper[..5]);
        assert_close(&w[95..], &taper[5..]);
        assert!(w[5..95].iter().all(|&x| x == 1.0));

        // The taper splits at its rounded midpoint, ties to even.
        let w = flat_top_parzen(30, 0.1);
        let taper = parzen(3);
        assert_close(&w[..2], &taper[..2]);
        assert_close(&w[29..], &taper[2..]);
        assert!(w[2..29].iter().all(|&x| x == 1.0));

        assert_eq!(flat_top_parzen(4, 0.1), vec![1.0; 4]);
    }

    #[test]
    fn nyquist_is_not_doubled() {
        let welch = Welch::new(vec![1.0; 4], 1.0).unwrap();
        let psd = welch.estimate(&[1.0, -1.0, 1.0, -1.0]).unwrap();
        assert_close(&psd, &[0.0, 0.0, 4.0]);
        assert_close(&welch.frequencies(), &[0.0, 0.25, 0.5]);
    }

    #[test]
    fn segments_are_averaged() {
        // Three segments of four samples, stepping by two.
        let welch = Welch::new(vec![1.0; 4], 1.0).unwrap();
        let psd = welch.estimate(&[1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]).unwrap();
        assert_close(&psd, &[0.0, 0.0, 4.0]);
    }

    #[test]
    fn too_short() {
        let welch = Welch::new(flat_top_parzen(96, TAPER_FRACTION), SAMPLING_FREQUENCY).unwrap();
        assert!(matches!(
            welch.estimate(&[0.0; 95]),
            Err(SpectralError::TooShort { len: 95, window: 96 })
        ));
    }

    #[test]
    fn sinusoid_peaks_at_its_frequency() {
        // Four cycles per day, ten days at 30 minute sampling.
        let up: Vec<f64> = (0..480)
            .map(|i| (TAU * 4.0 * i as f64 / SAMPLING_FREQUENCY).sin())
            .collect();
        let constant = vec![3.0; 480];
        let index = (0..480).map(|i| i * 1800).collect();
        let t = TimeTable::from_columns(index, vec![(label("up"), up), (label("east"), constant)]).unwrap();

        let s = get_spectra(&t, 96).unwrap();
        assert_eq!(s.num_rows(), 49);
        assert_eq!(s.index()[8], 4.0);
        assert_eq!(s.columns(), t.columns());

        let up = s.column(&label("up")).unwrap();
        let peak = up
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
        assert!(s.column(&label("east")).unwrap().iter().all(|&p| p.abs() < 1e-20));
    }
}
