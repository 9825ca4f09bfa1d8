//! Synthetic ocean-tide-loading displacement from the IERS `hardisp` program.
//!
//! `hardisp` is invoked as `hardisp YYYY MM DD HH MM SS <num> <samp>` with the
//! station's six BLQ coefficient lines on stdin, and prints one line of
//! `dU dS dW` \[m\] per sample.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, trace};

use super::{ProductError, Synthesizer};
use crate::{
    cadence::j2000_seconds_to_epoch,
    table::{label, TimeTable},
};

/// Tidal constituents per BLQ line.
const NUM_WAVES: usize = 11;
/// Amplitude and phase lines for the radial, west and south components.
const NUM_BLQ_LINES: usize = 6;

#[derive(Debug, Clone)]
pub struct HardispSynthesizer {
    hardisp_path: PathBuf,
    blq_file: PathBuf,
}

impl HardispSynthesizer {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(hardisp_path: P, blq_file: Q) -> HardispSynthesizer {
        HardispSynthesizer {
            hardisp_path: hardisp_path.as_ref().to_path_buf(),
            blq_file: blq_file.as_ref().to_path_buf(),
        }
    }

    /// The coefficient lines of `station` in the BLQ file.
    fn coefficients(&self, station: &str) -> Result<Vec<String>, ProductError> {
        let text = std::fs::read_to_string(&self.blq_file)?;
        parse_blq(&text, station).and_then(|block| {
            block.ok_or_else(|| ProductError::NoBlq {
                station: station.to_string(),
                blq: self.blq_file.clone(),
            })
        })
    }

    fn run(&self, args: &[String], stdin: &str) -> Result<String, ProductError> {
        debug!("Running {} {}", self.hardisp_path.display(), args.join(" "));
        let spawn_err = |source| ProductError::Spawn {
            path: self.hardisp_path.clone(),
            source,
        };
        let mut child = Command::new(&self.hardisp_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(stdin.as_bytes())?;
        }
        let output = child.wait_with_output().map_err(spawn_err)?;
        if !output.status.success() {
            return Err(ProductError::HardispFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Find the block of `station` in BLQ-formatted `text`. Lines starting with
/// `$$` are comments; a block is the station name on its own line followed by
/// six lines of eleven numbers.
pub fn parse_blq(text: &str, station: &str) -> Result<Option<Vec<String>>, ProductError> {
    let bad = |reason: String| ProductError::BadBlq {
        station: station.to_string(),
        reason,
    };
    let mut lines = text.lines().filter(|l| !l.trim_start().starts_with("$$"));
    while let Some(line) = lines.next() {
        if !line.trim().eq_ignore_ascii_case(station) {
            continue;
        }
        let mut block = Vec::with_capacity(NUM_BLQ_LINES);
        for i in 0..NUM_BLQ_LINES {
            let line = lines
                .next()
                .ok_or_else(|| bad(format!("only {i} coefficient lines")))?;
            let values = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| bad(format!("line {}: {e}", i + 1)))?;
            if values.len() != NUM_WAVES {
                return Err(bad(format!(
                    "line {} has {} values, expected {NUM_WAVES}",
                    i + 1,
                    values.len()
                )));
            }
            block.push(line.to_string());
        }
        return Ok(Some(block));
    }
    Ok(None)
}

/// Parse `hardisp` output into `(east, north, up)` triples.
pub fn parse_output(text: &str) -> Result<Vec<(f64, f64, f64)>, ProductError> {
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            let bad = || ProductError::HardispOutput {
                line: i + 1,
                text: l.to_string(),
            };
            let values = l
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| bad())?;
            match values.as_slice() {
                // Vertical, south and west.
                [du, ds, dw] => Ok((-dw, -ds, *du)),
                _ => Err(bad()),
            }
        })
        .collect()
}

impl Synthesizer for HardispSynthesizer {
    fn generate_reference(
        &self,
        dataset: &TimeTable,
        station: &str,
        sampling: i64,
    ) -> Result<TimeTable, ProductError> {
        let index = dataset.index();
        let first = match index.first() {
            Some(&f) => f,
            None => return Ok(TimeTable::empty(vec![label("east"), label("north"), label("up")])),
        };
        if index.iter().zip(0..).any(|(&t, i)| t != first + i * sampling) {
            return Err(ProductError::Irregular(sampling));
        }

        let block = self.coefficients(station)?;
        let (year, month, day, hour, minute, second, _) = j2000_seconds_to_epoch(first).to_gregorian_utc();
        let args = vec![
            year.to_string(),
            month.to_string(),
            day.to_string(),
            hour.to_string(),
            minute.to_string(),
            second.to_string(),
            index.len().to_string(),
            sampling.to_string(),
        ];
        let mut stdin = block.join("\n");
        stdin.push('\n');
        let samples = parse_output(&self.run(&args, &stdin)?)?;
        if samples.len() != index.len() {
            return Err(ProductError::SampleCount {
                expected: index.len(),
                got: samples.len(),
            });
        }
        trace!("Synthesised {} samples for {station}", samples.len());

        let (east, (north, up)): (Vec<f64>, (Vec<f64>, Vec<f64>)) =
            samples.into_iter().map(|(e, n, u)| (e, (n, u))).unzip();
        Ok(TimeTable::from_columns(
            index.to_vec(),
            vec![(label("east"), east), (label("north"), north), (label("up"), up)],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLQ: &str = "\
$$ Ocean loading displacement
$$
  LERI
$$ FES2004 ID: 2021-01-01
  .00352 .00098 .00081 .00025 .00195 .00092 .00065 .00003 .00012 .00007 .00006
  .00098 .00031 .00021 .00009 .00047 .00033 .00016 .00001 .00002 .00001 .00001
  .00122 .00037 .00027 .00010 .00029 .00028 .00010 .00000 .00002 .00001 .00001
   -94.3  -68.1 -109.3  -72.1   13.5  -75.2   19.1   -8.1   -2.4   -0.3    0.7
    91.6  116.9   76.6  111.7  174.3  157.5  175.0   43.9  174.1  177.6  179.7
   -33.2   -3.0  -43.1   -7.0  107.6   83.2  106.0   84.4   21.5    5.5    1.4
  ABER
  .00100 .00098 .00081 .00025 .00195 .00092 .00065 .00003 .00012 .00007
";

    #[test]
    fn finds_station_block() {
        let block = parse_blq(BLQ, "leri").unwrap().unwrap();
        assert_eq!(block.len(), 6);
        assert!(block[0].trim_start().starts_with(".00352"));
        assert!(parse_blq(BLQ, "HERS").unwrap().is_none());
    }

    #[test]
    fn truncated_block_is_an_error() {
        assert!(matches!(parse_blq(BLQ, "ABER"), Err(ProductError::BadBlq { .. })));
    }

    #[test]
    fn output_becomes_east_north_up() {
        let samples = parse_output("  0.001000  0.002000 -0.003000\n\n -0.5 0.25 0.125\n").unwrap();
        assert_eq!(samples, vec![(0.003, -0.002, 0.001), (-0.125, -0.25, -0.5)]);
        assert!(matches!(
            parse_output("1 2\n"),
            Err(ProductError::HardispOutput { line: 1, .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn drives_the_program() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let blq = dir.path().join("ocean.blq");
        std::fs::write(&blq, BLQ).unwrap();
        // Prints one sample per requested epoch, like the real thing.
        let exe = dir.path().join("hardisp");
        std::fs::write(
            &exe,
            "#!/bin/sh\ncat > /dev/null\ni=0\nwhile [ $i -lt $7 ]; do echo ' 0.001 0.002 0.003'; i=$((i+1)); done\n",
        )
        .unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let synth = HardispSynthesizer::new(&exe, &blq);
        let dataset = TimeTable::from_columns(vec![0, 1800, 3600], vec![(label("up"), vec![0.0; 3])]).unwrap();
        let otl = synth.generate_reference(&dataset, "LERI", 1800).unwrap();
        assert_eq!(otl.index(), dataset.index());
        assert_eq!(otl.column(&label("up")).unwrap().to_vec(), vec![0.001; 3]);
        assert_eq!(otl.column(&label("east")).unwrap().to_vec(), vec![-0.003; 3]);

        let irregular = TimeTable::from_columns(vec![0, 1800, 5400], vec![(label("up"), vec![0.0; 3])]).unwrap();
        assert!(matches!(
            synth.generate_reference(&irregular, "LERI", 1800),
            Err(ProductError::Irregular(1800))
        ));
        assert!(matches!(
            synth.generate_reference(&dataset, "HERS", 1800),
            Err(ProductError::NoBlq { .. })
        ));
    }
}
