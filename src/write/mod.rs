//! CSV export of tables.
//!
//! Column labels take one header row per level, shorter labels padded with
//! empty cells. The first column holds the row index.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use crossbeam_channel::Receiver;
use crossbeam_utils::atomic::AtomicCell;
use indicatif::ProgressBar;
use log::{debug, trace};
use thiserror::Error;

use crate::{
    analyze::StationSpectra,
    table::{Label, Table},
};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Couldn't create {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a row index is written.
pub trait CsvIndex {
    /// Header of the index column.
    const NAME: &'static str;

    fn render(&self) -> String;
}

/// Seconds since J2000.
impl CsvIndex for i64 {
    const NAME: &'static str = "epoch";

    fn render(&self) -> String {
        self.to_string()
    }
}

/// Cycles per day.
impl CsvIndex for f64 {
    const NAME: &'static str = "frequency";

    fn render(&self) -> String {
        self.to_string()
    }
}

impl CsvIndex for Label {
    const NAME: &'static str = "label";

    fn render(&self) -> String {
        self.join("/")
    }
}

pub fn write_table<I: CsvIndex + Clone, W: Write>(table: &Table<I>, writer: W) -> Result<(), WriteError> {
    let mut csv = csv::WriterBuilder::new().flexible(false).from_writer(writer);
    let num_levels = table.columns().iter().map(|l| l.len()).max().unwrap_or(1);
    for level in 0..num_levels {
        let first = if level + 1 == num_levels { I::NAME } else { "" };
        let mut record = vec![first.to_string()];
        record.extend(
            table
                .columns()
                .iter()
                .map(|l| l.get(level).cloned().unwrap_or_default()),
        );
        csv.write_record(&record)?;
    }
    for (index, row) in table.index().iter().zip(table.data().outer_iter()) {
        let mut record = vec![index.render()];
        record.extend(row.iter().map(f64::to_string));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_table_file<I: CsvIndex + Clone>(table: &Table<I>, path: &Path) -> Result<(), WriteError> {
    debug!("Writing {}", path.display());
    let file = File::create(path).map_err(|source| WriteError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    write_table(table, file)
}

/// The CSV file the spectra of `station` are written to in `dir`.
pub fn spectra_path(dir: &Path, station: &str) -> PathBuf {
    dir.join(format!("{}_spectra.csv", station.to_lowercase()))
}

/// Receive station spectra from another thread and write each to its own CSV
/// file in `dir`.
///
/// # Arguments
///
/// * `rx` - the channel to receive spectra from. Writing finishes when the
///   sender hangs up.
/// * `error` - a thread-safe [`bool`] to indicate if an error has occurred.
///   Receiving `true` signals that we should not continue, as another thread
///   has experienced an error. It is set if writing fails.
/// * `progress_bar` - an optional progress bar to increment with writing
///   progress.
///
/// # Returns
///
/// * The files that got written out.
pub fn write_spectra(
    dir: &Path,
    rx: Receiver<StationSpectra>,
    error: &AtomicCell<bool>,
    progress_bar: Option<ProgressBar>,
) -> Result<Vec<PathBuf>, WriteError> {
    std::fs::create_dir_all(dir).map_err(|source| WriteError::Create {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut written = vec![];
    for spectra in rx.iter() {
        // Should we continue?
        if error.load() {
            break;
        }
        trace!("Received spectra of {}", spectra.station);
        let path = spectra_path(dir, &spectra.station);
        if let Err(e) = write_table_file(&spectra.table, &path) {
            error.store(true);
            return Err(e);
        }
        written.push(path);
        if let Some(progress_bar) = progress_bar.as_ref() {
            progress_bar.inc(1);
        }
    }
    if let Some(progress_bar) = progress_bar.as_ref() {
        progress_bar.abandon_with_message("Finished writing spectra");
    }
    debug!("Finished writing");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;
    use crate::table::{label, label_from, AnalysisTable, SpectralTable, TimeTable};

    #[test]
    fn headers_per_level() {
        let t = TimeTable::from_columns(
            vec![0, 1800],
            vec![
                (label_from(&["GPS", "up"]).unwrap(), vec![1.5, -2.0]),
                (label("n"), vec![3.0, 4.0]),
            ],
        )
        .unwrap();
        let mut out = vec![];
        write_table(&t, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            ",GPS,n\nepoch,up,\n0,1.5,3\n1800,-2,4\n"
        );
    }

    #[test]
    fn row_labels_are_joined() {
        let t = AnalysisTable::from_columns(
            vec![label_from(&["LERI", "up", "M2"]).unwrap()],
            vec![(label("amplitude"), vec![0.25])],
        )
        .unwrap();
        let mut out = vec![];
        write_table(&t, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "label,amplitude\nLERI/up/M2,0.25\n");
    }

    #[test]
    fn spectra_from_a_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded(2);
        let error = AtomicCell::new(false);
        for station in ["LERI", "ABER"] {
            tx.send(StationSpectra {
                station: station.to_string(),
                table: SpectralTable::from_columns(vec![0.0, 1.0], vec![(label("up"), vec![2.0, 3.0])])
                    .unwrap(),
            })
            .unwrap();
        }
        drop(tx);

        let written = write_spectra(dir.path(), rx, &error, None).unwrap();
        assert_eq!(
            written,
            vec![dir.path().join("leri_spectra.csv"), dir.path().join("aber_spectra.csv")]
        );
        let text = std::fs::read_to_string(&written[0]).unwrap();
        assert!(text.starts_with("frequency,up\n0,2\n"));
        assert!(!error.load());
    }
}
