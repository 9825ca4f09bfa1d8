use std::{
    path::{Path, PathBuf},
    thread::scope,
};

use clap::{AppSettings, Parser, Subcommand};
use crossbeam_channel::bounded;
use crossbeam_utils::atomic::AtomicCell;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, error, info};
use thiserror::Error;

use mgnss::{
    cadence::{parse_date, CadenceError, DateRange},
    config::{ConfigError, ProjectConfig},
    products::{
        archive::ArchiveRunner, hardisp::HardispSynthesizer, AuxParameter, ProductError, Synthesizer,
        ValueType,
    },
    spectral::DEFAULT_WINDOW,
    table::Table,
    write::{write_spectra, write_table_file, CsvIndex, WriteError},
    Pipeline, PipelineError,
};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Cadence(#[from] CadenceError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("The {0} thread panicked")]
    Panicked(&'static str),
}

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The project configuration (TOML).
    config: PathBuf,

    #[clap(subcommand)]
    command: Command,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences), global = true)]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long, global = true)]
    no_progress_bars: bool,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// First day of the analysis (YYYY-MM-DD). Defaults to the start of the
    /// earliest configured year.
    #[clap(long)]
    begin: Option<String>,

    /// Last day of the analysis (YYYY-MM-DD). Defaults to the end of the
    /// latest configured year.
    #[clap(long)]
    end: Option<String>,
}

impl RangeArgs {
    fn resolve(&self, years: &[i32]) -> Result<DateRange, CadenceError> {
        let begin = self.begin.as_deref().map(parse_date).transpose()?;
        let end = self.end.as_deref().map(parse_date).transpose()?;
        DateRange::resolve(begin, end, years)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the project identity.
    Identity,

    /// Report which stations have a cached gather.
    Status,

    /// Gather and cache the aligned series of every station.
    Gather {
        /// Discard cached gathers and recompute.
        #[clap(long)]
        force: bool,
    },

    /// Gather and cache the troposphere and clock estimates of every station.
    Aux {
        /// Only use the GPS solutions.
        #[clap(long)]
        gps_only: bool,

        #[clap(long)]
        force: bool,
    },

    /// Analyse every constellation against the modelled tide loading.
    Analyze {
        #[clap(flatten)]
        range: RangeArgs,

        #[clap(long)]
        gps_only: bool,

        /// Don't add the modelled tide loading back into the estimates.
        #[clap(long)]
        no_otl: bool,

        #[clap(long)]
        force: bool,

        /// Write the analysis to this CSV file.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyse a troposphere or clock parameter of every constellation.
    AnalyzeAux {
        /// One of GradEast, GradNorth, WetZ or Clk.
        #[clap(long)]
        parameter: String,

        /// value or sigma.
        #[clap(long, default_value = "value")]
        value_type: String,

        #[clap(flatten)]
        range: RangeArgs,

        #[clap(long)]
        gps_only: bool,

        #[clap(long)]
        force: bool,

        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the spectra of every station's gather as CSV files.
    Spectra {
        /// Don't add the modelled tide loading to the series.
        #[clap(long)]
        no_otl: bool,

        /// Length of the spectral window [samples].
        #[clap(long, default_value_t = DEFAULT_WINDOW)]
        window: usize,

        /// The directory to write to.
        #[clap(short, long)]
        output: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbosity);

    if let Err(e) = try_main(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn try_main(args: Args) -> Result<(), CliError> {
    let config = ProjectConfig::from_file(&args.config)?;
    let products_dir = config
        .products_dir
        .clone()
        .unwrap_or_else(|| config.tmp_dir.join("products"));
    debug!("Runner products: {}", products_dir.display());
    let pipeline =
        Pipeline::new(config, ArchiveRunner::new(products_dir))?.with_progress_bars(!args.no_progress_bars);
    info!("Project: {}", pipeline.identity());

    match args.command {
        Command::Identity => {
            println!("{}", pipeline.identity());
        }

        Command::Status => {
            let stations = pipeline.config().stations.as_slice();
            let missing = pipeline.missing_gathers(stations);
            for station in stations {
                let state = if missing.contains(station) { "missing" } else { "cached" };
                println!("{station:8} {state}");
            }
            info!("{} of {} gathers cached", stations.len() - missing.len(), stations.len());
        }

        Command::Gather { force } => {
            for gather in pipeline.gather_mgnss(force, None)? {
                info!("{}: {} epochs", gather.station, gather.table.num_rows());
            }
        }

        Command::Aux { gps_only, force } => {
            for gather in pipeline.gather_aux(gps_only, force)? {
                info!(
                    "{}: {} epochs, {} parameters",
                    gather.station,
                    gather.table.num_rows(),
                    gather.table.num_cols()
                );
            }
        }

        Command::Analyze {
            range,
            gps_only,
            no_otl,
            force,
            output,
        } => {
            let range = range.resolve(&pipeline.config().years)?;
            let table = pipeline.analyze(&range, gps_only, !no_otl, force)?;
            report(&table, output.as_deref())?;
        }

        Command::AnalyzeAux {
            parameter,
            value_type,
            range,
            gps_only,
            force,
            output,
        } => {
            let parameter = parameter.parse::<AuxParameter>()?;
            let value_type = value_type.parse::<ValueType>()?;
            let range = range.resolve(&pipeline.config().years)?;
            let table = pipeline.analyze_aux(parameter, value_type, gps_only, force, &range)?;
            report(&table, output.as_deref())?;
        }

        Command::Spectra {
            no_otl,
            window,
            output,
        } => spectra(&pipeline, no_otl, window, &output, !args.no_progress_bars)?,
    }
    Ok(())
}

fn report<I: CsvIndex + Clone>(table: &Table<I>, output: Option<&Path>) -> Result<(), CliError> {
    info!("{} rows, {} columns", table.num_rows(), table.num_cols());
    if let Some(output) = output {
        write_table_file(table, output)?;
        info!("Wrote {}", output.display());
    }
    Ok(())
}

/// Compute spectra on one thread and write them on another.
fn spectra(
    pipeline: &Pipeline<ArchiveRunner>,
    no_otl: bool,
    window: usize,
    output: &Path,
    progress_bars: bool,
) -> Result<(), CliError> {
    let config = pipeline.config();
    let synthesizer = if no_otl {
        None
    } else {
        let hardisp = config
            .hardisp_path
            .as_ref()
            .ok_or(ProductError::NotConfigured("hardisp_path"))?;
        let blq = config
            .blq_file
            .as_ref()
            .ok_or(ProductError::NotConfigured("blq_file"))?;
        Some(HardispSynthesizer::new(hardisp, blq))
    };
    let gathers = pipeline.gather_mgnss(false, None)?;

    let (tx, rx) = bounded(5);
    let error = AtomicCell::new(false);
    let multi_progress = MultiProgress::with_draw_target(if progress_bars {
        ProgressDrawTarget::stdout()
    } else {
        ProgressDrawTarget::hidden()
    });
    let bar = |message: &'static str| {
        multi_progress.add(
            ProgressBar::new(gathers.len() as _)
                .with_style(
                    ProgressStyle::default_bar()
                        .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} stations ({elapsed_precise}<{eta_precise})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                )
                .with_position(0)
                .with_message(message),
        )
    };
    let compute_progress = bar("Estimating");
    let write_progress = bar("Writing");
    compute_progress.tick();
    write_progress.tick();

    let (computed, written) = scope(|s| {
        let compute = s.spawn(|| {
            let tx = tx;
            for gather in &gathers {
                // Should we continue?
                if error.load() {
                    break;
                }
                let synthesizer = synthesizer.as_ref().map(|synth| synth as &dyn Synthesizer);
                match pipeline.station_spectra(gather, synthesizer, window) {
                    Ok(spectra) => {
                        if tx.send(spectra).is_err() {
                            break;
                        }
                        compute_progress.inc(1);
                    }
                    Err(e) => {
                        error.store(true);
                        return Err(e);
                    }
                }
            }
            compute_progress.abandon_with_message("Finished estimating");
            Ok(())
        });
        let write = s.spawn(|| write_spectra(output, rx, &error, Some(write_progress)));
        (compute.join(), write.join())
    });

    computed.map_err(|_| CliError::Panicked("spectra"))??;
    let written = written.map_err(|_| CliError::Panicked("writer"))??;
    info!("Wrote {} spectra to {}", written.len(), output.display());
    Ok(())
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
