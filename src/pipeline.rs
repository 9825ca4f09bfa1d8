//! The value every operation hangs off: a validated configuration, the cache
//! it keys, and the runner that produces what isn't cached.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use thiserror::Error;

use crate::{
    cache::{CacheError, CacheStore},
    cadence::CadenceError,
    config::{ConfigError, ProjectConfig},
    identity::ProjectIdentity,
    products::{ProductError, Runner},
    spectral::SpectralError,
    table::TableError,
    Constellation,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("The runner returned {got} {mode} series for {expected} stations")]
    SeriesCount {
        mode: Constellation,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Cadence(#[from] CadenceError),

    #[error(transparent)]
    Spectral(#[from] SpectralError),
}

pub struct Pipeline<R: Runner> {
    pub(crate) config: ProjectConfig,
    pub(crate) cache: CacheStore,
    pub(crate) runner: R,
    progress_bars: bool,
}

impl<R: Runner> Pipeline<R> {
    pub fn new(config: ProjectConfig, runner: R) -> Result<Pipeline<R>, PipelineError> {
        let identity = config.validate()?;
        let cache = CacheStore::new(&config.tmp_dir, identity);
        Ok(Pipeline {
            config,
            cache,
            runner,
            progress_bars: false,
        })
    }

    /// Draw progress bars on stdout while working.
    pub fn with_progress_bars(mut self, progress_bars: bool) -> Self {
        self.progress_bars = progress_bars;
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn identity(&self) -> &ProjectIdentity {
        self.cache.identity()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub(crate) fn progress_bar(&self, len: usize, unit: &str, message: &'static str) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template(&format!(
                "{{msg:17}}: [{{wide_bar:.blue}}] {{pos:2}}/{{len:2}} {unit} ({{elapsed_precise}}<{{eta_precise}})"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = ProgressBar::with_draw_target(
            Some(len as u64),
            if self.progress_bars {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(style)
        .with_message(message);
        bar.tick();
        bar
    }
}
