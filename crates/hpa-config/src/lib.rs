//! CLI surface: `clap` parses the three deployment subcommands into a
//! [`PipelineConfig`] the binary hands to `hpa-engine`.

pub mod byte_units;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// `hpa`: unifies per-thread measurement streams into a single sparse
/// calling-context database.
#[derive(Debug, Parser)]
#[command(name = "hpa", version, about)]
pub struct Cli {
    /// Deployment subcommand.
    #[command(subcommand)]
    pub command: Command,

    /// Output directory for the sparse database and `experiment.xml`.
    /// Defaults to the `OUT_DIR` environment variable, then
    /// `hpctoolkit-database`.
    #[arg(long, short = 'o', global = true, env = "OUT_DIR", default_value = "hpctoolkit-database")]
    pub output: PathBuf,

    /// Run title recorded in the database's attributes.
    #[arg(long, global = true)]
    pub title: Option<String>,

    /// Which derived statistics every metric carries in the output
    /// database: raw per-thread values only, the `sum` statistic alone, or
    /// the full statistic set.
    #[arg(long = "metric", global = true, default_value = "stats")]
    pub metric_mode: MetricMode,

    /// Caps the byte size of a single trace-stream write before it is
    /// split into multiple directory segments. Accepts a bare integer
    /// (bytes) or a unit-suffixed string (`"64 MiB"`).
    #[arg(long, global = true, value_parser = parse_byte_size)]
    pub segment_size: Option<u64>,

    /// Maximum time, in seconds, a sink may block on a wavefront before
    /// the run is aborted as stalled. Unset waits indefinitely.
    #[arg(long, global = true)]
    pub wavefront_timeout: Option<u64>,

    /// Raises the log level by one step.
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Lowers the log level by one step.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_byte_size(raw: &str) -> Result<u64, String> {
    raw.parse::<byte_unit::Byte>().map(|b| b.as_u64()).map_err(|e| e.to_string())
}

/// One of the three deployment modes: merge a prior database, aggregate a
/// single rank, or aggregate a raw measurement tree across ranks.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Folds a pre-existing `profile.db`-shaped database into this run.
    Merge {
        /// Root directory of the database to merge.
        input: PathBuf,
    },
    /// Aggregates a single raw measurement directory, single-rank.
    Serial {
        /// Root directory of the raw per-process/per-thread measurement
        /// files.
        input: PathBuf,
    },
    /// Aggregates a raw measurement directory distributed across ranks via
    /// the `mpi`-backed transport.
    Parallel {
        /// Root directory of the raw per-process/per-thread measurement
        /// files.
        input: PathBuf,
    },
}

/// Output-side settings derived from the CLI, carried into the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory the sparse database and `experiment.xml` are written
    /// into.
    pub dir: PathBuf,
    /// Caps the byte size of a single trace-stream write before it is
    /// split, if set. Accepts a bare integer or a unit-suffixed string
    /// (`"64 MiB"`) when loaded from a config file.
    #[serde(default, deserialize_with = "byte_units::deserialize")]
    pub segment_size: Option<u64>,
}

/// Which derived statistics the output database carries per metric, from
/// least to most detailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricMode {
    /// Raw per-thread values only; no cross-thread statistics.
    Thread,
    /// Only the `sum` statistic.
    Sum,
    /// The full statistic set (`sum`, `min`, `max`, `mean`, `stddev`, `cv`)
    /// wherever the metric's partials support it.
    #[default]
    Stats,
}

/// Fully-resolved run configuration, built from [`Cli`] plus any layered
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Output settings.
    pub output: OutputConfig,
    /// Run title recorded in the database's attributes.
    pub title: Option<String>,
    /// Which derived statistics every metric carries.
    pub metrics: MetricMode,
    /// Source input directory.
    pub input: PathBuf,
    /// Whether this run uses the distributed (`mpi`-feature) transport.
    pub distributed: bool,
    /// Whether this run re-emits an existing `profile.db`-shaped database
    /// instead of reading raw measurement files.
    pub merge: bool,
    /// Maximum time a single wavefront barrier may wait before the run is
    /// aborted as stalled, if set.
    #[serde(default, with = "humantime_serde::option")]
    pub wavefront_timeout: Option<std::time::Duration>,
}

impl From<Cli> for PipelineConfig {
    fn from(cli: Cli) -> Self {
        let metrics = cli.metric_mode;
        let (input, distributed, merge) = match cli.command {
            Command::Merge { input } => (input, false, true),
            Command::Serial { input } => (input, false, false),
            Command::Parallel { input } => (input, true, false),
        };
        Self {
            output: OutputConfig {
                dir: cli.output,
                segment_size: cli.segment_size,
            },
            title: cli.title,
            metrics,
            input,
            distributed,
            merge,
            wavefront_timeout: cli.wavefront_timeout.map(std::time::Duration::from_secs),
        }
    }
}
