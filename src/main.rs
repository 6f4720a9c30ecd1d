//! CLI entry point: parses the deployment subcommand, drives the pipeline
//! for one rank, and writes the sparse database.

use std::path::Path;
#[cfg(feature = "mpi")]
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hpa_config::{Cli, MetricMode, PipelineConfig};
use hpa_core::metric::StatisticRequestMode;
use hpa_core::pipeline::Attributes;
use hpa_core::{ErrorKind, Pipeline};
use hpa_db::DatabaseSink;
use hpa_engine::node::{Sink, Source};
use hpa_engine::PipelineDriver;
use hpa_sources::{MeasurementSource, SparseSource};

fn main() -> ExitCode {
    let cli = Cli::parse();
    hpa_telemetry::init(cli.verbose, cli.quiet);
    let config: PipelineConfig = cli.into();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(kind) => ExitCode::from(kind.exit_code() as u8),
    }
}

fn run(config: &PipelineConfig) -> Result<(), ErrorKind> {
    if config.distributed {
        run_distributed(config)
    } else {
        run_single_rank(config, &config.input, &config.output.dir)
    }
}

/// Drives one local pipeline: registers the configured source, runs it to
/// completion, requests the configured statistic set on every metric, and
/// writes the sparse database into `output_dir`.
fn run_single_rank(config: &PipelineConfig, input: &Path, output_dir: &Path) -> Result<(), ErrorKind> {
    let mut driver = PipelineDriver::new().with_wavefront_timeout(config.wavefront_timeout);
    let core = Arc::clone(driver.core());
    apply_title(&core, config);

    let source: Box<dyn Source> = if config.merge {
        Box::new(SparseSource::new(input))
    } else {
        Box::new(MeasurementSource::new(input))
    };
    driver.add_source("primary", source).map_err(|error| {
        tracing::error!(%error, "failed to register source");
        ErrorKind::Invariant
    })?;

    driver.run().map_err(|error| {
        tracing::error!(%error, "pipeline run failed");
        error.kind()
    })?;

    apply_statistic_request(&core, config.metrics);

    let mut sink = DatabaseSink::new(output_dir).with_segment_size(config.output.segment_size);
    sink.write(&core).map_err(|error| {
        tracing::error!(%error, "database write failed");
        error.kind()
    })
}

/// The `parallel` deployment mode: each rank aggregates its own shard of
/// the raw measurement tree into a scratch directory, then rank 0 gathers
/// every shard's sparse database and re-merges them into the final output.
///
/// This trades true per-context online reduction across ranks (each rank
/// would need to agree on scope identity mid-flight) for a two-phase
/// local-then-merge design built entirely from the pieces the `serial` and
/// `merge` modes already provide. The trade-off is recorded as a
/// deliberate scope decision, not an oversight.
fn run_distributed(config: &PipelineConfig) -> Result<(), ErrorKind> {
    #[cfg(not(feature = "mpi"))]
    {
        let _ = config;
        tracing::error!("parallel mode requires the mpi feature; rebuild with --features mpi");
        Err(ErrorKind::Invariant)
    }

    #[cfg(feature = "mpi")]
    {
        use hpa_reduce::{AnyTransport, Transport};

        let transport = AnyTransport::mpi().map_err(|error| {
            tracing::error!(%error, "mpi initialization failed");
            ErrorKind::TransportFatal
        })?;
        let rank = transport.rank();
        let size = transport.size();
        tracing::info!(rank, size, "starting distributed aggregation");

        let rank_input = config.input.join(format!("rank-{rank}"));
        let scratch = scratch_dir(&config.output.dir, rank);
        run_single_rank(config, &rank_input, &scratch)?;

        transport.barrier().map_err(|error| {
            tracing::error!(%error, "post-run barrier failed");
            ErrorKind::TransportFatal
        })?;

        if rank != 0 {
            return Ok(());
        }

        let mut driver = PipelineDriver::new().with_wavefront_timeout(config.wavefront_timeout);
        let core = Arc::clone(driver.core());
        apply_title(&core, config);

        for shard_rank in 0..size {
            let shard = scratch_dir(&config.output.dir, shard_rank);
            driver
                .add_source(format!("shard-{shard_rank}"), Box::new(SparseSource::new(shard)))
                .map_err(|error| {
                    tracing::error!(%error, "failed to register shard source");
                    ErrorKind::Invariant
                })?;
        }
        driver.run().map_err(|error| {
            tracing::error!(%error, "shard merge failed");
            error.kind()
        })?;

        apply_statistic_request(&core, config.metrics);

        let mut sink = DatabaseSink::new(&config.output.dir).with_segment_size(config.output.segment_size);
        sink.write(&core).map_err(|error| {
            tracing::error!(%error, "database write failed");
            error.kind()
        })
    }
}

#[cfg(feature = "mpi")]
fn scratch_dir(output_dir: &Path, rank: usize) -> PathBuf {
    output_dir.join(format!(".rank-{rank}"))
}

fn apply_title(pipeline: &Pipeline, config: &PipelineConfig) {
    if let Some(title) = &config.title {
        let mut attrs = Attributes::default();
        attrs.fields.insert("title".to_string(), title.clone());
        pipeline.attributes_add(attrs);
    }
}

fn apply_statistic_request(pipeline: &Pipeline, mode: MetricMode) {
    let mode = match mode {
        MetricMode::Thread => StatisticRequestMode::Thread,
        MetricMode::Sum => StatisticRequestMode::Sum,
        MetricMode::Stats => StatisticRequestMode::Stats,
    };
    let mut registry = pipeline.metrics().write();
    for metric in registry.iter_mut() {
        metric.request_statistics(mode);
    }
}
