use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use os_trace::{MemoryBackend, TraceConfig, Tracer};
use xcsim::report::format_report;
use xcsim::{merge_streams, LineFormatter, Scenario, TraceStream};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a multicore OS scenario and prints its kernel trace")]
struct Opts {
    /// Scenario file (JSON).
    scenario: PathBuf,

    /// Time the cores get to stop on their own, overriding the scenario.
    #[arg(long = "run-for-ms", value_name = "MS")]
    run_for_ms: Option<u64>,

    /// Give up on an unanswered cross-core call after this long.
    #[arg(long = "reply-timeout-ms", value_name = "MS")]
    reply_timeout_ms: Option<u64>,

    /// Only print these record groups (task, sched, res, err, alarm, isr, xc).
    #[arg(long = "only", value_delimiter = ',', value_name = "GROUP")]
    only: Vec<String>,

    #[arg(long = "no-timestamps")]
    no_timestamps: bool,

    #[arg(long = "no-color")]
    no_color: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    if opts.no_color {
        colored::control::set_override(false);
    }

    let mut formatter = LineFormatter::new();
    if !opts.only.is_empty() {
        let unknown = formatter.set_filters(&opts.only);
        if !unknown.is_empty() {
            bail!("unknown record group(s): {}", unknown.join(", "));
        }
    }

    let scenario = Scenario::load(&opts.scenario)
        .with_context(|| format!("loading {}", opts.scenario.display()))?;
    let run_for = opts
        .run_for_ms
        .map_or_else(|| scenario.run_for(), Duration::from_millis);

    let trace_config = TraceConfig {
        include_timestamp: !opts.no_timestamps,
        ..TraceConfig::default()
    };
    let mut backends = Vec::new();
    let mut builder = scenario.system(|core| {
        let backend = MemoryBackend::new();
        backends.push((core.to_string(), backend.clone()));
        Some(Tracer::new(trace_config.clone(), backend).into_handle().hook())
    });
    let interconnect = MemoryBackend::new();
    builder = builder.with_trace_hook(
        Tracer::new(trace_config.clone(), interconnect.clone())
            .into_handle()
            .hook(),
    );
    backends.push(("xc".to_string(), interconnect));
    if let Some(ms) = opts.reply_timeout_ms {
        builder = builder.reply_timeout(Duration::from_millis(ms));
    }

    let system = builder.start().context("starting the cores")?;
    if !system.wait_stopped(run_for) {
        log::info!(
            "{} core(s) still running after {run_for:?}, stopping",
            system.running_cores()
        );
    }
    let reports = system.stop_and_join()?;

    let streams: Vec<TraceStream> = backends
        .into_iter()
        .map(|(label, backend)| TraceStream {
            label,
            bytes: backend.bytes(),
        })
        .collect();
    let lines = merge_streams(&streams, trace_config.include_timestamp)
        .context("decoding the trace")?;
    for line in lines.iter().filter(|line| formatter.shows(line)) {
        println!("{}", formatter.format(line));
    }

    println!();
    for report in &reports {
        println!("{}", format_report(report));
    }
    Ok(())
}
