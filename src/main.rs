//! echo-bench: TCP echo benchmark comparing connection-handling strategies.
//!
//! Selects one or more backends, runs each for the configured number of
//! rounds against the external load generator, and prints one YAML report
//! with per-round throughput, CPU time, and latency percentiles. A failed
//! round is reported alongside the successful ones instead of aborting
//! the run.

use clap::Parser;
use echo_bench::config::{CliArgs, Config, TestSelection};
use echo_bench::report::Report;
use echo_bench::{backends, harness};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    // `--list` must work without the required positionals.
    if cli.list {
        let mut registry = backends::builtin();
        if let Some(ref lib) = cli.native_lib {
            backends::register_native(&mut registry, lib);
        }
        let names: Vec<_> = registry.keys().copied().collect();
        println!("{}", names.join(","));
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load(cli)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut registry = backends::builtin();
    if let Some(ref lib) = config.native_lib {
        backends::register_native(&mut registry, lib);
    }

    let selected: Vec<&'static str> = match &config.tests {
        TestSelection::All => registry.keys().copied().collect(),
        TestSelection::Named(names) => {
            let mut selected = Vec::with_capacity(names.len());
            for name in names {
                match registry.get_key_value(name.as_str()) {
                    Some((&key, _)) => selected.push(key),
                    None => {
                        eprintln!("Can't find test '{name}'.");
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
            selected.sort_unstable();
            selected
        }
    };

    info!(
        loader = %config.params.loader_addr,
        bind = %config.params.bind_addr,
        count = config.params.count,
        msize = config.params.msize,
        runtime = config.params.runtime_secs,
        "starting benchmark"
    );

    let mut report = Report::new(&config);
    for name in selected {
        let backend = registry[name].as_ref();
        for round in 0..config.rounds {
            info!(test = name, round, "starting round");
            match harness::run_round(backend, &config.params) {
                Ok(data) => report.push_completed(name, &data),
                Err(e) => {
                    error!(test = name, round, error = %e, "round failed");
                    report.push_failed(name, e.to_string());
                }
            }
        }
    }

    println!("{}", report.to_yaml()?);
    Ok(ExitCode::SUCCESS)
}
