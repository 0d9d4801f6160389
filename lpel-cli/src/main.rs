// Copyright (c) 2026. Licensed under the Apache License, Version 2.0.

mod cli;
mod demo;

use clap::Parser;
use cli::{CliArgs, Scenario};
use miette::Result;

fn main() -> Result<()> {
    init_tracing();

    let args = CliArgs::parse();
    tracing::debug!(?args, "parsed cli arguments");

    let result = match &args.scenario {
        Scenario::PingPong => demo::ping_pong(&args),
        Scenario::CrossWorker => demo::cross_worker(&args),
        Scenario::AnyIn => demo::any_in(&args),
        Scenario::GracefulStop { trace_dir } => demo::graceful_stop(&args, trace_dir),
    };

    if let Err(report) = &result {
        tracing::error!(error = ?report, "scenario failed");
    }
    result
}

fn init_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::io::stdout().is_terminal() {
        builder.init();
    } else {
        builder.compact().init();
    }
}
