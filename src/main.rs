//! batch-validate CLI entry point
//!
//! Runs the validator over one worker's share of a dispatch table.
//!
//! Exit codes:
//! - `0` all units passed
//! - `1` at least one unit failed validation (or `check-table` found problems)
//! - `2` infrastructure faults but no validation failure
//! - `3` runtime error

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;

use batch_validate::cli::args::{Cli, Command, RunArgs, TableArgs};
use batch_validate::cli::output::{get_formatter, needs_header, write_output};
use batch_validate::logging::{init_logging, Verbosity};
use batch_validate::platform::signal;
use batch_validate::version::get_build_info;
use batch_validate::{build_runtime, process_table, DispatchTable, RoleSet};

const RUNTIME_ERROR: u8 = 3;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { RUNTIME_ERROR } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let verbosity = match &cli.command {
        Command::Run(run) => Verbosity::from_flags(run.quiet, run.verbose),
        _ => Verbosity::Normal,
    };
    init_logging(cli.log_format, verbosity);

    let result = match cli.command {
        Command::Version => {
            println!("{}", get_build_info());
            Ok(0)
        }
        Command::CheckTable(args) => check_table(&args),
        Command::Run(args) => run(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "batch-validate failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(RUNTIME_ERROR)
        }
    }
}

fn load_table(args: &TableArgs, roles: Vec<String>, first_unit: u64) -> anyhow::Result<DispatchTable> {
    let roles = RoleSet::new(roles)?;
    let table = DispatchTable::from_path(args.table.as_ref(), &roles, first_unit)
        .with_context(|| format!("cannot load dispatch table '{}'", args.table))?;
    Ok(table)
}

fn check_table(args: &TableArgs) -> anyhow::Result<u8> {
    let config = args.resolve_config()?;
    let table = load_table(args, config.roles, config.first_unit)?;
    let problems = table.schema_problems();

    for problem in &problems {
        println!("unit {} {}: {}", problem.unit, problem.role, problem.message);
    }
    println!(
        "{} units, {} roles, {} problems",
        table.len(),
        table.roles().len(),
        problems.len()
    );

    Ok(if problems.is_empty() { 0 } else { 1 })
}

fn run(args: &RunArgs) -> anyhow::Result<u8> {
    let config = args.resolve_config()?;
    let table = load_table(&args.table, config.roles.clone(), config.first_unit)?;

    tracing::info!(
        table = %args.table.table,
        units = table.len(),
        first_unit = config.first_unit,
        "dispatch table loaded"
    );

    let runtime = build_runtime()?;
    let report = runtime.block_on(async {
        let (trigger, shutdown) = signal::channel();
        let listener = signal::listen_for_os_signals(trigger);
        let report = process_table(config, &table, shutdown).await;
        listener.abort();
        report
    });

    let output = args.output.as_deref();
    let header = needs_header(output, args.append);
    let formatter = get_formatter(args.format, args.no_color, args.verbose, args.quiet, header);
    write_output(&formatter.format(&report), output, args.append)?;

    Ok(report.summary().exit_code())
}
