#[cfg(not(feature = "cli"))]
compile_error!("The `drizzlebinlog` binary requires the `cli` feature. Build with `--features cli`.");

use clap::{CommandFactory, Parser};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Level;

use rpl::cli::app::{Cli, ColorMode};
use rpl::cli::binlog::{execute, BinlogOptions};
use rpl::RplError;

fn main() {
    let cli = Cli::parse();

    match cli.color {
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
        ColorMode::Auto => {} // colored auto-detects tty
    }

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "drizzlebinlog", &mut std::io::stdout());
        return;
    }

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let ansi = match cli.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stderr().is_terminal(),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .with_ansi(ansi)
        .init();

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!("Cannot install interrupt handler: {}", e);
    }

    let writer_result: Result<Box<dyn Write>, RplError> = match &cli.result_file {
        Some(path) => File::create(path)
            .map(|f| Box::new(BufWriter::new(f)) as Box<dyn Write>)
            .map_err(|e| RplError::Io(format!("Cannot create {}: {}", path, e))),
        None => Ok(Box::new(BufWriter::new(std::io::stdout().lock())) as Box<dyn Write>),
    };

    let result = writer_result.and_then(|mut writer| {
        let opts = BinlogOptions::from_cli(cli, interrupt);
        execute(&opts, &mut writer)
    });

    if let Err(e) = result {
        eprintln!("{} {}", "ERROR:".red().bold(), e);
        process::exit(1);
    }
}
