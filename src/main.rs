use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use frontbench::cancel::{self, CancelToken};
use frontbench::config::{CliOverrides, FileConfig, HarnessConfig};
use frontbench::database;
use frontbench::dispatch::Dispatcher;
use frontbench::executor::Executor;
use frontbench::materialize::{self, OutputLayout};
use frontbench::process::ProcessRunner;
use frontbench::report::Reporter;

#[derive(Parser)]
#[command(
    name = "frontbench",
    version,
    about = "Time vast-front on every unit of a compilation database"
)]
struct Cli {
    /// Path to the vast-front executable
    vast_path: PathBuf,

    /// Path to compile_commands.json
    compile_commands_file: PathBuf,

    /// Directory receiving one artifact or error log per unit
    output_directory: PathBuf,

    /// Number of units compiled concurrently [default: number of CPUs]
    #[arg(long = "num_processes")]
    num_processes: Option<usize>,

    /// Extra option passed to vast-front (repeatable)
    #[arg(long = "vast_option", allow_hyphen_values = true)]
    vast_option: Vec<String>,

    /// Per-unit timeout, e.g. 30s, 500ms, 2m
    #[arg(long)]
    timeout: Option<String>,

    /// Log each frontend command before it runs
    #[arg(long = "print_commands")]
    print_commands: bool,

    /// Log the output of failed units
    #[arg(long = "print_errors")]
    print_errors: bool,

    /// Do not print the report header row
    #[arg(long = "no_header")]
    no_header: bool,

    /// Config file [default: ./frontbench.toml, then the user config dir]
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "frontbench=debug" } else { "frontbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none())
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    cancel::install_interrupt_handler();

    let file_config = FileConfig::discover(cli.config.as_deref())?;
    let config = HarnessConfig::resolve(
        CliOverrides {
            frontend_path: cli.vast_path,
            output_root: cli.output_directory,
            num_processes: cli.num_processes,
            vast_options: cli.vast_option,
            timeout: cli.timeout,
        },
        file_config,
    )?;

    let units = database::load_database(&cli.compile_commands_file)?;
    let total = units.len();
    info!(
        "loaded {} units from {}",
        total,
        cli.compile_commands_file.display()
    );

    materialize::prepare_output_root(&config.output_root)?;

    let config = Arc::new(config);
    let dispatcher = Dispatcher::new(config.worker_count.get());
    let executor = Executor::new(Arc::clone(&config), ProcessRunner::default(), CancelToken::new())
        .with_command_logging(cli.print_commands);
    let layout = OutputLayout::from_config(&config);

    let mut reporter = Reporter::new(io::stdout().lock());
    if !cli.no_header {
        reporter.write_header().context("failed to write report")?;
    }

    let mut done = 0usize;
    let summary = dispatcher.run(units.into_iter().map(Arc::new).collect(), &executor, |mut result| {
        done += 1;
        materialize::materialize(&mut result, &layout)?;
        reporter.report(&result).context("failed to write report")?;

        if result.status.is_success() {
            info!("finished processing {done}/{total} files");
        } else {
            info!("error processing {done}/{total} files");
            if cli.print_errors {
                warn!(
                    "{} failed ({}):\n{}",
                    result.unit.name,
                    result.exit,
                    String::from_utf8_lossy(&result.output).trim_end()
                );
            }
        }
        Ok(())
    })?;

    let line = format!("Total successful: {}/{}", summary.succeeded, summary.total);
    if summary.succeeded == summary.total {
        eprintln!("{}", line.if_supports_color(Stream::Stderr, |s| s.green()));
    } else {
        eprintln!("{}", line.if_supports_color(Stream::Stderr, |s| s.yellow()));
    }

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
