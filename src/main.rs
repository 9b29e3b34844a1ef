use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use console::style;

use themesmith::{Config, DEFAULT_CONFIG_FILE, Environment, Runner, tasks};

/// Builds, serves and packages a theme.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Task to run, `help` lists them all.
    #[arg(default_value = "default")]
    task: String,

    /// Port of the proxied backend.
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file, defaults to `gulpconfig.json` in the project root.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Theme project directory.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    themesmith::logging::init()?;

    let root = args.root.canonicalize_utf8()?;
    let config_path = args
        .config
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE));
    let config = Config::load(&config_path)?;

    let env = Environment::new(root, config, args.port);
    let graph = tasks::theme_graph()?;
    let runner = Runner::new(&graph, &env);

    let report = runner.run(&args.task)?;
    tracing::debug!("ran {}", report.names().join(", "));

    runner.wait()?;

    Ok(())
}
