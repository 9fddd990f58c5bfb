use clap::{Parser, Subcommand};
use kamado::{CONFIG_FILE, Config};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Build the output tree once and exit.
    Build,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let config = Config::load(CONFIG_FILE)?;

    match args.command {
        Some(Command::Build) => {
            kamado::build(&config)?;
        }
        None => kamado::develop(config)?,
    }

    Ok(())
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}
