use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use actuator_bridge::config::file::config_file_path;
use actuator_bridge::devices::DeviceStore;
use actuator_bridge::{Config, Daemon};

/// actuatord - bridge between a home-automation controller and networked actuators
#[derive(Parser)]
#[command(name = "actuatord", version, about)]
struct Cli {
    /// Port to listen on (overrides ACTUATOR_PORT and the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between reconnect attempts
    #[arg(long)]
    retry_secs: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List stored device definitions
    Devices,
    /// Print the config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,actuator_bridge=info",
        1 => "info,actuator_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::ConfigPath) = cli.command {
        match config_file_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("no config directory on this platform"),
        }
        return Ok(());
    }

    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    if let Some(secs) = cli.retry_secs {
        anyhow::ensure!(secs > 0, "--retry-secs must be at least 1");
        config.retry_interval = Duration::from_secs(secs);
    }

    if let Some(Command::Devices) = cli.command {
        return list_devices(&config);
    }

    tracing::info!(port = config.api_server.port, "starting actuator bridge");
    tracing::debug!(?config, "loaded configuration");

    Daemon::new(config).run().await?;
    Ok(())
}

fn list_devices(config: &Config) -> anyhow::Result<()> {
    let store = DeviceStore::in_dir(&config.data_dir);
    let definitions = store.load()?;
    if definitions.is_empty() {
        println!("no devices stored in {}", store.path().display());
        return Ok(());
    }
    for definition in definitions {
        print!(
            "{} {} ({})",
            definition.name, definition.kind, definition.address
        );
        if let Some(travel) = definition.blind.travel {
            print!(" close {}ms open {}ms", travel.close_ms, travel.open_ms);
        }
        if let Some(percentage) = definition.blind.percentage {
            print!(" at {percentage:.0}%");
        }
        println!();
    }
    Ok(())
}
