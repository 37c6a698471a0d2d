use std::process::ExitCode;

use clap::Parser;
use cobalt::cli::{Cli, Command};
use cobalt::{commands, initializers};
use cobalt_tun::Layer;
use tracing::{info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cobalt: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let config = initializers::load_config(&cli.opts)?;
    let _log_guard = initializers::init_tracing(&config)?;
    if let Some(path) = &cli.opts.config_file {
        info!(path = %path.display(), "Loaded configuration");
    }

    if let Some(command) = cli.command {
        return match command {
            Command::Genca => {
                commands::genca();
                Ok(())
            }
            Command::Gencert => commands::gencert(&config),
        };
    }

    let keyring = initializers::keyring_from(&config)?;
    let layer = if cli.opts.tap { Layer::L2 } else { Layer::L3 };

    if config.daemonize {
        warn!("Daemonization is delegated to the service manager, staying in the foreground");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        match &cli.opts.connect {
            Some(host) => initializers::run_client(host, &config, keyring, layer).await,
            None => initializers::run_server(&config, keyring, layer).await,
        }
    })
}
