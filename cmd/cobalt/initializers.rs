//! Startup wiring: configuration merge, log subscriber, server and client
//! bring-up.

use std::net::Ipv4Addr;

use cobalt_config::{Config, ConfigError, Transport};
use cobalt_net::handshake::Keyring;
use cobalt_net::client;
use cobalt_net::server::{ServerOptions, run_tcp, run_udp};
use cobalt_tun::{DeviceConfig, Layer};
use tokio::net::{TcpListener, UdpSocket};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::Options;

/// Defaults, then the configuration file, then the command-line flags.
pub fn load_config(opts: &Options) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(path) = &opts.config_file {
        config.apply_file(path)?;
    }
    if let Some(interface) = &opts.interface {
        config.interface = interface.clone();
    }
    if let Some(port) = opts.port {
        config.port = port;
    }
    if opts.daemonize {
        config.daemonize = true;
    }
    if opts.verbose {
        config.debug = true;
    }
    Ok(config)
}

/// Stdout subscriber, with a non-blocking file writer when a log file is
/// configured. The returned guard must stay alive for the process lifetime.
pub fn init_tracing(config: &Config) -> eyre::Result<Option<WorkerGuard>> {
    let level = if config.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            Ok(None)
        }
    }
}

pub fn keyring_from(config: &Config) -> Result<Keyring, ConfigError> {
    let material = config.require_peer_material()?;
    Ok(Keyring {
        identity: material.identity,
        secret: material.secret,
        ca_public: material.ca_public,
        ca_certificate: material.ca_certificate,
    })
}

/// Bring the server up: interface first, then the transport endpoint, then
/// the event loop until shutdown.
pub async fn run_server(config: &Config, keyring: Keyring, layer: Layer) -> eyre::Result<()> {
    let mut device_config = DeviceConfig::new(&config.interface, layer);
    device_config.address = Some(config.router);
    device_config.netmask = Some(config.netmask);
    device_config.mtu = config.mtu;
    let device = cobalt_tun::create(&device_config)?;

    let opts = ServerOptions {
        keyring,
        router: config.router,
        netmask: config.netmask,
        max_clients: config.max_clients,
        heartbeat_secs: config.heartbeat_interval(),
        layer,
        packet_info: device_config.packet_info,
    };

    match config.transport {
        Transport::Udp => {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
            run_udp(device, socket, opts).await?;
        }
        Transport::Tcp => {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
            run_tcp(device, listener, opts).await?;
        }
    }
    Ok(())
}

/// Bring the client up and run it against the resolved server address.
pub async fn run_client(
    host: &str,
    config: &Config,
    keyring: Keyring,
    layer: Layer,
) -> eyre::Result<()> {
    let remote = client::resolve(host, config.port).await?;
    info!(%remote, "Resolved server address");

    let opts = client::ClientOptions {
        keyring,
        interface: config.interface.clone(),
        layer,
        packet_info: false,
        mtu: config.mtu,
    };

    match config.transport {
        Transport::Udp => client::run_udp(remote, opts).await?,
        Transport::Tcp => client::run_tcp(remote, opts).await?,
    }
    Ok(())
}
