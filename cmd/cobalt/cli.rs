use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cobalt",
    version,
    about = "Point-to-multipoint encrypted tunnel"
)]
pub struct Cli {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(
        short = 'f',
        value_name = "FILE",
        help = "Read options from config file"
    )]
    pub config_file: Option<PathBuf>,
    #[arg(
        short = 'i',
        value_name = "INTERFACE",
        help = "Use specific interface (default: tun0)"
    )]
    pub interface: Option<String>,
    #[arg(
        short = 'c',
        value_name = "ADDRESS",
        help = "Connect to remote server (enables client mode)"
    )]
    pub connect: Option<String>,
    #[arg(
        short = 'p',
        value_name = "PORT",
        help = "Bind to port or connect to port (default: 5059)"
    )]
    pub port: Option<u16>,
    #[arg(
        short = 'a',
        action = ArgAction::SetTrue,
        help = "Use TAP interface (default: TUN)"
    )]
    pub tap: bool,
    #[arg(
        short = 'd',
        action = ArgAction::SetTrue,
        help = "Run daemon in background"
    )]
    pub daemonize: bool,
    #[arg(short = 'v', action = ArgAction::SetTrue, help = "Verbose output")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a CA certificate.
    Genca,
    /// Create and sign a certificate.
    Gencert,
}
