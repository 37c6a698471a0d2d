//! Runtime configuration: option defaults, the `key = value` configuration
//! file, and loading of the hex-encoded key material.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use cobalt_crypto::{
    CERTIFICATE_SIZE, CaCertificate, IDENTITY_SIZE, IdentityEnvelope, PUBLIC_KEY_SIZE,
    SECRET_KEY_SIZE, SecretKey, SigningKey, VerifyingKey,
};
use tracing::warn;
use zeroize::Zeroizing;

pub const DEFAULT_PORT: u16 = 5059;
pub const DEFAULT_INTERFACE: &str = "tun0";
pub const DEFAULT_ROUTER: Ipv4Addr = Ipv4Addr::new(10, 7, 0, 1);
pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const DEFAULT_HEARTBEAT_SECS: u64 = 1800;
pub const DEFAULT_MAX_CLIENTS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid value for `{0}`")]
    InvalidValue(&'static str),
    #[error("invalid key material for `{0}`")]
    InvalidMaterial(&'static str),
    #[error("no `{0}` in configuration, see `{1}`")]
    MissingMaterial(&'static str, &'static str),
}

/// Transport carrying the tunnel frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

/// Long-term key material loaded from the configuration file.
///
/// A pure client or server needs everything except the CA signing key, which
/// is only required on the host that issues certificates.
#[derive(Default)]
pub struct KeyMaterial {
    pub ca_certificate: Option<CaCertificate>,
    pub ca_public: Option<VerifyingKey>,
    pub ca_signing: Option<SigningKey>,
    pub identity: Option<IdentityEnvelope>,
    pub secret: Option<SecretKey>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("ca_certificate", &self.ca_certificate.is_some())
            .field("ca_public", &self.ca_public.is_some())
            .field("ca_signing", &self.ca_signing.is_some())
            .field("identity", &self.identity.is_some())
            .field("secret", &self.secret.is_some())
            .finish()
    }
}

/// The material a running peer (server or client) must hold.
pub struct PeerMaterial {
    pub ca_certificate: CaCertificate,
    pub ca_public: VerifyingKey,
    pub identity: IdentityEnvelope,
    pub secret: SecretKey,
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub interface: String,
    pub router: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: Option<u16>,
    /// Log file path; `log = false` clears it.
    pub log_file: Option<PathBuf>,
    pub heartbeat_secs: u64,
    pub max_clients: usize,
    pub transport: Transport,
    pub debug: bool,
    pub daemonize: bool,
    pub material: KeyMaterial,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            interface: DEFAULT_INTERFACE.to_string(),
            router: DEFAULT_ROUTER,
            netmask: DEFAULT_NETMASK,
            mtu: None,
            log_file: None,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            max_clients: DEFAULT_MAX_CLIENTS,
            transport: Transport::default(),
            debug: false,
            daemonize: false,
            material: KeyMaterial::default(),
        }
    }
}

impl Config {
    /// Apply a configuration file on top of the current options.
    ///
    /// The format is a flat `key = value` file; `#` and `;` start comments
    /// and section headers are ignored. Unknown keys are reported and
    /// skipped, keeping the defaults for whatever they were meant to set.
    /// Malformed values for recognized keys are fatal.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with(';')
                || line.starts_with('[')
            {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = number + 1, "Skipping malformed configuration line");
                continue;
            };
            self.apply_option(key.trim(), value.trim())?;
        }
        Ok(())
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "port" => {
                self.port = value.parse().map_err(|_| ConfigError::InvalidValue("port"))?;
            }
            "interface" => self.interface = value.to_string(),
            "router" => {
                self.router = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("router"))?;
            }
            "netmask" => {
                self.netmask = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("netmask"))?;
            }
            "mtu" => {
                self.mtu = Some(value.parse().map_err(|_| ConfigError::InvalidValue("mtu"))?);
            }
            "log" => {
                self.log_file = match value {
                    "false" => None,
                    path => Some(PathBuf::from(path)),
                };
            }
            "heartbeat" => {
                self.heartbeat_secs = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("heartbeat"))?;
            }
            "max_clients" => {
                self.max_clients = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("max_clients"))?;
            }
            "protocol" => match value {
                "tcp" => self.transport = Transport::Tcp,
                "udp" => self.transport = Transport::Udp,
                other => warn!(protocol = other, "Unknown protocol, keeping default"),
            },
            "debug" => self.debug = parse_bool("debug", value)?,
            "daemonize" => self.daemonize = parse_bool("daemonize", value)?,
            "cacert" => {
                let bytes = decode_material("cacert", value, CERTIFICATE_SIZE)?;
                self.material.ca_certificate = Some(
                    CaCertificate::from_bytes(&bytes)
                        .map_err(|_| ConfigError::InvalidMaterial("cacert"))?,
                );
            }
            "capublickey" => {
                let bytes = decode_material("capublickey", value, PUBLIC_KEY_SIZE)?;
                let raw: [u8; PUBLIC_KEY_SIZE] = bytes[..].try_into().expect("length checked");
                self.material.ca_public = Some(
                    VerifyingKey::from_bytes(&raw)
                        .map_err(|_| ConfigError::InvalidMaterial("capublickey"))?,
                );
            }
            "caprivatekey" => {
                let bytes = decode_material("caprivatekey", value, SECRET_KEY_SIZE)?;
                let raw: [u8; SECRET_KEY_SIZE] = bytes[..].try_into().expect("length checked");
                self.material.ca_signing = Some(SigningKey::from_bytes(&raw));
            }
            "publickey" => {
                let bytes = decode_material("publickey", value, IDENTITY_SIZE)?;
                self.material.identity = Some(
                    IdentityEnvelope::from_bytes(&bytes)
                        .map_err(|_| ConfigError::InvalidMaterial("publickey"))?,
                );
            }
            "privatekey" => {
                let bytes = decode_material("privatekey", value, SECRET_KEY_SIZE)?;
                let raw: [u8; SECRET_KEY_SIZE] = bytes[..].try_into().expect("length checked");
                self.material.secret = Some(SecretKey::from(raw));
            }
            other => warn!(key = other, "Unknown configuration key"),
        }
        Ok(())
    }

    /// The heartbeat tick interval in seconds, halved for the stateless
    /// transport. Zero disables the tick.
    pub fn heartbeat_interval(&self) -> u64 {
        match self.transport {
            Transport::Udp => self.heartbeat_secs / 2,
            Transport::Tcp => self.heartbeat_secs,
        }
    }

    /// Material every running peer needs; pointing at the missing `genca` /
    /// `gencert` step on failure.
    pub fn require_peer_material(&self) -> Result<PeerMaterial, ConfigError> {
        Ok(PeerMaterial {
            ca_certificate: self
                .material
                .ca_certificate
                .clone()
                .ok_or(ConfigError::MissingMaterial("cacert", "genca"))?,
            ca_public: self
                .material
                .ca_public
                .clone()
                .ok_or(ConfigError::MissingMaterial("capublickey", "genca"))?,
            identity: self
                .material
                .identity
                .clone()
                .ok_or(ConfigError::MissingMaterial("publickey", "gencert"))?,
            secret: self
                .material
                .secret
                .clone()
                .ok_or(ConfigError::MissingMaterial("privatekey", "gencert"))?,
        })
    }

    /// The CA signing key, required only for certificate issuance.
    pub fn require_ca_signing(&self) -> Result<SigningKey, ConfigError> {
        self.material
            .ca_signing
            .clone()
            .ok_or(ConfigError::MissingMaterial("caprivatekey", "genca"))
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key)),
    }
}

fn decode_material(
    key: &'static str,
    value: &str,
    expected: usize,
) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    let bytes = hex::decode(value).map_err(|_| ConfigError::InvalidMaterial(key))?;
    if bytes.len() != expected {
        return Err(ConfigError::InvalidMaterial(key));
    }
    Ok(Zeroizing::new(bytes))
}
