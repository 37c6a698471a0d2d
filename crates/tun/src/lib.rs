//! Virtual-interface factory.
//!
//! The event loops only require a readable/writable async descriptor; this
//! crate owns the one place that knows how to create it. The server creates
//! its device up front with the router address, the client creates its
//! device once the server has assigned one.

use std::net::Ipv4Addr;

use tracing::info;

pub use tun::AsyncDevice;

#[derive(Debug, thiserror::Error)]
pub enum TunError {
    #[error("cannot create virtual interface: {0}")]
    Create(#[from] tun::Error),
}

/// Which layer the interface operates at. Layer 2 (TAP) carries whole
/// Ethernet frames and disables source-address dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layer {
    L2,
    #[default]
    L3,
}

/// Parameters for creating a virtual interface.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub name: String,
    pub layer: Layer,
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub mtu: Option<u16>,
    /// When set, every read is prefixed with the 4-byte packet-information
    /// header and the dispatcher must skip it before inspecting addresses.
    pub packet_info: bool,
}

impl DeviceConfig {
    pub fn new(name: &str, layer: Layer) -> Self {
        Self {
            name: name.to_string(),
            layer,
            ..Self::default()
        }
    }
}

/// Create the virtual interface and bring it up.
pub fn create(device: &DeviceConfig) -> Result<AsyncDevice, TunError> {
    let mut config = tun::Configuration::default();
    config.name(&device.name);
    config.layer(match device.layer {
        Layer::L2 => tun::Layer::L2,
        Layer::L3 => tun::Layer::L3,
    });
    if let Some(address) = device.address {
        config.address(address);
    }
    if let Some(netmask) = device.netmask {
        config.netmask(netmask);
    }
    if let Some(mtu) = device.mtu {
        config.mtu(i32::from(mtu));
    }
    config.up();

    #[cfg(target_os = "linux")]
    config.platform(|platform| {
        platform.packet_information(device.packet_info);
    });

    let created = tun::create_as_async(&config)?;
    info!(name = %device.name, layer = ?device.layer, "Virtual interface up");
    Ok(created)
}
