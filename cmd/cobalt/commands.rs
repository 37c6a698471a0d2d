//! Certificate issuance commands.

use std::io::{self, Write};

use cobalt_config::{Config, ConfigError};
use cobalt_crypto::{generate_ca, generate_keypair, issue_identity};

/// `genca`: mint a fresh certificate authority and print the configuration
/// lines that anchor it.
pub fn genca() {
    let (cert, signing) = generate_ca();

    println!("Add the following lines to the config file:");
    println!("cacert = {}", hex::encode(cert.as_bytes()));
    println!(
        "capublickey = {}",
        hex::encode(signing.verifying_key().as_bytes())
    );
    println!("caprivatekey = {}", hex::encode(signing.to_bytes()));
}

/// `gencert`: create a box keypair and, after confirmation, sign it with
/// the configured CA.
pub fn gencert(config: &Config) -> eyre::Result<()> {
    let cert = config
        .material
        .ca_certificate
        .clone()
        .ok_or(ConfigError::MissingMaterial("cacert", "genca"))?;
    if config.material.ca_public.is_none() {
        return Err(ConfigError::MissingMaterial("capublickey", "genca").into());
    }
    let ca_signing = config.require_ca_signing()?;

    let (secret, public) = generate_keypair();
    println!("Public key: {}", hex::encode(public.as_bytes()));

    print!("Sign key with CA [y/N]? ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    if !matches!(answer.trim(), "y" | "Y") {
        return Ok(());
    }

    let identity = issue_identity(&public, &ca_signing, &cert);

    println!("Add the following lines to the config file:");
    println!("publickey = {}", hex::encode(identity.as_bytes()));
    println!("privatekey = {}", hex::encode(secret.to_bytes()));
    Ok(())
}
