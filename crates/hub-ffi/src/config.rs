//! Hub configuration from the strings a foreign caller has.

use std::net::{SocketAddr, ToSocketAddrs};

use hub_crypto::{TransportFingerprint, TransportKeyPair};
use peer_hub::{BootstrapDirectory, ConfigError, HubConfig};

use crate::FfiError;

/// Decode a 32-byte secret given raw or as hex text.
pub(crate) fn secret(material: &[u8]) -> Result<[u8; 32], FfiError> {
    let identity = match <[u8; 32]>::try_from(material) {
        Ok(raw) => TransportKeyPair::from_seed(raw),
        Err(_) => {
            let text = std::str::from_utf8(material).map_err(|_| FfiError::InvalidUtf8("key"))?;
            TransportKeyPair::from_hex(text)?
        }
    };
    Ok(identity.to_seed())
}

/// Config listening on the bootstrap entry for `local`, or on a wildcard
/// address when the local hub is not in the directory.
pub(crate) fn hub_config(bootstrap_csv: &str, local: TransportFingerprint) -> Result<HubConfig, FfiError> {
    let bootstrap = BootstrapDirectory::from_csv(bootstrap_csv)?;
    let listen_addr = bootstrap
        .address_of(&local)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    Ok(HubConfig::builder()
        .listen_addr(listen_addr)
        .bootstrap(bootstrap)
        .build()?)
}

/// Config listening on `listen`, given as `host:port` with an optional
/// `scheme://` prefix.
pub(crate) fn hub_config_at(listen: &str, bootstrap_csv: &str) -> Result<HubConfig, FfiError> {
    let bootstrap = BootstrapDirectory::from_csv(bootstrap_csv)?;
    let host_port = listen.split_once("://").map_or(listen, |(_, rest)| rest).trim();
    let listen_addr = host_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "listen_addr",
            reason: format!("cannot resolve {listen:?}"),
        })?;
    Ok(HubConfig::builder()
        .listen_addr(listen_addr)
        .bootstrap(bootstrap)
        .build()?)
}
