//! # QUIC Endpoint
//!
//! One quinn endpoint serves both directions. TLS 1.3 provides encryption;
//! peer identity is established afterwards by the hub's own handshake, so
//! certificates are self-signed and not checked against any authority.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};

use crate::config::HubConfig;
use crate::errors::TransportError;

/// ALPN protocol id.
pub const ALPN: &[u8] = b"peer-hub/1";

/// TLS server name used on every dial; certificates are not checked.
pub const SERVER_NAME: &str = "peer-hub";

/// Bidirectional streams a peer may have open towards us at once.
const MAX_CONCURRENT_STREAMS: u32 = 1024;

/// Bind a QUIC endpoint on `config.listen_addr`.
///
/// Must be called from within a tokio runtime.
pub fn bind_endpoint(config: &HubConfig) -> Result<quinn::Endpoint, TransportError> {
    let provider = Arc::new(ring::default_provider());
    let transport = Arc::new(transport_config(config)?);

    let mut server_config = server_config(provider.clone())?;
    server_config.transport_config(transport.clone());

    let mut client_config = client_config(provider)?;
    client_config.transport_config(transport);

    let mut endpoint = quinn::Endpoint::server(server_config, config.listen_addr).map_err(|e| {
        TransportError::BindFailed {
            addr: config.listen_addr,
            reason: e.to_string(),
        }
    })?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

/// Local address of a bound endpoint.
pub fn local_addr(endpoint: &quinn::Endpoint, requested: SocketAddr) -> Result<SocketAddr, TransportError> {
    endpoint.local_addr().map_err(|e| TransportError::BindFailed {
        addr: requested,
        reason: e.to_string(),
    })
}

fn transport_config(config: &HubConfig) -> Result<quinn::TransportConfig, TransportError> {
    let idle = quinn::IdleTimeout::try_from(config.idle_timeout())
        .map_err(|e| TransportError::Tls(format!("idle timeout out of range: {e}")))?;

    let mut transport = quinn::TransportConfig::default();
    transport
        .max_idle_timeout(Some(idle))
        .keep_alive_interval(Some(config.keep_alive()))
        .max_concurrent_bidi_streams(MAX_CONCURRENT_STREAMS.into())
        .max_concurrent_uni_streams(0u32.into());
    Ok(transport)
}

/// Server TLS configuration with a fresh self-signed certificate.
fn server_config(provider: Arc<CryptoProvider>) -> Result<quinn::ServerConfig, TransportError> {
    use rcgen::{generate_simple_self_signed, CertifiedKey};

    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(vec![SERVER_NAME.to_string()])
        .map_err(|e| TransportError::Tls(format!("certificate generation failed: {e}")))?;

    let cert_chain = vec![cert.der().clone()];
    let private_key = PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into();

    let mut server_crypto = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    server_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_server_config = quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
        .map_err(|e| TransportError::Tls(format!("QUIC server crypto config error: {e:?}")))?;

    Ok(quinn::ServerConfig::with_crypto(Arc::new(quic_server_config)))
}

/// Client TLS configuration that accepts any certificate.
fn client_config(provider: Arc<CryptoProvider>) -> Result<quinn::ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_client_config = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Tls(format!("QUIC client crypto config error: {e:?}")))?;

    Ok(quinn::ClientConfig::new(Arc::new(quic_client_config)))
}

/// Accepts any server certificate but still checks the TLS handshake
/// signature against it.
///
/// Identity is proven by the fingerprint handshake that follows, not by a
/// certificate chain.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
