//! TLS configuration
//!
//! Builds rustls server and client configs from PEM material, using the
//! ring provider explicitly so nothing depends on a process-wide default.
//!
//! ```rust,ignore
//! let server = TlsManager::server_from_files("cert.pem", "key.pem")?;
//! let client = TlsManager::client(ca_pem, "localhost")?;
//! let mutual = TlsManager::server_with_client_auth(cert, key, ca_pem)?;
//! ```

use crate::config::NetConfig;
use crate::tls::parser::TlsParser;
use crate::tls::TlsSide;

use nbio_core::error::{NetError, Result};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    ClientConfig, ClientConnection, Connection, DigitallySignedStruct, RootCertStore, ServerConfig,
    ServerConnection, SignatureScheme,
};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

fn tls_err(context: &str, e: impl fmt::Display) -> NetError {
    NetError::protocol(format!("{}: {}", context, e))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| tls_err(&format!("reading {}", path.display()), e))
}

/// Every certificate in a PEM bundle
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_err("parsing certificate PEM", e))?;
    if certs.is_empty() {
        return Err(NetError::protocol("no certificates found in PEM"));
    }
    Ok(certs)
}

/// First private key (PKCS#8, PKCS#1 or SEC1) in a PEM bundle
pub fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem).map_err(|e| tls_err("parsing private key PEM", e))
}

fn parse_roots(pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certs(pem)? {
        roots.add(cert).map_err(|e| tls_err("adding trust root", e))?;
    }
    Ok(roots)
}

fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_string()).map_err(|e| tls_err("invalid server name", e))
}

/// Server and/or client TLS configuration plus a parser factory
#[derive(Clone)]
pub struct TlsManager {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
    server_name: Option<ServerName<'static>>,
}

impl TlsManager {
    /// Server identity from PEM bytes, no client authentication
    pub fn server(cert_chain_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_err("server protocol versions", e))?
            .with_no_client_auth()
            .with_single_cert(parse_certs(cert_chain_pem)?, parse_key(key_pem)?)
            .map_err(|e| tls_err("server certificate", e))?;
        Ok(Self::from_server_config(Arc::new(config)))
    }

    /// Server identity from PEM files
    pub fn server_from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        Self::server(&read_file(cert_path.as_ref())?, &read_file(key_path.as_ref())?)
    }

    /// Server that requires a client certificate chaining to `client_ca_pem`
    pub fn server_with_client_auth(
        cert_chain_pem: &[u8],
        key_pem: &[u8],
        client_ca_pem: &[u8],
    ) -> Result<Self> {
        let roots = Arc::new(parse_roots(client_ca_pem)?);
        let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider())
            .build()
            .map_err(|e| tls_err("client verifier", e))?;
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_err("server protocol versions", e))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(parse_certs(cert_chain_pem)?, parse_key(key_pem)?)
            .map_err(|e| tls_err("server certificate", e))?;
        Ok(Self::from_server_config(Arc::new(config)))
    }

    /// Client trusting the roots in `ca_pem`, verifying `name`
    pub fn client(ca_pem: &[u8], name: &str) -> Result<Self> {
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_err("client protocol versions", e))?
            .with_root_certificates(parse_roots(ca_pem)?)
            .with_no_client_auth();
        Ok(Self::from_client_config(Arc::new(config), server_name(name)?))
    }

    /// Client presenting its own certificate (for `server_with_client_auth`)
    pub fn client_with_identity(
        ca_pem: &[u8],
        name: &str,
        cert_chain_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self> {
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_err("client protocol versions", e))?
            .with_root_certificates(parse_roots(ca_pem)?)
            .with_client_auth_cert(parse_certs(cert_chain_pem)?, parse_key(key_pem)?)
            .map_err(|e| tls_err("client certificate", e))?;
        Ok(Self::from_client_config(Arc::new(config), server_name(name)?))
    }

    /// Client that accepts any server certificate
    ///
    /// Signatures are still checked, so the handshake is real; only the
    /// chain and the name are not. For tests and closed networks.
    pub fn client_trust_all(name: &str) -> Result<Self> {
        let provider = provider();
        let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_err("client protocol versions", e))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(TrustAll(provider)))
            .with_no_client_auth();
        Ok(Self::from_client_config(Arc::new(config), server_name(name)?))
    }

    pub fn from_server_config(config: Arc<ServerConfig>) -> Self {
        Self {
            server: Some(config),
            client: None,
            server_name: None,
        }
    }

    pub fn from_client_config(config: Arc<ClientConfig>, name: ServerName<'static>) -> Self {
        Self {
            server: None,
            client: Some(config),
            server_name: Some(name),
        }
    }

    pub fn has_server(&self) -> bool {
        self.server.is_some()
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Parser sized from `config`
    pub fn create_parser(&self, side: TlsSide, config: &NetConfig) -> Result<TlsParser> {
        self.parser(
            side,
            config.handshake_max_steps,
            config.buffer_size,
            config.channel_max_size,
        )
    }

    /// Parser with explicit limits
    pub fn parser(
        &self,
        side: TlsSide,
        max_steps: u32,
        buffer_size: usize,
        max_size: usize,
    ) -> Result<TlsParser> {
        let conn: Connection = match side {
            TlsSide::Server => {
                let config = self
                    .server
                    .as_ref()
                    .ok_or_else(|| NetError::protocol("no server TLS configuration"))?;
                ServerConnection::new(Arc::clone(config))
                    .map_err(|e| tls_err("server connection", e))?
                    .into()
            }
            TlsSide::Client => {
                let config = self
                    .client
                    .as_ref()
                    .ok_or_else(|| NetError::protocol("no client TLS configuration"))?;
                let name = self
                    .server_name
                    .clone()
                    .ok_or_else(|| NetError::protocol("no TLS server name"))?;
                ClientConnection::new(Arc::clone(config), name)
                    .map_err(|e| tls_err("client connection", e))?
                    .into()
            }
        };
        TlsParser::new(conn, side, max_steps, buffer_size, max_size)
    }
}

impl fmt::Debug for TlsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsManager")
            .field("server", &self.server.is_some())
            .field("client", &self.client.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Accepts every server certificate; signatures are still verified
#[derive(Debug)]
struct TrustAll(Arc<CryptoProvider>);

impl ServerCertVerifier for TrustAll {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================
