//! TLS policy for the signaling connection.
//!
//! Lab signaling servers commonly run with self-signed certificates, so
//! certificate verification can be switched off explicitly. The TLS session
//! secrets can also be dumped in NSS key log format for packet captures.

use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, KeyLog, RootCertStore, SignatureScheme};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::Connector;

const KEY_LOG_HEADER: &str = "# SSL/TLS secrets log file, generated by rtp-client\n";

/// TLS options for dialing `wss://` URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Accept any server certificate.
    pub insecure_skip_verify: bool,
    /// Write TLS secrets to this file.
    pub key_log_path: Option<PathBuf>,
}

impl TlsOptions {
    fn is_default(&self) -> bool {
        !self.insecure_skip_verify && self.key_log_path.is_none()
    }
}

/// Builds the connector for `url`.
///
/// Returns `None` when tokio-tungstenite's own defaults apply: plain `ws://`
/// URLs, or `wss://` with verification on and no key log.
pub fn connector_for(url: &str, options: &TlsOptions) -> Result<Option<Connector>, anyhow::Error> {
    if !url.starts_with("wss://") {
        if !options.is_default() {
            debug!("Ignoring TLS options for non-TLS URL {url}");
        }
        return Ok(None);
    }
    if options.is_default() {
        return Ok(None);
    }
    let config = client_config(options)?;
    Ok(Some(Connector::Rustls(Arc::new(config))))
}

fn client_config(options: &TlsOptions) -> Result<ClientConfig, anyhow::Error> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        debug!("rustls crypto provider install: {:?}", e);
    }

    let builder = ClientConfig::builder();
    let mut config = if options.insecure_skip_verify {
        warn!("TLS certificate verification is disabled");
        let provider = CryptoProvider::get_default()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No rustls crypto provider installed"))?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    } else {
        let roots: RootCertStore = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    if let Some(path) = &options.key_log_path {
        let key_log = FileKeyLog::create(path)
            .map_err(|e| anyhow::anyhow!("keylog {}: {}", path.display(), e))?;
        config.key_log = Arc::new(key_log);
    }

    Ok(config)
}

/// Certificate verifier that accepts every server certificate while still
/// checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Key log writer producing NSS key log lines in a fixed file.
#[derive(Debug)]
pub struct FileKeyLog {
    file: Mutex<File>,
}

impl FileKeyLog {
    /// Creates (or truncates) the key log file, readable by the owner only.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(KEY_LOG_HEADER.as_bytes())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl KeyLog for FileKeyLog {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let line = format!(
            "{} {} {}\n",
            label,
            hex::encode(client_random),
            hex::encode(secret)
        );
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!("Failed to write TLS key log: {e}");
                }
            }
            Err(_) => warn!("TLS key log lock poisoned"),
        }
    }
}
