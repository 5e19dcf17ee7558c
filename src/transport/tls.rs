//! rustls client setup.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::errors::{SmtpError, SmtpResult};

/// Builds a connector from the TLS settings.
pub(super) fn connector(config: &TlsConfig) -> SmtpResult<TlsConnector> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &config.ca_cert_path {
        for cert in load_certs(path)? {
            root_store
                .add(cert)
                .map_err(|e| SmtpError::tls(format!("Failed to add CA cert from {}", path.display())).with_cause(e))?;
        }
    }

    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if config.accept_invalid_certs {
        #[cfg(feature = "tracing")]
        tracing::warn!("TLS certificate verification disabled; never use this in production");

        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertVerifier));
    }

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Parses the SNI name for `host`.
pub(super) fn server_name(host: &str) -> SmtpResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| SmtpError::tls(format!("Invalid server name: {}", host)).with_cause(e))
}

fn load_certs(path: &std::path::Path) -> SmtpResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| SmtpError::tls(format!("Failed to read CA cert {}", path.display())).with_cause(e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SmtpError::tls(format!("Invalid PEM in {}", path.display())).with_cause(e))?;

    if certs.is_empty() {
        return Err(SmtpError::tls(format!("No certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// Accepts any server certificate. Only installed on explicit opt-out.
#[derive(Debug)]
struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_connector_builds() {
        assert!(connector(&TlsConfig::default()).is_ok());
        assert!(connector(&TlsConfig::insecure()).is_ok());
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("smtp.example.com").is_ok());
        assert!(server_name("192.0.2.1").is_ok());
        assert!(server_name("not a host").is_err());
    }

    #[test]
    fn test_missing_ca_file() {
        let config = TlsConfig {
            ca_cert_path: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(connector(&config).is_err());
    }

    #[test]
    fn test_ca_file_without_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let config = TlsConfig {
            ca_cert_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        match connector(&config) {
            Ok(_) => panic!("PEM without certificates was accepted"),
            Err(err) => assert!(err.to_string().contains("No certificates")),
        }
    }
}
