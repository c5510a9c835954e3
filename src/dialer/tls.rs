use std::sync::{Arc, OnceLock};

use rustls::{
  ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
  client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
  crypto::CryptoProvider,
  pki_types::{CertificateDer, ServerName, UnixTime},
};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};

use super::Error;

/// Client configurations, built on first use.
#[derive(Default)]
pub(super) struct TlsConfigs {
  verified: OnceLock<Arc<ClientConfig>>,
  insecure: OnceLock<Arc<ClientConfig>>,
}

impl TlsConfigs {
  fn get(&self, skip_verify: bool) -> Result<Arc<ClientConfig>, rustls::Error> {
    let cell = if skip_verify {
      &self.insecure
    } else {
      &self.verified
    };

    if let Some(config) = cell.get() {
      return Ok(config.clone());
    }

    let config = Arc::new(build(skip_verify)?);
    Ok(cell.get_or_init(|| config).clone())
  }

  /// Runs the client handshake over `stream`, using `host` for SNI and
  /// certificate validation.
  pub(super) async fn handshake(
    &self,
    host: &str,
    stream: TcpStream,
    skip_verify: bool,
  ) -> Result<TlsStream<TcpStream>, Error> {
    let name = ServerName::try_from(host.to_string())?;
    let connector = TlsConnector::from(self.get(skip_verify)?);
    Ok(connector.connect(name, stream).await?)
  }
}

fn build(skip_verify: bool) -> Result<ClientConfig, rustls::Error> {
  let provider = Arc::new(rustls::crypto::ring::default_provider());
  let builder =
    ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

  let config = if skip_verify {
    builder
      .dangerous()
      .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
      .with_no_client_auth()
  } else {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    builder.with_root_certificates(roots).with_no_client_auth()
  };
  Ok(config)
}

/// Accepts any server certificate, handshake signatures are still checked.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
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
    rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
  }

  fn verify_tls13_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    self.0.signature_verification_algorithms.supported_schemes()
  }
}
