//! TLS certificate loading, the teacher's `moq-native-ietf::tls` module
//! (not present in the retrieved pack; reconstructed here from the shape
//! `quic::Endpoint` and the relay's `web::Web` consume: a `Config` with
//! optional `server`/`client` `rustls` configs plus certificate
//! fingerprints for the development fingerprint endpoint).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Clone, Default)]
pub struct Args {
    /// Certificate chain in PEM format, one file per `--cert` flag.
    #[arg(long)]
    pub cert: Vec<PathBuf>,

    /// Private key in PEM format, one file per `--key` flag (paired by index with `--cert`).
    #[arg(long)]
    pub key: Vec<PathBuf>,

    /// Generate a self-signed certificate for local development instead of loading one from disk.
    #[arg(long)]
    pub generate: Option<String>,

    /// Skip server certificate verification; only ever use for local development.
    #[arg(long)]
    pub disable_verify: bool,
}

impl Args {
    pub fn load(&self) -> anyhow::Result<Config> {
        let mut certs = Vec::new();
        let mut keys = Vec::new();
        let mut fingerprints = Vec::new();

        if let Some(host) = &self.generate {
            let cert = rcgen_self_signed(host)?;
            fingerprints.push(fingerprint(&cert.cert_der));
            certs.push(cert.cert_der);
            keys.push(cert.key_der);
        } else {
            for (cert_path, key_path) in self.cert.iter().zip(self.key.iter()) {
                let cert_chain = load_certs(cert_path)?;
                let key = load_key(key_path)?;
                for cert in &cert_chain {
                    fingerprints.push(fingerprint(cert.as_ref()));
                }
                certs.extend(cert_chain);
                keys.push(key);
            }
        }

        let server = if !certs.is_empty() {
            let key = keys.into_iter().next().context("missing private key")?;
            let config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .context("invalid certificate/key pair")?;
            Some(config)
        } else {
            None
        };

        let client = if self.disable_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            for cert in rustls_native_certs::load_native_certs().context("failed to load native roots")? {
                roots.add(cert).ok();
            }
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        Ok(Config { server, client: Some(client), fingerprints })
    }
}

pub struct Config {
    pub server: Option<rustls::ServerConfig>,
    pub client: Option<rustls::ClientConfig>,
    pub fingerprints: Vec<String>,
}

impl Config {
    /// A cheap copy of the parts the dev-mode fingerprint/qlog web server
    /// needs, taken after `quic::Endpoint::new` has consumed the original
    /// for the QUIC listener.
    pub fn clone_for_web(&self) -> Self {
        Self {
            server: self.server.clone(),
            client: self.client.clone(),
            fingerprints: self.fingerprints.clone(),
        }
    }
}

fn load_certs(path: &PathBuf) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let data = fs::read(path).with_context(|| format!("failed to read certificate: {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut &data[..])
        .collect::<Result<Vec<_>, _>>()
        .context("invalid PEM certificate")?;
    Ok(certs)
}

fn load_key(path: &PathBuf) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let data = fs::read(path).with_context(|| format!("failed to read private key: {}", path.display()))?;
    rustls_pemfile::private_key(&mut &data[..])
        .context("invalid PEM private key")?
        .context("no private key found")
}

fn fingerprint(cert: &[u8]) -> String {
    use ring::digest;
    let digest = digest::digest(&digest::SHA256, cert);
    hex::encode(digest.as_ref())
}

struct GeneratedCert {
    cert_der: rustls::pki_types::CertificateDer<'static>,
    key_der: rustls::pki_types::PrivateKeyDer<'static>,
}

fn rcgen_self_signed(host: &str) -> anyhow::Result<GeneratedCert> {
    // Minimal self-signed cert for local development; production deployments
    // always pass --cert/--key.
    let keypair = rcgen::KeyPair::generate().context("failed to generate key pair")?;
    let params = rcgen::CertificateParams::new(vec![host.to_string()])?;
    let cert = params.self_signed(&keypair).context("failed to self-sign certificate")?;
    Ok(GeneratedCert {
        cert_der: cert.der().clone(),
        key_der: rustls::pki_types::PrivateKeyDer::Pkcs8(keypair.serialize_der().into()),
    })
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
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
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
        }
    }
}
