//! `fetch`: the HTTP/HTTPS client collaborator, built on top of the core's
//! `write`/`read_all` primitives for plaintext HTTP.
//!
//! HTTPS is the one deliberate exception to "everything rides the core
//! primitives": TLS record encode/decode needs its own buffering state
//! machine, and threading that through the byte-oriented reactor would mean
//! building a second, undescribed reactor layer. Instead, for `https`
//! requests the entire connect+handshake+exchange happens synchronously
//! inside the task's body via `rustls`'s blocking `Stream` — the task
//! occupies the runtime for that duration, which is an acceptable, narrow
//! trade for staying within spec.md's core (see `DESIGN.md`).

use super::{request, response, url};
use crate::error::{Error, IoFailure, ProtocolFailure};
use crate::io::{read_all, write, Stream};
use std::collections::HashMap;
use std::io::{Read, Write as _};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one [`fetch`] call (spec.md §6's Configuration
/// options).
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub json: bool,
    pub verify: bool,
    pub connect_timeout: f64,
    pub max_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            json: false,
            verify: true,
            connect_timeout: 30.0,
            max_bytes: 8_000_000,
        }
    }
}

/// Performs one HTTP or HTTPS request and returns the parsed response.
///
/// Must be called from inside a running task (the `http` watcher/read
/// primitives it uses for the plaintext path suspend on the ambient
/// runtime). Connect is always blocking (spec.md §6/§9).
///
/// # Errors
/// Returns [`Error::CallerBug`] for an empty method, a non-positive
/// `max_bytes`, or a negative `connect_timeout`; [`Error::Protocol`] for an
/// invalid URL or malformed wire data; [`Error::Status`] for a `>= 400`
/// response; [`Error::Io`] for connect/write/read failures.
pub async fn fetch(raw_url: &str, options: FetchOptions) -> Result<response::Response, Error> {
    if options.method.is_empty() {
        return Err(Error::caller_bug("fetch: method must be non-empty"));
    }
    if options.max_bytes == 0 {
        return Err(Error::caller_bug("fetch: max_bytes must be > 0"));
    }
    if options.connect_timeout < 0.0 {
        return Err(Error::caller_bug("fetch: connect_timeout must be >= 0"));
    }

    let parsed = url::parse(raw_url)?;
    let request_bytes = request::build(
        &options.method,
        &parsed,
        &options.headers,
        options.body.as_deref(),
        options.json,
    );

    let raw_response = match parsed.scheme {
        url::Scheme::Http => {
            let tcp = connect(&parsed.host, parsed.port, options.connect_timeout)?;
            let stream = Stream::from(tcp);
            let stream = write(stream, request_bytes).await?;
            read_all(stream, options.max_bytes).await?
        }
        url::Scheme::Https => fetch_https(
            &parsed,
            &request_bytes,
            options.verify,
            options.connect_timeout,
            options.max_bytes,
        )?,
    };

    response::parse(&raw_response, &parsed.raw)
}

fn connect(host: &str, port: u16, timeout_secs: f64) -> Result<TcpStream, Error> {
    use socket2::{Domain, Socket, Type};

    let addr = (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .ok_or(Error::Protocol(ProtocolFailure::InvalidUrl(host.to_string())))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)
        .map_err(|_| Error::Io(IoFailure::WriteFailed))?;

    let timeout = Duration::from_secs_f64(timeout_secs);
    socket
        .connect_timeout(&addr.into(), timeout)
        .map_err(|_| Error::Io(IoFailure::WriteFailed))?;

    Ok(socket.into())
}

fn fetch_https(
    parsed: &url::ParsedUrl,
    request_bytes: &[u8],
    verify: bool,
    connect_timeout: f64,
    max_bytes: usize,
) -> Result<Vec<u8>, Error> {
    let tcp = connect(&parsed.host, parsed.port, connect_timeout)?;
    tcp.set_nodelay(true).ok();

    let config = tls_config(verify);
    let server_name = rustls::pki_types::ServerName::try_from(parsed.host.clone())
        .map_err(|_| Error::Protocol(ProtocolFailure::InvalidUrl(parsed.host.clone())))?;
    let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|_| Error::Io(IoFailure::WriteFailed))?;

    let mut tls = rustls::StreamOwned::new(conn, tcp);
    tls.write_all(request_bytes)
        .map_err(|_| Error::Io(IoFailure::WriteFailed))?;

    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match tls.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                out.extend_from_slice(&chunk[..n]);
                if out.len() > max_bytes {
                    return Err(Error::Io(IoFailure::ResponseTooLarge));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionAborted => break,
            Err(_) => return Err(Error::Io(IoFailure::ReadFailed)),
        }
    }
    Ok(out)
}

fn tls_config(verify: bool) -> rustls::ClientConfig {
    if verify {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::AcceptAll))
            .with_no_client_auth()
    }
}

/// `verify = false` (spec.md §6: "the inverse" of verifying peer and
/// peer-name) means accepting any certificate, self-signed included.
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub(super) struct AcceptAll;

    impl ServerCertVerifier for AcceptAll {
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
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }
}
