//! TLS session setup on top of an already-connected plain socket.
//!
//! [`negotiate`] walks a [`TlsBackend`] through context creation, stream
//! creation, socket binding, trust store population, connect, handshake and
//! the two certificate gates. A failure at any step drops the backend, which
//! owns every partially built piece, before the error is returned.
//!
//! Chain verification is recorded rather than enforced during the handshake.
//! An interim non-OK result is only logged; the check after the handshake is
//! the one that fails the negotiation.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ConfigBuilder, DigitallySignedStruct, RootCertStore, SignatureScheme,
    WantsVerifier,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::{Endpoint, TrustStoreSource};
use super::session::{Session, SessionStream};
use crate::error::{Error, Result};
use crate::log::{CommunicationLog, Side};

/// Outcome of certificate chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VerifyResult {
    /// No chain has been checked yet.
    #[default]
    Pending,
    /// The chain verified against the trust store.
    Ok,
    /// The chain was rejected.
    Failed(String),
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("certificate chain not verified"),
            Self::Ok => f.write_str("ok"),
            Self::Failed(reason) => f.write_str(reason),
        }
    }
}

/// The steps of a TLS upgrade, one method per checkpoint.
///
/// Implementations own everything they create. [`negotiate`] drops the
/// backend on failure, so `Drop` is where partial state gets released.
pub trait TlsBackend: Send {
    /// Raw connected socket handed over by the plain transport.
    type Socket: Send;
    /// Encrypted stream produced by a successful handshake.
    type Stream: SessionStream + 'static;

    /// Initializes library state and builds the client context.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created.
    fn init_context(&mut self) -> io::Result<()>;

    /// Creates the encrypted-stream abstraction for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be created.
    fn create_stream(&mut self, endpoint: &Endpoint) -> io::Result<()>;

    /// Binds the stream to the connected socket and the `host:port` identity.
    fn bind(&mut self, socket: Self::Socket, identity: &str);

    /// Where [`Self::load_trust_store`] takes roots from.
    fn trust_store_source(&self) -> TrustStoreSource;

    /// Populates the trust store.
    ///
    /// # Errors
    ///
    /// Returns an error if no trusted roots could be loaded.
    fn load_trust_store(&mut self) -> io::Result<()>;

    /// Current chain verification result.
    fn verify_result(&self) -> VerifyResult;

    /// Drives the transport connect step of the encrypted stream.
    fn connect(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Drives the TLS handshake.
    fn handshake(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Returns true if the server presented a certificate.
    fn has_peer_certificate(&self) -> bool;

    /// Hands over the finished stream.
    ///
    /// # Errors
    ///
    /// Returns an error if no handshake completed.
    fn into_stream(self) -> io::Result<Self::Stream>;
}

/// Upgrades `socket` to a TLS [`Session`] for `endpoint`.
///
/// # Errors
///
/// Returns the checkpoint-specific error of the first failing step. All
/// resources, the socket included, are released before it is returned.
pub async fn negotiate<B: TlsBackend>(
    backend: B,
    endpoint: &Endpoint,
    socket: B::Socket,
    log: &dyn CommunicationLog,
) -> Result<Session> {
    log.add_item(Side::Client, "<Start TLS negotiation>");
    match establish(backend, endpoint, socket, log).await {
        Ok(session) => {
            log.add_item(Side::Client, "TLS session ready!");
            tracing::info!(%endpoint, "TLS session established");
            Ok(session)
        }
        Err(e) => {
            log.add_item(Side::Client, &format!("<TLS negotiation failed: {e}>"));
            tracing::warn!(%endpoint, error = %e, "TLS negotiation failed");
            Err(e)
        }
    }
}

async fn establish<B: TlsBackend>(
    mut backend: B,
    endpoint: &Endpoint,
    socket: B::Socket,
    log: &dyn CommunicationLog,
) -> Result<Session> {
    backend.init_context().map_err(Error::ContextInit)?;
    backend.create_stream(endpoint).map_err(Error::StreamCreate)?;

    let identity = endpoint.to_string();
    backend.bind(socket, &identity);
    log.add_item(Side::Client, &format!("<Bind TLS stream to {identity}>"));

    if let Err(e) = backend.load_trust_store() {
        return Err(match backend.trust_store_source() {
            TrustStoreSource::System => Error::SystemTrustStore(e),
            TrustStoreSource::BuiltIn => Error::DefaultTrustStore(e),
        });
    }

    // Interim result only; the post-handshake check below is authoritative.
    if let VerifyResult::Failed(reason) = backend.verify_result() {
        tracing::warn!(%reason, "certificate verification error, continuing");
        log.add_item(
            Side::Client,
            &format!("<Certificate verification error ({reason}) but continuing...>"),
        );
    }

    backend.connect().await.map_err(Error::Connect)?;

    log.add_item(Side::Both, "<Negotiate a TLS session>");
    backend.handshake().await.map_err(Error::Handshake)?;

    log.add_item(Side::Both, "<Check result of negotiation>");
    if !backend.has_peer_certificate() {
        return Err(Error::NoCertificate);
    }
    match backend.verify_result() {
        VerifyResult::Ok => {}
        other => return Err(Error::Verification(other.to_string())),
    }

    let stream = backend.into_stream().map_err(Error::Handshake)?;
    Ok(Session::new(stream, identity))
}

static CRYPTO_PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();

/// Process-wide crypto provider, set up on first use.
fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::clone(CRYPTO_PROVIDER.get_or_init(|| {
        tracing::debug!("initializing TLS crypto provider");
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }))
}

fn missing(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{what} not prepared"))
}

/// rustls-backed [`TlsBackend`] over a tokio [`TcpStream`].
pub struct RustlsBackend {
    trust_store: TrustStoreSource,
    builder: Option<ConfigBuilder<ClientConfig, WantsVerifier>>,
    server_name: Option<ServerName<'static>>,
    socket: Option<TcpStream>,
    verifier: Option<Arc<RecordingVerifier>>,
    connector: Option<TlsConnector>,
    stream: Option<TlsStream<TcpStream>>,
}

impl RustlsBackend {
    /// Creates a backend that loads roots from `trust_store`.
    #[must_use]
    pub const fn new(trust_store: TrustStoreSource) -> Self {
        Self {
            trust_store,
            builder: None,
            server_name: None,
            socket: None,
            verifier: None,
            connector: None,
            stream: None,
        }
    }

    fn root_store(&self) -> io::Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        match self.trust_store {
            TrustStoreSource::System => {
                let loaded = rustls_native_certs::load_native_certs();
                for err in &loaded.errors {
                    tracing::warn!(error = %err, "skipping unreadable system certificate");
                }
                let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
                tracing::debug!(added, ignored, "loaded system root certificates");
            }
            TrustStoreSource::BuiltIn => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }

        if roots.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no trusted root certificates available",
            ));
        }
        Ok(roots)
    }
}

impl TlsBackend for RustlsBackend {
    type Socket = TcpStream;
    type Stream = TlsStream<TcpStream>;

    fn init_context(&mut self) -> io::Result<()> {
        let builder = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(io::Error::other)?;
        self.builder = Some(builder);
        Ok(())
    }

    fn create_stream(&mut self, endpoint: &Endpoint) -> io::Result<()> {
        let server_name = ServerName::try_from(endpoint.bare_host().to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.server_name = Some(server_name);
        Ok(())
    }

    fn bind(&mut self, socket: TcpStream, identity: &str) {
        tracing::debug!(identity, "binding TLS stream to socket");
        self.socket = Some(socket);
    }

    fn trust_store_source(&self) -> TrustStoreSource {
        self.trust_store
    }

    fn load_trust_store(&mut self) -> io::Result<()> {
        let roots = self.root_store()?;
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), crypto_provider())
            .build()
            .map_err(io::Error::other)?;
        self.verifier = Some(Arc::new(RecordingVerifier::new(inner)));
        Ok(())
    }

    fn verify_result(&self) -> VerifyResult {
        self.verifier
            .as_ref()
            .map_or(VerifyResult::Pending, |verifier| verifier.result())
    }

    async fn connect(&mut self) -> io::Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| missing("socket"))?;
        let peer = socket.peer_addr()?;

        let builder = self.builder.take().ok_or_else(|| missing("TLS context"))?;
        let verifier = self.verifier.clone().ok_or_else(|| missing("trust store"))?;
        let config = builder
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        tracing::debug!(%peer, "TLS connector ready");
        self.connector = Some(TlsConnector::from(Arc::new(config)));
        Ok(())
    }

    async fn handshake(&mut self) -> io::Result<()> {
        let connector = self.connector.take().ok_or_else(|| missing("TLS connector"))?;
        let server_name = self.server_name.clone().ok_or_else(|| missing("server name"))?;
        let socket = self.socket.take().ok_or_else(|| missing("socket"))?;

        let stream = connector.connect(server_name, socket).await?;
        self.stream = Some(stream);
        Ok(())
    }

    fn has_peer_certificate(&self) -> bool {
        self.stream
            .as_ref()
            .and_then(|stream| stream.get_ref().1.peer_certificates())
            .is_some_and(|certs| !certs.is_empty())
    }

    fn into_stream(self) -> io::Result<Self::Stream> {
        self.stream.ok_or_else(|| missing("TLS stream"))
    }
}

/// Runs WebPKI chain verification but records the verdict instead of
/// failing the handshake. Handshake signatures are still checked.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    result: Mutex<VerifyResult>,
}

impl RecordingVerifier {
    fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
        Self {
            inner,
            result: Mutex::new(VerifyResult::Pending),
        }
    }

    fn result(&self) -> VerifyResult {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verdict = match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(_) => VerifyResult::Ok,
            Err(e) => {
                tracing::debug!(error = %e, "certificate chain rejected");
                VerifyResult::Failed(e.to_string())
            }
        };
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = verdict;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
