//! Real network `Backend` over `async-imap` + TLS.
//!
//! Connection and STARTTLS plumbing generalizes the teacher's
//! `connection.rs`/`client.rs` `connect`/`select` pair; unlike the
//! teacher (talking only to self-signed Proton Bridge certificates),
//! this backend is not Bridge-specific, so it verifies certificates
//! properly against the platform trust store via `rustls-native-certs`
//! instead of the teacher's `DangerousVerifier`.

use crate::backend::Backend;
use crate::error::{Error, Result};
use async_imap::Session;
use async_trait::async_trait;
use futures::StreamExt;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

type TlsSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

/// Connection parameters for a real IMAP server.
#[derive(Debug, Clone)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// A `Backend` that drives a real IMAP server.
///
/// Holds one session behind a mutex: every folder's Synchronizer
/// call contends for it. The teacher opens and tears down a fresh
/// connection per logical operation; here the session is held open
/// across calls since the engine scopes its own session/locking above
/// this layer (`crate::session`) and a hot reconnect per scan step
/// would dominate latency on a large folder.
pub struct ImapBackend {
    endpoint: ImapEndpoint,
    session: Mutex<Option<TlsSession>>,
}

impl ImapBackend {
    #[must_use]
    pub fn new(endpoint: ImapEndpoint) -> Self {
        Self {
            endpoint,
            session: Mutex::new(None),
        }
    }

    fn tls_connector() -> Result<TlsConnector> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            roots
                .add(cert)
                .map_err(|e| Error::BackendUnavailable(format!("invalid root certificate: {e}")))?;
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn connect(&self) -> Result<TlsSession> {
        let addr = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        debug!("connecting to IMAP server at {}", addr);

        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("TCP connect failed: {e}")))?;
        let mut client = async_imap::Client::new(tcp_stream.compat());

        client
            .run_command_and_check_ok("STARTTLS", None)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("STARTTLS failed: {e}")))?;

        let connector = Self::tls_connector()?;
        let server_name = ServerName::try_from(self.endpoint.host.clone())
            .map_err(|e| Error::BackendUnavailable(format!("invalid server name: {e}")))?;

        let inner = client.into_inner().into_inner();
        let tls_stream = connector
            .connect(server_name, inner)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("TLS handshake failed: {e}")))?;

        let tls_client = async_imap::Client::new(tls_stream.compat());
        let session = tls_client
            .login(&self.endpoint.username, &self.endpoint.password)
            .await
            .map_err(|(e, _)| Error::BackendUnavailable(format!("login failed: {e}")))?;

        info!("connected to IMAP server");
        Ok(session)
    }

    async fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
            &'a mut TlsSession,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send + 'a>>,
    {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let session = guard.as_mut().expect("just populated above");
        match f(session).await {
            Ok(v) => Ok(v),
            Err(e) => {
                // Any failure invalidates the cached session; the
                // next call reconnects. Reconciliation is re-runnable
                // so this is never fatal to the caller.
                *guard = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Backend for ImapBackend {
    async fn select(&self, folder: &str) -> Result<()> {
        let folder = folder.to_string();
        self.with_session(|session| {
            Box::pin(async move {
                session
                    .select(&folder)
                    .await
                    .map_err(|e| Error::BackendUnavailable(format!("select {folder} failed: {e}")))?;
                Ok(())
            })
        })
        .await
    }

    async fn search_all(&self) -> Result<Vec<u32>> {
        self.with_session(|session| {
            Box::pin(async move {
                let seqs = session
                    .search("ALL")
                    .await
                    .map_err(|e| Error::BackendUnavailable(format!("search failed: {e}")))?;
                let mut seqs: Vec<u32> = seqs.into_iter().collect();
                seqs.sort_unstable();
                Ok(seqs)
            })
        })
        .await
    }

    async fn fetch_prefix(&self, seq: u32, prefix_bytes: usize) -> Result<Vec<u8>> {
        self.with_session(|session| {
            Box::pin(async move {
                let query = format!("(BODY.PEEK[]<0.{prefix_bytes}>)");
                let mut stream = session
                    .fetch(seq.to_string(), &query)
                    .await
                    .map_err(|e| Error::FetchFailed { seq, reason: e.to_string() })?;
                let Some(msg) = stream.next().await else {
                    return Err(Error::FetchFailed { seq, reason: "empty fetch response".to_string() });
                };
                let msg = msg.map_err(|e| Error::FetchFailed { seq, reason: e.to_string() })?;
                msg.body()
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| Error::FetchFailed { seq, reason: "no body in response".to_string() })
            })
        })
        .await
    }

    async fn fetch_full(&self, seq: u32) -> Result<Vec<u8>> {
        self.with_session(|session| {
            Box::pin(async move {
                let mut stream = session
                    .fetch(seq.to_string(), "(BODY.PEEK[])")
                    .await
                    .map_err(|e| Error::FetchFailed { seq, reason: e.to_string() })?;
                let Some(msg) = stream.next().await else {
                    return Err(Error::FetchFailed { seq, reason: "empty fetch response".to_string() });
                };
                let msg = msg.map_err(|e| Error::FetchFailed { seq, reason: e.to_string() })?;
                msg.body()
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| Error::FetchFailed { seq, reason: "no body in response".to_string() })
            })
        })
        .await
    }

    async fn append(&self, folder: &str, bytes: &[u8]) -> Result<u32> {
        let folder = folder.to_string();
        let bytes = bytes.to_vec();
        self.with_session(|session| {
            Box::pin(async move {
                session
                    .append(&folder, None, None, &bytes)
                    .await
                    .map_err(|e| Error::AppendFailed(e.to_string()))?;

                let seqs = session
                    .search("ALL")
                    .await
                    .map_err(|e| Error::AppendFailed(format!("post-append search failed: {e}")))?;
                seqs.into_iter()
                    .max()
                    .ok_or_else(|| Error::AppendFailed("server reported no sequence after append".to_string()))
            })
        })
        .await
    }

    async fn mark_deleted(&self, seq: u32) -> Result<()> {
        self.with_session(|session| {
            Box::pin(async move {
                session
                    .store(seq.to_string(), "+FLAGS (\\Deleted)")
                    .await
                    .map_err(|e| Error::BackendUnavailable(format!("store failed for {seq}: {e}")))?
                    .collect::<Vec<_>>()
                    .await;
                Ok(())
            })
        })
        .await
    }

    async fn expunge(&self) -> Result<()> {
        match self
            .with_session(|session| {
                Box::pin(async move {
                    session
                        .expunge()
                        .await
                        .map_err(|e| Error::BackendUnavailable(format!("expunge failed: {e}")))?
                        .collect::<Vec<_>>()
                        .await;
                    Ok(())
                })
            })
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                // Expunge failures are benign: garbage is re-queued on
                // the next scan.
                warn!("expunge failed, garbage will be re-queued: {}", e);
                Ok(())
            }
        }
    }
}
