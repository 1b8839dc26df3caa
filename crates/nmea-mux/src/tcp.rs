//! TCP forwarder.
//!
//! This module provides a sink that serves every connected TCP client:
//! - Accept loop on its own task
//! - One writer task per client, fed from a broadcast channel
//! - Lagging clients skip sentences instead of slowing the dispatcher down

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sink::{Sink, SinkError};

/// Capacity of the per-client backlog.
const BACKLOG: usize = 1024;

/// Broadcasts sentences to every connected TCP client.
pub struct TcpServerSink {
    port: u16,
    local_addr: SocketAddr,
    tx: broadcast::Sender<Arc<[u8]>>,
    clients: Arc<AtomicUsize>,
    written: AtomicU64,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServerSink {
    /// Bind on all interfaces and start accepting clients.
    ///
    /// Port 0 picks a free port, see [`TcpServerSink::local_addr`].
    pub async fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP forwarder listening on {}", local_addr);

        let (tx, _) = broadcast::channel(BACKLOG);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let clients = Arc::new(AtomicUsize::new(0));

        let accept = tokio::spawn(accept_loop(
            listener,
            tx.clone(),
            clients.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            port,
            local_addr,
            tx,
            clients,
            written: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown,
            accept: Mutex::new(Some(accept)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

impl Sink for TcpServerSink {
    fn descriptor(&self) -> Value {
        json!({ "type": "tcp", "port": self.port })
    }

    fn write(&self, frame: &[u8]) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        // No receiver just means nobody is connected.
        let _ = self.tx.send(Arc::from(frame));
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        let accept = self
            .accept
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(accept) = accept {
            accept.abort();
        }
        info!("TCP forwarder on port {} closed", self.local_addr.port());
    }

    fn status(&self) -> Value {
        json!({
            "type": "tcp",
            "port": self.port,
            "localPort": self.local_addr.port(),
            "clients": self.client_count(),
            "written": self.written.load(Ordering::Relaxed),
        })
    }
}

impl Drop for TcpServerSink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: broadcast::Sender<Arc<[u8]>>,
    clients: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let rx = tx.subscribe();
                        let clients = clients.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(serve_client(stream, addr, rx, clients, shutdown));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}

async fn serve_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    mut rx: broadcast::Receiver<Arc<[u8]>>,
    clients: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    clients.fetch_add(1, Ordering::SeqCst);
    info!("Forwarding to {}", addr);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if let Err(e) = stream.write_all(&frame).await {
                            debug!("Client {} gone: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged {} sentences", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    clients.fetch_sub(1, Ordering::SeqCst);
    info!("Client {} disconnected", addr);
}
