/// TCP accept loop, per-connection threads and shutdown.
///
/// Shutdown closes the read half of every open connection, so idle clients
/// see end of stream right away while a command already being executed still
/// gets its reply written. The accept loop is woken with a throwaway local
/// connection.
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::handler::{Command, QueryHandler};
use crate::resp::{read_command, ProtocolError, Reply};

/// Pause after a failed accept, so running out of descriptors does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct QueryServer {
    listener: TcpListener,
    handler: Arc<QueryHandler>,
    shutdown: ShutdownHandle,
}

impl QueryServer {
    /// Binds the listener. Use port 0 to pick a free port.
    pub fn bind(addr: &str, handler: QueryHandler) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("binding {addr}"))?;
        let local = listener.local_addr()?;
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            shutdown: ShutdownHandle::new(wake_addr(local)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves until [`ShutdownHandle::trigger`] is called, then waits for
    /// every connection thread to finish.
    pub fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "query server listening");
        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        for stream in self.listener.incoming() {
            if self.shutdown.is_triggered() {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };
            let id = match self.shutdown.register(&stream) {
                Ok(Some(id)) => id,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping connection: cannot track socket");
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let shutdown = self.shutdown.clone();
            let spawned = thread::Builder::new()
                .name(format!("conn-{id}"))
                .spawn(move || {
                    let peer = stream.peer_addr().ok();
                    tracing::debug!(?peer, "connection opened");
                    if let Err(e) = serve_connection(stream, &handler) {
                        tracing::debug!(?peer, error = %e, "connection ended with error");
                    }
                    shutdown.unregister(id);
                });
            match spawned {
                Ok(handle) => connections.push(handle),
                Err(e) => {
                    tracing::error!(error = %e, "failed to spawn connection thread");
                    self.shutdown.unregister(id);
                }
            }
            connections.retain(|h| !h.is_finished());
        }

        tracing::info!(open = connections.len(), "query server stopping");
        for handle in connections {
            if handle.join().is_err() {
                tracing::error!("connection thread panicked");
            }
        }
        tracing::info!("query server stopped");
        Ok(())
    }
}

/// Answers commands on one connection until the peer leaves, sends `QUIT`,
/// sends malformed framing, or the server shuts down.
fn serve_connection(stream: TcpStream, handler: &QueryHandler) -> Result<(), ProtocolError> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let args = match read_command(&mut reader) {
            Ok(Some(args)) => args,
            Ok(None) => break,
            Err(ProtocolError::Io(e)) => return Err(ProtocolError::Io(e)),
            Err(e) => {
                Reply::error(format!("ERR Protocol error: {e}")).write_to(&mut writer)?;
                writer.flush()?;
                return Err(e);
            }
        };

        let (reply, close) = match Command::parse(&args) {
            Ok(Command::Quit) => (Reply::ok(), true),
            Ok(command) => (handler.execute(command), false),
            Err(reply) => (reply, false),
        };
        reply.write_to(&mut writer)?;
        if close {
            break;
        }
        // Pipelined commands are answered in one write once the input runs dry.
        if reader.buffer().is_empty() {
            writer.flush()?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Address that reaches the listener from this host.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), local.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), local.port()),
        _ => local,
    }
}

#[derive(Default)]
struct Registry {
    stopping: bool,
    next_id: u64,
    streams: HashMap<u64, TcpStream>,
}

/// Stops a running [`QueryServer`]. Cheap to clone and safe to trigger from
/// a signal handler thread, more than once.
#[derive(Clone)]
pub struct ShutdownHandle {
    wake: SocketAddr,
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("ShutdownHandle")
            .field("stopping", &registry.stopping)
            .field("open_connections", &registry.streams.len())
            .finish()
    }
}

impl ShutdownHandle {
    pub(crate) fn new(wake: SocketAddr) -> Self {
        Self {
            wake,
            registry: Arc::default(),
        }
    }

    pub fn trigger(&self) {
        {
            let mut registry = self.registry.lock();
            if registry.stopping {
                return;
            }
            registry.stopping = true;
            for stream in registry.streams.values() {
                let _ = stream.shutdown(Shutdown::Read);
            }
        }
        tracing::info!("shutdown requested");
        // Unblock accept(); the loop sees the flag and exits.
        let _ = TcpStream::connect(self.wake);
    }

    pub fn is_triggered(&self) -> bool {
        self.registry.lock().stopping
    }

    /// Tracks a new connection. `Ok(None)` once shutdown has started; an
    /// error means only this connection cannot be served.
    pub(crate) fn register(&self, stream: &TcpStream) -> io::Result<Option<u64>> {
        let mut registry = self.registry.lock();
        if registry.stopping {
            return Ok(None);
        }
        let clone = stream.try_clone()?;
        let id = registry.next_id;
        registry.next_id += 1;
        registry.streams.insert(id, clone);
        Ok(Some(id))
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.registry.lock().streams.remove(&id);
    }
}
