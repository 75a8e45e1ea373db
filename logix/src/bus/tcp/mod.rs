use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{LogixError, Result};
use crate::transport::{BusProducer, BusRecord, Credentials, TransportFactory};

use super::{read_frame, write_frame, Frame, MemoryBus, MemoryProducer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Open producer connections a listener serves at once, unless told otherwise.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Producer handle over one TCP connection.
///
/// Records are buffered and pushed on [`flush`](BusProducer::flush). Any I/O
/// error marks the handle broken so the pool stops lending it.
#[derive(Debug)]
pub struct TcpTransport {
  peer: SocketAddr,
  writer: BufWriter<TcpStream>,
  broken: bool,
}

impl TcpTransport {
  pub fn connect(addr: &str, credentials: Option<&Credentials>) -> Result<Self> {
    let peer = addr
      .to_socket_addrs()
      .map_err(|e| LogixError::Transport(format!("cannot resolve {}: {}", addr, e)))?
      .next()
      .ok_or_else(|| LogixError::Transport(format!("no address for {}", addr)))?;

    let stream = TcpStream::connect_timeout(&peer, CONNECT_TIMEOUT)
      .map_err(|e| LogixError::Transport(format!("connect to {} failed: {}", peer, e)))?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let mut transport = Self {
      peer,
      writer: BufWriter::new(stream.try_clone()?),
      broken: false,
    };

    if let Some(creds) = credentials.filter(|c| c.is_enabled()) {
      transport.authenticate(&stream, creds)?;
    }
    Ok(transport)
  }

  fn authenticate(&mut self, stream: &TcpStream, creds: &Credentials) -> Result<()> {
    write_frame(
      &mut self.writer,
      &Frame::Auth {
        username: creds.username.clone(),
        password: creds.password.clone(),
      },
    )?;
    self.writer.flush()?;

    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut reader = stream.try_clone()?;
    let reply = read_frame(&mut reader)?;
    stream.set_read_timeout(None)?;

    match reply {
      Some(Frame::AuthOk) => Ok(()),
      Some(Frame::Rejected { reason }) => Err(LogixError::Authentication(reason)),
      Some(other) => Err(LogixError::Authentication(format!(
        "unexpected handshake reply: {:?}",
        other
      ))),
      None => Err(LogixError::Authentication(
        "connection closed during handshake".to_string(),
      )),
    }
  }

  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  fn mark_broken<T>(&mut self, result: Result<T>) -> Result<T> {
    if result.is_err() {
      self.broken = true;
    }
    result
  }
}

impl BusProducer for TcpTransport {
  fn send(&mut self, topic: &str, payload: &str) -> Result<()> {
    if self.broken {
      return Err(LogixError::Transport(format!("connection to {} is broken", self.peer)));
    }
    let frame = Frame::Record(BusRecord::new(topic, payload));
    let result = write_frame(&mut self.writer, &frame);
    self.mark_broken(result)
  }

  fn flush(&mut self) -> Result<()> {
    let result = self.writer.flush().map_err(LogixError::from);
    self.mark_broken(result)
  }

  fn is_healthy(&self) -> bool {
    !self.broken
  }
}

impl Drop for TcpTransport {
  fn drop(&mut self) {
    let _ = self.writer.flush();
    let _ = self.writer.get_ref().shutdown(Shutdown::Both);
  }
}

/// Creates [`TcpTransport`] handles bound to one endpoint and credential pair.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
  addr: String,
  credentials: Option<Credentials>,
}

impl TcpTransportFactory {
  pub fn new(addr: impl Into<String>, credentials: Option<Credentials>) -> Self {
    Self {
      addr: addr.into(),
      credentials,
    }
  }
}

impl TransportFactory for TcpTransportFactory {
  type Handle = TcpTransport;

  fn create(&self) -> Result<TcpTransport> {
    TcpTransport::connect(&self.addr, self.credentials.as_ref())
  }

  fn destroy(&self, handle: TcpTransport) {
    tracing::debug!(peer = %handle.peer(), "closing transport connection");
    drop(handle);
  }
}

type ConnectionRegistry = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Accepts producer connections and forwards their records into a [`MemoryBus`].
pub struct TcpBusListener {
  local_addr: SocketAddr,
  shutdown: Arc<AtomicBool>,
  connections: ConnectionRegistry,
  accept_thread: Option<JoinHandle<()>>,
}

impl TcpBusListener {
  /// Bind and start accepting. When `credentials` are enabled every
  /// connection must authenticate with them first.
  pub fn bind(addr: &str, credentials: Option<Credentials>, bus: MemoryBus) -> Result<Self> {
    Self::bind_with_limit(addr, credentials, bus, DEFAULT_MAX_CONNECTIONS)
  }

  /// Like [`bind`](Self::bind), but connections beyond `max_connections` are
  /// closed as soon as they are accepted.
  pub fn bind_with_limit(
    addr: &str,
    credentials: Option<Credentials>,
    bus: MemoryBus,
    max_connections: usize,
  ) -> Result<Self> {
    let listener = TcpListener::bind(addr)
      .map_err(|e| LogixError::Transport(format!("cannot bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let connections: ConnectionRegistry = Arc::new(Mutex::new(HashMap::new()));
    let required = credentials.filter(|c| c.is_enabled()).map(Arc::new);

    let accept_thread = {
      let shutdown = Arc::clone(&shutdown);
      let connections = Arc::clone(&connections);
      thread::Builder::new()
        .name("logix-bus-accept".to_string())
        .spawn(move || {
          accept_loop(listener, shutdown, connections, required, bus, max_connections)
        })?
    };

    tracing::info!(addr = %local_addr, max_connections, "bus listener started");
    Ok(Self {
      local_addr,
      shutdown,
      connections,
      accept_thread: Some(accept_thread),
    })
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  pub fn connection_count(&self) -> usize {
    self.connections.lock().map(|c| c.len()).unwrap_or(0)
  }

  /// Stop accepting and close every open connection.
  pub fn shutdown(&mut self) {
    if self.shutdown.swap(true, Ordering::SeqCst) {
      return;
    }
    // Wake the blocking accept call.
    let mut wake = self.local_addr;
    if wake.ip().is_unspecified() {
      wake.set_ip(match wake {
        SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
        SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
      });
    }
    let _ = TcpStream::connect_timeout(&wake, Duration::from_millis(500));
    if let Some(handle) = self.accept_thread.take() {
      let _ = handle.join();
    }
    if let Ok(mut connections) = self.connections.lock() {
      for (_, stream) in connections.drain() {
        let _ = stream.shutdown(Shutdown::Both);
      }
    }
    tracing::info!(addr = %self.local_addr, "bus listener stopped");
  }
}

impl Drop for TcpBusListener {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn accept_loop(
  listener: TcpListener,
  shutdown: Arc<AtomicBool>,
  connections: ConnectionRegistry,
  required: Option<Arc<Credentials>>,
  bus: MemoryBus,
  max_connections: usize,
) {
  let next_id = AtomicU64::new(0);
  // Warn once per saturation episode, not once per refused peer.
  let mut saturated = false;
  for incoming in listener.incoming() {
    if shutdown.load(Ordering::SeqCst) {
      break;
    }
    let stream = match incoming {
      Ok(stream) => stream,
      Err(e) => {
        // Usually descriptor exhaustion; retrying at once would spin.
        tracing::warn!(error = %e, "accept failed");
        thread::sleep(ACCEPT_ERROR_BACKOFF);
        continue;
      },
    };
    let peer = stream
      .peer_addr()
      .map(|a| a.to_string())
      .unwrap_or_else(|_| "unknown".to_string());
    let id = next_id.fetch_add(1, Ordering::Relaxed);

    let clone = match stream.try_clone() {
      Ok(clone) => clone,
      Err(e) => {
        tracing::warn!(peer = %peer, error = %e, "cannot track connection, closing it");
        continue;
      },
    };
    let admitted = match connections.lock() {
      Ok(mut registry) if registry.len() < max_connections => {
        registry.insert(id, clone);
        true
      },
      _ => false,
    };
    if !admitted {
      if !saturated {
        tracing::warn!(
          peer = %peer,
          max_connections,
          "connection limit reached, refusing producers"
        );
        saturated = true;
      }
      let _ = stream.shutdown(Shutdown::Both);
      continue;
    }
    saturated = false;

    let tracked = Arc::clone(&connections);
    let required = required.clone();
    let producer = bus.producer();
    let spawned = thread::Builder::new()
      .name("logix-bus-conn".to_string())
      .spawn(move || {
        if let Err(e) = serve_connection(stream, required.as_deref(), producer) {
          tracing::debug!(peer = %peer, error = %e, "connection ended with error");
        }
        if let Ok(mut registry) = tracked.lock() {
          registry.remove(&id);
        }
      });
    if let Err(e) = spawned {
      tracing::error!(error = %e, "failed to spawn connection thread");
      if let Ok(mut registry) = connections.lock() {
        if let Some(stream) = registry.remove(&id) {
          let _ = stream.shutdown(Shutdown::Both);
        }
      }
    }
  }
}

fn serve_connection(
  stream: TcpStream,
  required: Option<&Credentials>,
  mut producer: MemoryProducer,
) -> Result<()> {
  let mut reader = BufReader::new(stream.try_clone()?);
  let mut writer = BufWriter::new(stream);

  let mut next = match read_frame(&mut reader)? {
    None => return Ok(()),
    Some(Frame::Auth { username, password }) => {
      let accepted = match required {
        Some(creds) => creds.username == username && creds.password == password,
        None => true,
      };
      if !accepted {
        write_frame(
          &mut writer,
          &Frame::Rejected {
            reason: "invalid username or password".to_string(),
          },
        )?;
        writer.flush()?;
        return Err(LogixError::Authentication(format!("rejected user {}", username)));
      }
      write_frame(&mut writer, &Frame::AuthOk)?;
      writer.flush()?;
      None
    },
    Some(other) => {
      if required.is_some() {
        write_frame(
          &mut writer,
          &Frame::Rejected {
            reason: "authentication required".to_string(),
          },
        )?;
        writer.flush()?;
        return Err(LogixError::Authentication(
          "connection sent data before authenticating".to_string(),
        ));
      }
      Some(other)
    },
  };

  loop {
    let frame = match next.take() {
      Some(frame) => frame,
      None => match read_frame(&mut reader)? {
        Some(frame) => frame,
        None => return Ok(()),
      },
    };
    match frame {
      Frame::Record(record) => {
        if let Err(e) = producer.send(&record.topic, &record.payload) {
          tracing::warn!(topic = %record.topic, error = %e, "dropping record, intake bus is full");
        }
      },
      other => tracing::debug!(frame = ?other, "ignoring unexpected frame"),
    }
  }
}
