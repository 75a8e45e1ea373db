//! # Bus
//!
//! Concrete message bus plumbing behind the [`crate::transport`] traits.
//!
//! - [`MemoryBus`]: bounded in-process broker. The server's TCP listener feeds
//!   it and the consume pipeline polls it.
//! - [`TcpTransport`] / [`TcpTransportFactory`]: pooled producer handles that
//!   ship records to a remote [`TcpBusListener`].
//!
//! ## Wire format
//!
//! Every frame is a [`Frame`] serialized with CBOR, LZ4 block compressed
//! (size prepended), and written behind a 4-byte big-endian length prefix.

mod tcp;

pub use tcp::{TcpBusListener, TcpTransport, TcpTransportFactory, DEFAULT_MAX_CONNECTIONS};

use std::io::{self, Read, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use lz4::block::{compress, decompress, CompressionMode};
use serde::{Deserialize, Serialize};

use crate::error::{LogixError, Result};
use crate::transport::{BusConsumer, BusProducer, BusRecord, TransportFactory};

/// Frames above this size are rejected before allocating.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// How long a producer waits on a full in-process bus before dropping.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
  /// First frame of an authenticated connection.
  Auth { username: String, password: String },
  AuthOk,
  Rejected { reason: String },
  Record(BusRecord),
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
  let cbor = serde_cbor::to_vec(frame)?;
  let compressed = compress(&cbor, Some(CompressionMode::DEFAULT), true)?;
  Ok(compressed)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
  let cbor = decompress(bytes, None)?;
  Ok(serde_cbor::from_slice(&cbor)?)
}

pub fn write_frame<W: Write>(out: &mut W, frame: &Frame) -> Result<()> {
  let body = encode_frame(frame)?;
  if body.len() > MAX_FRAME_BYTES {
    return Err(LogixError::Transport(format!(
      "frame of {} bytes exceeds limit of {}",
      body.len(),
      MAX_FRAME_BYTES
    )));
  }
  out.write_all(&(body.len() as u32).to_be_bytes())?;
  out.write_all(&body)?;
  Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub fn read_frame<R: Read>(input: &mut R) -> Result<Option<Frame>> {
  let mut len_buf = [0u8; 4];
  match input.read_exact(&mut len_buf) {
    Ok(()) => {},
    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(e.into()),
  }
  let len = u32::from_be_bytes(len_buf) as usize;
  if len > MAX_FRAME_BYTES {
    return Err(LogixError::Transport(format!(
      "incoming frame of {} bytes exceeds limit of {}",
      len, MAX_FRAME_BYTES
    )));
  }
  let mut body = vec![0u8; len];
  input.read_exact(&mut body)?;
  decode_frame(&body).map(Some)
}

/// Bounded in-process broker carrying records of every topic.
#[derive(Debug, Clone)]
pub struct MemoryBus {
  sender: Sender<BusRecord>,
  receiver: Receiver<BusRecord>,
}

impl MemoryBus {
  pub fn new(capacity: usize) -> Self {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    Self { sender, receiver }
  }

  pub fn producer(&self) -> MemoryProducer {
    MemoryProducer {
      sender: self.sender.clone(),
      send_timeout: DEFAULT_SEND_TIMEOUT,
    }
  }

  /// Consumer returning at most `max_records` per poll.
  pub fn consumer(&self, max_records: usize) -> MemoryConsumer {
    MemoryConsumer {
      receiver: self.receiver.clone(),
      max_records: max_records.max(1),
    }
  }

  pub fn len(&self) -> usize {
    self.receiver.len()
  }

  pub fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }
}

#[derive(Debug, Clone)]
pub struct MemoryProducer {
  sender: Sender<BusRecord>,
  send_timeout: Duration,
}

impl MemoryProducer {
  pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
    self.send_timeout = timeout;
    self
  }
}

impl BusProducer for MemoryProducer {
  fn send(&mut self, topic: &str, payload: &str) -> Result<()> {
    match self
      .sender
      .send_timeout(BusRecord::new(topic, payload), self.send_timeout)
    {
      Ok(()) => Ok(()),
      Err(SendTimeoutError::Timeout(_)) => Err(LogixError::Transport(format!(
        "bus full, gave up after {}ms",
        self.send_timeout.as_millis()
      ))),
      Err(SendTimeoutError::Disconnected(_)) => {
        Err(LogixError::Transport("bus disconnected".to_string()))
      },
    }
  }
}

#[derive(Debug)]
pub struct MemoryConsumer {
  receiver: Receiver<BusRecord>,
  max_records: usize,
}

impl BusConsumer for MemoryConsumer {
  fn poll(&mut self, timeout: Duration) -> Result<Vec<BusRecord>> {
    let first = match self.receiver.recv_timeout(timeout) {
      Ok(record) => record,
      Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
      Err(RecvTimeoutError::Disconnected) => {
        return Err(LogixError::Transport("bus disconnected".to_string()))
      },
    };
    let mut records = Vec::with_capacity(self.max_records.min(1024));
    records.push(first);
    records.extend(self.receiver.try_iter().take(self.max_records - 1));
    Ok(records)
  }
}

/// Hands out producers of one [`MemoryBus`]; lets the pool run in-process.
#[derive(Debug, Clone)]
pub struct MemoryBusFactory {
  bus: MemoryBus,
}

impl MemoryBusFactory {
  pub fn new(bus: MemoryBus) -> Self {
    Self { bus }
  }
}

impl TransportFactory for MemoryBusFactory {
  type Handle = MemoryProducer;

  fn create(&self) -> Result<MemoryProducer> {
    Ok(self.bus.producer())
  }
}
