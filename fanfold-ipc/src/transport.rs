//! Chunked transport queue
//!
//! Payloads are serialized and, when larger than the chunk size, split into
//! [`ChunkMessage`] frames that are reassembled on the receiving side. Any
//! number of handles may send and receive on the same queue.

use bytes::Bytes;
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
    TrySendError,
};
use log::{debug, trace};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::IpcError;
use crate::protocol::{ChunkMessage, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::reassembly::ReassemblyBuffer;

struct Shared {
    chunk_size: usize,
    capacity: Option<usize>,
    // Held across "take frame, feed buffer" so one message's frames are fed
    // in channel order even with several consumers.
    buffer: Mutex<ReassemblyBuffer>,
}

/// Message queue that transparently fragments oversized payloads
pub struct ChunkedQueue<T> {
    tx: Sender<ChunkMessage>,
    rx: Receiver<ChunkMessage>,
    shared: Arc<Shared>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for ChunkedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            shared: Arc::clone(&self.shared),
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ChunkedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedQueue")
            .field("chunk_size", &self.shared.chunk_size)
            .field("capacity", &self.shared.capacity)
            .field("queued_frames", &self.rx.len())
            .finish()
    }
}

impl<T> ChunkedQueue<T> {
    /// Create a queue holding at most `capacity` frames (0 = unbounded)
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        let (tx, rx) = if capacity == 0 {
            unbounded()
        } else {
            bounded(capacity)
        };
        let chunk_size = if chunk_size == 0 {
            MAX_CHUNK_SIZE
        } else {
            chunk_size.min(MAX_CHUNK_SIZE)
        };

        Self {
            tx,
            rx,
            shared: Arc::new(Shared {
                chunk_size,
                capacity: (capacity > 0).then_some(capacity),
                buffer: Mutex::new(ReassemblyBuffer::new()),
            }),
            _payload: PhantomData,
        }
    }

    /// Unbounded queue with the default chunk size
    pub fn unbounded() -> Self {
        Self::new(0, DEFAULT_CHUNK_SIZE)
    }

    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /// Frame capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    /// Number of frames currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Number of messages partially received
    pub fn pending_reassemblies(&self) -> usize {
        self.shared.buffer.lock().pending_len()
    }

    /// Raw frame receiver, for readiness selection alongside other channels
    /// (`crossbeam_channel::Select::ready`). Taking frames from it directly
    /// bypasses reassembly; use the receive methods for that.
    pub fn frames(&self) -> &Receiver<ChunkMessage> {
        &self.rx
    }
}

impl<T: Serialize> ChunkedQueue<T> {
    fn encode(&self, payload: &T) -> Result<Bytes, IpcError> {
        serde_json::to_vec(payload)
            .map(Bytes::from)
            .map_err(|e| IpcError::SerializationError(e.to_string()))
    }

    /// Send a payload, blocking while the queue is full
    pub fn send(&self, payload: &T) -> Result<(), IpcError> {
        let bytes = self.encode(payload)?;
        let chunks = ChunkMessage::split(bytes, self.shared.chunk_size);
        if chunks.len() > 1 {
            debug!(
                "putting data: #{} [{}], chunk size: {}",
                chunks[0].message_id,
                chunks.len(),
                self.shared.chunk_size
            );
        }

        for chunk in chunks {
            self.tx.send(chunk).map_err(|_| IpcError::Disconnected)?;
        }
        Ok(())
    }

    /// Blocking send that gives up with [`IpcError::Cancelled`] once
    /// `keep_going` returns false, checked every `poll` while blocked.
    ///
    /// Giving up in the middle of a fragmented payload leaves its head in the
    /// queue; callers only do this when the whole run is being torn down.
    pub fn send_while(
        &self,
        payload: &T,
        poll: Duration,
        keep_going: impl Fn() -> bool,
    ) -> Result<(), IpcError> {
        let bytes = self.encode(payload)?;
        for mut chunk in ChunkMessage::split(bytes, self.shared.chunk_size) {
            loop {
                match self.tx.send_timeout(chunk, poll) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Timeout(returned)) => {
                        if !keep_going() {
                            return Err(IpcError::Cancelled);
                        }
                        chunk = returned;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return Err(IpcError::Disconnected),
                }
            }
        }
        Ok(())
    }

    /// Non-blocking send of a payload that must fit in one chunk
    pub fn try_send(&self, payload: &T) -> Result<(), IpcError> {
        let bytes = self.encode(payload)?;
        if bytes.len() > self.shared.chunk_size {
            return Err(IpcError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.shared.chunk_size,
            });
        }

        self.tx
            .try_send(ChunkMessage::single(bytes))
            .map_err(|e| match e {
                TrySendError::Full(_) => IpcError::Full,
                TrySendError::Disconnected(_) => IpcError::Disconnected,
            })
    }
}

impl<T: DeserializeOwned> ChunkedQueue<T> {
    fn decode(bytes: &[u8]) -> Result<T, IpcError> {
        serde_json::from_slice(bytes).map_err(|e| IpcError::DeserializationError(e.to_string()))
    }

    /// Block until a complete payload is available
    pub fn receive(&self) -> Result<T, IpcError> {
        self.receive_until(None)
    }

    /// Wait at most `timeout` for a complete payload
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, IpcError> {
        self.receive_until(Some(Instant::now() + timeout))
    }

    fn receive_until(&self, deadline: Option<Instant>) -> Result<T, IpcError> {
        let mut buffer = match deadline {
            Some(deadline) => self
                .shared
                .buffer
                .try_lock_until(deadline)
                .ok_or(IpcError::Timeout)?,
            None => self.shared.buffer.lock(),
        };

        loop {
            let chunk = match deadline {
                Some(deadline) => self.rx.recv_deadline(deadline).map_err(|e| match e {
                    RecvTimeoutError::Timeout => IpcError::Timeout,
                    RecvTimeoutError::Disconnected => IpcError::Disconnected,
                })?,
                None => self.rx.recv().map_err(|_| IpcError::Disconnected)?,
            };

            trace!(
                "getting data: #{} [{}/{}]",
                chunk.message_id,
                chunk.chunk_index,
                chunk.chunk_count
            );
            if let Some(bytes) = buffer.accept(chunk)? {
                return Self::decode(&bytes);
            }
        }
    }

    /// Take a complete payload if one is immediately available.
    ///
    /// Frames of a fragmented payload that are already queued are consumed
    /// into the reassembly buffer even when the payload is not complete yet.
    pub fn try_receive(&self) -> Result<Option<T>, IpcError> {
        let Some(mut buffer) = self.shared.buffer.try_lock() else {
            return Ok(None);
        };

        loop {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    if let Some(bytes) = buffer.accept(chunk)? {
                        return Self::decode(&bytes).map(Some);
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(IpcError::Disconnected),
            }
        }
    }
}
