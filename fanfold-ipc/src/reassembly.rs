//! Receive-side reassembly of fragmented payloads

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::IpcError;
use crate::protocol::ChunkMessage;

#[derive(Debug)]
struct PartialMessage {
    chunk_count: u32,
    bodies: Vec<Bytes>,
}

/// Chunk bodies of in-flight messages, keyed by message id.
///
/// An entry is created by the first chunk of a multi-chunk message and removed
/// exactly once, either when the last chunk completes it or when a chunk
/// proves the entry corrupt.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    pending: HashMap<Uuid, PartialMessage>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the complete payload once its last chunk arrives.
    pub fn accept(&mut self, chunk: ChunkMessage) -> Result<Option<Bytes>, IpcError> {
        if chunk.chunk_count == 0 || chunk.chunk_index == 0 || chunk.chunk_index > chunk.chunk_count
        {
            self.pending.remove(&chunk.message_id);
            return Err(IpcError::MalformedMessage(format!(
                "chunk {}/{} of message {} is out of range",
                chunk.chunk_index, chunk.chunk_count, chunk.message_id
            )));
        }

        // Small message: no buffering at all
        if chunk.is_single() && !self.pending.contains_key(&chunk.message_id) {
            return Ok(Some(chunk.body));
        }

        let Some(partial) = self.pending.get_mut(&chunk.message_id) else {
            if chunk.chunk_index != 1 {
                return Err(IpcError::MalformedMessage(format!(
                    "chunk {}/{} arrived for message {} that was never started",
                    chunk.chunk_index, chunk.chunk_count, chunk.message_id
                )));
            }
            let mut bodies = Vec::with_capacity(chunk.chunk_count as usize);
            bodies.push(chunk.body);
            self.pending.insert(
                chunk.message_id,
                PartialMessage {
                    chunk_count: chunk.chunk_count,
                    bodies,
                },
            );
            return Ok(None);
        };

        let expected = partial.bodies.len() as u32 + 1;
        if partial.chunk_count != chunk.chunk_count || chunk.chunk_index != expected {
            let declared = partial.chunk_count;
            self.pending.remove(&chunk.message_id);
            return Err(IpcError::MalformedMessage(format!(
                "message {} expected chunk {}/{}, got {}/{}",
                chunk.message_id, expected, declared, chunk.chunk_index, chunk.chunk_count
            )));
        }

        let last = chunk.is_last();
        partial.bodies.push(chunk.body);
        if !last {
            return Ok(None);
        }

        let Some(done) = self.pending.remove(&chunk.message_id) else {
            return Ok(None);
        };
        let total = done.bodies.iter().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(total);
        for body in &done.bodies {
            payload.extend_from_slice(body);
        }
        Ok(Some(payload.freeze()))
    }

    /// Number of messages with chunks still outstanding
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
