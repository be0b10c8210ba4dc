use std::collections::VecDeque;

use crate::{ConnectionId, OpCode, error::SendError};

/// A message addressed to a connection whose handshake has not completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingSend {
    pub(crate) id: ConnectionId,
    pub(crate) opcode: OpCode,
    pub(crate) payload: Vec<u8>,
    pub(crate) fin: bool,
}

/// Where a queued entry's connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Upgraded: send now.
    Ready,
    /// Still handshaking: keep waiting.
    Waiting,
    /// No longer in the connection set: drop the entry.
    Gone,
}

/// FIFO of held sends, bounded server wide.
#[derive(Debug)]
pub(crate) struct PendingSends {
    entries: VecDeque<PendingSend>,
    capacity: usize,
}

impl PendingSends {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, entry: PendingSend) -> Result<(), SendError> {
        if self.entries.len() >= self.capacity {
            return Err(SendError::PendingQueueFull {
                capacity: self.capacity,
            });
        }

        self.entries.push_back(entry);

        Ok(())
    }

    /// Removes and returns, in queue order, every entry whose connection is
    /// ready. Entries of vanished connections are dropped.
    pub(crate) fn take_ready<F>(&mut self, mut readiness: F) -> Vec<PendingSend>
    where
        F: FnMut(ConnectionId) -> Readiness,
    {
        let mut ready = Vec::new();

        self.entries.retain_mut(|entry| match readiness(entry.id) {
            Readiness::Waiting => true,
            Readiness::Gone => {
                tracing::debug!(id = %entry.id, "Dropping held message for a closed connection");

                false
            }
            Readiness::Ready => {
                ready.push(PendingSend {
                    id: entry.id,
                    opcode: entry.opcode,
                    payload: std::mem::take(&mut entry.payload),
                    fin: entry.fin,
                });

                false
            }
        });

        ready
    }

    /// Removes and returns, in queue order, every entry for `id`.
    pub(crate) fn take_for(&mut self, id: ConnectionId) -> Vec<PendingSend> {
        self.take_ready(|entry| match entry == id {
            true => Readiness::Ready,
            false => Readiness::Waiting,
        })
    }
}
