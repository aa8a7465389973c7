//! Rank-to-rank messaging for the curriculum protocol
//!
//! The coordinator broadcasts arm choices, scatters validation data, and
//! the whole group averages evaluation scores. All operations block until
//! the peer acts; the protocol is batch-synchronous and carries no
//! timeouts, so a crashed peer surfaces as a disconnect, not a retry.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Tag reserved for the all-reduce collective
const REDUCE_TAG: u64 = u64::MAX;

/// Errors from group communication
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("peer rank {0} disconnected")]
    Disconnected(usize),

    #[error("rank {rank} out of range for world size {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },

    #[error("payload length mismatch from rank {src}: expected {expected}, got {got}")]
    LengthMismatch {
        src: usize,
        expected: usize,
        got: usize,
    },

    #[error("unexpected payload type from rank {src} under tag {tag}")]
    PayloadType { src: usize, tag: u64 },
}

/// Result alias for communication operations
pub type Result<T> = std::result::Result<T, CommError>;

#[derive(Debug, Clone)]
enum Payload {
    Scalar(u64),
    Buffer(Vec<f32>),
}

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    payload: Payload,
}

/// Blocking point-to-point and collective operations between ranks
///
/// Tags disambiguate concurrent streams between the same pair of ranks;
/// `u64::MAX` is reserved for collectives. Rank 0 is the coordinator.
pub trait Communicator {
    /// This rank's id
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn world_size(&self) -> usize;

    /// Send one integer to a peer under a tag
    fn send_u64(&mut self, dst: usize, tag: u64, value: u64) -> Result<()>;

    /// Receive one integer from a peer, blocking until the tag arrives
    fn recv_u64(&mut self, src: usize, tag: u64) -> Result<u64>;

    /// Send a float buffer to a peer under a tag
    fn send_f32s(&mut self, dst: usize, tag: u64, data: &[f32]) -> Result<()>;

    /// Receive a float buffer into a pre-sized slice
    ///
    /// The receiver allocates; a payload of any other length is an error.
    fn recv_f32s(&mut self, src: usize, tag: u64, out: &mut [f32]) -> Result<()>;

    /// Elementwise sum across all ranks, in place
    ///
    /// Blocks until every rank contributes. Every rank accumulates in the
    /// same rank order, so all ranks end with bit-identical sums.
    fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()>;
}

/// In-process communicator backed by a full mesh of channels
///
/// One endpoint per rank, each typically owned by a thread standing in for
/// a process. Receives are tag-filtered: messages arriving under other tags
/// queue per source until asked for, so interleaved streams cannot steal
/// each other's payloads.
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    world_size: usize,
    /// Indexed by destination rank
    senders: Vec<Sender<Message>>,
    /// Indexed by source rank
    receivers: Vec<Receiver<Message>>,
    /// Out-of-tag-order messages, per source
    pending: Vec<VecDeque<Message>>,
}

impl LocalComm {
    /// Create a fully connected group of `world_size` endpoints
    ///
    /// Endpoint `i` of the returned vector is rank `i`.
    #[must_use]
    pub fn new_group(world_size: usize) -> Vec<LocalComm> {
        let mut senders: Vec<Vec<Sender<Message>>> =
            (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
        let mut receivers: Vec<Vec<Receiver<Message>>> =
            (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
        for dst in 0..world_size {
            for src in 0..world_size {
                let (tx, rx) = channel();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalComm {
                rank,
                world_size,
                senders,
                receivers,
                pending: (0..world_size).map(|_| VecDeque::new()).collect(),
            })
            .collect()
    }

    /// Single-rank group for non-distributed runs
    #[must_use]
    pub fn single() -> LocalComm {
        let mut group = Self::new_group(1);
        // new_group(1) always yields exactly one endpoint
        group.remove(0)
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.world_size {
            return Err(CommError::RankOutOfRange {
                rank,
                world_size: self.world_size,
            });
        }
        Ok(())
    }

    fn send(&self, dst: usize, message: Message) -> Result<()> {
        self.check_rank(dst)?;
        self.senders[dst]
            .send(message)
            .map_err(|_| CommError::Disconnected(dst))
    }

    fn recv_message(&mut self, src: usize, tag: u64) -> Result<Message> {
        self.check_rank(src)?;
        if let Some(pos) = self.pending[src].iter().position(|m| m.tag == tag) {
            if let Some(message) = self.pending[src].remove(pos) {
                return Ok(message);
            }
        }
        loop {
            let message = self.receivers[src]
                .recv()
                .map_err(|_| CommError::Disconnected(src))?;
            if message.tag == tag {
                return Ok(message);
            }
            self.pending[src].push_back(message);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn send_u64(&mut self, dst: usize, tag: u64, value: u64) -> Result<()> {
        self.send(
            dst,
            Message {
                tag,
                payload: Payload::Scalar(value),
            },
        )
    }

    fn recv_u64(&mut self, src: usize, tag: u64) -> Result<u64> {
        match self.recv_message(src, tag)?.payload {
            Payload::Scalar(value) => Ok(value),
            Payload::Buffer(_) => Err(CommError::PayloadType { src, tag }),
        }
    }

    fn send_f32s(&mut self, dst: usize, tag: u64, data: &[f32]) -> Result<()> {
        self.send(
            dst,
            Message {
                tag,
                payload: Payload::Buffer(data.to_vec()),
            },
        )
    }

    fn recv_f32s(&mut self, src: usize, tag: u64, out: &mut [f32]) -> Result<()> {
        match self.recv_message(src, tag)?.payload {
            Payload::Buffer(data) => {
                if data.len() != out.len() {
                    return Err(CommError::LengthMismatch {
                        src,
                        expected: out.len(),
                        got: data.len(),
                    });
                }
                out.copy_from_slice(&data);
                Ok(())
            }
            Payload::Scalar(_) => Err(CommError::PayloadType { src, tag }),
        }
    }

    fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }
        for dst in 0..self.world_size {
            if dst != self.rank {
                self.send_f32s(dst, REDUCE_TAG, buf)?;
            }
        }
        // Accumulate in rank order so every rank sums identically
        let mut parts: Vec<Vec<f32>> = Vec::with_capacity(self.world_size);
        for src in 0..self.world_size {
            if src == self.rank {
                parts.push(buf.to_vec());
            } else {
                let mut incoming = vec![0.0f32; buf.len()];
                self.recv_f32s(src, REDUCE_TAG, &mut incoming)?;
                parts.push(incoming);
            }
        }
        buf.fill(0.0);
        for part in &parts {
            for (acc, &v) in buf.iter_mut().zip(part) {
                *acc += v;
            }
        }
        Ok(())
    }
}
