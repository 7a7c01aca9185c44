//! One write-batch builder scoped to a single `Instruction`, paired with
//! `StorageCore::reader()`/`writer(instruction)`.

use crate::data_store::{BatchOp, Namespace};

/// An opaque, replayable mutation stamped with a clock. The
/// core never interprets `payload`; it only persists and replays it.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub clock: u64,
    pub payload: Vec<u8>,
}

/// Accumulates data-namespace mutations for one instruction. `flush`
/// augments this batch with the meta clock write and commits both
/// atomically, so nothing about atomicity depends on callers
/// using `Writer` correctly beyond calling `flush` exactly once.
pub struct Writer {
    pub(super) instruction: Instruction,
    pub(super) ops: Vec<BatchOp>,
}

impl Writer {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            ops: Vec::new(),
        }
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            namespace: Namespace::Data,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete {
            namespace: Namespace::Data,
            key: key.into(),
        });
    }
}
