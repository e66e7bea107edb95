use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity of the remote resource a ledger was planned against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub size:     u64,
    pub block:    u64,
    pub modified: String,
}

impl Metadata {
    pub fn new(size: u64, block: u64, modified: impl Into<String>) -> Self {
        Self {
            size,
            block,
            modified: modified.into(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> { Ok(postcard::to_stdvec(self)?) }

    pub(crate) fn decode(raw: &[u8]) -> Result<Self> { Ok(postcard::from_bytes(raw)?) }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{size: {}, block: {}, modified: {:?}}}",
            self.size, self.block, self.modified
        )
    }
}

pub(crate) struct DbKeys;

impl DbKeys {
    pub const METADATA_TREE: &'static str = "metadata";
    pub const TASK_TREE: &'static str = "task";
    pub const METADATA: &'static [u8] = b"md";

    /// Big-endian so a tree scan walks ranges in id order.
    pub fn task(id: u64) -> [u8; 8] { id.to_be_bytes() }

    pub fn task_id(key: &[u8]) -> Option<u64> { key.try_into().ok().map(u64::from_be_bytes) }

    pub fn progress(raw: &[u8]) -> Option<u64> { raw.try_into().ok().map(u64::from_be_bytes) }
}
