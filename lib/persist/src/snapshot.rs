use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// The value of a captured global.
///
/// Serializes as a plain number for `i32` globals and as a `[high, low]`
/// pair for `i64` globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalValue {
    /// An `i32` global.
    I32(i32),
    /// An `i64` global, split into its high and low 32 bits.
    I64([i32; 2]),
}

impl GlobalValue {
    /// Splits an `i64` into its `[high, low]` halves.
    pub fn from_i64(value: i64) -> Self {
        Self::I64([(value >> 32) as i32, value as i32])
    }

    /// Reassembles the value as an `i64`. `i32` values are sign-extended.
    pub fn to_i64(self) -> i64 {
        match self {
            Self::I32(value) => i64::from(value),
            Self::I64([high, low]) => (i64::from(high) << 32) | i64::from(low as u32),
        }
    }
}

/// The observable state of an instance at one point in time.
///
/// A snapshot holds plain integers only and round-trips through JSON
/// without loss.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    /// Linear memory as little-endian 32-bit words, if it was exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<u32>>,
    /// One entry per table slot: the function index of the module's own
    /// function stored there, or `None` for empty slots and functions that
    /// don't belong to the module.
    #[serde(default)]
    pub table: Vec<Option<u32>>,
    /// Global values by global index. Globals without accessors are `None`.
    #[serde(default)]
    pub globals: Vec<Option<GlobalValue>>,
    /// The prefix of the accessor exports the snapshot was captured with.
    pub symbol: String,
}

impl InstanceSnapshot {
    /// Creates an empty snapshot for accessors prefixed with `symbol`.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// The captured value of the global at `index`.
    pub fn global(&self, index: u32) -> Option<GlobalValue> {
        self.globals.get(index as usize).copied().flatten()
    }

    /// Records the value of the global at `index`.
    pub fn set_global(&mut self, index: u32, value: GlobalValue) {
        let index = index as usize;
        if self.globals.len() <= index {
            self.globals.resize(index + 1, None);
        }
        self.globals[index] = Some(value);
    }

    /// Serializes the snapshot to JSON.
    pub fn to_json(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(json)?)
    }
}
