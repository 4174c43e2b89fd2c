//! The errors produced while instrumenting a module or moving state
//! in and out of an instance.
use thiserror::Error;
use wasmer::{ExportError, MemoryAccessError, MemoryError, RuntimeError};
use wasmparser::BinaryReaderError;

/// The `InjectError` can happen when instrumenting a WebAssembly binary.
///
/// Every variant is fatal: the injector never returns a partially
/// rewritten module.
#[derive(Error, Debug)]
pub enum InjectError {
    /// The input is not a well-formed WebAssembly module.
    #[error("malformed module: {0}")]
    Parse(#[from] BinaryReaderError),
    /// A section's entry count could not be decoded.
    #[error("malformed section entry count: {0}")]
    Leb128(#[from] leb128::read::Error),
    /// The binary uses an encoding other than a core module (e.g. a component).
    #[error("unsupported binary encoding, only core modules can be instrumented")]
    UnsupportedEncoding,
    /// Appending the accessors would overflow a 32-bit index space.
    #[error("too many entries in the {0} index space")]
    TooManyEntries(&'static str),
}

/// The `TransferError` can happen when capturing the state of an
/// instance or applying a snapshot to it.
#[derive(Error, Debug)]
pub enum TransferError {
    /// An injected export has an unexpected type.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// Calling an injected accessor trapped.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Reading or writing the linear memory failed.
    #[error(transparent)]
    MemoryAccess(#[from] MemoryAccessError),
    /// The linear memory could not grow to the snapshot's size.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// An export the snapshot relies on does not exist on the instance.
    #[error("missing export {0}")]
    MissingExport(String),
    /// The instance was not instrumented with the same symbol or inclusion
    /// policy as the one the snapshot was captured from.
    #[error("snapshot does not match the instance: {0}")]
    PolicyMismatch(String),
    /// A snapshot could not be converted to or from JSON.
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
