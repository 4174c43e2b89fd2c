//! `wasmer-persist` captures the state of a WebAssembly instance into a
//! portable snapshot, and restores fresh instances to a captured state.
//!
//! It works in two steps:
//!
//! 1. [`prepare`] instruments a module binary: it exports the memory, the
//!    table and every locally defined function, and adds getter and setter
//!    functions for the mutable globals. All the added exports share a
//!    caller-chosen prefix, the *symbol*.
//! 2. [`hibernate`] and [`resume`] use those exports on a running
//!    [`Instance`](wasmer::Instance) to capture an [`InstanceSnapshot`] and
//!    to apply one.
//!
//! ```
//! use wasmer::{imports, Instance, Module, Store};
//! use wasmer_persist::{prepare, GlobalValue, InclusionPolicy, PersistentInstance, DEFAULT_SYMBOL};
//!
//! # fn main() -> anyhow::Result<()> {
//! let wasm = wat::parse_str("(module (global (mut i32) (i32.const -2)))")?;
//! let wasm = prepare(&wasm, &InclusionPolicy::default(), DEFAULT_SYMBOL)?;
//!
//! let mut store = Store::default();
//! let module = Module::new(&store, &wasm)?;
//!
//! let instance = Instance::new(&mut store, &module, &imports! {})?;
//! let mut instance = PersistentInstance::new(instance, DEFAULT_SYMBOL);
//! let mut snapshot = instance.hibernate(&mut store)?;
//! assert_eq!(snapshot.globals, [Some(GlobalValue::I32(-2))]);
//!
//! snapshot.globals[0] = Some(GlobalValue::I32(8));
//! let fresh = Instance::new(&mut store, &module, &imports! {})?;
//! let mut fresh = PersistentInstance::new(fresh, DEFAULT_SYMBOL);
//! fresh.resume(&mut store, &snapshot)?;
//! assert_eq!(fresh.hibernate(&mut store)?, snapshot);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs, unused_extern_crates)]
#![warn(unused_import_braces)]
#![cfg_attr(feature = "cargo-clippy", allow(clippy::new_without_default))]
#![cfg_attr(
    feature = "cargo-clippy",
    warn(
        clippy::mut_mut,
        clippy::nonminimal_bool,
        clippy::map_unwrap_or,
        clippy::print_stdout,
        clippy::use_self
    )
)]

mod error;
mod injector;
mod names;
mod policy;
mod snapshot;
mod transfer;

pub use crate::error::{InjectError, TransferError};
pub use crate::injector::{AccessorKind, ExportRecord, Injector, DEFAULT_SYMBOL};
pub use crate::names::AccessorName;
pub use crate::policy::InclusionPolicy;
pub use crate::snapshot::{GlobalValue, InstanceSnapshot};
pub use crate::transfer::{apply, capture, PersistentInstance, TransferState};

use wasmer::{AsStoreMut, Instance};

/// Instruments `wasm` with the accessors `include` selects, exported under
/// names prefixed with `symbol`.
pub fn prepare(wasm: &[u8], include: &InclusionPolicy, symbol: &str) -> Result<Vec<u8>, InjectError> {
    Injector::new(include.clone(), symbol).inject(wasm)
}

/// Captures the state of an instance of a module prepared with `symbol`.
///
/// To have the next [`resume`] on the same instance skip the redundant
/// write back, capture through [`PersistentInstance::hibernate`] instead.
pub fn hibernate(
    store: &mut impl AsStoreMut,
    instance: &Instance,
    symbol: &str,
) -> Result<InstanceSnapshot, TransferError> {
    capture(store, instance, symbol)
}

/// Applies `snapshot` to an instance of a module prepared with the
/// snapshot's symbol and the same inclusion policy.
pub fn resume<'a>(
    store: &mut impl AsStoreMut,
    instance: &'a Instance,
    snapshot: &InstanceSnapshot,
) -> Result<&'a Instance, TransferError> {
    apply(store, instance, snapshot)?;
    Ok(instance)
}
