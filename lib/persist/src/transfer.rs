//! Moving state out of and into instances of instrumented modules.
//!
//! Capturing reads every export that starts with the symbol: the memory is
//! copied word by word, every table slot is matched against the module's
//! own `func_<index>` exports, and each global getter is called. Applying a
//! snapshot writes the same exports back in the same shape.
//!
//! Table slots that hold functions which don't belong to the module (host
//! functions, functions of other instances) can't be named in a snapshot,
//! so they are captured as `None` and left untouched when applying.
use std::collections::{BTreeMap, HashMap};

use byteorder::{ByteOrder, LittleEndian};
use wasmer::{
    AsStoreMut, AsStoreRef, Extern, Function, Instance, Memory, Pages, Table, Value,
    WASM_PAGE_SIZE,
};

use crate::error::TransferError;
use crate::names::AccessorName;
use crate::snapshot::{GlobalValue, InstanceSnapshot};

/// Whether an instance's live state is known to match its last snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// The instance may have diverged from any snapshot.
    #[default]
    Normal,
    /// The instance was just captured and hasn't been resumed since.
    Captured,
}

/// An instance of an instrumented module, together with the symbol its
/// accessors were injected under.
///
/// `PersistentInstance` tracks whether the instance was just captured: the
/// first [`resume`](Self::resume) after a [`hibernate`](Self::hibernate) on
/// the same instance leaves the instance alone, since it already holds
/// exactly the captured state.
#[derive(Debug, Clone)]
pub struct PersistentInstance {
    instance: Instance,
    symbol: String,
    state: TransferState,
}

impl PersistentInstance {
    /// Wraps an instance whose module was instrumented with `symbol`.
    pub fn new(instance: Instance, symbol: impl Into<String>) -> Self {
        Self {
            instance,
            symbol: symbol.into(),
            state: TransferState::Normal,
        }
    }

    /// The wrapped instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The export prefix of the injected accessors.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The current transfer state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Unwraps the instance.
    pub fn into_inner(self) -> Instance {
        self.instance
    }

    /// Captures the state of the instance.
    pub fn hibernate(
        &mut self,
        store: &mut impl AsStoreMut,
    ) -> Result<InstanceSnapshot, TransferError> {
        let snapshot = capture(store, &self.instance, &self.symbol)?;
        self.state = TransferState::Captured;
        Ok(snapshot)
    }

    /// Brings the instance to the state recorded in `snapshot`.
    ///
    /// Right after [`hibernate`](Self::hibernate) this only resets the
    /// transfer state.
    pub fn resume(
        &mut self,
        store: &mut impl AsStoreMut,
        snapshot: &InstanceSnapshot,
    ) -> Result<&Instance, TransferError> {
        match self.state {
            TransferState::Captured => {
                tracing::debug!(symbol = %self.symbol, "instance was just captured, skipping resume");
                self.state = TransferState::Normal;
            }
            TransferState::Normal => apply(store, &self.instance, snapshot)?,
        }
        Ok(&self.instance)
    }
}

/// Captures the state of `instance` through the accessors injected under
/// `symbol`.
#[tracing::instrument(level = "debug", skip_all, fields(%symbol))]
pub fn capture(
    store: &mut impl AsStoreMut,
    instance: &Instance,
    symbol: &str,
) -> Result<InstanceSnapshot, TransferError> {
    let exports = InjectedExports::collect(instance, symbol);
    let mut snapshot = InstanceSnapshot::new(symbol);

    if let Some(memory) = exports.memory {
        let bytes = memory.view(&*store).copy_to_vec()?;
        let mut words = vec![0; bytes.len() / 4];
        LittleEndian::read_u32_into(&bytes[..words.len() * 4], &mut words);
        tracing::trace!(words = words.len(), "captured memory");
        snapshot.memory = Some(words);
    }

    if let Some(table) = exports.table {
        snapshot.table = capture_table(store, table, &exports.functions)?;
    }

    let mut halves: BTreeMap<u32, (Option<i32>, Option<i32>)> = BTreeMap::new();
    for (name, function) in &exports.accessors {
        match *name {
            AccessorName::I32Getter(index) => {
                let value = function.typed::<(), i32>(&*store)?.call(store)?;
                snapshot.set_global(index, GlobalValue::I32(value));
            }
            AccessorName::I64GetterHigh(index) => {
                let value = function.typed::<(), i32>(&*store)?.call(store)?;
                halves.entry(index).or_default().0 = Some(value);
            }
            AccessorName::I64GetterLow(index) => {
                let value = function.typed::<(), i32>(&*store)?.call(store)?;
                halves.entry(index).or_default().1 = Some(value);
            }
            _ => {}
        }
    }
    for (index, pair) in halves {
        match pair {
            (Some(high), Some(low)) => snapshot.set_global(index, GlobalValue::I64([high, low])),
            (None, _) => {
                return Err(TransferError::MissingExport(
                    AccessorName::I64GetterHigh(index).with_symbol(symbol),
                ))
            }
            (_, None) => {
                return Err(TransferError::MissingExport(
                    AccessorName::I64GetterLow(index).with_symbol(symbol),
                ))
            }
        }
    }

    tracing::debug!(
        memory = snapshot.memory.is_some(),
        table = snapshot.table.len(),
        globals = snapshot.globals.len(),
        "captured instance"
    );
    Ok(snapshot)
}

/// Brings `instance` to the state recorded in `snapshot`.
///
/// Parts of the instance the snapshot holds no value for are left as they
/// are. A snapshot that needs an accessor the instance doesn't export was
/// taken from a module instrumented differently, and is rejected.
#[tracing::instrument(level = "debug", skip_all, fields(symbol = %snapshot.symbol))]
pub fn apply(
    store: &mut impl AsStoreMut,
    instance: &Instance,
    snapshot: &InstanceSnapshot,
) -> Result<(), TransferError> {
    let symbol = snapshot.symbol.as_str();
    let exports = InjectedExports::collect(instance, symbol);

    if let Some(words) = &snapshot.memory {
        let memory = exports.memory.ok_or_else(|| {
            TransferError::PolicyMismatch(format!(
                "the snapshot holds memory but `{}` is not exported",
                AccessorName::Memory.with_symbol(symbol)
            ))
        })?;
        apply_memory(store, memory, words)?;
    }

    if snapshot.table.iter().any(Option::is_some) {
        let table = exports.table.ok_or_else(|| {
            TransferError::PolicyMismatch(format!(
                "the snapshot holds table entries but `{}` is not exported",
                AccessorName::Table.with_symbol(symbol)
            ))
        })?;
        apply_table(store, table, &exports.functions, symbol, &snapshot.table)?;
    }

    for (index, value) in (0u32..).zip(&snapshot.globals) {
        let Some(value) = *value else {
            continue;
        };
        match value {
            GlobalValue::I32(value) => {
                let setter = exports.accessor(symbol, AccessorName::I32Setter(index))?;
                setter.typed::<i32, ()>(&*store)?.call(store, value)?;
            }
            GlobalValue::I64([high, low]) => {
                let setter = exports.accessor(symbol, AccessorName::I64Setter(index))?;
                setter
                    .typed::<(i32, i32), ()>(&*store)?
                    .call(store, high, low)?;
            }
        }
        tracing::trace!(index, ?value, "restored global");
    }

    Ok(())
}

fn capture_table(
    store: &mut impl AsStoreMut,
    table: &Table,
    functions: &BTreeMap<u32, &Function>,
) -> Result<Vec<Option<u32>>, TransferError> {
    let owned: HashMap<usize, u32> = functions
        .iter()
        .map(|(index, function)| (funcref_identity(&*store, function), *index))
        .collect();

    let size = table.size(&*store);
    let mut entries = Vec::with_capacity(size as usize);
    for slot in 0..size {
        let entry = match table.get(store, slot) {
            Some(Value::FuncRef(Some(function))) => {
                let entry = owned.get(&funcref_identity(&*store, &function)).copied();
                if entry.is_none() {
                    tracing::trace!(slot, "dropping function not owned by the module");
                }
                entry
            }
            _ => None,
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn apply_memory(
    store: &mut impl AsStoreMut,
    memory: &Memory,
    words: &[u32],
) -> Result<(), TransferError> {
    let mut bytes = vec![0; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);

    let current = memory.view(&*store).size();
    let required = bytes.len().div_ceil(WASM_PAGE_SIZE) as u32;
    if required > current.0 {
        tracing::debug!(from = current.0, to = required, "growing memory");
        memory.grow(store, Pages(required - current.0))?;
    }

    memory.view(&*store).write(0, &bytes)?;
    Ok(())
}

fn apply_table(
    store: &mut impl AsStoreMut,
    table: &Table,
    functions: &BTreeMap<u32, &Function>,
    symbol: &str,
    entries: &[Option<u32>],
) -> Result<(), TransferError> {
    let len = u32::try_from(entries.len()).map_err(|_| {
        TransferError::PolicyMismatch(format!("table snapshot has {} slots", entries.len()))
    })?;
    let size = table.size(&*store);
    if len > size {
        tracing::debug!(from = size, to = len, "growing table");
        table.grow(store, len - size, Value::FuncRef(None))?;
    }

    for (slot, index) in (0u32..).zip(entries) {
        let Some(index) = *index else {
            continue;
        };
        let function = functions.get(&index).ok_or_else(|| {
            TransferError::MissingExport(AccessorName::Function(index).with_symbol(symbol))
        })?;
        table.set(store, slot, Value::FuncRef(Some((*function).clone())))?;
    }
    Ok(())
}

/// The address of the function's runtime reference. Two `Function`
/// handles refer to the same function exactly when these are equal.
fn funcref_identity(store: &impl AsStoreRef, function: &Function) -> usize {
    let raw = Value::FuncRef(Some(function.clone())).as_raw(store);
    // SAFETY: `as_raw` of a `FuncRef` always initializes the `funcref` field.
    unsafe { raw.funcref }
}

/// The injected exports of an instance, sorted by what they expose.
struct InjectedExports<'a> {
    memory: Option<&'a Memory>,
    table: Option<&'a Table>,
    functions: BTreeMap<u32, &'a Function>,
    accessors: Vec<(AccessorName, &'a Function)>,
}

impl<'a> InjectedExports<'a> {
    fn collect(instance: &'a Instance, symbol: &str) -> Self {
        let mut exports = Self {
            memory: None,
            table: None,
            functions: BTreeMap::new(),
            accessors: Vec::new(),
        };
        for (name, export) in instance.exports.iter() {
            let Some(accessor) = AccessorName::parse(symbol, name) else {
                continue;
            };
            match (accessor, export) {
                (AccessorName::Memory, Extern::Memory(memory)) => exports.memory = Some(memory),
                (AccessorName::Table, Extern::Table(table)) => exports.table = Some(table),
                (AccessorName::Function(index), Extern::Function(function)) => {
                    exports.functions.insert(index, function);
                }
                (_, Extern::Function(function)) if accessor.global_index().is_some() => {
                    exports.accessors.push((accessor, function));
                }
                _ => tracing::trace!(%name, "ignoring export with an unexpected type"),
            }
        }
        exports
    }

    fn accessor(&self, symbol: &str, name: AccessorName) -> Result<&'a Function, TransferError> {
        self.accessors
            .iter()
            .find(|(accessor, _)| *accessor == name)
            .map(|(_, function)| *function)
            .ok_or_else(|| TransferError::MissingExport(name.with_symbol(symbol)))
    }
}
