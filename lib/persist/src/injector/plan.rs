use wasm_encoder::{Encode, ExportKind};

use super::accessors::{Accessor, Signature};
use super::section::Appended;
use crate::error::InjectError;
use crate::names::AccessorName;

/// An export appended by the injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    /// The full export name, symbol included.
    pub name: String,
    /// What is exported.
    pub kind: ExportKind,
    /// Index of the exported item in its index space.
    pub index: u32,
}

impl Encode for ExportRecord {
    fn encode(&self, sink: &mut Vec<u8>) {
        self.name.as_str().encode(sink);
        self.kind.encode(sink);
        self.index.encode(sink);
    }
}

/// Everything the injector appends to a module.
///
/// Synthesized functions are pushed through [`AccessorPlan::push_accessor`],
/// which appends to the function, code and export lists in one step, so the
/// n-th appended type reference, body and accessor export always describe
/// the same function.
#[derive(Debug)]
pub(crate) struct AccessorPlan<'a> {
    symbol: &'a str,
    /// Type index of the first of the three appended signatures.
    first_type_index: u32,
    /// Function index the next synthesized function will get.
    next_function_index: u32,
    pub(crate) types: Appended,
    pub(crate) functions: Appended,
    pub(crate) code: Appended,
    pub(crate) exports: Appended,
    pub(crate) records: Vec<ExportRecord>,
}

impl<'a> AccessorPlan<'a> {
    /// Starts a plan for a module with `type_count` types and
    /// `function_count` functions (imported ones included).
    pub(crate) fn new(symbol: &'a str, type_count: u32, function_count: u32) -> Self {
        Self {
            symbol,
            first_type_index: type_count,
            next_function_index: function_count,
            types: Appended::default(),
            functions: Appended::default(),
            code: Appended::default(),
            exports: Appended::default(),
            records: Vec::new(),
        }
    }

    /// Appends the accessor signatures to the type section.
    pub(crate) fn push_signatures(&mut self, signatures: &[Signature]) {
        for signature in signatures {
            self.types.push(|sink| signature.encode(sink));
        }
    }

    /// Appends an export of an item that already exists in the module.
    pub(crate) fn push_export(&mut self, name: AccessorName, kind: ExportKind, index: u32) {
        let record = ExportRecord {
            name: name.with_symbol(self.symbol),
            kind,
            index,
        };
        tracing::trace!(name = %record.name, ?kind, index, "exporting");
        self.exports.push(|sink| record.encode(sink));
        self.records.push(record);
    }

    /// Appends a synthesized function: its type reference, its body and
    /// its export.
    pub(crate) fn push_accessor(&mut self, accessor: Accessor) -> Result<(), InjectError> {
        let index = self.next_function_index;
        self.next_function_index = index
            .checked_add(1)
            .ok_or(InjectError::TooManyEntries("function"))?;
        let type_index = self
            .first_type_index
            .checked_add(accessor.signature.offset())
            .ok_or(InjectError::TooManyEntries("type"))?;

        self.functions.push(|sink| type_index.encode(sink));
        self.code.push(|sink| accessor.body.encode(sink));
        self.push_export(accessor.name, ExportKind::Func, index);
        Ok(())
    }
}
