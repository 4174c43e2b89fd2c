//! The injector rewrites a module so that its memory, table and mutable
//! globals are reachable through exports.
//!
//! The rewrite only ever appends:
//!
//! * three function signatures to the type section,
//! * one type reference per synthesized accessor to the function section,
//! * the accessor bodies to the code section,
//! * the memory, table, function and accessor exports to the export section.
//!
//! Every other byte of the original module is copied as is. Sections that
//! must receive entries but don't exist are created in their canonical
//! position.
//!
//! For example, given this input module:
//!
//! ```wat
//! (module
//!   (memory 1)
//!   (global $g (mut i64) (i64.const -2))
//!   (func $f))
//! ```
//!
//! the injector with the default symbol `_` produces a module equivalent to:
//!
//! ```wat
//! (module
//!   (memory 1)
//!   (global $g (mut i64) (i64.const -2))
//!   (func $f)
//!   (func (result i32) global.get $g i64.const 32 i64.shr_u i32.wrap_i64)
//!   (func (result i32) global.get $g i32.wrap_i64)
//!   (func (param i32 i32)
//!     local.get 0 i64.extend_i32_u i64.const 32 i64.shl
//!     local.get 1 i64.extend_i32_u i64.or
//!     global.set $g)
//!   (export "_memory" (memory 0))
//!   (export "_func_0" (func $f))
//!   (export "_global_getter_i64_0_high" (func 1))
//!   (export "_global_getter_i64_0_low" (func 2))
//!   (export "_global_setter_i64_0" (func 3)))
//! ```
mod accessors;
mod plan;
mod section;

pub use self::accessors::AccessorKind;
pub use self::plan::ExportRecord;

use std::ops::Range;

use wasm_encoder::{ExportKind, RawSection, SectionId};
use wasmparser::{Encoding, Parser, Payload, TypeRef};

use self::accessors::SIGNATURES;
use self::plan::AccessorPlan;
use self::section::{rank, Appended};
use crate::error::InjectError;
use crate::names::AccessorName;
use crate::policy::InclusionPolicy;

/// The default prefix of injected export names.
pub const DEFAULT_SYMBOL: &str = "_";

/// Instruments WebAssembly modules with state accessors.
///
/// An `Injector` holds no state between calls: the same injector can be
/// used on any number of modules, from any number of threads.
#[derive(Debug, Clone)]
pub struct Injector {
    policy: InclusionPolicy,
    symbol: String,
}

impl Default for Injector {
    fn default() -> Self {
        Self::new(InclusionPolicy::default(), DEFAULT_SYMBOL)
    }
}

impl Injector {
    /// Creates an injector exporting what `policy` includes, under names
    /// prefixed with `symbol`.
    pub fn new(policy: InclusionPolicy, symbol: impl Into<String>) -> Self {
        Self {
            policy,
            symbol: symbol.into(),
        }
    }

    /// The inclusion policy of this injector.
    pub fn policy(&self) -> &InclusionPolicy {
        &self.policy
    }

    /// The export name prefix of this injector.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Returns a copy of `wasm` with the accessors injected.
    ///
    /// `wasm` must be an unmodified module: instrumenting a module twice
    /// with the same symbol produces duplicate export names.
    #[tracing::instrument(level = "debug", skip_all, fields(symbol = %self.symbol, len = wasm.len()))]
    pub fn inject(&self, wasm: &[u8]) -> Result<Vec<u8>, InjectError> {
        Ok(self.instrument(wasm)?.0)
    }

    /// Like [`Injector::inject`], but also returns the appended exports in
    /// the order they were added.
    pub fn inject_with_exports(&self, wasm: &[u8]) -> Result<(Vec<u8>, Vec<ExportRecord>), InjectError> {
        self.instrument(wasm)
    }

    fn instrument(&self, wasm: &[u8]) -> Result<(Vec<u8>, Vec<ExportRecord>), InjectError> {
        let layout = ModuleLayout::scan(wasm)?;
        let plan = self.plan(&layout)?;
        tracing::debug!(
            types = plan.types.count,
            functions = plan.functions.count,
            exports = plan.exports.count,
            "injecting accessors"
        );
        let records = plan.records.clone();
        Ok((rewrite(wasm, &layout, plan)?, records))
    }

    fn plan(&self, layout: &ModuleLayout) -> Result<AccessorPlan<'_>, InjectError> {
        let function_count = layout
            .imported_functions
            .checked_add(layout.local_functions)
            .ok_or(InjectError::TooManyEntries("function"))?;
        let mut plan = AccessorPlan::new(&self.symbol, layout.type_count, function_count);

        // The signatures go into an existing type section unconditionally.
        // A missing type section is only created when it gets used.
        let accessor_globals: Vec<_> = layout
            .globals
            .iter()
            .filter_map(|global| self.accessor_kind(global).map(|kind| (global.index, kind)))
            .collect();
        if layout.sections.contains(SectionId::Type) || !accessor_globals.is_empty() {
            plan.push_signatures(&SIGNATURES);
        }

        if self.policy.memory {
            if let Some(index) = layout.memory {
                plan.push_export(AccessorName::Memory, ExportKind::Memory, index);
            }
        }
        if self.policy.table {
            if let Some(index) = layout.table {
                plan.push_export(AccessorName::Table, ExportKind::Table, index);
            }
        }

        for local in 0..layout.local_functions {
            let index = layout.imported_functions + local;
            plan.push_export(AccessorName::Function(index), ExportKind::Func, index);
        }

        for (index, kind) in accessor_globals {
            for accessor in kind.accessors(index) {
                plan.push_accessor(accessor)?;
            }
        }

        Ok(plan)
    }

    fn accessor_kind(&self, global: &GlobalInfo) -> Option<AccessorKind> {
        if !global.mutable {
            return None;
        }
        if !self.policy.includes_global(global.index) {
            tracing::debug!(index = global.index, "global excluded by policy");
            return None;
        }
        let kind = AccessorKind::for_value_type(global.ty);
        if kind.is_none() {
            tracing::debug!(index = global.index, ty = ?global.ty, "no accessors for global type");
        }
        kind
    }
}

/// A global defined in the module's global section.
#[derive(Debug, Clone, Copy)]
struct GlobalInfo {
    /// Absolute global index, imported globals included.
    index: u32,
    ty: wasmparser::ValType,
    mutable: bool,
}

/// Sections present in a module, as a bit set over section ids.
#[derive(Debug, Default, Clone, Copy)]
struct SectionSet(u32);

impl SectionSet {
    fn insert(&mut self, id: u8) {
        self.0 |= 1 << id;
    }

    fn contains(self, id: SectionId) -> bool {
        self.0 & (1 << u8::from(id)) != 0
    }
}

/// What the injector needs to know about the original module.
#[derive(Debug, Default)]
struct ModuleLayout {
    sections: SectionSet,
    type_count: u32,
    imported_functions: u32,
    imported_globals: u32,
    imported_memories: u32,
    imported_tables: u32,
    local_functions: u32,
    /// Index of the first defined memory.
    memory: Option<u32>,
    /// Index of the first defined table.
    table: Option<u32>,
    globals: Vec<GlobalInfo>,
}

impl ModuleLayout {
    fn scan(wasm: &[u8]) -> Result<Self, InjectError> {
        let mut layout = Self::default();
        for payload in Parser::new(0).parse_all(wasm) {
            let payload = payload?;
            if let Some((id, _)) = payload.as_section() {
                if id <= 31 {
                    layout.sections.insert(id);
                }
            }
            match payload {
                Payload::Version { encoding, .. } => {
                    if encoding != Encoding::Module {
                        return Err(InjectError::UnsupportedEncoding);
                    }
                }
                Payload::TypeSection(reader) => {
                    for group in reader {
                        let len = group?.types().len();
                        layout.type_count = u32::try_from(len)
                            .ok()
                            .and_then(|len| layout.type_count.checked_add(len))
                            .ok_or(InjectError::TooManyEntries("type"))?;
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        match import?.ty {
                            TypeRef::Func(_) => layout.imported_functions += 1,
                            TypeRef::Global(_) => layout.imported_globals += 1,
                            TypeRef::Memory(_) => layout.imported_memories += 1,
                            TypeRef::Table(_) => layout.imported_tables += 1,
                            _ => {}
                        }
                    }
                }
                Payload::FunctionSection(reader) => {
                    layout.local_functions = reader.count();
                }
                Payload::TableSection(reader) => {
                    if reader.count() > 0 {
                        layout.table = Some(layout.imported_tables);
                    }
                }
                Payload::MemorySection(reader) => {
                    if reader.count() > 0 {
                        layout.memory = Some(layout.imported_memories);
                    }
                }
                Payload::GlobalSection(reader) => {
                    for (local, global) in (0u32..).zip(reader) {
                        let ty = global?.ty;
                        layout.globals.push(GlobalInfo {
                            index: layout.imported_globals + local,
                            ty: ty.content_type,
                            mutable: ty.mutable,
                        });
                    }
                }
                _ => {}
            }
        }
        tracing::trace!(?layout, "scanned module");
        Ok(layout)
    }
}

/// Writes `wasm` with the plan's entries appended.
fn rewrite(wasm: &[u8], layout: &ModuleLayout, plan: AccessorPlan<'_>) -> Result<Vec<u8>, InjectError> {
    let AccessorPlan {
        types,
        functions,
        code,
        exports,
        ..
    } = plan;
    let mut pending: Vec<(SectionId, Appended)> = [
        (SectionId::Type, types),
        (SectionId::Function, functions),
        (SectionId::Export, exports),
        (SectionId::Code, code),
    ]
    .into_iter()
    .filter(|(_, appended)| !appended.is_empty())
    .collect();

    let mut module = wasm_encoder::Module::new();
    for payload in Parser::new(0).parse_all(wasm) {
        let Some((id, range)) = payload?.as_section() else {
            continue;
        };
        let Some(rank) = rank(id) else {
            copy_section(&mut module, wasm, id, range);
            continue;
        };

        // Sections missing from the original module go right before the
        // first section that follows them.
        while let Some(position) = pending.iter().position(|(missing, _)| {
            !layout.sections.contains(*missing) && rank_of(*missing) < rank
        }) {
            let (missing, appended) = pending.remove(position);
            new_section(&mut module, missing, appended);
        }

        match pending.iter().position(|(target, _)| u8::from(*target) == id) {
            Some(position) => {
                let (target, appended) = pending.remove(position);
                let contents = appended.append_to(&wasm[range], section_name(target))?;
                module.section(&RawSection {
                    id,
                    data: &contents,
                });
            }
            None => copy_section(&mut module, wasm, id, range),
        }
    }

    // Whatever is left belongs after every section of the original module.
    pending.sort_by_key(|(id, _)| rank_of(*id));
    for (missing, appended) in pending {
        new_section(&mut module, missing, appended);
    }

    Ok(module.finish())
}

fn copy_section(module: &mut wasm_encoder::Module, wasm: &[u8], id: u8, range: Range<usize>) {
    module.section(&RawSection {
        id,
        data: &wasm[range],
    });
}

fn new_section(module: &mut wasm_encoder::Module, id: SectionId, appended: Appended) {
    tracing::trace!(section = section_name(id), "creating missing section");
    let contents = appended.into_section_contents();
    module.section(&RawSection {
        id: id.into(),
        data: &contents,
    });
}

fn rank_of(id: SectionId) -> u8 {
    rank(id.into()).unwrap_or(u8::MAX)
}

fn section_name(id: SectionId) -> &'static str {
    match id {
        SectionId::Type => "type",
        SectionId::Function => "function",
        SectionId::Export => "export",
        SectionId::Code => "code",
        _ => "section",
    }
}
