//! Bytecode synthesis for global accessors.
use wasm_encoder::{Encode, Function, Instruction, ValType};

use crate::names::AccessorName;

/// The three function signatures appended to the type section, in order.
pub(crate) const SIGNATURES: [Signature; 3] = [
    Signature::I32Setter,
    Signature::I64Setter,
    Signature::Getter,
];

/// The signature of an injected accessor function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signature {
    /// `(i32) -> ()`
    I32Setter,
    /// `(i32, i32) -> ()`, taking the high half first.
    I64Setter,
    /// `() -> i32`, shared by `i32` getters and both `i64` half getters.
    Getter,
}

impl Signature {
    /// Position of this signature among the appended types.
    pub(crate) fn offset(self) -> u32 {
        match self {
            Self::I32Setter => 0,
            Self::I64Setter => 1,
            Self::Getter => 2,
        }
    }

    fn params(self) -> &'static [ValType] {
        match self {
            Self::I32Setter => &[ValType::I32],
            Self::I64Setter => &[ValType::I32, ValType::I32],
            Self::Getter => &[],
        }
    }

    fn results(self) -> &'static [ValType] {
        match self {
            Self::I32Setter | Self::I64Setter => &[],
            Self::Getter => &[ValType::I32],
        }
    }

    /// Encodes the signature as a type section entry.
    pub(crate) fn encode(self, sink: &mut Vec<u8>) {
        sink.push(0x60);
        self.params().encode(sink);
        self.results().encode(sink);
    }
}

/// How a mutable global is exposed, resolved once from its value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    /// One getter and one setter carrying the value as a single `i32`.
    I32,
    /// Two half getters (high, low) and one setter taking both halves.
    I64,
}

impl AccessorKind {
    /// Returns the accessor kind for a global's value type, or `None` if
    /// globals of that type are not exposed.
    pub fn for_value_type(ty: wasmparser::ValType) -> Option<Self> {
        match ty {
            wasmparser::ValType::I32 => Some(Self::I32),
            wasmparser::ValType::I64 => Some(Self::I64),
            _ => None,
        }
    }

    /// Number of functions synthesized for one global of this kind.
    pub fn function_count(self) -> u32 {
        match self {
            Self::I32 => 2,
            Self::I64 => 3,
        }
    }

    /// Synthesizes the accessors of the global at `global_index`, in the
    /// order they must be appended to the module.
    pub(crate) fn accessors(self, global_index: u32) -> Vec<Accessor> {
        match self {
            Self::I32 => vec![
                Accessor {
                    name: AccessorName::I32Getter(global_index),
                    signature: Signature::Getter,
                    body: body(&[Instruction::GlobalGet(global_index)]),
                },
                Accessor {
                    name: AccessorName::I32Setter(global_index),
                    signature: Signature::I32Setter,
                    body: body(&[
                        Instruction::LocalGet(0),
                        Instruction::GlobalSet(global_index),
                    ]),
                },
            ],
            Self::I64 => vec![
                Accessor {
                    name: AccessorName::I64GetterHigh(global_index),
                    signature: Signature::Getter,
                    body: body(&[
                        Instruction::GlobalGet(global_index),
                        Instruction::I64Const(32),
                        Instruction::I64ShrU,
                        Instruction::I32WrapI64,
                    ]),
                },
                Accessor {
                    name: AccessorName::I64GetterLow(global_index),
                    signature: Signature::Getter,
                    body: body(&[
                        Instruction::GlobalGet(global_index),
                        Instruction::I32WrapI64,
                    ]),
                },
                Accessor {
                    name: AccessorName::I64Setter(global_index),
                    signature: Signature::I64Setter,
                    body: body(&[
                        // (high << 32) | low, both zero-extended
                        Instruction::LocalGet(0),
                        Instruction::I64ExtendI32U,
                        Instruction::I64Const(32),
                        Instruction::I64Shl,
                        Instruction::LocalGet(1),
                        Instruction::I64ExtendI32U,
                        Instruction::I64Or,
                        Instruction::GlobalSet(global_index),
                    ]),
                },
            ],
        }
    }
}

/// One synthesized function, with everything needed to append it to the
/// function, code and export sections.
#[derive(Debug, Clone)]
pub(crate) struct Accessor {
    pub(crate) name: AccessorName,
    pub(crate) signature: Signature,
    pub(crate) body: Function,
}

fn body(instructions: &[Instruction<'_>]) -> Function {
    let mut function = Function::new([]);
    for instruction in instructions {
        function.instruction(instruction);
    }
    function.instruction(&Instruction::End);
    function
}
