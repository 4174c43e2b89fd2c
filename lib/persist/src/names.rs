//! Names of the exports added by the injector.
//!
//! Every injected export is named `<symbol><category>`, where the category
//! is one of:
//!
//! * `memory` and `table`
//! * `func_<index>` for every locally defined function
//! * `global_getter_i32_<index>` and `global_setter_i32_<index>`
//! * `global_getter_i64_<index>_high`, `global_getter_i64_<index>_low` and
//!   `global_setter_i64_<index>`
//!
//! Indices are absolute function or global indices of the original module.
use std::fmt;

/// An injected export, identified independently of its symbol prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorName {
    /// The exported linear memory.
    Memory,
    /// The exported function table.
    Table,
    /// An original function, re-exported under its function index.
    Function(u32),
    /// Reads an `i32` global.
    I32Getter(u32),
    /// Writes an `i32` global.
    I32Setter(u32),
    /// Reads the upper 32 bits of an `i64` global.
    I64GetterHigh(u32),
    /// Reads the lower 32 bits of an `i64` global.
    I64GetterLow(u32),
    /// Writes an `i64` global from its `(high, low)` halves.
    I64Setter(u32),
}

impl AccessorName {
    /// The full export name under `symbol`.
    pub fn with_symbol(&self, symbol: &str) -> String {
        format!("{symbol}{self}")
    }

    /// Recognizes an injected export name. Returns `None` for names that
    /// don't start with `symbol` or don't follow the injected naming scheme.
    pub fn parse(symbol: &str, name: &str) -> Option<Self> {
        let category = name.strip_prefix(symbol)?;
        match category {
            "memory" => return Some(Self::Memory),
            "table" => return Some(Self::Table),
            _ => {}
        }
        if let Some(index) = category.strip_prefix("func_") {
            return parse_index(index).map(Self::Function);
        }
        if let Some(rest) = category.strip_prefix("global_getter_i32_") {
            return parse_index(rest).map(Self::I32Getter);
        }
        if let Some(rest) = category.strip_prefix("global_setter_i32_") {
            return parse_index(rest).map(Self::I32Setter);
        }
        if let Some(rest) = category.strip_prefix("global_setter_i64_") {
            return parse_index(rest).map(Self::I64Setter);
        }
        let rest = category.strip_prefix("global_getter_i64_")?;
        if let Some(index) = rest.strip_suffix("_high") {
            return parse_index(index).map(Self::I64GetterHigh);
        }
        let index = rest.strip_suffix("_low")?;
        parse_index(index).map(Self::I64GetterLow)
    }

    /// The global index this accessor reads or writes, if any.
    pub fn global_index(&self) -> Option<u32> {
        match *self {
            Self::I32Getter(index)
            | Self::I32Setter(index)
            | Self::I64GetterHigh(index)
            | Self::I64GetterLow(index)
            | Self::I64Setter(index) => Some(index),
            Self::Memory | Self::Table | Self::Function(_) => None,
        }
    }
}

impl fmt::Display for AccessorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Table => write!(f, "table"),
            Self::Function(index) => write!(f, "func_{index}"),
            Self::I32Getter(index) => write!(f, "global_getter_i32_{index}"),
            Self::I32Setter(index) => write!(f, "global_setter_i32_{index}"),
            Self::I64GetterHigh(index) => write!(f, "global_getter_i64_{index}_high"),
            Self::I64GetterLow(index) => write!(f, "global_getter_i64_{index}_low"),
            Self::I64Setter(index) => write!(f, "global_setter_i64_{index}"),
        }
    }
}

fn parse_index(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_export_scheme() {
        assert_eq!(AccessorName::Memory.with_symbol("_"), "_memory");
        assert_eq!(AccessorName::Function(3).with_symbol("_@"), "_@func_3");
        assert_eq!(
            AccessorName::I64GetterHigh(1).with_symbol("_"),
            "_global_getter_i64_1_high"
        );
        assert_eq!(
            AccessorName::I32Setter(0).with_symbol("$"),
            "$global_setter_i32_0"
        );
    }

    #[test]
    fn parse_inverts_with_symbol() {
        let all = [
            AccessorName::Memory,
            AccessorName::Table,
            AccessorName::Function(12),
            AccessorName::I32Getter(0),
            AccessorName::I32Setter(0),
            AccessorName::I64GetterHigh(7),
            AccessorName::I64GetterLow(7),
            AccessorName::I64Setter(7),
        ];
        for name in all {
            assert_eq!(
                AccessorName::parse("_@", &name.with_symbol("_@")),
                Some(name)
            );
        }
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(AccessorName::parse("_", "memory"), None);
        assert_eq!(AccessorName::parse("_", "_start"), None);
        assert_eq!(AccessorName::parse("_", "_func_"), None);
        assert_eq!(AccessorName::parse("_", "_func_+1"), None);
        assert_eq!(AccessorName::parse("_", "_global_getter_i64_1"), None);
        assert_eq!(AccessorName::parse("_", "_global_getter_f32_1"), None);
    }
}
