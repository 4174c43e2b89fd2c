use serde::{Deserialize, Serialize};

/// Selects which parts of a module's state get accessor exports.
///
/// `globals` is indexed by global index. Globals past the end of the
/// vector are included, so an empty vector includes every global.
///
/// ```
/// use wasmer_persist::InclusionPolicy;
///
/// let policy: InclusionPolicy = serde_json::from_str(r#"{"globals": [true, false]}"#).unwrap();
/// assert!(policy.memory);
/// assert!(policy.includes_global(0));
/// assert!(!policy.includes_global(1));
/// assert!(policy.includes_global(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InclusionPolicy {
    /// Export the first defined memory.
    pub memory: bool,
    /// Export the first defined table.
    pub table: bool,
    /// Per-global inclusion flags.
    pub globals: Vec<bool>,
}

impl Default for InclusionPolicy {
    fn default() -> Self {
        Self {
            memory: true,
            table: true,
            globals: Vec::new(),
        }
    }
}

impl InclusionPolicy {
    /// Creates a policy that includes everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the memory is exported.
    pub fn with_memory(mut self, memory: bool) -> Self {
        self.memory = memory;
        self
    }

    /// Sets whether the table is exported.
    pub fn with_table(mut self, table: bool) -> Self {
        self.table = table;
        self
    }

    /// Sets the per-global inclusion flags.
    pub fn with_globals(mut self, globals: impl IntoIterator<Item = bool>) -> Self {
        self.globals = globals.into_iter().collect();
        self
    }

    /// Whether the global at `index` should get accessors.
    pub fn includes_global(&self, index: u32) -> bool {
        self.globals.get(index as usize).copied().unwrap_or(true)
    }
}
