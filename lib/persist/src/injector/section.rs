//! Raw section editing: appending pre-encoded entries to a section
//! without touching the bytes of the entries already in it.
use wasm_encoder::SectionId;

use crate::error::InjectError;

/// Entries to append to one section.
#[derive(Debug, Default, Clone)]
pub(crate) struct Appended {
    pub(crate) count: u32,
    pub(crate) bytes: Vec<u8>,
}

impl Appended {
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Records one entry that `encode` writes into the buffer.
    pub(crate) fn push(&mut self, encode: impl FnOnce(&mut Vec<u8>)) {
        encode(&mut self.bytes);
        self.count += 1;
    }

    /// The contents of a section holding only the appended entries.
    pub(crate) fn into_section_contents(self) -> Vec<u8> {
        let mut contents = Vec::with_capacity(self.bytes.len() + 5);
        write_count(&mut contents, self.count);
        contents.extend_from_slice(&self.bytes);
        contents
    }

    /// The contents of `original` with the appended entries at its end.
    /// The original entries are copied verbatim.
    pub(crate) fn append_to(&self, original: &[u8], kind: &'static str) -> Result<Vec<u8>, InjectError> {
        let mut entries = original;
        let count = leb128::read::unsigned(&mut entries)?;
        let count = u32::try_from(count)
            .ok()
            .and_then(|count| count.checked_add(self.count))
            .ok_or(InjectError::TooManyEntries(kind))?;

        let mut contents = Vec::with_capacity(original.len() + self.bytes.len() + 5);
        write_count(&mut contents, count);
        contents.extend_from_slice(entries);
        contents.extend_from_slice(&self.bytes);
        Ok(contents)
    }
}

fn write_count(sink: &mut Vec<u8>, count: u32) {
    // Writing into a `Vec` cannot fail.
    let _ = leb128::write::unsigned(sink, u64::from(count));
}

/// Position of a known section in the order mandated by the binary format.
/// Custom sections may appear anywhere and have no rank.
pub(crate) fn rank(id: u8) -> Option<u8> {
    const ORDER: [SectionId; 13] = [
        SectionId::Type,
        SectionId::Import,
        SectionId::Function,
        SectionId::Table,
        SectionId::Memory,
        SectionId::Tag,
        SectionId::Global,
        SectionId::Export,
        SectionId::Start,
        SectionId::Element,
        SectionId::DataCount,
        SectionId::Code,
        SectionId::Data,
    ];
    ORDER
        .iter()
        .position(|section| u8::from(*section) == id)
        .map(|position| position as u8)
}
