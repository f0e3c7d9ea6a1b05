//! The parsed representation of a single tag-length-value triplet.

use crate::def::{RuleId, TlId};

// --- ItemKind -------------------------------------------------------------------------------------------------------

/// What kind of element a triplet turned out to be.
///
/// `Unknown` is the state before the tag codec or a matching rule has had a say; elements still unknown after rule
/// matching are treated as primitive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ItemKind {
    #[default]
    Unknown,
    /// The value is itself a sequence of triplets.
    Constructed,
    /// The value is opaque content to be decoded and printed.
    Primitive,
    /// An end-of-content marker closing an indefinite constructor.
    EndOfContent,
}

// --- Form -----------------------------------------------------------------------------------------------------------

/// How the extent of a value is determined.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Form {
    #[default]
    Unknown,
    /// The length field gives the byte count up front.
    Definite,
    /// The value runs until an explicit terminator pattern.
    Indefinite,
}

// --- TlvItem --------------------------------------------------------------------------------------------------------

/// One parsed triplet.
///
/// The engine keeps a single `TlvItem` that is re-populated for every triplet; the output engine copies it when the
/// triplet survives filtering. `raw_tl` and `raw_value` are positions into the byte-buffer window captured at parse
/// time: they are only dereferenceable while the buffer reports [BufferState::Ok](crate::buffer::BufferState),
/// because a window flush relocates the data they point into.
#[derive(Clone, Debug)]
pub struct TlvItem {
    /// Nesting level the triplet was found at, starting from 1.
    pub level: usize,
    /// Tag rendered as text in the tag field's native style (decimal, hex pairs, `U-16`, ...).
    pub tag: String,
    /// Type field rendered as text, empty when the schema has no type field.
    pub typ: String,
    /// Value length from the tag-length pair, after `tl-included` correction.
    pub length: i64,
    /// Offset of the triplet within the current input file.
    pub file_offset: i64,
    /// Offset of the triplet within the concatenation of all input files.
    pub total_offset: i64,
    pub kind: ItemKind,
    pub form: Form,
    /// Window position of the first tag byte.
    pub raw_tl: usize,
    /// Bytes consumed by the tag/type/length fields (their spans may overlap under explicit offsets).
    pub raw_tl_length: usize,
    /// Window position of the first value byte.
    pub raw_value: usize,
    /// Declared value length; for terminator-delimited primitives the committed byte count differs (it includes the
    /// terminator) but this records the declared length.
    pub raw_value_length: i64,
    /// The decoded, printable rendering of the value, in the source character encoding.
    pub converted_value: Vec<u8>,
    /// The schema the triplet was read with.
    pub tl: TlId,
    /// The rule that matched the tag, if any.
    pub rule: Option<RuleId>,
}

impl TlvItem {
    pub(crate) fn empty(tl: TlId) -> Self {
        Self {
            level: crate::level::FIRST_LEVEL,
            tag: String::new(),
            typ: String::new(),
            length: 0,
            file_offset: 0,
            total_offset: 0,
            kind: ItemKind::Unknown,
            form: Form::Unknown,
            raw_tl: 0,
            raw_tl_length: 0,
            raw_value: 0,
            raw_value_length: 0,
            converted_value: Vec::new(),
            tl,
            rule: None,
        }
    }

    /// Total bytes attributed to the triplet, as reported by the `%c` directive and error dumps.
    pub fn consumed(&self) -> i64 {
        self.raw_tl_length as i64 + self.raw_value_length
    }
}
