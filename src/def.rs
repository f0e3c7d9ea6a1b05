//! The configuration model: tag-length schemas, triplet rules, print templates, type maps and the structure that
//! ties them together, plus the tag-to-rule lookup used on the parse hot path.
//!
//! Definitions reference each other by name in the configuration file. After loading, [Definitions::resolve] turns
//! every reference into a typed index, so the parse loop never compares strings to follow a link; dangling names are
//! reported once, up front.

use std::collections::HashMap;

use crate::error::{ErrorKind, Result};
use crate::field::{ascii_to_i64, FieldDef, FieldEncoding};
use crate::item::{Form, ItemKind};
use crate::value::ValueKind;

// --- typed indices --------------------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TlId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrintId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TypeMapId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RuleId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HoldId(pub(crate) usize);

// --- TlSchema -------------------------------------------------------------------------------------------------------

/// A named description of how a tag-length pair is encoded on the wire.
#[derive(Clone, Debug)]
pub struct TlSchema {
    pub name: String,
    pub tag: FieldDef,
    /// Optional type field between tag and length.
    pub typ: Option<FieldDef>,
    /// Length field; absent for purely terminator-delimited dialects.
    pub len: Option<FieldDef>,
    /// Definite when a length field is used, indefinite when values end at `value_terminator`.
    pub form: Form,
    /// When set, the decoded length counts the tag/length bytes as well and is corrected after reading.
    pub tl_included: bool,
    /// Pattern ending a value when no length field is present. For BER this is the end-of-content marker.
    pub value_terminator: Vec<u8>,
    pub print_name: Option<String>,
    pub print: Option<PrintId>,
    pub type_map_name: Option<String>,
    pub type_map: Option<TypeMapId>,
}

// --- TypeMap --------------------------------------------------------------------------------------------------------

/// Ordered source-type-string to value-kind mappings, consulted when a schema produced a type field but the
/// matching rule pinned no value kind.
#[derive(Clone, Debug)]
pub struct TypeMap {
    pub name: String,
    pub mappings: Vec<(String, ValueKind)>,
}

impl TypeMap {
    pub fn lookup(&self, source_type: &str) -> Option<ValueKind> {
        self.mappings
            .iter()
            .find(|(source, _)| source == source_type)
            .map(|&(_, kind)| kind)
    }
}

// --- TlvRule --------------------------------------------------------------------------------------------------------

/// A declarative matcher attaching semantics to a tag (or an inclusive tag range) at an optional path.
#[derive(Clone, Debug)]
pub struct TlvRule {
    /// When set, the rule only applies at this path: `*suffix` matches a trailing path segment sequence, anything
    /// else must equal the whole current path.
    pub path: Option<String>,
    pub name: Option<String>,
    /// First tag of the range; equal to `etag` for a single-tag rule.
    pub stag: String,
    /// Last tag of the range, inclusive.
    pub etag: String,
    /// Explicit element kind; `Unknown` leaves the kind to the codec or the primitive default.
    pub kind: ItemKind,
    /// Explicit form override.
    pub form: Form,
    pub value_kind: ValueKind,
    /// Probe the value for a nested tag-length pair and upgrade to a constructor when it fits exactly.
    pub maybe_constructor: bool,
    pub content_tl_name: Option<String>,
    /// Schema for the children when this rule opens a constructor; inherited from the level when absent.
    pub content_tl: Option<TlId>,
    pub print_name: Option<String>,
    pub print: Option<PrintId>,
    /// Source character encoding of the value, enabling recoding at print time.
    pub encoding: Option<String>,
    /// Printf-style format for integer values; `+`/`++` prefixes select epoch rendering.
    pub format: Option<String>,
    /// Signed correction applied to the value length before decoding.
    pub length_adjust: i64,
    pub hold: Option<HoldId>,
}

// --- PrintTemplate --------------------------------------------------------------------------------------------------

/// A named set of output templates.
#[derive(Clone, Debug)]
pub struct PrintTemplate {
    pub name: String,
    pub file_head: Option<String>,
    pub file_trailer: Option<String>,
    pub level_head: Option<String>,
    pub level_trailer: Option<String>,
    pub block_start: Option<String>,
    pub block_end: Option<String>,
    /// Template for primitive values; defaults to `%v`.
    pub content: String,
    /// Template for primitive values whose rule has no name; defaults to `content`.
    pub ucontent: String,
    pub indent: Option<String>,
    /// Target character encoding for `%v`/`%T`; the locale codeset when absent.
    pub encoding: Option<String>,
    /// Byte printed between consecutive siblings.
    pub separator: Option<u8>,
}

// --- Structure ------------------------------------------------------------------------------------------------------

/// The root container: which schema starts the stream, which rules apply and how output looks by default.
#[derive(Clone, Debug)]
pub struct Structure {
    pub name: String,
    pub print_name: String,
    pub print: Option<PrintId>,
    pub tl_name: String,
    pub content_tl: Option<TlId>,
    /// Byte pattern silently skipped between triplets.
    pub filler: Vec<u8>,
    pub hex_caps: bool,
}

// --- HoldDef --------------------------------------------------------------------------------------------------------

/// A named slot remembering the last value of a bound rule, for `$name` template substitution.
#[derive(Clone, Debug)]
pub struct HoldDef {
    /// Anonymous slots take their rule's name once the rule is parsed; a slot that never gains a name is
    /// unreachable from templates.
    pub name: Option<String>,
}

// --- Definitions ----------------------------------------------------------------------------------------------------

/// Everything the configuration file defined, with name references resolved to indices.
#[derive(Debug)]
pub struct Definitions {
    pub tls: Vec<TlSchema>,
    pub prints: Vec<PrintTemplate>,
    pub type_maps: Vec<TypeMap>,
    pub rules: Vec<TlvRule>,
    pub holds: Vec<HoldDef>,
    pub structure: Structure,
}

impl Definitions {
    pub fn tl(&self, id: TlId) -> &TlSchema {
        &self.tls[id.0]
    }

    pub fn print(&self, id: PrintId) -> &PrintTemplate {
        &self.prints[id.0]
    }

    pub fn type_map(&self, id: TypeMapId) -> &TypeMap {
        &self.type_maps[id.0]
    }

    pub fn rule(&self, id: RuleId) -> &TlvRule {
        &self.rules[id.0]
    }

    pub fn hold(&self, id: HoldId) -> &HoldDef {
        &self.holds[id.0]
    }

    /// The structure's print template. Only valid after [Self::resolve].
    pub fn structure_print(&self) -> &PrintTemplate {
        self.print(self.structure.print.expect("definitions are resolved"))
    }

    /// The print template for an item: the rule's override when set, the schema's otherwise.
    pub fn print_for(&self, tl: TlId, rule: Option<RuleId>) -> &PrintTemplate {
        if let Some(rule) = rule {
            if let Some(print) = self.rule(rule).print {
                return self.print(print);
            }
        }
        self.print(self.tl(tl).print.expect("definitions are resolved"))
    }

    fn find_print(&self, name: &str) -> Option<PrintId> {
        self.prints
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
            .map(PrintId)
    }

    fn find_tl(&self, name: &str) -> Option<TlId> {
        self.tls
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
            .map(TlId)
    }

    fn find_type_map(&self, name: &str) -> Option<TypeMapId> {
        self.type_maps
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(name))
            .map(TypeMapId)
    }

    /// Resolve every by-name reference to an index. Run once after loading; reports the first dangling name.
    pub fn resolve(&mut self) -> Result<()> {
        let structure_print = self
            .find_print(&self.structure.print_name)
            .ok_or_else(|| no_such("printing definition", &self.structure.print_name))?;
        self.structure.print = Some(structure_print);

        let structure_tl = self
            .find_tl(&self.structure.tl_name)
            .ok_or_else(|| no_such("tag-length definition", &self.structure.tl_name))?;
        self.structure.content_tl = Some(structure_tl);

        for i in 0..self.rules.len() {
            if let Some(name) = self.rules[i].content_tl_name.clone() {
                let id = self.find_tl(&name).ok_or_else(|| no_such("tag-length definition", &name))?;
                self.rules[i].content_tl = Some(id);
            }
            if let Some(name) = self.rules[i].print_name.clone() {
                let id = self.find_print(&name).ok_or_else(|| no_such("printing definition", &name))?;
                self.rules[i].print = Some(id);
            }
        }

        for i in 0..self.tls.len() {
            let print_name = self.tls[i]
                .print_name
                .clone()
                .unwrap_or_else(|| self.structure.print_name.clone());
            let id = self
                .find_print(&print_name)
                .ok_or_else(|| no_such("printing definition", &print_name))?;
            self.tls[i].print = Some(id);

            if let Some(name) = self.tls[i].type_map_name.clone() {
                let id = self.find_type_map(&name).ok_or_else(|| no_such("mapping", &name))?;
                self.tls[i].type_map = Some(id);
            }
        }

        Ok(())
    }
}

fn no_such(what: &str, name: &str) -> ErrorKind {
    ErrorKind::Invalid(format!("No {} named as '{}'", what, name))
}

// --- rule matching --------------------------------------------------------------------------------------------------

/// `strtoull`-style unsigned parse: leading whitespace, optional sign (a minus wraps), leading digits.
fn ascii_to_u64(text: &str) -> u64 {
    let mut iter = text.bytes().skip_while(|b| b.is_ascii_whitespace()).peekable();
    let negative = match iter.peek() {
        Some(b'-') => {
            iter.next();
            true
        }
        Some(b'+') => {
            iter.next();
            false
        }
        _ => false,
    };
    let mut value: u64 = 0;
    for byte in iter {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add((byte - b'0') as u64);
    }
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

/// Tag comparison in the tag's native encoding: numeric for integer-encoded tags (so `07` and `7` compare equal),
/// byte-wise for string, hex and BER tags.
fn tag_matches(rule: &TlvRule, tag: &str, encoding: FieldEncoding) -> bool {
    if rule.stag == rule.etag {
        match encoding {
            FieldEncoding::IntBe | FieldEncoding::IntLe => ascii_to_i64(tag.as_bytes()) == ascii_to_i64(rule.stag.as_bytes()),
            FieldEncoding::UintBe | FieldEncoding::UintLe => ascii_to_u64(tag) == ascii_to_u64(&rule.stag),
            FieldEncoding::Str | FieldEncoding::Hex | FieldEncoding::Ber => tag == rule.stag,
        }
    } else {
        match encoding {
            FieldEncoding::IntBe | FieldEncoding::IntLe => {
                let t = ascii_to_i64(tag.as_bytes());
                t >= ascii_to_i64(rule.stag.as_bytes()) && t <= ascii_to_i64(rule.etag.as_bytes())
            }
            FieldEncoding::UintBe | FieldEncoding::UintLe => {
                let t = ascii_to_u64(tag);
                t >= ascii_to_u64(&rule.stag) && t <= ascii_to_u64(&rule.etag)
            }
            FieldEncoding::Str | FieldEncoding::Hex | FieldEncoding::Ber => {
                tag >= rule.stag.as_str() && tag <= rule.etag.as_str()
            }
        }
    }
}

fn path_matches(rule: &TlvRule, current_path: &str) -> bool {
    let Some(pattern) = rule.path.as_deref() else {
        return true;
    };
    if let Some(suffix) = pattern.strip_prefix('*') {
        let current = current_path.as_bytes();
        let suffix = suffix.as_bytes();
        current.len() >= suffix.len() && current[current.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    } else {
        pattern.eq_ignore_ascii_case(current_path)
    }
}

// --- RuleCache ------------------------------------------------------------------------------------------------------

/// Per-run cache of `tag -> candidate rules`, filled lazily from the full ordered rule list.
///
/// The first lookup of a tag scans the whole list; the hit, plus every path-qualified rule the tag passed on the
/// way, is remembered so that later lookups of the same tag only consider real candidates. Candidates are tried in
/// insertion order and the first match wins, so repeated lookups of the same `(tag, path)` are deterministic.
#[derive(Default)]
pub struct RuleCache {
    map: HashMap<String, Vec<RuleId>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    fn remember(&mut self, tag: &str, id: RuleId) {
        let list = self.map.entry(tag.to_string()).or_default();
        if !list.contains(&id) {
            list.push(id);
        }
    }

    /// Find the first rule matching `tag` (compared per `encoding`) whose path constraint holds at `current_path`.
    pub fn find(
        &mut self,
        defs: &Definitions,
        tag: &str,
        encoding: FieldEncoding,
        current_path: &str,
    ) -> Option<RuleId> {
        if let Some(list) = self.map.get(tag) {
            for &id in list {
                let rule = defs.rule(id);
                if tag_matches(rule, tag, encoding) && path_matches(rule, current_path) {
                    return Some(id);
                }
            }
        }

        for (i, rule) in defs.rules.iter().enumerate() {
            let id = RuleId(i);
            if !tag_matches(rule, tag, encoding) {
                continue;
            }
            // Path-qualified rules are remembered even on a path miss, so later lookups of this tag scan every
            // candidate that could match at a different location.
            if rule.path.is_some() {
                self.remember(tag, id);
            }
            if path_matches(rule, current_path) {
                self.remember(tag, id);
                return Some(id);
            }
        }
        None
    }
}
