//! Tag, length, bit-string and object-identifier decoding for ASN.1 BER.
//!
//! Tags render as `<class>-<number>` where the class letter is `U` (universal), `A` (application), `C` (context) or
//! `P` (private); the number comes from the low five bits of the first octet or, for the long form, from 7-bit
//! continuation octets. The end-of-content marker (tag `0x00` followed by length `0x00`) closes indefinite-form
//! constructors.

use crate::item::{Form, ItemKind};

const CLASS_MASK: u8 = 0xc0;
const CLASS_UNIVERSAL: u8 = 0x00;
const CLASS_APPLICATION: u8 = 0x40;
const CLASS_CONTEXT: u8 = 0x80;

const CONSTRUCTED: u8 = 0x20;

const LONG_TAG: u8 = 0x1f;
const TAG_CONTINUES: u8 = 0x80;
const TAG_NUMBER_MASK: u8 = 0x7f;

const LENGTH_LONG: u8 = 0x80;
const LENGTH_MASK: u8 = 0x7f;
const LENGTH_INDEFINITE: u8 = 0x80;

/// The value terminator closing an indefinite-form BER constructor.
pub const EOC_TERMINATOR: [u8; 2] = [0x00, 0x00];

// --- tag ------------------------------------------------------------------------------------------------------------

/// A decoded BER tag.
#[derive(Debug)]
pub struct BerTag {
    /// Octets consumed by the tag.
    pub consumed: usize,
    /// The `<class>-<number>` rendering.
    pub text: String,
    pub kind: ItemKind,
    /// Form taken from a peek at the first length octet.
    pub form: Form,
}

/// Decode a BER tag from the start of `data`. Returns `None` when the data is exhausted before the tag and the
/// first length octet are complete, or when a zero first octet is not part of an end-of-content marker.
pub fn read_tag(data: &[u8]) -> Option<BerTag> {
    let first = *data.first()?;

    let class = match first & CLASS_MASK {
        CLASS_UNIVERSAL => "U-",
        CLASS_APPLICATION => "A-",
        CLASS_CONTEXT => "C-",
        _ => "P-",
    };

    let mut end = 0usize;
    let mut number: u64 = 0;
    if first & LONG_TAG == LONG_TAG {
        loop {
            end += 1;
            let octet = *data.get(end)?;
            number = (number << 7) | (octet & TAG_NUMBER_MASK) as u64;
            if octet & TAG_CONTINUES == 0 {
                break;
            }
        }
    } else {
        number = (first & LONG_TAG) as u64;
    }

    // The first length octet must be present before the tag counts as readable.
    let length_octet = *data.get(end + 1)?;

    let kind = if first & CONSTRUCTED != 0 {
        ItemKind::Constructed
    } else if first == 0 {
        if data[1] == 0 {
            ItemKind::EndOfContent
        } else {
            // A zero tag octet not followed by a zero length octet is not BER.
            return None;
        }
    } else {
        ItemKind::Primitive
    };

    let form = if length_octet == LENGTH_INDEFINITE {
        Form::Indefinite
    } else {
        Form::Definite
    };

    Some(BerTag {
        consumed: end + 1,
        text: format!("{}{}", class, number),
        kind,
        form,
    })
}

// --- length ---------------------------------------------------------------------------------------------------------

/// Decode a BER length starting `skip` octets into `data` (past the tag). Returns the total octets consumed from
/// the start of `data` and the decoded length; the indefinite sentinel decodes to length zero.
pub fn read_length(data: &[u8], skip: usize) -> Option<(usize, i64)> {
    let mut pos = skip;
    let first = *data.get(pos)?;

    let mut length: u64 = 0;
    if first != LENGTH_INDEFINITE {
        if first & LENGTH_LONG != 0 {
            let count = (first & LENGTH_MASK) as usize;
            if pos + count >= data.len() {
                return None;
            }
            for _ in 0..count {
                pos += 1;
                length = (length << 8) | data[pos] as u64;
            }
        } else {
            length = (first & LENGTH_MASK) as u64;
        }
    }

    Some((pos + 1, length as i64))
}

// --- bit string -----------------------------------------------------------------------------------------------------

/// Render a BER BIT STRING: the first octet counts the unused trailing bits of the last octet; output is bit
/// characters, one space-separated group per octet, with the final group truncated to its meaningful bits.
pub fn format_bit_string(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() <= 1 {
        return;
    }
    let mut meaningful = 8usize.wrapping_sub(data[0] as usize);

    for &byte in &data[1..data.len() - 1] {
        for bit in (0..8).rev() {
            out.push(if byte & (1 << bit) != 0 { b'1' } else { b'0' });
        }
        out.push(b' ');
    }

    if (1..=8).contains(&meaningful) {
        let byte = data[data.len() - 1];
        for bit in (0..8).rev() {
            out.push(if byte & (1 << bit) != 0 { b'1' } else { b'0' });
            meaningful -= 1;
            if meaningful == 0 {
                break;
            }
        }
    }
}

// --- object identifier ----------------------------------------------------------------------------------------------

/// Render a BER OBJECT IDENTIFIER as space-separated decimal arcs. The first octet packs the first two arcs as
/// `x * 40 + y`; later arcs use base-128 continuation octets.
pub fn format_oid(out: &mut Vec<u8>, data: &[u8]) {
    let Some(&first) = data.first() else {
        return;
    };

    let (x, y) = match first {
        0..=39 => (0u32, first as u32),
        40..=79 => (1, first as u32 - 40),
        _ => (2, first as u32 - 80),
    };
    out.extend_from_slice(format!("{} {}", x, y).as_bytes());

    let mut value: u64 = 0;
    for &byte in &data[1..] {
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            out.extend_from_slice(format!(" {}", value).as_bytes());
            value = 0;
        }
    }
}
