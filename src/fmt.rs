//! Printf-style rendering of decoded integers, and strftime rendering of epoch values.
//!
//! Rule `format=` strings use printf syntax. The subset implemented here covers the single-argument integer
//! conversions the configuration language documents: flags `-`, `+`, space, `0` and `#`, a field width, a
//! precision, the length modifiers (accepted and ignored, so `%lli` works as written) and the conversions
//! `d`/`i`/`u`/`x`/`X`/`o`. `%%` renders a literal percent sign.
//!
//! A format beginning with `+` (local time) or `++` (UTC) turns an unsigned value into a POSIX epoch timestamp
//! rendered with the remainder of the format as a strftime pattern.

use std::fmt::Write as _;

use chrono::{Local, TimeZone, Utc};

// --- epoch rendering ------------------------------------------------------------------------------------------------

/// Render `secs` as an epoch timestamp when `spec` carries a `+`/`++` prefix. Returns `None` when the format has no
/// such prefix, the timestamp is unrepresentable or the pattern renders nothing; callers then fall back to numeric
/// rendering.
pub fn format_epoch(spec: &str, secs: i64) -> Option<String> {
    let (utc, pattern) = match spec.strip_prefix("++") {
        Some(rest) => (true, rest),
        None => (false, spec.strip_prefix('+')?),
    };

    let mut out = String::new();
    let ok = if utc {
        let stamp = Utc.timestamp_opt(secs, 0).single()?;
        write!(out, "{}", stamp.format(pattern)).is_ok()
    } else {
        let stamp = Local.timestamp_opt(secs, 0).single()?;
        write!(out, "{}", stamp.format(pattern)).is_ok()
    };

    if ok && !out.is_empty() {
        Some(out)
    } else {
        None
    }
}

// --- printf ---------------------------------------------------------------------------------------------------------

#[derive(Default, Clone, Copy)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alternate: bool,
}

#[derive(Clone, Copy)]
enum Arg {
    Signed(i64),
    Unsigned(u64),
}

impl Arg {
    fn magnitude(self) -> u64 {
        match self {
            Arg::Signed(v) => v as u64,
            Arg::Unsigned(v) => v,
        }
    }
}

pub fn format_i64(spec: &str, value: i64) -> String {
    format_value(spec, Arg::Signed(value))
}

pub fn format_u64(spec: &str, value: u64) -> String {
    format_value(spec, Arg::Unsigned(value))
}

fn format_value(spec: &str, arg: Arg) -> String {
    let mut out = String::new();
    let mut rest = spec;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        rest = render_conversion(&mut out, rest, arg);
    }
    out.push_str(rest);
    out
}

/// Parse and render one conversion specification (the `%` is already consumed); return the unparsed remainder.
fn render_conversion<'a>(out: &mut String, spec: &'a str, arg: Arg) -> &'a str {
    let bytes = spec.as_bytes();
    let mut i = 0;

    let mut flags = Flags::default();
    while i < bytes.len() {
        match bytes[i] {
            b'-' => flags.left = true,
            b'+' => flags.plus = true,
            b' ' => flags.space = true,
            b'0' => flags.zero = true,
            b'#' => flags.alternate = true,
            _ => break,
        }
        i += 1;
    }

    let mut width = 0usize;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        width = width * 10 + (bytes[i] - b'0') as usize;
        i += 1;
    }

    let mut precision: Option<usize> = None;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let mut p = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            p = p * 10 + (bytes[i] - b'0') as usize;
            i += 1;
        }
        precision = Some(p);
    }

    while i < bytes.len() && matches!(bytes[i], b'h' | b'l' | b'q' | b'j' | b'z' | b't') {
        i += 1;
    }

    let Some(&conv) = bytes.get(i) else {
        out.push('%');
        return &spec[i..];
    };
    if !conv.is_ascii() {
        out.push('%');
        return &spec[i..];
    }
    i += 1;

    match conv {
        b'%' => out.push('%'),
        b'd' | b'i' => {
            let (negative, magnitude) = match arg {
                Arg::Signed(v) => (v < 0, v.unsigned_abs()),
                Arg::Unsigned(v) => (false, v),
            };
            push_number(out, negative, format!("{}", magnitude), "", flags, width, precision);
        }
        b'u' => push_number(out, false, format!("{}", arg.magnitude()), "", flags, width, precision),
        b'x' | b'X' => {
            let magnitude = arg.magnitude();
            let digits = if conv == b'x' {
                format!("{:x}", magnitude)
            } else {
                format!("{:X}", magnitude)
            };
            let prefix = match (flags.alternate && magnitude != 0, conv) {
                (true, b'x') => "0x",
                (true, _) => "0X",
                (false, _) => "",
            };
            push_number(out, false, digits, prefix, flags, width, precision);
        }
        b'o' => {
            let prefix = if flags.alternate { "0" } else { "" };
            push_number(out, false, format!("{:o}", arg.magnitude()), prefix, flags, width, precision);
        }
        other => {
            // Unknown conversion: keep it visible rather than guessing.
            out.push('%');
            out.push(other as char);
        }
    }

    &spec[i..]
}

fn push_number(
    out: &mut String,
    negative: bool,
    mut digits: String,
    prefix: &str,
    flags: Flags,
    width: usize,
    precision: Option<usize>,
) {
    if let Some(p) = precision {
        while digits.len() < p {
            digits.insert(0, '0');
        }
    }

    let sign = if negative {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    };

    let body_len = sign.len() + prefix.len() + digits.len();
    let pad = width.saturating_sub(body_len);

    if flags.left {
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(&digits);
        for _ in 0..pad {
            out.push(' ');
        }
    } else if flags.zero && precision.is_none() {
        out.push_str(sign);
        out.push_str(prefix);
        for _ in 0..pad {
            out.push('0');
        }
        out.push_str(&digits);
    } else {
        for _ in 0..pad {
            out.push(' ');
        }
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(&digits);
    }
}
