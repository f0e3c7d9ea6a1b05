//! The line-oriented configuration file reader.
//!
//! A configuration file is a sequence of logical lines. `#` starts a comment, a trailing `\` continues the line,
//! and values may be double-quoted with C-style escapes (including `\xNN`, which makes arbitrary bytes expressible
//! in fillers and terminators). Each line is a keyword followed by case-insensitive `name=value` parameters:
//!
//! ```text
//! tl name=ber tag=ber
//! print name=default value="%n = '%v'\n" constructor="%n\n" indent="  "
//! structure name=default content-tl=ber print=default
//! tlv tag=U-2 name=counter value-type=int
//! structure-end
//! ```
//!
//! Tag and length field descriptors are comma-separated `type,length,mask,shift,offset` lists, where the length
//! position may also hold a `/c/` terminator character; later positions may be left empty.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::def::{Definitions, HoldDef, HoldId, PrintTemplate, Structure, TlSchema, TlvRule, TypeMap};
use crate::error::{Error, ErrorKind, Result};
use crate::field::{ascii_to_i64, FieldDef, FieldEncoding};
use crate::item::{Form, ItemKind};
use crate::value::ValueKind;

/// The configuration read when `-c` is not given: `.tlverc` in the home directory.
pub fn default_rc_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".tlverc"),
        None => PathBuf::from(".tlverc"),
    }
}

/// Load and resolve a configuration file, keeping only the structure named `structure_name`. A `print_override`
/// replaces the template selection of the structure's schemas and rules.
pub fn load_file(path: &Path, structure_name: &str, print_override: Option<&str>) -> Result<Definitions> {
    let mut text = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut text))
        .map_err(|source| ErrorKind::Open {
            path: path.display().to_string(),
            source,
        })?;
    load(&text, structure_name, print_override)
}

/// Load and resolve a configuration from bytes already in memory.
pub fn load(text: &[u8], structure_name: &str, print_override: Option<&str>) -> Result<Definitions> {
    let mut parser = Parser::new(text, structure_name, print_override);
    parser.run()?;
    let mut defs = parser.finish()?;
    defs.resolve()?;
    debug!(
        tls = defs.tls.len(),
        rules = defs.rules.len(),
        prints = defs.prints.len(),
        structure = %defs.structure.name,
        "configuration loaded"
    );
    Ok(defs)
}

// --- keywords and parameters ----------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Keyword {
    Tl,
    Tlv,
    Structure,
    StructureEnd,
    Print,
    Typemap,
    TypemapEnd,
    Map,
}

impl Keyword {
    fn from_name(name: &[u8]) -> Option<Self> {
        let name = String::from_utf8_lossy(name).to_ascii_lowercase();
        Some(match name.as_str() {
            "tl" => Keyword::Tl,
            "tlv" => Keyword::Tlv,
            "structure" => Keyword::Structure,
            "structure-end" => Keyword::StructureEnd,
            "print" => Keyword::Print,
            "typemap" => Keyword::Typemap,
            "typemap-end" => Keyword::TypemapEnd,
            "map" => Keyword::Map,
            _ => return None,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Param {
    Name,
    Type,
    Tag,
    Length,
    Print,
    ValueTerm,
    Encoding,
    Constructor,
    ConstructorEnd,
    FileStart,
    FileEnd,
    ContentTl,
    Filler,
    EndTag,
    ValueType,
    Value,
    Uvalue,
    Indent,
    Separator,
    Format,
    Form,
    ValueLengthAdjust,
    TlIncluded,
    MaybeConstructed,
    Path,
    BlockStart,
    BlockEnd,
    Hold,
    HexCaps,
    TypeMap,
}

impl Param {
    fn from_name(name: &[u8]) -> Option<Self> {
        let name = String::from_utf8_lossy(name).to_ascii_lowercase();
        Some(match name.as_str() {
            "name" => Param::Name,
            "type" => Param::Type,
            "tag" => Param::Tag,
            "length" => Param::Length,
            "print" => Param::Print,
            "value-term" => Param::ValueTerm,
            "encoding" => Param::Encoding,
            "constructor" => Param::Constructor,
            "constructor-end" => Param::ConstructorEnd,
            "file-start" => Param::FileStart,
            "file-end" => Param::FileEnd,
            "content-tl" => Param::ContentTl,
            "filler" => Param::Filler,
            "end-tag" => Param::EndTag,
            "value-type" => Param::ValueType,
            "value" => Param::Value,
            "uvalue" => Param::Uvalue,
            "indent" => Param::Indent,
            "separator" => Param::Separator,
            "format" => Param::Format,
            "form" => Param::Form,
            "value-length-adjust" => Param::ValueLengthAdjust,
            "tl-included" => Param::TlIncluded,
            "maybe-constructed" => Param::MaybeConstructed,
            "path" => Param::Path,
            "block-start" => Param::BlockStart,
            "block-end" => Param::BlockEnd,
            "hold" => Param::Hold,
            "hex-caps" => Param::HexCaps,
            "type-map" => Param::TypeMap,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Param::Name => "name",
            Param::Type => "type",
            Param::Tag => "tag",
            Param::Length => "length",
            Param::Print => "print",
            Param::ValueTerm => "value-term",
            Param::Encoding => "encoding",
            Param::Constructor => "constructor",
            Param::ConstructorEnd => "constructor-end",
            Param::FileStart => "file-start",
            Param::FileEnd => "file-end",
            Param::ContentTl => "content-tl",
            Param::Filler => "filler",
            Param::EndTag => "end-tag",
            Param::ValueType => "value-type",
            Param::Value => "value",
            Param::Uvalue => "uvalue",
            Param::Indent => "indent",
            Param::Separator => "separator",
            Param::Format => "format",
            Param::Form => "form",
            Param::ValueLengthAdjust => "value-length-adjust",
            Param::TlIncluded => "tl-included",
            Param::MaybeConstructed => "maybe-constructed",
            Param::Path => "path",
            Param::BlockStart => "block-start",
            Param::BlockEnd => "block-end",
            Param::Hold => "hold",
            Param::HexCaps => "hex-caps",
            Param::TypeMap => "type-map",
        }
    }
}

// --- type name table ------------------------------------------------------------------------------------------------

fn parse_field_encoding(name: &str) -> Option<FieldEncoding> {
    Some(match name.to_ascii_lowercase().as_str() {
        "int" | "int-be" => FieldEncoding::IntBe,
        "int-le" => FieldEncoding::IntLe,
        "uint" | "uint-be" => FieldEncoding::UintBe,
        "uint-le" => FieldEncoding::UintLe,
        "string" => FieldEncoding::Str,
        "hex" => FieldEncoding::Hex,
        "ber" => FieldEncoding::Ber,
        _ => return None,
    })
}

fn parse_value_kind(name: &str) -> Option<ValueKind> {
    Some(match name.to_ascii_lowercase().as_str() {
        "int" | "int-be" => ValueKind::IntBe,
        "int-le" => ValueKind::IntLe,
        "uint" | "uint-be" => ValueKind::UintBe,
        "uint-le" => ValueKind::UintLe,
        "string" => ValueKind::Str,
        "hex" => ValueKind::Hex,
        "hexs" => ValueKind::HexSwapped,
        "dec" => ValueKind::Dec,
        "escaped" => ValueKind::Escaped,
        "bcd" => ValueKind::Bcd,
        "bcds" => ValueKind::BcdSwapped,
        "bit-string" => ValueKind::BitString,
        "oid" => ValueKind::Oid,
        _ => return None,
    })
}

fn parse_form(name: &str) -> Option<Form> {
    Some(match name.to_ascii_lowercase().as_str() {
        "definite" => Form::Definite,
        "indefinite" => Form::Indefinite,
        _ => return None,
    })
}

fn parse_item_kind(name: &str) -> Option<ItemKind> {
    Some(match name.to_ascii_lowercase().as_str() {
        "constructed" => ItemKind::Constructed,
        "primitive" => ItemKind::Primitive,
        "end-of-content" => ItemKind::EndOfContent,
        _ => return None,
    })
}

// --- lexer ----------------------------------------------------------------------------------------------------------

const COMMENT: u8 = b'#';

struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    fn new(data: &'a [u8]) -> Self {
        // The terminating newline of a line is consumed before the line is parsed, so counting newlines yields the
        // number of the line an error is reported against.
        Self { data, pos: 0, line: 0 }
    }

    fn read_char(&mut self) -> Option<u8> {
        let c = *self.data.get(self.pos)?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_to_newline(&mut self) {
        while let Some(c) = self.read_char() {
            if c == b'\n' {
                break;
            }
        }
    }

    /// Assemble the next logical line: empty and comment lines are skipped, `\` at the end of a physical line
    /// continues onto the next, an unquoted `#` ends the line.
    fn logical_line(&mut self) -> Option<Vec<u8>> {
        let mut c;
        loop {
            loop {
                c = self.read_char()?;
                if !c.is_ascii_whitespace() {
                    break;
                }
            }
            if c == COMMENT {
                self.skip_to_newline();
                continue;
            }
            break;
        }

        let mut line = Vec::new();
        let mut quoted = false;
        let mut prev = 0u8;
        loop {
            match c {
                COMMENT if !quoted => {
                    self.skip_to_newline();
                    return Some(line);
                }
                b'"' => {
                    if prev != b'\\' {
                        quoted = !quoted;
                    }
                    line.push(c);
                }
                b'\n' => {
                    if line.last() == Some(&b'\\') {
                        *line.last_mut().expect("nonempty") = b' ';
                    } else {
                        return Some(line);
                    }
                }
                _ => line.push(c),
            }
            prev = c;
            c = match self.read_char() {
                Some(c) => c,
                None => return Some(line),
            };
        }
    }
}

// --- line parsing ---------------------------------------------------------------------------------------------------

struct ParamValue {
    param: Param,
    value: Vec<u8>,
}

impl ParamValue {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Split a logical line into its keyword and parameter/value pairs, processing quotes and escapes in the values.
fn parse_line(line: &[u8], lineno: u32) -> Result<(Keyword, Vec<ParamValue>)> {
    let mut i = 0;
    while i < line.len() && !line[i].is_ascii_whitespace() {
        i += 1;
    }
    let keyword = Keyword::from_name(&line[..i]).ok_or_else(|| config_error(lineno, "Unknown keyword", &line[..i]))?;

    let mut params = Vec::new();
    loop {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            return Ok((keyword, params));
        }
        let name_start = i;
        while i < line.len() && line[i] != b'=' {
            i += 1;
        }
        if i >= line.len() {
            return Err(config_error(lineno, "Invalid parameter, missing '='", b""));
        }
        let param = Param::from_name(&line[name_start..i])
            .ok_or_else(|| config_error(lineno, "Unknown parameter", &line[name_start..i]))?;
        i += 1;

        let mut value = Vec::new();
        let mut quoted = false;
        loop {
            let Some(&c) = line.get(i) else {
                break;
            };
            match c {
                b'\\' => {
                    i += 1;
                    let Some(&esc) = line.get(i) else {
                        return Err(config_error(lineno, "Invalid configuration line", b""));
                    };
                    match esc {
                        b'a' => value.push(0x07),
                        b'b' => value.push(0x08),
                        b't' => value.push(b'\t'),
                        b'n' => value.push(b'\n'),
                        b'v' => value.push(0x0b),
                        b'f' => value.push(0x0c),
                        b'r' => value.push(b'\r'),
                        b'\\' => value.push(b'\\'),
                        b'"' => value.push(b'"'),
                        b'x' => {
                            if let (Some(hi), Some(lo)) = (
                                line.get(i + 1).copied().and_then(hex_digit),
                                line.get(i + 2).copied().and_then(hex_digit),
                            ) {
                                value.push((hi << 4) | lo);
                                i += 2;
                            }
                        }
                        other => value.push(other),
                    }
                }
                b'"' => quoted = !quoted,
                b' ' if !quoted => break,
                other => value.push(other),
            }
            i += 1;
        }
        params.push(ParamValue { param, value });
    }
}

fn config_error(line: u32, message: &str, detail: &[u8]) -> Error {
    let message = if detail.is_empty() {
        message.to_string()
    } else {
        format!("{} '{}'", message, String::from_utf8_lossy(detail))
    };
    ErrorKind::Config { line, message }.into()
}

// --- field descriptor parsing ---------------------------------------------------------------------------------------

/// `sscanf("%li")`-style integer parse: `0x` hex, leading-zero octal, decimal, with an optional sign.
fn parse_c_i64(text: &str) -> Option<i64> {
    let t = text.trim();
    let (negative, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let value = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8).ok()?
    } else {
        t.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Parse a comma-separated `type,length,mask,shift,offset` field descriptor. The length position may hold a `/c/`
/// terminator instead of a byte count; trailing positions may be omitted or left empty.
fn parse_field_def(value: &[u8], lineno: u32) -> Result<FieldDef> {
    let invalid = |message: &str| config_error(lineno, message, value);

    let mut pos = 0usize;
    let next_segment = |pos: &mut usize| -> Option<Vec<u8>> {
        if *pos > value.len() {
            return None;
        }
        let start = *pos;
        let end = value[start..]
            .iter()
            .position(|&b| b == b',')
            .map(|p| start + p)
            .unwrap_or(value.len());
        *pos = end + 1;
        Some(value[start..end].to_vec())
    };

    let type_name = next_segment(&mut pos).unwrap_or_default();
    let encoding = parse_field_encoding(&String::from_utf8_lossy(&type_name))
        .ok_or_else(|| invalid("Invalid tag/length definition, unknown type"))?;
    let mut fd = FieldDef::new(encoding);

    // Length or terminator.
    if pos <= value.len() {
        let rest = &value[pos..];
        if rest.len() >= 3 && rest[0] == b'/' && rest[2] == b'/' {
            fd.terminator = rest[1];
            fd.use_terminator = true;
            pos += 4; // /c/ plus the following comma
        } else if let Some(segment) = next_segment(&mut pos) {
            fd.length = ascii_to_i64(&segment).max(0) as usize;
            if fd.length == 0 {
                return Err(invalid("Invalid tag/length definition, unknown length or terminator definition"));
            }
        }
    }

    if let Some(segment) = next_segment(&mut pos) {
        if !segment.is_empty() {
            fd.mask = parse_c_i64(&String::from_utf8_lossy(&segment)).unwrap_or(0) as u64;
        }
    }

    if let Some(segment) = next_segment(&mut pos) {
        if !segment.is_empty() {
            fd.shift = parse_c_i64(&String::from_utf8_lossy(&segment)).unwrap_or(0) as i32;
        }
    }

    if let Some(segment) = next_segment(&mut pos) {
        if !segment.is_empty() {
            fd.offset = String::from_utf8_lossy(&segment).trim().parse::<usize>().unwrap_or(0);
            fd.use_offset = true;
        }
    }

    Ok(fd)
}

// --- the block parser -----------------------------------------------------------------------------------------------

#[derive(Copy, Clone, PartialEq, Eq)]
enum State {
    Reading,
    StructureReading,
    TypemapReading,
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    state: State,
    required_structure: String,
    print_override: Option<String>,
    tls: Vec<TlSchema>,
    prints: Vec<PrintTemplate>,
    type_maps: Vec<TypeMap>,
    rules: Vec<TlvRule>,
    holds: Vec<HoldDef>,
    structure: Option<Structure>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a [u8], structure_name: &str, print_override: Option<&str>) -> Self {
        Self {
            lexer: Lexer::new(text),
            state: State::Reading,
            required_structure: structure_name.to_string(),
            print_override: print_override.map(str::to_string),
            tls: Vec::new(),
            prints: Vec::new(),
            type_maps: Vec::new(),
            rules: Vec::new(),
            holds: Vec::new(),
            structure: None,
        }
    }

    fn err(&self, message: &str) -> Error {
        config_error(self.lexer.line, message, b"")
    }

    fn err_param(&self, message: &str, param: Param) -> Error {
        config_error(self.lexer.line, message, param.name().as_bytes())
    }

    fn run(&mut self) -> Result<()> {
        while let Some(line) = self.lexer.logical_line() {
            let (keyword, params) = parse_line(&line, self.lexer.line)?;
            match keyword {
                Keyword::Structure => self.structure_block(params)?,
                Keyword::StructureEnd => {
                    if self.state == State::StructureReading {
                        self.state = State::Reading;
                    }
                }
                Keyword::Typemap => self.typemap_block(params)?,
                Keyword::TypemapEnd => {
                    if self.state == State::TypemapReading {
                        self.state = State::Reading;
                    } else {
                        return Err(self.err("Typemap-end keyword found"));
                    }
                }
                Keyword::Map => self.map_line(params)?,
                Keyword::Tl => self.tl_line(params)?,
                Keyword::Tlv => self.tlv_line(params)?,
                Keyword::Print => self.print_block(params)?,
            }
        }

        match self.state {
            State::StructureReading => Err(self.err("Structure definition has no end keyword")),
            State::TypemapReading => Err(self.err("Typemap definition has no end keyword")),
            State::Reading => Ok(()),
        }
    }

    fn finish(self) -> Result<Definitions> {
        let structure = self.structure.ok_or_else(|| {
            Error::new(ErrorKind::Invalid(format!(
                "No structure named as '{}'",
                self.required_structure
            )))
        })?;
        Ok(Definitions {
            tls: self.tls,
            prints: self.prints,
            type_maps: self.type_maps,
            rules: self.rules,
            holds: self.holds,
            structure,
        })
    }

    fn structure_block(&mut self, params: Vec<ParamValue>) -> Result<()> {
        if self.state == State::StructureReading {
            return Err(self.err("Structure keyword in structure definition"));
        }
        if self.state != State::Reading {
            return Err(self.err("Structure keyword found"));
        }

        let wanted = params
            .iter()
            .any(|p| p.param == Param::Name && p.text().eq_ignore_ascii_case(&self.required_structure));
        if !wanted || self.structure.is_some() {
            // Not the requested structure (or a duplicate): its tlv lines are skipped because the state stays put.
            return Ok(());
        }

        let mut structure = Structure {
            name: String::new(),
            print_name: self.print_override.clone().unwrap_or_else(|| "default".to_string()),
            print: None,
            tl_name: String::new(),
            content_tl: None,
            filler: Vec::new(),
            hex_caps: false,
        };

        for p in &params {
            match p.param {
                Param::Name => structure.name = p.text(),
                Param::Print => structure.print_name = p.text(),
                Param::ContentTl => structure.tl_name = p.text(),
                Param::Filler => structure.filler = p.value.clone(),
                Param::HexCaps => structure.hex_caps = p.text().eq_ignore_ascii_case("yes"),
                other => return Err(self.err_param("Unknown parameter for structure", other)),
            }
        }
        if structure.tl_name.is_empty() {
            return Err(self.err("Structure must have a tag-length definition name"));
        }

        self.structure = Some(structure);
        self.state = State::StructureReading;
        Ok(())
    }

    fn typemap_block(&mut self, params: Vec<ParamValue>) -> Result<()> {
        if self.state != State::Reading {
            return Err(self.err("Typemap keyword found"));
        }
        let mut map = TypeMap {
            name: String::new(),
            mappings: Vec::new(),
        };
        for p in &params {
            match p.param {
                Param::Name => map.name = p.text(),
                other => return Err(self.err_param("Unknown parameter for typemap", other)),
            }
        }
        self.type_maps.push(map);
        self.state = State::TypemapReading;
        Ok(())
    }

    fn map_line(&mut self, params: Vec<ParamValue>) -> Result<()> {
        if self.state != State::TypemapReading {
            return Err(self.err("Map keyword found outside a typemap definition"));
        }
        let mut source = None;
        let mut kind = None;
        for p in &params {
            match p.param {
                Param::Value => source = Some(p.text()),
                Param::ValueType => {
                    let text = p.text();
                    kind = Some(
                        parse_value_kind(&text)
                            .ok_or_else(|| config_error(self.lexer.line, "mapping: Unknown value-type", &p.value))?,
                    );
                }
                other => return Err(self.err_param("Unknown parameter for mapping", other)),
            }
        }
        let map = self.type_maps.last_mut().expect("inside a typemap block");
        map.mappings
            .push((source.unwrap_or_default(), kind.unwrap_or(ValueKind::Unknown)));
        Ok(())
    }

    fn tl_line(&mut self, params: Vec<ParamValue>) -> Result<()> {
        if self.state != State::Reading {
            return Err(self.err("tl must not be defined here"));
        }

        let mut tl = TlSchema {
            name: String::new(),
            tag: FieldDef::new(FieldEncoding::Ber),
            typ: None,
            len: None,
            form: Form::Definite,
            tl_included: false,
            value_terminator: Vec::new(),
            print_name: None,
            print: None,
            type_map_name: None,
            type_map: None,
        };
        let mut have_tag = false;

        for p in &params {
            match p.param {
                Param::Name => tl.name = p.text(),
                Param::Tag => {
                    tl.tag = parse_field_def(&p.value, self.lexer.line)?;
                    have_tag = true;
                }
                Param::Type => {
                    let fd = parse_field_def(&p.value, self.lexer.line)?;
                    if fd.encoding == FieldEncoding::Ber {
                        return Err(self.err_param("Type cannot be used with BER", p.param));
                    }
                    tl.typ = Some(fd);
                }
                Param::Length => tl.len = Some(parse_field_def(&p.value, self.lexer.line)?),
                Param::Print => {
                    if self.print_override.is_none() {
                        tl.print_name = Some(p.text());
                    }
                }
                Param::ValueTerm => tl.value_terminator = p.value.clone(),
                Param::TlIncluded => {
                    let text = p.text();
                    if text.eq_ignore_ascii_case("yes") {
                        tl.tl_included = true;
                    } else if text.eq_ignore_ascii_case("no") {
                        tl.tl_included = false;
                    } else {
                        return Err(self.err_param("tl: Invalid value for tl-included", p.param));
                    }
                }
                Param::TypeMap => tl.type_map_name = Some(p.text()),
                other => return Err(self.err_param("tl: Unknown parameter", other)),
            }
        }

        if tl.name.is_empty() {
            return Err(self.err("tl: A definition must have a name"));
        }
        if !have_tag {
            return Err(self.err("tl: A definition must have tag definition"));
        }
        if tl.len.is_none() && tl.value_terminator.is_empty() {
            return Err(self.err("tl: length or value-terminator must be defined"));
        }
        if tl.len.is_some() && !tl.value_terminator.is_empty() {
            return Err(self.err("tl: length and value-terminator are mutually exclusive"));
        }
        if let Some(print) = &self.print_override {
            tl.print_name = Some(print.clone());
        }

        tl.form = if tl.value_terminator.is_empty() {
            Form::Definite
        } else {
            Form::Indefinite
        };

        if tl.tag.encoding == FieldEncoding::Ber {
            tl.value_terminator = crate::ber::EOC_TERMINATOR.to_vec();
        }

        self.tls.push(tl);
        Ok(())
    }

    fn tlv_line(&mut self, params: Vec<ParamValue>) -> Result<()> {
        if self.state != State::StructureReading {
            // Rules outside the requested structure are skipped wholesale.
            return Ok(());
        }

        let mut rule = TlvRule {
            path: None,
            name: None,
            stag: String::new(),
            etag: String::new(),
            kind: ItemKind::Unknown,
            form: Form::Unknown,
            value_kind: ValueKind::Unknown,
            maybe_constructor: false,
            content_tl_name: None,
            content_tl: None,
            print_name: None,
            print: None,
            encoding: None,
            format: None,
            length_adjust: 0,
            hold: None,
        };
        let mut have_stag = false;
        let mut have_etag = false;

        for p in &params {
            match p.param {
                Param::Path => rule.path = Some(p.text()),
                Param::Name => rule.name = Some(p.text()),
                Param::Tag => {
                    rule.stag = p.text();
                    have_stag = true;
                }
                Param::EndTag => {
                    rule.etag = p.text();
                    have_etag = true;
                }
                Param::Form => {
                    let text = p.text();
                    rule.form = parse_form(&text)
                        .ok_or_else(|| config_error(self.lexer.line, "tlv: Unknown form", &p.value))?;
                }
                Param::Type => {
                    let text = p.text();
                    rule.kind = parse_item_kind(&text)
                        .ok_or_else(|| config_error(self.lexer.line, "tlv: Unknown type", &p.value))?;
                }
                Param::ValueType => {
                    let text = p.text();
                    rule.value_kind = parse_value_kind(&text)
                        .ok_or_else(|| config_error(self.lexer.line, "tlv: Unknown value-type", &p.value))?;
                }
                Param::ContentTl => rule.content_tl_name = Some(p.text()),
                Param::Print => {
                    if self.print_override.is_none() {
                        rule.print_name = Some(p.text());
                    }
                }
                Param::Encoding => rule.encoding = Some(p.text()),
                Param::ValueLengthAdjust => rule.length_adjust = ascii_to_i64(&p.value),
                Param::Format => rule.format = Some(p.text()),
                Param::MaybeConstructed => {
                    let text = p.text();
                    if text.eq_ignore_ascii_case("yes") {
                        rule.maybe_constructor = true;
                    } else if text.eq_ignore_ascii_case("no") {
                        rule.maybe_constructor = false;
                    } else {
                        return Err(self.err_param("tlv: Invalid value for maybe-constructed", p.param));
                    }
                }
                Param::Hold => {
                    let text = p.text();
                    if text.eq_ignore_ascii_case("yes") {
                        self.holds.push(HoldDef { name: None });
                        rule.hold = Some(HoldId(self.holds.len() - 1));
                    } else if text.eq_ignore_ascii_case("no") {
                        rule.hold = None;
                    } else {
                        rule.hold = Some(self.find_or_add_hold(&text));
                    }
                }
                other => return Err(self.err_param("tlv: Unknown parameter", other)),
            }
        }

        if let (Some(id), Some(name)) = (rule.hold, rule.name.clone()) {
            let slot = &mut self.holds[id.0];
            if slot.name.is_none() {
                slot.name = Some(name);
            }
        }
        if !have_stag {
            return Err(self.err("tlv: tag missing"));
        }
        if !have_etag {
            rule.etag = rule.stag.clone();
        }
        if let Some(print) = &self.print_override {
            rule.print_name = Some(print.clone());
        }

        self.rules.push(rule);
        Ok(())
    }

    fn find_or_add_hold(&mut self, name: &str) -> HoldId {
        if let Some(i) = self
            .holds
            .iter()
            .position(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        {
            return HoldId(i);
        }
        self.holds.push(HoldDef {
            name: Some(name.to_string()),
        });
        HoldId(self.holds.len() - 1)
    }

    fn print_block(&mut self, params: Vec<ParamValue>) -> Result<()> {
        if self.state != State::Reading {
            return Err(self.err("Printing definition found"));
        }

        let mut print = PrintTemplate {
            name: String::new(),
            file_head: None,
            file_trailer: None,
            level_head: None,
            level_trailer: None,
            block_start: None,
            block_end: None,
            content: "%v".to_string(),
            ucontent: String::new(),
            indent: None,
            encoding: None,
            separator: None,
        };
        let mut have_ucontent = false;

        for p in &params {
            match p.param {
                Param::Name => print.name = p.text(),
                Param::FileStart => print.file_head = Some(p.text()),
                Param::FileEnd => print.file_trailer = Some(p.text()),
                Param::Constructor => print.level_head = Some(p.text()),
                Param::ConstructorEnd => print.level_trailer = Some(p.text()),
                Param::Value => print.content = p.text(),
                Param::Uvalue => {
                    print.ucontent = p.text();
                    have_ucontent = true;
                }
                Param::Indent => print.indent = Some(p.text()),
                Param::Encoding => print.encoding = Some(p.text()),
                Param::Separator => print.separator = p.value.first().copied(),
                Param::BlockStart => print.block_start = Some(p.text()),
                Param::BlockEnd => print.block_end = Some(p.text()),
                other => return Err(self.err_param("print: Unknown parameter", other)),
            }
        }

        if print.name.is_empty() {
            return Err(self.err("print: Printing definition must have a name"));
        }
        if !have_ucontent {
            print.ucontent = print.content.clone();
        }

        self.prints.push(print);
        Ok(())
    }
}
