//! The buffered print list: filtering, expression evaluation, hold variables, template expansion and indentation.
//!
//! Items are not written the moment they are parsed. They are appended to a print list and flushed after every
//! triplet; when selection expressions (or a start level) are in force the flush is deferred until the list head's
//! element is complete, so a whole block can be emitted — or silently dropped — as one unit. Constructor entries
//! stay on the list after their head template is printed, because their closing template can only be emitted once
//! the parser has left them.

use std::io::Write;

use regex::bytes::Regex;

use crate::buffer::{BufferState, StreamBuffer};
use crate::def::{Definitions, RuleId};
use crate::error::{Error, ErrorKind, Result};
use crate::item::{ItemKind, TlvItem};
use crate::level::{FIRST_LEVEL, MAX_DEPTH};
use crate::recode::Recoder;

const PATH_SEPARATOR: char = '.';

/// The display name of an item: the matched rule's name, or the tag in brackets.
pub(crate) fn display_name(defs: &Definitions, item: &TlvItem) -> String {
    if let Some(rule) = item.rule {
        if let Some(name) = &defs.rule(rule).name {
            return name.clone();
        }
    }
    format!("[{}]", item.tag)
}

fn rule_name<'a>(defs: &'a Definitions, rule: Option<RuleId>) -> Option<&'a str> {
    rule.and_then(|r| defs.rule(r).name.as_deref())
}

/// Raw bytes as `xNN` pairs, always lower case, for `%d`/`%D` and error dumps.
pub(crate) fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for &byte in data {
        out.push('x');
        out.push(char::from_digit((byte >> 4) as u32, 16).expect("nibble"));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).expect("nibble"));
    }
    out
}

// --- print list entries ---------------------------------------------------------------------------------------------

struct PrintEntry {
    item: TlvItem,
    printed: bool,
    trailer_printed: bool,
}

impl PrintEntry {
    fn new(item: TlvItem) -> Self {
        Self {
            item,
            printed: false,
            trailer_printed: false,
        }
    }

    /// Fully emitted: primitives once their content is out, constructors only once their trailer is out too.
    fn is_printed(&self) -> bool {
        self.printed && (self.item.kind != ItemKind::Constructed || self.trailer_printed)
    }
}

// --- expressions ----------------------------------------------------------------------------------------------------

struct Expression {
    name: String,
    regex: Regex,
    result: bool,
}

// --- template context -----------------------------------------------------------------------------------------------

/// Which directive set a template position may use.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Mode {
    Primitive,
    LevelHead,
    /// Raw-dump directives are suppressed: the bytes may already have left the window.
    LevelTrailer,
    /// File headers/trailers and block delimiters: only `%f`, `%s` and literals.
    File,
}

// --- OutputEngine ---------------------------------------------------------------------------------------------------

/// The deferred print list and everything that decides what it emits.
pub struct OutputEngine {
    out: Box<dyn Write>,
    entries: Vec<PrintEntry>,
    /// Display names of the constructors the parser is currently inside.
    path_names: Vec<String>,
    path_cache: String,
    path_dirty: bool,
    names: Vec<String>,
    expressions: Vec<Expression>,
    expression_and: bool,
    /// 0 means unset.
    start_level: usize,
    stop_level: usize,
    hold_values: Vec<Option<Vec<u8>>>,
}

impl OutputEngine {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out,
            entries: Vec::new(),
            path_names: Vec::new(),
            path_cache: String::new(),
            path_dirty: false,
            names: Vec::new(),
            expressions: Vec::new(),
            expression_and: false,
            start_level: 0,
            stop_level: MAX_DEPTH,
            hold_values: Vec::new(),
        }
    }

    // --- configuration ---------------------------------------------------------------------------------------------

    pub fn set_start_level(&mut self, level: usize) -> Result<()> {
        if level < 1 {
            return Err(ErrorKind::Invalid("Start level must be numeric and greater than zero".into()).into());
        }
        self.start_level = level;
        Ok(())
    }

    pub fn set_stop_level(&mut self, level: usize) -> Result<()> {
        if level < 1 {
            return Err(ErrorKind::Invalid("Stop level must be numeric and greater than zero".into()).into());
        }
        self.stop_level = level;
        Ok(())
    }

    /// Add comma-separated display names to the name filter.
    pub fn add_names(&mut self, names: &str) {
        for name in names.split(',') {
            if !name.is_empty() {
                self.names.push(name.to_string());
            }
        }
    }

    /// Add a `name=regex` selection expression.
    pub fn add_expression(&mut self, expression: &str) -> Result<()> {
        let Some((name, pattern)) = expression.split_once('=') else {
            return Err(ErrorKind::Invalid(format!("An expression must contain '=': '{}'", expression)).into());
        };
        let regex = Regex::new(pattern).map_err(|source| ErrorKind::Regex {
            pattern: pattern.to_string(),
            source,
        })?;
        self.expressions.push(Expression {
            name: name.to_string(),
            regex,
            result: false,
        });
        Ok(())
    }

    pub fn set_expression_and(&mut self, and: bool) {
        self.expression_and = and;
    }

    /// Size the hold-value table to the configuration's hold slots.
    pub fn init_holds(&mut self, count: usize) {
        self.hold_values = vec![None; count];
    }

    /// Forget all hold values; run at the start of every input file.
    pub fn clear_holds(&mut self) {
        for value in &mut self.hold_values {
            *value = None;
        }
    }

    /// Fail fast on misspelled filter or expression names: every name that is not a `[tag]` form must be the name
    /// of some rule. With an empty name filter and no start level, expression names become the name filter.
    pub fn check_names(&mut self, defs: &Definitions) -> Result<()> {
        let adopt_expression_names = self.names.is_empty() && self.start_level == 0;

        let mut adopted = Vec::new();
        for expression in &self.expressions {
            if !expression.name.starts_with('[')
                && !defs
                    .rules
                    .iter()
                    .any(|r| r.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&expression.name)))
            {
                return Err(ErrorKind::Invalid(format!(
                    "Expression name not found in tlv names: '{}'",
                    expression.name
                ))
                .into());
            }
            if adopt_expression_names {
                adopted.push(expression.name.clone());
            }
        }
        self.names.extend(adopted);

        for name in &self.names {
            if !name.starts_with('[')
                && !defs
                    .rules
                    .iter()
                    .any(|r| r.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            {
                return Err(ErrorKind::Invalid(format!("Name not found in tlv names: '{}'", name)).into());
            }
        }
        Ok(())
    }

    // --- path maintenance ------------------------------------------------------------------------------------------

    /// The parser entered a constructor: push its display name onto the path.
    pub fn down(&mut self, item: &TlvItem, defs: &Definitions) -> Result<()> {
        if self.path_names.len() >= MAX_DEPTH {
            return Err(ErrorKind::Invalid("Too deep hierarchy".into()).into());
        }
        self.path_names.push(display_name(defs, item));
        self.path_dirty = true;
        Ok(())
    }

    /// The parser left a constructor.
    pub fn up(&mut self) {
        self.path_names.pop();
        self.path_dirty = true;
    }

    /// The current hierarchical path, components joined with dots.
    pub fn path(&mut self) -> &str {
        if self.path_dirty {
            self.path_cache.clear();
            for (i, name) in self.path_names.iter().enumerate() {
                if i > 0 {
                    self.path_cache.push(PATH_SEPARATOR);
                }
                self.path_cache.push_str(name);
            }
            self.path_dirty = false;
        }
        &self.path_cache
    }

    // --- adding items ----------------------------------------------------------------------------------------------

    /// Decide whether an item passes the level and name filters.
    fn check_item(&self, item: &TlvItem, defs: &Definitions) -> bool {
        if self.start_level != 0 || self.stop_level != MAX_DEPTH {
            if item.level < self.start_level || item.level > self.stop_level {
                return false;
            }
        }
        if self.names.is_empty() {
            return true;
        }

        let item_name = display_name(defs, item);
        for name in &self.names {
            if name.eq_ignore_ascii_case(&item_name) {
                return true;
            }
            // A selected constructor selects its whole subtree.
            if self.path_names.iter().any(|p| name.eq_ignore_ascii_case(p)) {
                return true;
            }
        }
        false
    }

    fn evaluate_expressions(&mut self, item: &TlvItem, defs: &Definitions) {
        let item_name = display_name(defs, item);
        for expression in &mut self.expressions {
            if expression.name.eq_ignore_ascii_case(&item_name) && expression.regex.is_match(&item.converted_value) {
                expression.result = true;
            }
        }
    }

    /// Append one parsed item, evaluating expressions and updating hold variables as a side effect. The last entry
    /// is reused when it has been fully emitted.
    pub fn add_item(&mut self, item: &TlvItem, defs: &Definitions) {
        if self.check_item(item, defs) {
            match self.entries.last_mut() {
                Some(last) if last.is_printed() => {
                    last.item.clone_from(item);
                    last.printed = false;
                    last.trailer_printed = false;
                }
                _ => self.entries.push(PrintEntry::new(item.clone())),
            }
        }

        match item.kind {
            ItemKind::Primitive => {
                if !self.expressions.is_empty() {
                    self.evaluate_expressions(item, defs);
                }
                if let Some(hold) = item.rule.and_then(|r| defs.rule(r).hold) {
                    self.hold_values[hold.0] = Some(item.converted_value.clone());
                }
            }
            ItemKind::Constructed => {
                if let Some(hold) = item.rule.and_then(|r| defs.rule(r).hold) {
                    if let Some(name) = rule_name(defs, item.rule) {
                        self.hold_values[hold.0] = Some(name.as_bytes().to_vec());
                    }
                }
            }
            _ => {}
        }
    }

    // --- expression gating -----------------------------------------------------------------------------------------

    /// Expression results are evaluated when the list head's element is complete: immediately for a primitive head
    /// (unless a start level defers it), and once the parser has left a constructed head's level.
    fn should_evaluate(&self, current_level: usize) -> bool {
        let Some(head) = self.entries.first() else {
            return false;
        };
        match head.item.kind {
            ItemKind::Primitive | ItemKind::EndOfContent => {
                if self.start_level != 0 {
                    self.start_level >= current_level
                } else {
                    true
                }
            }
            ItemKind::Constructed => head.item.level >= current_level,
            ItemKind::Unknown => false,
        }
    }

    fn expressions_hold(&self) -> bool {
        if self.expression_and {
            self.expressions.iter().all(|e| e.result)
        } else {
            self.expressions.iter().any(|e| e.result)
        }
    }

    // --- printing --------------------------------------------------------------------------------------------------

    pub fn file_header(&mut self, defs: &Definitions, buffer: &StreamBuffer, recoder: &mut dyn Recoder) -> Result<()> {
        let template = defs.structure_print();
        self.print_item(
            None,
            template.file_head.as_deref(),
            template.indent.as_deref(),
            None,
            None,
            Mode::File,
            defs,
            buffer,
            recoder,
        )
    }

    pub fn file_trailer(&mut self, defs: &Definitions, buffer: &StreamBuffer, recoder: &mut dyn Recoder) -> Result<()> {
        let template = defs.structure_print();
        self.print_item(
            None,
            template.file_trailer.as_deref(),
            template.indent.as_deref(),
            None,
            None,
            Mode::File,
            defs,
            buffer,
            recoder,
        )
    }

    /// Flush the print list after a triplet. Without expressions or a start level the pending entries are printed
    /// right away; otherwise the list is held back until the head element completes, then printed inside
    /// block-start/block-end delimiters when the expressions evaluate true, or dropped wholesale when they do not.
    pub fn print_list(
        &mut self,
        defs: &Definitions,
        buffer: &mut StreamBuffer,
        recoder: &mut dyn Recoder,
        codeset: &str,
        current_level: usize,
    ) -> Result<()> {
        if !self.expressions.is_empty() || self.start_level > 0 {
            if self.should_evaluate(current_level) {
                if self.expressions_hold() || self.expressions.is_empty() {
                    let printable = self.entries.iter().any(|e| !e.printed);
                    let structure_print = defs.structure_print();
                    let block_start = structure_print.block_start.as_deref();
                    let block_end = structure_print.block_end.as_deref();
                    let indent = structure_print.indent.as_deref();
                    if printable {
                        self.print_item(
                            None,
                            block_start,
                            indent,
                            None,
                            None,
                            Mode::File,
                            defs,
                            buffer,
                            recoder,
                        )?;
                    }
                    self.do_print(defs, buffer, recoder, codeset, current_level)?;
                    if printable {
                        self.print_item(
                            None,
                            block_end,
                            indent,
                            None,
                            None,
                            Mode::File,
                            defs,
                            buffer,
                            recoder,
                        )?;
                    }
                }
                self.purge(true);
                buffer.printed()?;
                for expression in &mut self.expressions {
                    expression.result = false;
                }
            }
        } else {
            self.do_print(defs, buffer, recoder, codeset, current_level)?;
            self.purge(false);
            buffer.printed()?;
        }
        Ok(())
    }

    fn do_print(
        &mut self,
        defs: &Definitions,
        buffer: &StreamBuffer,
        recoder: &mut dyn Recoder,
        codeset: &str,
        current_level: usize,
    ) -> Result<()> {
        let mut entries = std::mem::take(&mut self.entries);
        let result = self.do_print_inner(&mut entries, defs, buffer, recoder, codeset, current_level);
        self.entries = entries;
        result
    }

    fn do_print_inner(
        &mut self,
        entries: &mut [PrintEntry],
        defs: &Definitions,
        buffer: &StreamBuffer,
        recoder: &mut dyn Recoder,
        codeset: &str,
        current_level: usize,
    ) -> Result<()> {
        let mut prev_level = FIRST_LEVEL;
        let mut last_idx: Option<usize> = None;

        for idx in 0..entries.len() {
            let level = entries[idx].item.level;
            if prev_level > level {
                // The list stepped up a level: close the constructors the parser has left.
                self.close_constructors(entries, last_idx, level, defs, buffer, recoder)?;
            }

            if !entries[idx].printed {
                let item = &entries[idx].item;
                let template = defs.print_for(item.tl, item.rule);
                match item.kind {
                    ItemKind::Constructed => {
                        self.print_item(
                            Some(item),
                            template.level_head.as_deref(),
                            template.indent.as_deref(),
                            None,
                            None,
                            Mode::LevelHead,
                            defs,
                            buffer,
                            recoder,
                        )?;
                    }
                    _ => {
                        let from = item.rule.and_then(|r| defs.rule(r).encoding.as_deref());
                        let to = template.encoding.as_deref().unwrap_or(codeset);
                        let content = if rule_name(defs, item.rule).is_some() {
                            template.content.as_str()
                        } else {
                            template.ucontent.as_str()
                        };
                        self.print_item(
                            Some(item),
                            Some(content),
                            template.indent.as_deref(),
                            from,
                            Some(to),
                            Mode::Primitive,
                            defs,
                            buffer,
                            recoder,
                        )?;
                        if idx + 1 < entries.len() {
                            if let Some(separator) = template.separator {
                                self.write_bytes(&[separator])?;
                            }
                        }
                    }
                }
                entries[idx].printed = true;
            }

            last_idx = Some(idx);
            prev_level = level;
        }

        self.close_constructors(entries, last_idx, current_level, defs, buffer, recoder)
    }

    /// Emit level trailers for every still-open constructor at or above `min_level`, innermost first.
    fn close_constructors(
        &mut self,
        entries: &mut [PrintEntry],
        last_idx: Option<usize>,
        min_level: usize,
        defs: &Definitions,
        buffer: &StreamBuffer,
        recoder: &mut dyn Recoder,
    ) -> Result<()> {
        let Some(last_idx) = last_idx else {
            return Ok(());
        };
        loop {
            let open = entries[..=last_idx]
                .iter()
                .rposition(|e| e.item.kind == ItemKind::Constructed && !e.trailer_printed);
            let Some(ci) = open else {
                return Ok(());
            };
            if entries[ci].item.level < min_level {
                return Ok(());
            }
            let item = &entries[ci].item;
            let template = defs.print_for(item.tl, item.rule);
            self.print_item(
                Some(item),
                template.level_trailer.as_deref(),
                template.indent.as_deref(),
                None,
                None,
                Mode::LevelTrailer,
                defs,
                buffer,
                recoder,
            )?;
            entries[ci].trailer_printed = true;
        }
    }

    /// Drop emitted entries. A forced purge (the expression path) keeps only the head, marked emitted for reuse; a
    /// plain purge keeps everything up to the first fully emitted entry, which stays for reuse as well.
    fn purge(&mut self, force: bool) {
        if self.entries.is_empty() {
            return;
        }
        if force {
            self.entries[0].printed = true;
            self.entries[0].trailer_printed = true;
            self.entries.truncate(1);
        } else if let Some(i) = self.entries.iter().position(|e| e.is_printed()) {
            self.entries.truncate(i + 1);
        }
    }

    // --- template expansion ----------------------------------------------------------------------------------------

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes).map_err(|e| Error::new(ErrorKind::Write(e)))
    }

    fn write_str(&mut self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes())
    }

    fn write_indent(&mut self, indent: Option<&str>, level: usize) -> Result<()> {
        let Some(indent) = indent else {
            return Ok(());
        };
        if indent.is_empty() {
            return Ok(());
        }
        for _ in 1..level {
            self.write_str(indent)?;
        }
        Ok(())
    }

    /// Expand one template: `%` directives, `$name` hold substitutions (longest name wins), indentation after
    /// every interior newline.
    #[allow(clippy::too_many_arguments)]
    fn print_item(
        &mut self,
        item: Option<&TlvItem>,
        template: Option<&str>,
        indent: Option<&str>,
        from_encoding: Option<&str>,
        to_encoding: Option<&str>,
        mode: Mode,
        defs: &Definitions,
        buffer: &StreamBuffer,
        recoder: &mut dyn Recoder,
    ) -> Result<()> {
        let Some(template) = template else {
            return Ok(());
        };
        if template.is_empty() {
            return Ok(());
        }

        let level = item.map(|i| i.level).unwrap_or(FIRST_LEVEL);
        self.write_indent(indent, level)?;

        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' => {
                    i += 1;
                    let Some(&directive) = bytes.get(i) else {
                        break;
                    };
                    self.write_directive(directive, mode, item, from_encoding, to_encoding, defs, buffer, recoder)?;
                    i += 1;
                }
                b'\n' => {
                    self.write_bytes(b"\n")?;
                    // Re-indent interior newlines; the terminal newline is left alone.
                    if i + 1 < bytes.len() {
                        self.write_indent(indent, level)?;
                    }
                    i += 1;
                }
                b'$' => match self.find_hold(&bytes[i + 1..], defs) {
                    Some((name_len, value)) => {
                        self.write_bytes(&value)?;
                        i += 1 + name_len;
                    }
                    None => {
                        self.write_bytes(b"$")?;
                        i += 1;
                    }
                },
                other => {
                    self.write_bytes(&[other])?;
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Longest hold name that prefixes `rest`, with its current value (empty when never assigned).
    fn find_hold(&self, rest: &[u8], defs: &Definitions) -> Option<(usize, Vec<u8>)> {
        let mut found: Option<(usize, usize)> = None;
        for (i, hold) in defs.holds.iter().enumerate() {
            let Some(name) = hold.name.as_deref() else {
                continue;
            };
            let len = name.len();
            if rest.len() >= len && rest[..len].eq_ignore_ascii_case(name.as_bytes()) {
                if found.map(|(_, best)| len > best).unwrap_or(true) {
                    found = Some((i, len));
                }
            }
        }
        found.map(|(i, len)| (len, self.hold_values[i].clone().unwrap_or_default()))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_directive(
        &mut self,
        directive: u8,
        mode: Mode,
        item: Option<&TlvItem>,
        from_encoding: Option<&str>,
        to_encoding: Option<&str>,
        defs: &Definitions,
        buffer: &StreamBuffer,
        recoder: &mut dyn Recoder,
    ) -> Result<()> {
        match directive {
            b'%' => return self.write_str("%"),
            b'$' => return self.write_str("$"),
            _ => {}
        }

        if mode == Mode::File && !matches!(directive, b'f' | b's') {
            return Ok(());
        }

        match directive {
            b'f' => self.write_str(buffer.file_name()),
            b's' => self.write_str(&defs.structure.name),
            b'>' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&item.level.to_string())
            }
            b'l' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&item.length.to_string())
            }
            b'c' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&item.consumed().to_string())
            }
            b't' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&item.tag)
            }
            b'n' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&display_name(defs, item))
            }
            b'p' => {
                // The path is only coherent when nothing is deferred waiting for an expression verdict.
                if self.expressions.is_empty() {
                    let path = self.path().to_string();
                    self.write_str(&path)
                } else {
                    Ok(())
                }
            }
            b'o' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&item.file_offset.to_string())
            }
            b'O' => {
                let Some(item) = item else { return Ok(()) };
                self.write_str(&item.total_offset.to_string())
            }
            b'd' => {
                let Some(item) = item else { return Ok(()) };
                if mode != Mode::LevelTrailer && buffer.state() == BufferState::Ok {
                    if let Some(raw) = buffer.slice_at(item.raw_tl, item.raw_tl_length) {
                        let dump = hex_dump(raw);
                        return self.write_str(&dump);
                    }
                }
                Ok(())
            }
            b'D' => {
                let Some(item) = item else { return Ok(()) };
                if mode != Mode::LevelTrailer && buffer.state() == BufferState::Ok {
                    let len = item.raw_value_length.max(0) as usize;
                    if let Some(raw) = buffer.slice_at(item.raw_value, len) {
                        let dump = hex_dump(raw);
                        return self.write_str(&dump);
                    }
                }
                Ok(())
            }
            b'v' if mode == Mode::Primitive => {
                let Some(item) = item else { return Ok(()) };
                let value = self.converted(item, from_encoding, to_encoding, recoder)?;
                self.write_bytes(&value)
            }
            b'T' if mode == Mode::Primitive => {
                let Some(item) = item else { return Ok(()) };
                let value = self.converted(item, from_encoding, to_encoding, recoder)?;
                self.write_bytes(trim_ascii(&value))
            }
            _ => Ok(()),
        }
    }

    fn converted(
        &mut self,
        item: &TlvItem,
        from_encoding: Option<&str>,
        to_encoding: Option<&str>,
        recoder: &mut dyn Recoder,
    ) -> Result<Vec<u8>> {
        if let (Some(from), Some(to)) = (from_encoding, to_encoding) {
            recoder.recode(&item.converted_value, from, to)
        } else {
            Ok(item.converted_value.clone())
        }
    }

    /// Flush the underlying writer; run once at the end of the run.
    pub fn finish(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| Error::new(ErrorKind::Write(e)))
    }
}

fn trim_ascii(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &data[start..end]
}
