//! The per-triplet parse loop and the per-file drive loop, with all run state bundled in one [Engine] value.
//!
//! A triplet is parsed in a fixed protocol: reclaim window space, skip fillers, snapshot the parse position, read
//! the tag/type/length fields with the current level's schema, commit them, match a rule, maybe probe for a nested
//! constructor, then either decode and commit the value (primitives) or leave the value bytes for the children
//! (constructors). Level bookkeeping and the output flush happen between triplets.

use std::io::Write;

use tracing::{debug, info, warn};

use crate::buffer::StreamBuffer;
use crate::def::{Definitions, RuleCache, TlSchema};
use crate::error::{Error, ErrorKind, ItemContext, Result};
use crate::field::{self, FieldEncoding};
use crate::item::{Form, ItemKind, TlvItem};
use crate::level::LevelStack;
use crate::output::{hex_dump, OutputEngine};
use crate::recode::{CharsetRecoder, Recoder};
use crate::value::{self, ValueKind};

/// Where the first unprocessable window bytes are dumped when debugging a parse failure.
const DEBUG_DUMP_FILE: &str = "tlve.debug";

/// How many raw bytes of a failed element are shown in diagnostics.
const ERROR_DUMP_LEN: i64 = 10;

// --- tag-length reading ---------------------------------------------------------------------------------------------

struct TlRead {
    /// max(tag, type, length) consumed counts; the fields may share bytes under explicit offsets.
    consumed: usize,
    tag: String,
    typ: String,
    length: i64,
    kind: Option<ItemKind>,
    form: Option<Form>,
}

/// Read a tag-length pair at `base` bytes past the cursor without committing anything. Returns `None` when the
/// window cannot provide the fields.
fn read_tl(buffer: &mut StreamBuffer, tl: &TlSchema, base: usize, hex_caps: bool) -> Result<Option<TlRead>> {
    let Some(tag) = field::read_tag(buffer, &tl.tag, base, hex_caps)? else {
        return Ok(None);
    };
    let mut consumed = tag.consumed;

    let mut typ = String::new();
    if let Some(fd) = &tl.typ {
        let Some((type_consumed, text)) = field::read_type(buffer, fd, base, consumed, hex_caps)? else {
            return Ok(None);
        };
        typ = text;
        consumed = consumed.max(type_consumed);
    }

    let mut length: i64 = 0;
    let mut length_consumed = 0usize;
    if let Some(fd) = &tl.len {
        let Some((consumed_now, value)) = field::read_length(buffer, fd, base, consumed)? else {
            return Ok(None);
        };
        length = value;
        length_consumed = consumed_now;
    }

    let raw_tl_length = consumed.max(length_consumed);
    if tl.tl_included {
        length -= raw_tl_length as i64;
    }

    Ok(Some(TlRead {
        consumed: raw_tl_length,
        tag: tag.text,
        typ,
        length,
        kind: tag.kind,
        form: tag.form,
    }))
}

// --- Engine ---------------------------------------------------------------------------------------------------------

/// A single-threaded parse engine owning the buffer, level stack, definitions and output state for one run.
pub struct Engine {
    defs: Definitions,
    buffer: StreamBuffer,
    levels: LevelStack,
    output: OutputEngine,
    recoder: Box<dyn Recoder>,
    cache: RuleCache,
    /// Re-populated for every triplet; the output engine copies it when it survives filtering.
    item: TlvItem,
    codeset: String,
    debug: bool,
}

impl Engine {
    pub fn new(defs: Definitions, out: Box<dyn Write>) -> Self {
        Self::with_window_size(defs, out, crate::buffer::WINDOW_SIZE)
    }

    /// An engine with a non-default buffer window, for embedding and tests.
    pub fn with_window_size(defs: Definitions, out: Box<dyn Write>, window_size: usize) -> Self {
        let root_tl = defs.structure.content_tl.expect("definitions are resolved");
        let mut output = OutputEngine::new(out);
        output.init_holds(defs.holds.len());
        Self {
            item: TlvItem::empty(root_tl),
            levels: LevelStack::new(root_tl),
            buffer: StreamBuffer::with_window_size(window_size),
            output,
            recoder: Box::new(CharsetRecoder::new()),
            cache: RuleCache::new(),
            codeset: crate::recode::locale_codeset(),
            debug: false,
            defs,
        }
    }

    // --- run options -------------------------------------------------------------------------------------------

    pub fn add_input(&mut self, name: &str) {
        self.buffer.add_file(name);
    }

    pub fn set_open_command(&mut self, template: Option<String>) {
        self.buffer.set_open_command(template);
    }

    /// Dump unprocessable bytes to `tlve.debug` when a parse fails.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Override the default target character encoding (the locale codeset).
    pub fn set_codeset(&mut self, codeset: String) {
        self.codeset = codeset;
    }

    pub fn set_recoder(&mut self, recoder: Box<dyn Recoder>) {
        self.recoder = recoder;
    }

    pub fn add_names(&mut self, names: &str) {
        self.output.add_names(names);
    }

    pub fn add_expression(&mut self, expression: &str) -> Result<()> {
        self.output.add_expression(expression)
    }

    pub fn set_expression_and(&mut self, and: bool) {
        self.output.set_expression_and(and);
    }

    pub fn set_start_level(&mut self, level: usize) -> Result<()> {
        self.output.set_start_level(level)
    }

    pub fn set_stop_level(&mut self, level: usize) -> Result<()> {
        self.output.set_stop_level(level)
    }

    /// Validate filter and expression names against the configured rule names.
    pub fn check_names(&mut self) -> Result<()> {
        self.output.check_names(&self.defs)
    }

    // --- driving -----------------------------------------------------------------------------------------------

    /// Process every input source in order. Any failure is final.
    pub fn run(&mut self) -> Result<()> {
        let root_tl = self.defs.structure.content_tl.expect("definitions are resolved");
        self.cache.clear();

        while self.buffer.open_next()? {
            info!(file = %self.buffer.file_name(), "reading input");
            self.output.clear_holds();
            self.levels.reset(root_tl);
            self.buffer.init()?;
            self.output.file_header(&self.defs, &self.buffer, self.recoder.as_mut())?;

            while self.parse_tlv()? {
                let mut close_count = 0usize;

                if self.item.kind == ItemKind::Constructed {
                    self.output.down(&self.item, &self.defs)?;
                }
                if self.item.kind != ItemKind::EndOfContent {
                    self.output.add_item(&self.item, &self.defs);
                }

                match self.item.kind {
                    ItemKind::Constructed => {
                        if !self.levels.enough(self.item.length) {
                            return Err(self.parse_error(
                                "Constructed element is larger than space left in parent element",
                                true,
                            ));
                        }
                        let content_tl = self.item.rule.and_then(|r| self.defs.rule(r).content_tl);
                        if !self.levels.down(self.item.length, content_tl, self.item.form) {
                            return Err(ErrorKind::Invalid("Maximum number of levels reached".into()).into());
                        }
                    }
                    ItemKind::EndOfContent => {
                        if self.levels.current_form() == Form::Indefinite {
                            self.levels.up();
                            close_count = 1;
                        }
                    }
                    _ => {}
                }

                while self.levels.current_size() <= 0 && self.levels.current_form() == Form::Definite {
                    self.levels.up();
                    close_count += 1;
                }

                self.output.print_list(
                    &self.defs,
                    &mut self.buffer,
                    self.recoder.as_mut(),
                    &self.codeset,
                    self.levels.current_level(),
                )?;

                for _ in 0..close_count {
                    self.output.up();
                }
            }

            self.check_premature_eof()?;
            self.output.file_trailer(&self.defs, &self.buffer, self.recoder.as_mut())?;
        }

        self.output.finish()
    }

    // --- the per-triplet protocol ------------------------------------------------------------------------------

    /// Parse one triplet into the engine's item. Returns false at end of input.
    fn parse_tlv(&mut self) -> Result<bool> {
        self.buffer.flush()?;
        if self.buffer.eof() {
            return Ok(false);
        }
        if self.skip_fillers()? && self.buffer.eof() {
            return Ok(false);
        }

        self.item.level = self.levels.current_level();
        self.item.kind = ItemKind::Unknown;
        self.item.tag.clear();
        self.item.typ.clear();
        self.item.length = 0;
        self.item.file_offset = self.buffer.file_offset();
        self.item.total_offset = self.buffer.total_offset();
        self.item.tl = self.levels.current_tl();
        self.item.form = self.defs.tl(self.item.tl).form;
        self.item.raw_tl = self.buffer.window_pos();
        self.item.raw_tl_length = 0;
        self.item.raw_value = 0;
        self.item.raw_value_length = 0;
        self.item.rule = None;

        let hex_caps = self.defs.structure.hex_caps;
        let schema = self.defs.tl(self.item.tl);
        let Some(read) = read_tl(&mut self.buffer, schema, 0, hex_caps)? else {
            return Err(self.parse_error("Not a valid tag/length", true));
        };
        self.item.tag = read.tag;
        self.item.typ = read.typ;
        self.item.length = read.length;
        self.item.raw_tl_length = read.consumed;
        if let Some(kind) = read.kind {
            self.item.kind = kind;
        }
        if let Some(form) = read.form {
            self.item.form = form;
        }

        // The tag/length fields are known-good now; commit them so the cursor sits on the value.
        self.commit(read.consumed);
        self.item.raw_value = self.buffer.window_pos();

        let encoding = self.defs.tl(self.item.tl).tag.encoding;
        let path = self.output.path().to_string();
        self.item.rule = self.cache.find(&self.defs, &self.item.tag, encoding, &path);

        debug!(
            level = self.item.level,
            tag = %self.item.tag,
            length = self.item.length,
            matched = self.item.rule.is_some(),
            "triplet"
        );

        if let Some(rule) = self.item.rule {
            if self.defs.rule(rule).maybe_constructor
                && self.item.kind != ItemKind::Constructed
                && self.maybe_constructed()?
            {
                self.item.kind = ItemKind::Constructed;
            }
        }

        if self.item.kind == ItemKind::Unknown {
            self.item.kind = match self.item.rule {
                Some(rule) if self.defs.rule(rule).kind != ItemKind::Unknown => self.defs.rule(rule).kind,
                _ => ItemKind::Primitive,
            };
        }
        if let Some(rule) = self.item.rule {
            if self.defs.rule(rule).form != Form::Unknown {
                self.item.form = self.defs.rule(rule).form;
            }
        }

        if self.item.kind != ItemKind::Constructed {
            let consumed = self.read_value()?;
            self.item.raw_value_length = consumed as i64;
            if !self.levels.enough(consumed as i64) {
                return Err(self.parse_error("Element is larger than space left in parent element", true));
            }
            self.commit(consumed);
        }
        // Constructors record their declared length and do not advance: the children consume the value bytes.
        self.item.raw_value_length = self.item.length;

        Ok(true)
    }

    /// Probe the value for a nested tag-length pair; a pair whose span plus declared length fills the value exactly
    /// marks the element as constructed. For the BER BIT STRING tag the probe skips the unused-bits prefix byte and,
    /// on success, commits that byte and shortens the declared length accordingly.
    fn maybe_constructed(&mut self) -> Result<bool> {
        if self.item.length == 0 {
            return Ok(false);
        }
        let hex_caps = self.defs.structure.hex_caps;
        let schema = self.defs.tl(self.levels.current_tl());

        if schema.tag.encoding == FieldEncoding::Ber && self.item.tag == "U-3" {
            if let Some(read) = read_tl(&mut self.buffer, schema, 1, hex_caps)? {
                if read.consumed as i64 + read.length + 1 == self.item.length {
                    self.commit(1);
                    self.item.length -= 1;
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if let Some(read) = read_tl(&mut self.buffer, schema, 0, hex_caps)? {
            if read.consumed as i64 + read.length == self.item.length {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Decode the value into the item's converted rendering. Returns the bytes to commit: the declared length for
    /// definite values, the span up to and including the terminator for indefinite ones.
    fn read_value(&mut self) -> Result<usize> {
        let schema = self.defs.tl(self.item.tl);

        let (mut length, consumed) = if self.item.form == Form::Indefinite {
            match self.buffer.search_pattern(&schema.value_terminator, 0)? {
                Some(pos) => (pos as i64, pos + schema.value_terminator.len()),
                None => {
                    return Err(self.parse_error("Terminating string was not found for a terminated value", true));
                }
            }
        } else {
            (self.item.length, self.item.length.max(0) as usize)
        };

        if !self.buffer.needed(consumed)? {
            return Err(self.parse_error("File does not contain enough data to read a value", true));
        }

        let mut kind = ValueKind::Unknown;
        let mut format: Option<&str> = None;
        if let Some(rule_id) = self.item.rule {
            let rule = self.defs.rule(rule_id);
            kind = rule.value_kind;
            format = rule.format.as_deref();
            if rule.length_adjust > 0 {
                length += rule.length_adjust;
            } else if rule.length_adjust < 0 && -rule.length_adjust <= length {
                length += rule.length_adjust;
            }
        }

        if kind == ValueKind::Unknown {
            if let Some(map) = schema.type_map {
                if let Some(mapped) = self.defs.type_map(map).lookup(&self.item.typ) {
                    kind = mapped;
                }
            }
        }

        // Integers wider than 64 bits fall back to hex rendering.
        if kind.is_integer() && length > 8 {
            kind = ValueKind::Hex;
        }

        let decode_len = length.max(0) as usize;
        if decode_len > consumed && !self.buffer.needed(decode_len)? {
            return Err(self.parse_error("File does not contain enough data to read a value", true));
        }

        let ber_source = schema.tag.encoding == FieldEncoding::Ber;
        let caps = self.defs.structure.hex_caps;
        self.item.converted_value.clear();
        value::render_into(
            &mut self.item.converted_value,
            kind,
            &self.buffer.data()[..decode_len],
            format,
            caps,
            ber_source,
        );

        Ok(consumed)
    }

    /// Skip whole filler patterns between triplets. Filler bytes count against the enclosing levels like any other
    /// consumed bytes.
    fn skip_fillers(&mut self) -> Result<bool> {
        let len = self.defs.structure.filler.len();
        if len == 0 {
            return Ok(false);
        }
        let mut skipped = false;
        loop {
            if !self.buffer.needed(len)? {
                return Ok(skipped);
            }
            if self.buffer.data()[..len] != self.defs.structure.filler[..] {
                return Ok(skipped);
            }
            self.commit(len);
            skipped = true;
        }
    }

    fn commit(&mut self, size: usize) {
        self.buffer.read(size);
        self.levels.consume(size);
    }

    /// After a file ends, every still-open level is a diagnosis: definite levels name their missing bytes,
    /// indefinite ones their missing end-of-content elements.
    fn check_premature_eof(&self) -> Result<()> {
        let mut wait_bytes: i64 = 0;
        let mut wait_eoc = 0usize;
        for frame in self.levels.open_frames() {
            if frame.form == Form::Definite && frame.remaining > 0 && wait_bytes == 0 {
                wait_bytes = frame.remaining;
            } else if frame.form == Form::Indefinite {
                wait_eoc += 1;
            }
        }
        if wait_bytes == 0 && wait_eoc == 0 {
            return Ok(());
        }

        let mut message = String::from("Unexpected end of file:");
        if wait_bytes != 0 {
            message.push_str(&format!(" expecting the file to be {} bytes larger", wait_bytes));
        }
        if wait_eoc != 0 {
            message.push_str(&format!(" expecting the file to have {} end-of-content elements", wait_eoc));
        }
        Err(self.parse_error(&message, false))
    }

    /// Build a fatal parse error, rewinding the reported offset to the start of the failed triplet and attaching
    /// the item context. With debugging on, the first unread window bytes are dumped to a file first.
    fn parse_error(&self, message: &str, with_item: bool) -> Error {
        self.write_debug_dump();

        let offset = self.buffer.file_offset() - if with_item { self.item.raw_tl_length as i64 } else { 0 };
        let kind = ErrorKind::Parse {
            message: message.to_string(),
            file: self.buffer.file_name().to_string(),
            offset,
        };

        if !with_item {
            return Error::new(kind);
        }

        let consumed = self.item.consumed();
        let dump_len = consumed.clamp(0, ERROR_DUMP_LEN) as usize;
        let dump = self
            .buffer
            .slice_at(self.item.raw_tl, dump_len)
            .map(hex_dump)
            .unwrap_or_default();
        Error::pinpoint(
            kind,
            ItemContext {
                level: self.item.level,
                tag: self.item.tag.clone(),
                length: self.item.length,
                consumed,
                remaining: self.buffer.unread(),
                dump,
            },
        )
    }

    fn write_debug_dump(&self) {
        if !self.debug {
            return;
        }
        let data = self.buffer.data();
        let len = data.len().min(256);
        if len == 0 {
            return;
        }
        match std::fs::write(DEBUG_DUMP_FILE, &data[..len]) {
            Ok(()) => warn!(bytes = len, file = DEBUG_DUMP_FILE, "unprocessable data dumped"),
            Err(e) => warn!(error = %e, file = DEBUG_DUMP_FILE, "cannot write debug dump"),
        }
    }
}
