//! A bounded streaming window over an ordered list of input sources.
//!
//! All reading goes through a single contiguous window (10 MiB by default), which therefore bounds the size of the
//! largest parsable triplet. The parser peeks and searches inside the window and commits consumed bytes through
//! [StreamBuffer::read]; once the cursor passes the low-water mark a flush discards the consumed prefix and tops the
//! window up from the current source.
//!
//! A flush relocates the unconsumed data to the front of the window, so any window positions captured earlier (the
//! raw tag/value spans recorded in a [TlvItem](crate::item::TlvItem)) become invalid. The buffer tracks this with a
//! two-state machine: [BufferState::Stale] after a flush that moved data, back to [BufferState::Ok] once the output
//! engine reports that pending text has been emitted and no captured positions remain live.
//!
//! Input sources are plain files, standard input (named `-`), or — when an open command template is configured — the
//! standard output of a shell command expanded from the template. The first byte of the command output is peeked to
//! decide whether the command produced anything; if it did not, the file is opened directly instead. The peeked byte
//! is injected transparently into the first window fill.

use std::fs::File;
use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::debug;

use crate::error::{ErrorKind, Result};

/// Size of the streaming window. This bounds the maximum size of a single triplet's tag/length and of any primitive
/// value.
pub const WINDOW_SIZE: usize = 10 * 1024 * 1024;

/// Offsets within a file or within the whole input sequence. Signed so that size bookkeeping may go negative for
/// indefinite-form constructors.
pub type FileOffset = i64;

// --- BufferState ----------------------------------------------------------------------------------------------------

/// Validity of window positions captured before the most recent buffer operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// No flush has moved data since the last emission point; captured window positions are dereferenceable.
    Ok,
    /// A flush relocated the window contents; captured positions must not be dereferenced.
    Stale,
}

// --- StreamBuffer ---------------------------------------------------------------------------------------------------

struct InputFile {
    name: String,
    offset: FileOffset,
}

enum SourceReader {
    Stdin(io::Stdin),
    File(File),
    Pipe { child: Child, stdout: ChildStdout },
}

impl SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::Stdin(stdin) => stdin.read(buf),
            SourceReader::File(file) => file.read(buf),
            SourceReader::Pipe { stdout, .. } => stdout.read(buf),
        }
    }

    fn close(self) {
        if let SourceReader::Pipe { mut child, stdout } = self {
            drop(stdout);
            let _ = child.wait();
        }
    }
}

/// The streaming window and the input-source list feeding it.
pub struct StreamBuffer {
    window: Box<[u8]>,
    /// One past the last valid byte in the window.
    len: usize,
    /// Index of the next unread byte.
    start: usize,
    /// Once the cursor passes this index a flush actually moves data.
    low_water: usize,
    state: BufferState,
    /// Byte peeked from a preprocessor pipe, injected into the next fill.
    peeked: Option<u8>,
    /// True once the current source has reported end of stream.
    source_done: bool,
    files: Vec<InputFile>,
    current: Option<usize>,
    reader: Option<SourceReader>,
    /// Template with one `%s` for the file name; when set, non-stdin files are opened through a shell command.
    open_command: Option<String>,
    total_offset: FileOffset,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_window_size(WINDOW_SIZE)
    }

    /// A buffer with a non-default window size. Smaller windows exercise the flush machinery sooner; the parser
    /// semantics are unchanged.
    pub fn with_window_size(window_size: usize) -> Self {
        Self {
            window: vec![0u8; window_size].into_boxed_slice(),
            len: 0,
            start: 0,
            low_water: window_size - (window_size >> 3),
            state: BufferState::Ok,
            peeked: None,
            source_done: false,
            files: Vec::new(),
            current: None,
            reader: None,
            open_command: None,
            total_offset: 0,
        }
    }

    /// Append one input source to the list. `-` names standard input.
    pub fn add_file(&mut self, name: &str) {
        self.files.push(InputFile {
            name: name.to_string(),
            offset: 0,
        });
    }

    /// Set the preprocessor command template (one `%s` placeholder for the file name).
    pub fn set_open_command(&mut self, template: Option<String>) {
        self.open_command = template.filter(|t| !t.is_empty());
    }

    /// Close the current source and open the next one. Returns false when the source list is exhausted.
    pub fn open_next(&mut self) -> Result<bool> {
        if let Some(reader) = self.reader.take() {
            reader.close();
        }

        let next = match self.current {
            None => 0,
            Some(i) => i + 1,
        };
        if next >= self.files.len() {
            self.current = None;
            return Ok(false);
        }
        self.current = Some(next);

        if self.files[next].name == "-" {
            self.files[next].name = "stdin".to_string();
            self.reader = Some(SourceReader::Stdin(io::stdin()));
            return Ok(true);
        }

        if let Some(template) = self.open_command.clone() {
            if self.open_with_command(&template, next)? {
                return Ok(true);
            }
        }

        let name = &self.files[next].name;
        let file = File::open(name).map_err(|source| ErrorKind::Open {
            path: name.clone(),
            source,
        })?;
        self.reader = Some(SourceReader::File(file));
        Ok(true)
    }

    /// Spawn the expanded open command and peek its first output byte. Returns false when the command produced no
    /// bytes at all, in which case the caller falls back to opening the file directly.
    fn open_with_command(&mut self, template: &str, index: usize) -> Result<bool> {
        let command = expand_command(template, &self.files[index].name);
        debug!(command = %command, "opening input through preprocessor");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| ErrorKind::Preprocess {
                command: command.clone(),
                source,
            })?;
        let mut stdout = child.stdout.take().ok_or_else(|| ErrorKind::Preprocess {
            command: command.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "no stdout from child"),
        })?;

        let mut first = [0u8; 1];
        loop {
            match stdout.read(&mut first) {
                Ok(0) => {
                    // The command produced nothing; reap it and read the file as-is.
                    let _ = child.wait();
                    return Ok(false);
                }
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    let _ = child.wait();
                    return Err(ErrorKind::Preprocess { command, source }.into());
                }
            }
        }

        self.peeked = Some(first[0]);
        self.reader = Some(SourceReader::Pipe { child, stdout });
        Ok(true)
    }

    /// Initialize the window after opening a source. Returns false when nothing could be read (an empty source).
    pub fn init(&mut self) -> Result<bool> {
        self.len = 0;
        self.start = 0;
        self.state = BufferState::Ok;
        self.source_done = false;
        self.fill()?;
        Ok(self.len > 0)
    }

    fn fill(&mut self) -> Result<()> {
        if self.len < self.window.len() {
            if let Some(byte) = self.peeked.take() {
                self.window[self.len] = byte;
                self.len += 1;
            }
        }
        while self.len < self.window.len() && !self.source_done {
            let Some(reader) = self.reader.as_mut() else {
                self.source_done = true;
                break;
            };
            match reader.read(&mut self.window[self.len..]) {
                Ok(0) => self.source_done = true,
                Ok(n) => self.len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    let path = self.file_name().to_string();
                    return Err(ErrorKind::Read { path, source }.into());
                }
            }
        }
        Ok(())
    }

    /// Discard the consumed prefix and top the window up. A no-op unless bytes have been consumed and the window was
    /// full (otherwise the source is already fully buffered and there is nothing to gain).
    fn flush_inner(&mut self) -> Result<()> {
        if self.start == 0 {
            return Ok(());
        }
        if self.len < self.window.len() {
            return Ok(());
        }
        self.window.copy_within(self.start..self.len, 0);
        self.len -= self.start;
        self.start = 0;
        self.fill()?;
        self.state = BufferState::Stale;
        Ok(())
    }

    /// Best-effort top-up: try to make `size` bytes readable, succeed regardless.
    pub fn desired(&mut self, size: usize) -> Result<()> {
        if self.unread() < size {
            self.flush_inner()?;
        }
        Ok(())
    }

    /// Guarantee `size` readable bytes, flushing if necessary. Returns false when the source cannot provide them.
    pub fn needed(&mut self, size: usize) -> Result<bool> {
        if self.unread() >= size {
            return Ok(true);
        }
        self.flush_inner()?;
        Ok(self.unread() >= size)
    }

    /// Reclaim consumed space if the cursor has passed the low-water mark.
    pub fn flush(&mut self) -> Result<()> {
        if self.start >= self.low_water {
            self.flush_inner()?;
        }
        Ok(())
    }

    /// Reclaim consumed space unconditionally.
    pub fn flush_force(&mut self) -> Result<()> {
        self.flush_inner()
    }

    /// Mark pending output as emitted: captured window positions are no longer live, so the window may be reclaimed
    /// and the state returns to [BufferState::Ok].
    pub fn printed(&mut self) -> Result<()> {
        if self.start >= self.low_water {
            self.flush_inner()?;
        }
        self.state = BufferState::Ok;
        Ok(())
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// The unread portion of the window.
    pub fn data(&self) -> &[u8] {
        &self.window[self.start..self.len]
    }

    pub fn unread(&self) -> usize {
        self.len - self.start
    }

    /// True when the source is exhausted and every buffered byte has been consumed.
    pub fn eof(&self) -> bool {
        self.source_done && self.unread() == 0
    }

    /// Absolute window position of the cursor, for capturing raw spans in items.
    pub fn window_pos(&self) -> usize {
        self.start
    }

    /// A captured span, if it still lies within the valid window. Callers must additionally check [Self::state];
    /// this only guards against reading past the end of buffered data.
    pub fn slice_at(&self, pos: usize, len: usize) -> Option<&[u8]> {
        if pos <= self.len && len <= self.len - pos {
            Some(&self.window[pos..pos + len])
        } else {
            None
        }
    }

    /// Commit `size` consumed bytes: advance the cursor and the file/total offsets.
    pub fn read(&mut self, size: usize) {
        self.start += size;
        if let Some(i) = self.current {
            self.files[i].offset += size as FileOffset;
        }
        self.total_offset += size as FileOffset;
    }

    /// Move the cursor one byte forward without touching the offsets, for peeking.
    pub fn ahead(&mut self) {
        if self.start + 1 < self.len {
            self.start += 1;
        }
    }

    /// Undo [Self::ahead].
    pub fn back(&mut self) {
        if self.start >= 1 && self.start - 1 < self.len {
            self.start -= 1;
        }
    }

    /// Find the next occurrence of `byte` at or after `from` (an offset from the cursor). On an initial miss the
    /// window is force-flushed once and the search retried.
    pub fn search_byte(&mut self, byte: u8, from: usize) -> Result<Option<usize>> {
        if let Some(pos) = self.find_byte(byte, from) {
            return Ok(Some(pos));
        }
        self.flush_force()?;
        Ok(self.find_byte(byte, from))
    }

    fn find_byte(&self, byte: u8, from: usize) -> Option<usize> {
        let data = self.data();
        if from >= data.len() {
            return None;
        }
        memchr::memchr(byte, &data[from..]).map(|pos| pos + from)
    }

    /// Find the next occurrence of `pattern` at or after `from`, with the same flush-and-retry behavior as
    /// [Self::search_byte].
    pub fn search_pattern(&mut self, pattern: &[u8], from: usize) -> Result<Option<usize>> {
        match pattern.len() {
            0 => Ok(None),
            1 => self.search_byte(pattern[0], from),
            _ => {
                if let Some(pos) = self.find_pattern(pattern, from) {
                    return Ok(Some(pos));
                }
                self.flush_force()?;
                Ok(self.find_pattern(pattern, from))
            }
        }
    }

    fn find_pattern(&self, pattern: &[u8], from: usize) -> Option<usize> {
        let data = self.data();
        if from >= data.len() {
            return None;
        }
        memchr::memmem::find(&data[from..], pattern).map(|pos| pos + from)
    }

    /// Name of the current input source.
    pub fn file_name(&self) -> &str {
        match self.current {
            Some(i) => &self.files[i].name,
            None => "",
        }
    }

    /// Offset of the cursor within the current input source.
    pub fn file_offset(&self) -> FileOffset {
        match self.current {
            Some(i) => self.files[i].offset,
            None => 0,
        }
    }

    /// Offset of the cursor within the concatenation of all sources.
    pub fn total_offset(&self) -> FileOffset {
        self.total_offset
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand an open-command template, substituting the first `%s` with the file name.
fn expand_command(template: &str, file: &str) -> String {
    match template.find("%s") {
        Some(i) => format!("{}{}{}", &template[..i], file, &template[i + 2..]),
        None => template.to_string(),
    }
}
