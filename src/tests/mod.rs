//! Test support: run the engine over in-memory configurations and inputs and capture the rendered text.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::def::Definitions;
use crate::engine::Engine;
use crate::error::Result;

mod engine;
mod fmt;
mod output;

/// A clonable sink capturing everything the output engine writes.
#[derive(Clone, Default)]
pub(crate) struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) fn defs(config: &str) -> Definitions {
    crate::rcfile::load(config.as_bytes(), "default", None).expect("configuration loads")
}

/// Run a configuration over raw input bytes and return the rendered output.
pub(crate) fn run_bytes(config: &str, input: &[u8]) -> Result<String> {
    run_with(config, input, |_| {})
}

/// Like [run_bytes], with a hook to set filters, expressions or other engine options first.
pub(crate) fn run_with(config: &str, input: &[u8], setup: impl FnOnce(&mut Engine)) -> Result<String> {
    run_sized(config, input, crate::buffer::WINDOW_SIZE, setup)
}

pub(crate) fn run_sized(
    config: &str,
    input: &[u8],
    window_size: usize,
    setup: impl FnOnce(&mut Engine),
) -> Result<String> {
    let defs = defs(config);
    let out = SharedOutput::new();
    let mut engine = Engine::with_window_size(defs, Box::new(out.clone()), window_size);

    let mut file = tempfile::NamedTempFile::new().expect("temp input file");
    file.write_all(input).expect("write test input");
    file.flush().expect("flush test input");
    engine.add_input(file.path().to_str().expect("utf-8 temp path"));

    setup(&mut engine);
    engine.check_names()?;
    engine.run()?;
    Ok(out.text())
}
