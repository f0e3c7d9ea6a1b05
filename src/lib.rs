//! A crate to parse binary tag-length-value (TLV) streams and render their content as configurable text.
//!
//! This is the detailed API documentation. For command-line usage see the [README].
//!
//! [README]: https://crates.io/crates/tlve/
//!
//! # What it does
//!
//! Many wire formats are, at heart, a sequence of TLV triplets: a tag identifying the element, a length, and a
//! value that is either opaque content or a nested sequence of further triplets. ASN.1 BER is the best known
//! example, but protocol frames, call-detail records and financial messages use countless homegrown variations:
//! little-endian tags, ASCII decimal lengths, terminator-delimited values, filler bytes between records, lengths
//! that include the tag/length bytes themselves, and so on.
//!
//! This crate reads such streams with bounded memory and renders every element through user-defined templates. A
//! configuration file describes three things:
//!
//!   - **`tl` definitions** — the wire encoding of the tag, optional type and length fields, each a
//!     `type,length,mask,shift,offset` descriptor (the built-in `ber` encoding handles ASN.1 BER tags and
//!     lengths, including indefinite lengths and end-of-content markers);
//!   - **`tlv` rules** — per-tag semantics: a display name, the value interpretation (integer, string, hex, BCD,
//!     OID, bit string, escaped, epoch time, ...), constructor hints, a nested schema for children, a hold
//!     binding;
//!   - **`print` definitions** — templates expanded for every element, with `%`-directives for the tag, name,
//!     value, offsets, raw hex dumps and more, plus indentation and block delimiters.
//!
//! A minimal BER configuration looks like this:
//!
//! ```text
//! tl name=ber tag=ber length=ber
//!
//! print name=default value="%n = '%v'\n" constructor="%n\n" indent="  "
//!
//! structure name=default content-tl=ber print=default
//! tlv tag=U-2 name=counter value-type=int
//! structure-end
//! ```
//!
//! # Using the library
//!
//! The binary is a thin wrapper around [Engine]; embedding works the same way:
//!
//! ```ignore
//! use tlve::{rcfile, Engine};
//!
//! let defs = rcfile::load_file(&config_path, "default", None)?;
//! let mut engine = Engine::new(defs, Box::new(std::io::stdout()));
//! engine.add_input("capture.bin");
//! engine.run()?;
//! ```
//!
//! All state lives in the [Engine] value: the streaming byte window, the constructor level stack, the resolved
//! definitions and the deferred print list. The engine is strictly single-threaded; inputs are consumed in list
//! order and every failure is fatal to the run.
//!
//! # Streaming model
//!
//! Input flows through a single bounded window (10 MiB), which is the only memory that scales with input size; a
//! file of any length can be processed as long as no single triplet's tag/length or primitive value exceeds the
//! window. Raw-byte directives (`%d`, `%D`) render from the live window and are suppressed in the rare moments
//! where a window reclaim has already moved the bytes away.
//!
//! # Filtering
//!
//! Output can be narrowed without touching the configuration: by element name (`-n`, selecting a constructor
//! selects its subtree), by nesting level (`-l`/`-L`), or by `name=regex` expressions (`-e`) that hold back each
//! block of output until the expressions decide whether it is printed at all.
//!
//! # Character sets
//!
//! String values are rendered in their source encoding; when a rule declares `encoding=` the printed value is
//! converted to the print definition's target encoding (or the locale codeset) through the
//! [Recoder](recode::Recoder) boundary.

pub mod ber;
pub mod buffer;
pub mod def;
pub mod engine;
pub mod error;
pub mod field;
pub mod fmt;
pub mod item;
pub mod level;
pub mod output;
pub mod rcfile;
pub mod recode;
pub mod value;

#[doc(inline)]
pub use engine::Engine;

#[doc(inline)]
pub use error::{Error, ErrorKind, Result};

#[doc(inline)]
pub use def::Definitions;

#[cfg(test)]
mod tests;
