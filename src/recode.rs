//! The character-set conversion boundary.
//!
//! Printing runs every `%v`/`%T` directive through [Recoder::recode] when both a source encoding (from the matched
//! rule) and a target encoding (from the print template, or the locale codeset) are known. The engine treats the
//! conversion as opaque: bytes in, bytes out, unknown encodings are fatal.

use crate::error::{ErrorKind, Result};

pub trait Recoder {
    /// Convert `data` from the `from` encoding to the `to` encoding.
    fn recode(&mut self, data: &[u8], from: &str, to: &str) -> Result<Vec<u8>>;
}

// --- CharsetRecoder -------------------------------------------------------------------------------------------------

/// A [Recoder] backed by `encoding_rs`, resolving encoding labels per the WHATWG registry. The last `(from, to)`
/// pair is cached on the assumption that consecutive conversions use the same encodings.
#[derive(Default)]
pub struct CharsetRecoder {
    last: Option<(String, String, &'static encoding_rs::Encoding, &'static encoding_rs::Encoding)>,
}

impl CharsetRecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn encodings(
        &mut self,
        from: &str,
        to: &str,
    ) -> Result<(&'static encoding_rs::Encoding, &'static encoding_rs::Encoding)> {
        if let Some((f, t, fe, te)) = &self.last {
            if f == from && t == to {
                return Ok((*fe, *te));
            }
        }
        let unknown = || {
            ErrorKind::Recode {
                from: from.to_string(),
                to: to.to_string(),
            }
        };
        let fe = encoding_rs::Encoding::for_label(from.as_bytes()).ok_or_else(unknown)?;
        let te = encoding_rs::Encoding::for_label(to.as_bytes()).ok_or_else(unknown)?;
        self.last = Some((from.to_string(), to.to_string(), fe, te));
        Ok((fe, te))
    }
}

impl Recoder for CharsetRecoder {
    fn recode(&mut self, data: &[u8], from: &str, to: &str) -> Result<Vec<u8>> {
        let (fe, te) = self.encodings(from, to)?;
        let (text, _, _) = fe.decode(data);
        let (bytes, _, _) = te.encode(&text);
        Ok(bytes.into_owned())
    }
}

// --- locale codeset -------------------------------------------------------------------------------------------------

/// The codeset of the process locale, used as the default target encoding for printing. Taken from the usual
/// locale environment variables (`LC_ALL`, `LC_CTYPE`, `LANG`), falling back to UTF-8.
pub fn locale_codeset() -> String {
    for var in ["LC_ALL", "LC_CTYPE", "LANG"] {
        let Ok(value) = std::env::var(var) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        // en_US.UTF-8 or en_US.UTF-8@variant
        if let Some(dot) = value.find('.') {
            let codeset = &value[dot + 1..];
            let codeset = codeset.split('@').next().unwrap_or(codeset);
            if !codeset.is_empty() {
                return codeset.to_string();
            }
        }
        break;
    }
    "UTF-8".to_string()
}
