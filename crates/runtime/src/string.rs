//! String payload
//!
//! A mutable byte buffer with explicit length and capacity (grown by
//! doubling) and an encoding marker. Strings may contain embedded NULs;
//! nothing here assumes C-string conventions. The full string/encoding
//! library is an external collaborator; the core carries only what its own
//! operations need.

use crate::global_env::GlobalEnv;
use crate::heap::Heap;
use crate::object::{Object, Payload};
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    Utf8,
    Ascii8Bit,
    UsAscii,
}

#[derive(Clone)]
pub struct StringPayload {
    bytes: Vec<u8>,
    encoding: Encoding,
}

impl StringPayload {
    pub fn new() -> StringPayload {
        StringPayload { bytes: Vec::new(), encoding: Encoding::Utf8 }
    }

    pub fn from_str(s: &str) -> StringPayload {
        StringPayload { bytes: s.as_bytes().to_vec(), encoding: Encoding::Utf8 }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> StringPayload {
        StringPayload { bytes, encoding: Encoding::Ascii8Bit }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    /// Append with capacity doubling.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let needed = self.bytes.len() + bytes.len();
        if needed > self.bytes.capacity() {
            let mut grown = if self.bytes.capacity() == 0 { 16 } else { self.bytes.capacity() * 2 };
            while grown < needed {
                grown *= 2;
            }
            self.bytes.reserve_exact(grown - self.bytes.len());
        }
        self.bytes.extend_from_slice(bytes);
    }

    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Lossy UTF-8 view for messages and diagnostics.
    pub fn to_rust_string(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn duplicate(&self) -> StringPayload {
        self.clone()
    }

    /// Quoted, escaped rendering.
    pub fn inspect(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() + 2);
        out.push('"');
        for &byte in &self.bytes {
            match byte {
                b'"' => out.push_str("\\\""),
                b'\\' => out.push_str("\\\\"),
                b'\n' => out.push_str("\\n"),
                b'\t' => out.push_str("\\t"),
                b'\r' => out.push_str("\\r"),
                0x20..=0x7e => out.push(byte as char),
                _ => out.push_str(&format!("\\x{byte:02X}")),
            }
        }
        out.push('"');
        out
    }
}

impl Default for StringPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a String cell from UTF-8 text.
pub fn new_string(s: &str) -> Value {
    let klass = GlobalEnv::the().string_class();
    Heap::the().allocate(Object::new(klass, Payload::String(StringPayload::from_str(s))))
}

/// Allocate a String cell from raw bytes (binary encoding).
pub fn new_string_from_bytes(bytes: Vec<u8>) -> Value {
    let klass = GlobalEnv::the().string_class();
    Heap::the().allocate(Object::new(klass, Payload::String(StringPayload::from_bytes(bytes))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_nuls_are_preserved() {
        let mut s = StringPayload::new();
        s.push_bytes(b"a\0b");
        assert_eq!(s.len(), 3);
        assert_eq!(s.bytes(), b"a\0b");
    }

    #[test]
    fn capacity_doubles() {
        let mut s = StringPayload::new();
        s.push_str("0123456789abcdef");
        let cap = s.capacity();
        s.push_str("x");
        assert!(s.capacity() == cap || s.capacity() >= cap * 2);
    }

    #[test]
    fn inspect_escapes() {
        let mut s = StringPayload::new();
        s.push_bytes(b"a\"b\n\x01");
        assert_eq!(s.inspect(), "\"a\\\"b\\n\\x01\"");
    }
}
