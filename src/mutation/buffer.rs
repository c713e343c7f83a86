//! Bounds-checked byte buffer for command mutation.
//!
//! Every edit validates its range first and reports whether it applied, so
//! strategies never have to reason about panicking slice operations.

use std::ops::Range;

/// A mutable command under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
}

impl CommandBuffer {
    /// Create a buffer holding a copy of `bytes`
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Number of bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Current contents
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Insert `data` before `offset`. `offset == len` appends.
    pub fn insert(&mut self, offset: usize, data: &[u8]) -> bool {
        if offset > self.bytes.len() {
            return false;
        }
        self.bytes.splice(offset..offset, data.iter().copied());
        true
    }

    /// Remove `len` bytes starting at `start`.
    pub fn delete(&mut self, start: usize, len: usize) -> bool {
        match self.span(start, len) {
            Some(range) => {
                self.bytes.drain(range);
                true
            }
            None => false,
        }
    }

    /// Copy `len` bytes starting at `start` and insert the copy right after
    /// the original span.
    pub fn duplicate(&mut self, start: usize, len: usize) -> bool {
        match self.span(start, len) {
            Some(range) => {
                let end = range.end;
                let copy = self.bytes[range].to_vec();
                self.bytes.splice(end..end, copy);
                true
            }
            None => false,
        }
    }

    /// Flip the ASCII case of the byte at `index`.
    pub fn toggle_case(&mut self, index: usize) -> bool {
        match self.bytes.get_mut(index) {
            Some(byte) if byte.is_ascii_lowercase() => {
                byte.make_ascii_uppercase();
                true
            }
            Some(byte) if byte.is_ascii_uppercase() => {
                byte.make_ascii_lowercase();
                true
            }
            _ => false,
        }
    }

    /// Byte range of the first whitespace-delimited token.
    pub fn first_token(&self) -> Option<Range<usize>> {
        let start = self.bytes.iter().position(|b| !b.is_ascii_whitespace())?;
        let end = self.bytes[start..]
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .map_or(self.bytes.len(), |n| start + n);
        Some(start..end)
    }

    /// Whitespace-delimited tokens.
    pub fn tokens(&self) -> Vec<Vec<u8>> {
        tokenize(&self.bytes)
    }

    fn span(&self, start: usize, len: usize) -> Option<Range<usize>> {
        let end = start.checked_add(len)?;
        if len == 0 || end > self.bytes.len() {
            return None;
        }
        Some(start..end)
    }
}

/// Split on ASCII whitespace, dropping empty pieces.
pub fn tokenize(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

/// Join tokens with single spaces.
pub fn join_tokens(tokens: &[Vec<u8>]) -> Vec<u8> {
    tokens.join(&b' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert() {
        let mut buf = CommandBuffer::new(b"GET");
        assert!(buf.insert(0, b"!"));
        assert!(buf.insert(4, b"?"));
        assert_eq!(buf.as_bytes(), b"!GET?");
        assert!(!buf.insert(6, b"x"));
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_delete() {
        let mut buf = CommandBuffer::new(b"HELLO");
        assert!(buf.delete(1, 2));
        assert_eq!(buf.as_bytes(), b"HLO");
        assert!(!buf.delete(2, 2));
        assert!(!buf.delete(0, 0));
        assert!(!buf.delete(usize::MAX, 2));
        assert_eq!(buf.as_bytes(), b"HLO");
    }

    #[test]
    fn test_duplicate() {
        let mut buf = CommandBuffer::new(b"abcd");
        assert!(buf.duplicate(1, 2));
        assert_eq!(buf.as_bytes(), b"abcbcd");
        assert!(!buf.duplicate(5, 2));
        assert!(!buf.duplicate(0, 0));
    }

    #[test]
    fn test_toggle_case() {
        let mut buf = CommandBuffer::new(b"sEt 1");
        assert!(buf.toggle_case(0));
        assert!(buf.toggle_case(1));
        assert!(!buf.toggle_case(3));
        assert!(!buf.toggle_case(4));
        assert!(!buf.toggle_case(9));
        assert_eq!(buf.as_bytes(), b"Set 1");
    }

    #[test]
    fn test_first_token() {
        assert_eq!(CommandBuffer::new(b"  GET key").first_token(), Some(2..5));
        assert_eq!(CommandBuffer::new(b"PING").first_token(), Some(0..4));
        assert_eq!(CommandBuffer::new(b" \t ").first_token(), None);
        assert_eq!(CommandBuffer::new(b"").first_token(), None);
    }

    #[test]
    fn test_tokens_and_join() {
        let tokens = tokenize(b" SET\tkey \r\n value ");
        assert_eq!(tokens, vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]);
        assert_eq!(join_tokens(&tokens), b"SET key value".to_vec());
        assert!(tokenize(b"   ").is_empty());
    }
}
