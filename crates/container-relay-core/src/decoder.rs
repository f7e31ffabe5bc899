//! Incremental UTF-8 decoding for relayed runtime output.

use std::char::REPLACEMENT_CHARACTER;

/// Stateful decoder turning arbitrarily-chunked bytes into valid text.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives, so no emitted fragment ever contains half a character.
/// Invalid sequences never fail the stream: they are replaced with U+FFFD,
/// either immediately (when more bytes already follow them) or on `finish`.
///
/// One decoder serves exactly one stream and must be fed in arrival order.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Consume a chunk and return all text that is now fully decoded.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        if chunk.is_empty() {
            return String::new();
        }
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut pos = 0;
        let tail_start = loop {
            match std::str::from_utf8(&self.pending[pos..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    break self.pending.len();
                }
                Err(e) => {
                    let valid_end = pos + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[pos..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_CHARACTER);
                            pos = valid_end + len;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => break valid_end,
                    }
                }
            }
        };

        self.pending.drain(..tail_start);
        out
    }

    /// Flush whatever is still buffered at end of stream.
    ///
    /// Leftover bytes can only be an incomplete sequence, which is emitted as
    /// a replacement character.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }

    /// Number of bytes held back waiting for the rest of a character.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "héllo → 世界 🦀 done\n";

    #[test]
    fn test_whole_chunk_passes_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(MIXED.as_bytes()), MIXED);
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_at_every_boundary_matches_whole() {
        let bytes = MIXED.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut text = decoder.feed(&bytes[..split]);
            text.push_str(&decoder.feed(&bytes[split..]));
            text.push_str(&decoder.finish());
            assert_eq!(text, MIXED, "split at byte {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut decoder = Utf8Decoder::new();
        let mut text = String::new();
        for b in "🦀🦀".as_bytes() {
            let fragment = decoder.feed(std::slice::from_ref(b));
            // Never emits a partial character.
            assert!(fragment.is_empty() || fragment == "🦀");
            text.push_str(&fragment);
        }
        assert_eq!(text, "🦀🦀");
    }

    #[test]
    fn test_partial_character_is_held_back() {
        let crab = "🦀".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(&crab[..2]), "");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.feed(&crab[2..]), "🦀");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_invalid_byte_in_middle_is_replaced() {
        let mut decoder = Utf8Decoder::new();
        let text = decoder.feed(b"ab\xffcd");
        assert_eq!(text, "ab\u{FFFD}cd");
    }

    #[test]
    fn test_truncated_tail_flushed_on_finish() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(b"ok\xe4\xb8"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(b""), "");
        assert_eq!(decoder.finish(), "");
    }
}
