//! Incremental UTF-8 decoding of socket chunks

/// Decodes a byte stream that may split multi-byte characters across reads
///
/// Incomplete trailing bytes are held back until the next chunk. Invalid
/// sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated character at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still held back at end of stream
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.decode(b"dir\r\n"), "dir\r\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_character_split_across_chunks() {
        let bytes = "代码：0".as_bytes();
        let mut decoder = Utf8ChunkDecoder::default();
        let first = decoder.decode(&bytes[..4]);
        let second = decoder.decode(&bytes[4..]);
        assert_eq!(first, "代");
        assert_eq!(format!("{}{}", first, second), "代码：0");
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "héllo → wörld";
        let mut decoder = Utf8ChunkDecoder::default();
        let decoded: String = text.as_bytes().iter().map(|b| decoder.decode(&[*b])).collect();
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.decode(b"ok\xffok"), "ok\u{FFFD}ok");
    }

    #[test]
    fn test_truncated_tail_is_flushed_lossily() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.decode(&"é".as_bytes()[..1]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
