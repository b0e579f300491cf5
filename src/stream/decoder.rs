/// Splits a chunked byte stream into `\n` terminated lines.
///
/// Chunks may end anywhere, including inside a line or inside a multi-byte
/// UTF-8 sequence. Incomplete input is carried over to the next `push`.
#[derive(Debug, Default)]
pub struct LineDecoder {
    leftover: String,
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completed, without the
    /// terminator (a trailing `\r` is dropped too).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode(chunk);
        self.leftover.push_str(&text);

        let Some(last_newline) = self.leftover.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.leftover.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.leftover, rest);

        complete[..last_newline]
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// Ends the stream. Returns the unterminated tail, if any, so the caller
    /// can decide whether to drop it.
    pub fn finish(&mut self) -> Option<String> {
        self.pending.clear();
        let tail = std::mem::take(&mut self.leftover);
        if tail.is_empty() { None } else { Some(tail) }
    }

    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    out.push_str(
                        std::str::from_utf8(&self.pending[start..valid_end]).unwrap_or_default()
                    );
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Sequence cut by the chunk boundary; wait for more bytes.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }
}
