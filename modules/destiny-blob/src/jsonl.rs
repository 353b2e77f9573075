use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Cap on a single line's length, independent of total file size. Guards
/// against an unbounded read if a line is missing its terminating `\n`.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One JSONL entry as handed back by [`JsonlReader`]. Bytes, not a parsed
/// `serde_json::Value` — deserializing into the caller's record type is the
/// caller's job, not the blob gateway's.
#[derive(Debug)]
pub enum JsonlLine {
    Line { line_no: u64, bytes: Vec<u8> },
    Malformed { line_no: u64, reason: String },
}

/// Lazy, line-at-a-time reader over a JSONL object's body. A malformed line
/// (too long, or an I/O hiccup mid-line) is surfaced as `JsonlLine::Malformed`
/// and reading resumes at the next line — one bad record never aborts an
/// entire import batch.
pub struct JsonlReader {
    inner: BufReader<Box<dyn AsyncBufRead + Send + Unpin>>,
    line_no: u64,
    done: bool,
}

impl JsonlReader {
    pub(crate) fn new<R>(inner: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            inner: BufReader::new(Box::new(inner)),
            line_no: 0,
            done: false,
        }
    }

    /// Returns the next line, or `None` once the stream is exhausted.
    pub async fn next_line(&mut self) -> Option<JsonlLine> {
        if self.done {
            return None;
        }

        self.line_no += 1;
        let line_no = self.line_no;

        let mut buf = Vec::new();
        loop {
            match self.inner.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    self.done = true;
                    if buf.is_empty() {
                        return None;
                    }
                    break;
                }
                Ok(_) => {
                    if !buf.ends_with(b"\n") {
                        // Read returned without hitting a newline: EOF with a
                        // trailing line that has no terminator.
                        self.done = true;
                    }
                    if buf.len() > MAX_LINE_BYTES {
                        // Drain the rest of the oversized line before resuming.
                        while !buf.ends_with(b"\n") {
                            buf.clear();
                            match self.inner.read_until(b'\n', &mut buf).await {
                                Ok(0) => {
                                    self.done = true;
                                    break;
                                }
                                Ok(_) => continue,
                                Err(_) => {
                                    self.done = true;
                                    break;
                                }
                            }
                        }
                        return Some(JsonlLine::Malformed {
                            line_no,
                            reason: format!("line exceeds {MAX_LINE_BYTES} byte limit"),
                        });
                    }
                    break;
                }
                Err(err) => {
                    self.done = true;
                    return Some(JsonlLine::Malformed {
                        line_no,
                        reason: err.to_string(),
                    });
                }
            }
        }

        while buf.last() == Some(&b'\n') {
            buf.pop();
        }
        while buf.last() == Some(&b'\r') {
            buf.pop();
        }

        if buf.is_empty() && self.done {
            return None;
        }

        Some(JsonlLine::Line { line_no, bytes: buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(data: Vec<u8>) -> Vec<JsonlLine> {
        let mut reader = JsonlReader::new(std::io::Cursor::new(data));
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn yields_each_line_with_its_number() {
        let lines = collect(b"{\"a\":1}\n{\"a\":2}\n".to_vec()).await;
        assert_eq!(lines.len(), 2);
        match &lines[0] {
            JsonlLine::Line { line_no, bytes } => {
                assert_eq!(*line_no, 1);
                assert_eq!(bytes, b"{\"a\":1}");
            }
            _ => panic!("expected a line"),
        }
        match &lines[1] {
            JsonlLine::Line { line_no, bytes } => {
                assert_eq!(*line_no, 2);
                assert_eq!(bytes, b"{\"a\":2}");
            }
            _ => panic!("expected a line"),
        }
    }

    #[tokio::test]
    async fn yields_final_line_without_trailing_newline() {
        let lines = collect(b"{\"a\":1}\n{\"a\":2}".to_vec()).await;
        assert_eq!(lines.len(), 2);
        match &lines[1] {
            JsonlLine::Line { bytes, .. } => assert_eq!(bytes, b"{\"a\":2}"),
            _ => panic!("expected a line"),
        }
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let lines = collect(Vec::new()).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn oversized_line_is_malformed_but_does_not_stop_the_stream() {
        let huge = vec![b'x'; MAX_LINE_BYTES + 10];
        let mut data = huge;
        data.push(b'\n');
        data.extend_from_slice(b"{\"a\":1}\n");

        let lines = collect(data).await;
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0], JsonlLine::Malformed { line_no: 1, .. }));
        match &lines[1] {
            JsonlLine::Line { line_no, bytes } => {
                assert_eq!(*line_no, 2);
                assert_eq!(bytes, b"{\"a\":1}");
            }
            _ => panic!("expected a line"),
        }
    }
}
