/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder.
///
/// Network chunks can end anywhere, including in the middle of a line or
/// a multi-byte character, so bytes are buffered until a full line is
/// available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and returns every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Ends the stream. An event that was never closed by a blank line is
    /// incomplete and gets discarded; returns whether anything was dropped.
    pub fn finish(&mut self) -> bool {
        let pending = !self.buffer.is_empty() || self.event.is_some() || !self.data.is_empty();
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        pending
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = Some(value.to_string());
            }
            "data" => self.data.push(value.to_string()),
            "id" => {
                self.id = Some(value.to_string());
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id: self.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        decoder.finish();
        events
    }

    #[test]
    fn decodes_output_and_done_events() {
        let events = decode_all(&[
            b"event: output\nid: 1\ndata: Hello\n\nevent: output\ndata: !\n\nevent: done\ndata: {}\n\n",
        ]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "output");
        assert_eq!(events[0].data, "Hello");
        assert_eq!(events[0].id.as_deref(), Some("1"));
        assert_eq!(events[1].data, "!");
        assert_eq!(events[2].event, "done");
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let raw = "event: output\r\ndata: caf\u{e9} \u{1f999}\r\n\r\nevent: done\r\ndata: {}\r\n\r\n";
        let whole = decode_all(&[raw.as_bytes()]);

        let bytes = raw.as_bytes();
        let single: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&single), whole);

        let uneven: Vec<&[u8]> = bytes.chunks(7).collect();
        assert_eq!(decode_all(&uneven), whole);

        assert_eq!(whole[0].data, "caf\u{e9} \u{1f999}");
    }

    #[test]
    fn joins_multiline_data() {
        let events = decode_all(&[b"event: output\ndata: line one\ndata: line two\n\n"]);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn keeps_leading_whitespace_beyond_the_first_space() {
        let events = decode_all(&[b"event: output\ndata:  indented\n\n"]);
        assert_eq!(events[0].data, " indented");
    }

    #[test]
    fn ignores_comments_and_unknown_fields() {
        let events = decode_all(&[b": keep-alive\nretry: 1000\nevent: output\ndata: x\n\n"]);
        assert_eq!(events, vec![SseEvent {
            event: "output".into(),
            data: "x".into(),
            id: None,
        }]);
    }

    #[test]
    fn drops_an_event_cut_off_by_the_end_of_stream() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: output\ndata: Hello\n\nevent: output\ndata: wor");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "Hello");

        assert!(decoder.finish());
        assert!(decoder.push(b"\n\n").is_empty());
    }

    #[test]
    fn drops_complete_lines_without_a_terminating_blank_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: output\ndata: tail\n").is_empty());
        assert!(decoder.finish());
    }

    #[test]
    fn finish_after_a_clean_stream_drops_nothing() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: done\ndata: {}\n\n");
        assert!(!decoder.finish());
    }
}
