//! Line framing and terminal-event bookkeeping shared by all adapters.
//!
//! Backends stream either newline-delimited JSON or Server-Sent Events; both
//! are line oriented.  [`LineFramer`] turns network chunks into complete
//! lines, a [`FrameParser`] turns lines into [`ParsedStreamEvent`]s, and the
//! [`TerminalGuard`] makes sure exactly one `done` or `error` event reaches
//! the caller per stream.

use futures::StreamExt;

use crate::llm::events::ParsedStreamEvent;

/// Callback receiving normalized stream events.
pub type EventSink<'a> = &'a mut (dyn FnMut(ParsedStreamEvent) + Send);

// ---------------------------------------------------------------------------
// Line framing
// ---------------------------------------------------------------------------

/// Splits a byte stream into lines.
///
/// Partial lines (including partial UTF-8 sequences) are buffered until the
/// next chunk completes them.  Trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Return the unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        let line = decode_line(&raw);
        (!line.trim().is_empty()).then_some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "invalid UTF-8 in stream line; decoding lossily");
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

// ---------------------------------------------------------------------------
// Frame parsing
// ---------------------------------------------------------------------------

/// A per-backend stream normalizer.
///
/// Implementations are small state machines: they keep whatever partial
/// state the wire format needs between lines.  A malformed line must be
/// logged and skipped, never turned into a stream failure.
pub trait FrameParser: Send {
    /// Feed one complete line.
    fn feed_line(&mut self, line: &str, out: &mut Vec<ParsedStreamEvent>);

    /// The transport closed.  Flush any buffered state.
    fn finish(&mut self, out: &mut Vec<ParsedStreamEvent>);
}

// ---------------------------------------------------------------------------
// Terminal guard
// ---------------------------------------------------------------------------

/// Forwards events to the caller until the first terminal event.
pub struct TerminalGuard<'a> {
    sink: EventSink<'a>,
    terminated: bool,
}

impl<'a> TerminalGuard<'a> {
    /// Wrap the caller's event callback.
    pub fn new(sink: EventSink<'a>) -> Self {
        Self {
            sink,
            terminated: false,
        }
    }

    /// Whether a terminal event has been delivered.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Deliver an event unless the stream already terminated.
    pub fn emit(&mut self, event: ParsedStreamEvent) {
        if self.terminated {
            tracing::trace!(?event, "dropping event after terminal");
            return;
        }
        self.terminated = event.is_terminal();
        (self.sink)(event);
    }

    /// Terminate the stream with an error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.emit(ParsedStreamEvent::error(message));
    }

    /// Make sure the caller saw a terminal event.
    pub fn close(&mut self) {
        if !self.terminated {
            self.fail("stream ended unexpectedly");
        }
    }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Feeds raw chunks through a framer and parser into a guard.
struct StreamDriver<P> {
    framer: LineFramer,
    parser: P,
    out: Vec<ParsedStreamEvent>,
}

impl<P: FrameParser> StreamDriver<P> {
    fn new(parser: P) -> Self {
        Self {
            framer: LineFramer::new(),
            parser,
            out: Vec::new(),
        }
    }

    fn push(&mut self, chunk: &[u8], guard: &mut TerminalGuard<'_>) {
        for line in self.framer.push(chunk) {
            self.parser.feed_line(&line, &mut self.out);
            self.flush(guard);
        }
    }

    fn finish(&mut self, guard: &mut TerminalGuard<'_>) {
        if let Some(rest) = self.framer.finish() {
            self.parser.feed_line(&rest, &mut self.out);
        }
        self.parser.finish(&mut self.out);
        self.flush(guard);
        guard.close();
    }

    fn flush(&mut self, guard: &mut TerminalGuard<'_>) {
        for event in self.out.drain(..) {
            guard.emit(event);
        }
    }
}

/// Consume a streaming HTTP response body through `parser`.
pub(crate) async fn pump_response<P: FrameParser>(
    response: reqwest::Response,
    parser: P,
    guard: &mut TerminalGuard<'_>,
) {
    let mut driver = StreamDriver::new(parser);
    let mut bytes = response.bytes_stream();

    while let Some(chunk) = bytes.next().await {
        match chunk {
            Ok(chunk) => {
                driver.push(&chunk, guard);
                if guard.is_terminated() {
                    return;
                }
            }
            Err(e) => {
                guard.fail(format!("stream read error: {e}"));
                return;
            }
        }
    }

    driver.finish(guard);
}

/// Normalize a captured sequence of raw chunks.
///
/// Applies exactly the framing, parsing and terminal rules used on live
/// responses, which makes captured streams replayable in tests.
pub fn normalize_chunks<P, I, C>(parser: P, chunks: I) -> Vec<ParsedStreamEvent>
where
    P: FrameParser,
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut events = Vec::new();
    let mut sink = |e: ParsedStreamEvent| events.push(e);
    {
        let mut guard = TerminalGuard::new(&mut sink);
        let mut driver = StreamDriver::new(parser);
        for chunk in chunks {
            driver.push(chunk.as_ref(), &mut guard);
            if guard.is_terminated() {
                break;
            }
        }
        if !guard.is_terminated() {
            driver.finish(&mut guard);
        }
    }
    events
}
