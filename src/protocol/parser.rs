//! Incremental block parser.
//!
//! # Responsibilities
//! - Rejoin CRLF-delimited lines across arbitrary chunk boundaries
//! - Extract the preamble once, before any part is parsed
//! - Assemble parts block by block: headers, message, body
//! - Report each part only once the next boundary line delimits it
//!
//! # Design Decisions
//! - Pull-based: `next_event` returns `None` when more bytes are needed
//! - Only unconsumed lines and the part under construction stay in memory
//! - Body lines are concatenated without a separator

use std::collections::VecDeque;
use std::mem;

use super::{Boundary, HeaderFields, ProtocolError};

const CRLF: &[u8] = b"\r\n";

/// Accumulates raw bytes and hands out complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    lines: VecDeque<String>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, splitting off every line it completes.
    pub fn extend(&mut self, chunk: &[u8]) {
        // A CR left at the end of the previous chunk may pair with an LF here.
        let mut cursor = self.partial.len().saturating_sub(1);
        self.partial.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = find_crlf(&self.partial[cursor..]) {
            let end = cursor + offset;
            self.lines
                .push_back(String::from_utf8_lossy(&self.partial[start..end]).into_owned());
            start = end + CRLF.len();
            cursor = start;
        }
        self.partial.drain(..start);
    }

    /// Treat any unterminated trailing bytes as a final line.
    pub fn flush(&mut self) {
        if !self.partial.is_empty() {
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.lines.push_back(line);
            self.partial.clear();
        }
    }

    pub fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Complete lines not yet consumed.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.partial.is_empty()
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).position(|w| w == CRLF)
}

/// Second block of a part: a status line or a request line, then headers.
pub trait MessageBlock: Default {
    /// Parse the first line of the block.
    fn parse_start_line(&mut self, line: &str) -> Result<(), ProtocolError>;

    fn headers_mut(&mut self) -> &mut HeaderFields;
}

/// `HTTP/1.1 {status} {message}` plus response headers, as read by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBlock {
    pub status: u16,
    pub status_message: String,
    pub headers: HeaderFields,
}

impl MessageBlock for StatusBlock {
    fn parse_start_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let malformed = || ProtocolError::MalformedLine(line.to_string());
        let rest = line.strip_prefix("HTTP/1.1 ").ok_or_else(malformed)?;
        let (code, message) = rest.split_once(' ').ok_or_else(malformed)?;
        let code_ok = (1..=3).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_digit());
        if !code_ok || message.is_empty() {
            return Err(malformed());
        }
        self.status = code.parse().map_err(|_| malformed())?;
        self.status_message = message.to_string();
        Ok(())
    }

    fn headers_mut(&mut self) -> &mut HeaderFields {
        &mut self.headers
    }
}

/// `{METHOD} {path} HTTP/1.1` plus request headers, as read by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestBlock {
    pub method: String,
    pub path: String,
    pub headers: HeaderFields,
}

impl MessageBlock for RequestBlock {
    fn parse_start_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let malformed = || ProtocolError::MalformedLine(line.to_string());
        let rest = line.strip_suffix(" HTTP/1.1").ok_or_else(malformed)?;
        let (method, path) = rest.split_once(' ').ok_or_else(malformed)?;
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) || path.is_empty() {
            return Err(malformed());
        }
        self.method = method.to_string();
        self.path = path.to_string();
        Ok(())
    }

    fn headers_mut(&mut self) -> &mut HeaderFields {
        &mut self.headers
    }
}

/// Parse `name: value` where the name is letters and hyphens.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, rest) = line.split_once(':')?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-') {
        return None;
    }
    let value = match rest.strip_prefix(' ') {
        Some(value) if !value.is_empty() => value,
        _ => rest,
    };
    if value.is_empty() {
        return None;
    }
    Some((name.to_ascii_lowercase(), value.to_string()))
}

/// One framed unit of the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part<B> {
    /// Part headers, e.g. `content-id`.
    pub headers: HeaderFields,
    pub message: B,
    pub body: String,
}

impl<B> Part<B> {
    /// Raw `Content-ID` value.
    pub fn content_id(&self) -> Option<&str> {
        self.headers.get("content-id").map(String::as_str)
    }
}

pub type RequestPart = Part<RequestBlock>;
pub type ReplyPart = Part<StatusBlock>;

/// What the parser hands back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent<B> {
    /// First boundary seen; the text before it.
    Preamble(String),
    Part(Part<B>),
    /// Line dropped; parsing continues.
    Malformed(ProtocolError),
    /// Terminal boundary seen. No further events follow.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Headers,
    Message,
    Body,
}

#[derive(Debug)]
struct PartBuilder<B> {
    block: Block,
    headers: Option<HeaderFields>,
    message: Option<B>,
    message_started: bool,
    body: Option<String>,
    touched: bool,
}

impl<B> Default for PartBuilder<B> {
    fn default() -> Self {
        Self {
            block: Block::Headers,
            headers: None,
            message: None,
            message_started: false,
            body: None,
            touched: false,
        }
    }
}

impl<B: MessageBlock> PartBuilder<B> {
    fn push_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.touched = true;
        if line.is_empty() {
            self.blank_line();
            return Ok(());
        }

        match self.block {
            Block::Headers => {
                let headers = self.headers.get_or_insert_with(HeaderFields::new);
                let (name, value) = parse_header_line(line)
                    .ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;
                headers.insert(name, value);
            }
            Block::Message => {
                let message = self.message.get_or_insert_with(B::default);
                if !self.message_started {
                    self.message_started = true;
                    message.parse_start_line(line)?;
                } else {
                    let (name, value) = parse_header_line(line)
                        .ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;
                    message.headers_mut().insert(name, value);
                }
            }
            Block::Body => self.body.get_or_insert_with(String::new).push_str(line),
        }
        Ok(())
    }

    /// A blank line closes a block that has content, or marks it as empty.
    fn blank_line(&mut self) {
        match self.block {
            Block::Headers if self.headers.is_some() => self.block = Block::Message,
            Block::Headers => self.headers = Some(HeaderFields::new()),
            Block::Message if self.message.is_some() => self.block = Block::Body,
            Block::Message => self.message = Some(B::default()),
            Block::Body => {}
        }
    }

    fn build(self) -> Part<B> {
        Part {
            headers: self.headers.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
        }
    }
}

/// Restartable parser for one connection's inbound stream.
#[derive(Debug)]
pub struct PartParser<B> {
    delimiter: String,
    terminator: String,
    lines: LineBuffer,
    preamble: Option<String>,
    preamble_lines: Vec<String>,
    current: PartBuilder<B>,
    end_pending: bool,
    finished: bool,
}

impl<B: MessageBlock> PartParser<B> {
    pub fn new(boundary: &Boundary) -> Self {
        Self {
            delimiter: boundary.delimiter(),
            terminator: boundary.terminator(),
            lines: LineBuffer::new(),
            preamble: None,
            preamble_lines: Vec::new(),
            current: PartBuilder::default(),
            end_pending: false,
            finished: false,
        }
    }

    /// Buffer a chunk of inbound bytes. Ignored once the stream has ended.
    pub fn feed(&mut self, chunk: &[u8]) {
        if !self.finished {
            self.lines.extend(chunk);
        }
    }

    /// The transport has no more bytes; the unterminated tail is a last line.
    pub fn finish_input(&mut self) {
        if !self.finished {
            self.lines.flush();
        }
    }

    /// Preamble text, once the first boundary has been seen.
    pub fn preamble(&self) -> Option<&str> {
        self.preamble.as_deref()
    }

    /// Whether the terminal boundary has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Buffered lines not yet consumed.
    pub fn buffered_lines(&self) -> usize {
        self.lines.len()
    }

    /// Next event, or `None` when more input is needed.
    pub fn next_event(&mut self) -> Option<ParseEvent<B>> {
        if self.end_pending {
            self.end_pending = false;
            return Some(ParseEvent::End);
        }
        if self.finished {
            return None;
        }

        while let Some(line) = self.lines.pop_line() {
            if self.preamble.is_none() {
                if line == self.delimiter || line == self.terminator {
                    let preamble = mem::take(&mut self.preamble_lines).join("\r\n");
                    self.preamble = Some(preamble.clone());
                    if line == self.terminator {
                        self.mark_finished();
                    }
                    return Some(ParseEvent::Preamble(preamble));
                }
                self.preamble_lines.push(line);
                continue;
            }

            if line.starts_with(&self.delimiter) {
                let builder = mem::take(&mut self.current);
                if line == self.terminator {
                    self.mark_finished();
                }
                if builder.touched {
                    return Some(ParseEvent::Part(builder.build()));
                }
                if self.end_pending {
                    self.end_pending = false;
                    return Some(ParseEvent::End);
                }
                continue;
            }

            if let Err(error) = self.current.push_line(&line) {
                return Some(ParseEvent::Malformed(error));
            }
        }
        None
    }

    fn mark_finished(&mut self) {
        self.finished = true;
        self.end_pending = true;
        self.lines = LineBuffer::new();
    }
}
