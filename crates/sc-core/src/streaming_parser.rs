//! Streaming tool-call decoder for model responses.
//!
//! The model embeds tool calls in free-form text using one of the syntaxes in
//! [`ToolCallFormat`]. Text arrives in fragments with arbitrary boundaries, so
//! the parser buffers everything it has seen and only commits to a decision
//! (call, not-a-call, payload error) once the text up to the decisive position
//! is present. That is what makes the output independent of how the stream was
//! split: feeding `"<@TO"` and `"OL>..."` yields exactly what feeding the
//! concatenation would.
//!
//! **Soft failures**: a candidate that never terminates, or whose payload does
//! not decode, is left in the transcript as ordinary text. Nothing here returns
//! an error to the caller.

use std::ops::Range;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{ToolCall, ToolCallFormat};

/// Longest header we wait for before deciding a marker was just prose.
const MAX_HEADER_LEN: usize = 256;

/// Longest `<|...|>` channel token accepted between a Qwen name and its object.
const MAX_CHANNEL_TOKEN_LEN: usize = 32;

/// Suffix the Qwen channel syntax may append after the arguments object.
const QWEN_CALL_SUFFIX: &str = "<|call|>";

/// Why a candidate that looked like a tool call was not turned into one.
///
/// Only ever logged; the candidate degrades to literal text.
#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload has no tool name")]
    MissingName,
    #[error("tool name '{0}' contains invalid characters")]
    InvalidName(String),
    #[error("arguments must be a key/value object")]
    ArgumentsNotObject,
    #[error("malformed argument pair: {0}")]
    MalformedPair(String),
}

type Decoded = Result<(String, Map<String, Value>), DecodeError>;

/// Outcome of examining the text at one start marker.
enum Candidate {
    /// A syntactically complete unit spanning `start..end`.
    Complete { end: usize, decoded: Decoded },
    /// Not a call; resume scanning at `resume`.
    Rejected { resume: usize },
    /// Could still become a call; more text is needed.
    Incomplete,
}

/// Result of searching a delimited body for its closing marker.
enum Delimited {
    Closed { body_end: usize, end: usize },
    /// A fresh start marker appeared first; the outer candidate is abandoned.
    Nested(usize),
    Open,
}

/// Result of scanning a JSON object whose first byte is `{`.
#[derive(Debug, PartialEq)]
pub(crate) enum JsonScan {
    /// Byte index of the closing brace.
    Complete(usize),
    /// Subsequent content shows this cannot be a JSON object.
    Invalid,
    Incomplete,
}

/// Incremental decoder for one configured tool-call format.
#[derive(Debug)]
pub struct StreamingToolParser {
    format: ToolCallFormat,
    /// Every fragment received in this message, concatenated
    text_buffer: String,
    /// Everything before this offset has been decided
    scan_position: usize,
    /// Raw spans of recognized calls, in textual order
    spans: Vec<Range<usize>>,
    /// How much of the visible transcript has been handed out
    visible_position: usize,
    calls_emitted: usize,
    message_stopped: bool,
}

impl StreamingToolParser {
    pub fn new(format: ToolCallFormat) -> Self {
        Self {
            format,
            text_buffer: String::new(),
            scan_position: 0,
            spans: Vec::new(),
            visible_position: 0,
            calls_emitted: 0,
            message_stopped: false,
        }
    }

    /// Decode a complete response in one go.
    pub fn decode_all(format: ToolCallFormat, text: &str) -> Vec<ToolCall> {
        let mut parser = Self::new(format);
        let mut calls = parser.process_fragment(text);
        calls.extend(parser.finish());
        calls
    }

    pub fn format(&self) -> ToolCallFormat {
        self.format
    }

    /// Feed the next fragment and return any tool calls it completed.
    pub fn process_fragment(&mut self, fragment: &str) -> Vec<ToolCall> {
        if self.message_stopped {
            warn!("Ignoring fragment received after the message finished");
            return Vec::new();
        }
        self.text_buffer.push_str(fragment);
        self.scan(false)
    }

    /// Mark the end of the message. Candidates still waiting for their closing
    /// delimiter become plain text; candidates that only needed to know the
    /// stream was over are emitted.
    pub fn finish(&mut self) -> Vec<ToolCall> {
        if self.message_stopped {
            return Vec::new();
        }
        self.message_stopped = true;
        let calls = self.scan(true);
        debug!(
            "Message finished: {} tool call(s) decoded from {} bytes",
            self.calls_emitted,
            self.text_buffer.len()
        );
        calls
    }

    fn scan(&mut self, at_end: bool) -> Vec<ToolCall> {
        let mut completed = Vec::new();
        let marker = start_marker(self.format);

        loop {
            let Some(relative) = self.text_buffer[self.scan_position..].find(marker) else {
                self.scan_position = if at_end {
                    self.text_buffer.len()
                } else {
                    partial_marker_start(&self.text_buffer, self.scan_position, marker)
                };
                break;
            };

            let start = self.scan_position + relative;
            match self.match_candidate(start, at_end) {
                Candidate::Complete { end, decoded } => {
                    match decoded {
                        Ok((tool, args)) => {
                            debug!("Decoded {} tool call '{}' at {}..{}", self.format, tool, start, end);
                            self.spans.push(start..end);
                            self.calls_emitted += 1;
                            completed.push(ToolCall {
                                tool,
                                args,
                                span: start..end,
                                format: self.format,
                            });
                        }
                        Err(e) => {
                            debug!(
                                "Treating {} candidate at {}..{} as text: {}",
                                self.format, start, end, e
                            );
                        }
                    }
                    self.scan_position = end;
                }
                Candidate::Rejected { resume } => {
                    self.scan_position = resume;
                }
                Candidate::Incomplete if at_end => {
                    debug!("Unterminated {} candidate at {} left as text", self.format, start);
                    self.scan_position = start + 1;
                }
                Candidate::Incomplete => {
                    self.scan_position = start;
                    break;
                }
            }
        }

        completed
    }

    fn match_candidate(&self, start: usize, at_end: bool) -> Candidate {
        match self.format {
            ToolCallFormat::Supercoder => self.match_supercoder(start),
            ToolCallFormat::QwenLike => self.match_qwen(start, at_end),
            ToolCallFormat::JsonBlock => self.match_json_block(start),
            ToolCallFormat::XmlFunction => self.match_xml_function(start),
            ToolCallFormat::GlmToolCall => self.match_glm(start),
        }
    }

    fn match_supercoder(&self, start: usize) -> Candidate {
        let body_start = start + "<@TOOL>".len();
        match self.delimited(body_start, "</@TOOL>", "<@TOOL>") {
            Delimited::Closed { body_end, end } => Candidate::Complete {
                end,
                decoded: decode_supercoder_payload(&self.text_buffer[body_start..body_end]),
            },
            Delimited::Nested(resume) => Candidate::Rejected { resume },
            Delimited::Open => Candidate::Incomplete,
        }
    }

    fn match_json_block(&self, start: usize) -> Candidate {
        let body_start = start + "```".len();
        match self.text_buffer[body_start..].find("```") {
            Some(relative) => {
                let body_end = body_start + relative;
                Candidate::Complete {
                    end: body_end + "```".len(),
                    decoded: decode_json_block_payload(&self.text_buffer[body_start..body_end]),
                }
            }
            None => Candidate::Incomplete,
        }
    }

    fn match_xml_function(&self, start: usize) -> Candidate {
        let rest = &self.text_buffer[start..];
        let header_close = match find_within(rest, ">", MAX_HEADER_LEN) {
            Bounded::Found(close) => close,
            Bounded::Absent => return Candidate::Rejected { resume: start + 1 },
            Bounded::Pending => return Candidate::Incomplete,
        };
        let header = &rest[..=header_close];
        let Some(name) = parse_function_call_header(header) else {
            return Candidate::Rejected { resume: start + 1 };
        };

        let body_start = start + header_close + 1;
        match self.delimited(body_start, "</function_call>", "<function_call") {
            Delimited::Closed { body_end, end } => Candidate::Complete {
                end,
                decoded: decode_json_arguments(&self.text_buffer[body_start..body_end])
                    .map(|args| (name, args)),
            },
            Delimited::Nested(resume) => Candidate::Rejected { resume },
            Delimited::Open => Candidate::Incomplete,
        }
    }

    fn match_glm(&self, start: usize) -> Candidate {
        let body_start = start + "<tool_call>".len();
        match self.delimited(body_start, "</tool_call>", "<tool_call>") {
            Delimited::Closed { body_end, end } => Candidate::Complete {
                end,
                decoded: decode_glm_payload(&self.text_buffer[body_start..body_end]),
            },
            Delimited::Nested(resume) => Candidate::Rejected { resume },
            Delimited::Open => Candidate::Incomplete,
        }
    }

    /// `to=tool:name {json}` with optional channel tokens before the object
    /// and an optional `<|call|>` after it.
    fn match_qwen(&self, start: usize, at_end: bool) -> Candidate {
        let buf = self.text_buffer.as_str();
        let reject = Candidate::Rejected { resume: start + 1 };
        // Wait for more text, unless the stream is over
        let need_more = if at_end { Candidate::Rejected { resume: start + 1 } } else { Candidate::Incomplete };

        // `auto=` or `goto=` are prose, not a call
        if buf[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            return reject;
        }

        let mut pos = start + "to=".len();
        let rest = &buf[pos..];
        if rest.starts_with("tool:") || rest.starts_with("tool.") {
            pos += "tool:".len();
        } else if needs_more(rest, "tool:") && !rest.is_empty() {
            return need_more;
        }

        let name_len = buf[pos..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(buf.len() - pos);
        if pos + name_len == buf.len() {
            return need_more;
        }
        if name_len == 0 {
            return reject;
        }
        let name = buf[pos..pos + name_len].to_string();
        pos += name_len;

        // Gap between the name and the arguments object
        let gap_start = pos;
        loop {
            if pos - gap_start > MAX_HEADER_LEN {
                return reject;
            }
            let rest = &buf[pos..];
            if rest.is_empty() || needs_more(rest, "<|") || needs_more(rest, "json") {
                return need_more;
            }
            if rest.starts_with('{') {
                break;
            }
            if let Some(c) = rest.chars().next().filter(|c| c.is_whitespace()) {
                pos += c.len_utf8();
            } else if rest.starts_with("<|") {
                match find_within(rest, "|>", MAX_CHANNEL_TOKEN_LEN) {
                    Bounded::Found(close) => pos += close + "|>".len(),
                    Bounded::Absent => return reject,
                    Bounded::Pending => return need_more,
                }
            } else if rest.starts_with("json") {
                pos += "json".len();
            } else {
                return reject;
            }
        }

        let object_start = pos;
        match scan_json_object(&buf[object_start..]) {
            JsonScan::Complete(close) => {
                let mut end = object_start + close + 1;
                let after = &buf[end..];
                if after.starts_with(QWEN_CALL_SUFFIX) {
                    end += QWEN_CALL_SUFFIX.len();
                } else if !at_end && needs_more(after, QWEN_CALL_SUFFIX) {
                    return Candidate::Incomplete;
                }
                Candidate::Complete {
                    end,
                    decoded: decode_json_arguments(&buf[object_start..=object_start + close])
                        .map(|args| (name, args)),
                }
            }
            JsonScan::Invalid => reject,
            JsonScan::Incomplete => need_more,
        }
    }

    fn delimited(&self, body_start: usize, close: &str, reopen: &str) -> Delimited {
        let body = &self.text_buffer[body_start..];
        let close_at = body.find(close);
        match (close_at, body.find(reopen)) {
            (_, Some(nested)) if close_at.map_or(true, |c| nested < c) => {
                Delimited::Nested(body_start + nested)
            }
            (Some(c), _) => Delimited::Closed {
                body_end: body_start + c,
                end: body_start + c + close.len(),
            },
            _ => Delimited::Open,
        }
    }

    /// Transcript text that can no longer become part of a tool call and has
    /// not been returned before, with recognized calls removed.
    pub fn drain_visible(&mut self) -> String {
        let boundary = self.scan_position;
        if boundary <= self.visible_position {
            return String::new();
        }
        let visible = self.visible_between(self.visible_position, boundary);
        self.visible_position = boundary;
        visible
    }

    /// The whole transcript so far with recognized calls removed.
    pub fn visible_text(&self) -> String {
        self.visible_between(0, self.text_buffer.len())
    }

    fn visible_between(&self, from: usize, to: usize) -> String {
        let mut out = String::with_capacity(to - from);
        let mut cursor = from;
        for span in self.spans.iter().filter(|s| s.end > from && s.start < to) {
            if span.start > cursor {
                out.push_str(&self.text_buffer[cursor..span.start]);
            }
            cursor = cursor.max(span.end);
        }
        if cursor < to {
            out.push_str(&self.text_buffer[cursor..to]);
        }
        out
    }

    /// Raw spans of every recognized call, in textual order.
    pub fn spans(&self) -> &[Range<usize>] {
        &self.spans
    }

    /// Get the accumulated raw text, tool calls included.
    pub fn get_text_content(&self) -> &str {
        &self.text_buffer
    }

    /// True while a started candidate is waiting for its closing delimiter.
    pub fn has_incomplete_tool_call(&self) -> bool {
        !self.message_stopped
            && self.text_buffer[self.scan_position..].starts_with(start_marker(self.format))
    }

    pub fn is_message_stopped(&self) -> bool {
        self.message_stopped
    }

    pub fn calls_emitted(&self) -> usize {
        self.calls_emitted
    }

    /// Reset the parser state for a new message.
    pub fn reset(&mut self) {
        self.text_buffer.clear();
        self.scan_position = 0;
        self.spans.clear();
        self.visible_position = 0;
        self.calls_emitted = 0;
        self.message_stopped = false;
    }
}

/// The fixed text every candidate of `format` begins with.
pub fn start_marker(format: ToolCallFormat) -> &'static str {
    match format {
        ToolCallFormat::Supercoder => "<@TOOL>",
        ToolCallFormat::QwenLike => "to=",
        ToolCallFormat::JsonBlock => "```",
        ToolCallFormat::XmlFunction => "<function_call",
        ToolCallFormat::GlmToolCall => "<tool_call>",
    }
}

/// Offset of the earliest tail of `buf` that could still grow into `marker`,
/// or `buf.len()` when none can.
fn partial_marker_start(buf: &str, from: usize, marker: &str) -> usize {
    let tail_start = buf.len().saturating_sub(marker.len() - 1).max(from);
    (tail_start..buf.len())
        .find(|&p| buf.is_char_boundary(p) && marker.starts_with(&buf[p..]))
        .unwrap_or(buf.len())
}

/// Result of looking for a token inside a fixed-size window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bounded {
    /// Byte offset of the token's first occurrence
    Found(usize),
    /// The whole window is buffered and the token is not in it
    Absent,
    /// The window is not fully buffered yet
    Pending,
}

/// Look for `needle` ending within the first `window` bytes of `rest`.
///
/// Only the window is ever searched, so the answer is the same however the
/// text was split into fragments.
fn find_within(rest: &str, needle: &str, window: usize) -> Bounded {
    let mut limit = window.min(rest.len());
    while !rest.is_char_boundary(limit) {
        limit -= 1;
    }
    match rest[..limit].find(needle) {
        Some(offset) => Bounded::Found(offset),
        None if rest.len() >= window => Bounded::Absent,
        None => Bounded::Pending,
    }
}

/// True when `rest` is a proper prefix of `token`, so the next fragment
/// decides whether the token is there.
fn needs_more(rest: &str, token: &str) -> bool {
    rest.len() < token.len() && token.starts_with(rest)
}

/// Scan a JSON object starting at `text[0] == '{'`.
///
/// Returns whichever comes first: the closing brace, or evidence that this is
/// not JSON at all (a raw newline inside a string, or prose on a new line).
pub(crate) fn scan_json_object(text: &str) -> JsonScan {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            // Valid JSON strings cannot contain literal newlines
            '\n' if in_string => return JsonScan::Invalid,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                if depth == 0 {
                    return JsonScan::Invalid;
                }
                depth -= 1;
                if depth == 0 {
                    return JsonScan::Complete(i);
                }
            }
            '\n' => {
                while let Some(&(_, next_ch)) = chars.peek() {
                    if next_ch == ' ' || next_ch == '\t' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                match chars.peek() {
                    None => return JsonScan::Incomplete,
                    Some(&(_, next_ch)) => {
                        let is_valid_json_continuation = matches!(next_ch,
                            '"' | '{' | '}' | '[' | ']' | ':' | ',' | '-' |
                            '0'..='9' | 't' | 'f' | 'n' | '\n' | '\r'
                        );
                        if !is_valid_json_continuation {
                            return JsonScan::Invalid;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    JsonScan::Incomplete
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Parse `<function_call name="...">` and return the name.
fn parse_function_call_header(header: &str) -> Option<String> {
    let pattern = regex::Regex::new(r#"^<function_call\s+name\s*=\s*["']([^"']+)["']\s*>$"#).ok()?;
    let captures = pattern.captures(header)?;
    let name = captures.get(1)?.as_str().trim().to_string();
    is_valid_tool_name(&name).then_some(name)
}

fn parse_object(text: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::ArgumentsNotObject),
    }
}

fn decode_json_arguments(body: &str) -> Result<Map<String, Value>, DecodeError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Map::new());
    }
    parse_object(body)
}

/// Arguments may be an object or a JSON-encoded string holding one.
fn arguments_from_value(value: Option<&Value>) -> Result<Map<String, Value>, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(s)) => parse_object(s),
        Some(_) => Err(DecodeError::ArgumentsNotObject),
    }
}

fn name_from_value(value: Option<&Value>) -> Result<String, DecodeError> {
    let name = value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(DecodeError::MissingName)?;
    if !is_valid_tool_name(name) {
        return Err(DecodeError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}

fn decode_supercoder_payload(body: &str) -> Decoded {
    let data = parse_object(body.trim())?;
    let name = name_from_value(data.get("name"))?;
    let args = arguments_from_value(data.get("arguments"))?;
    Ok((name, args))
}

fn decode_json_block_payload(body: &str) -> Decoded {
    let mut body = body.trim_start();
    if body.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
        body = &body[4..];
    }
    let data = parse_object(body.trim())?;
    let name = name_from_value(data.get("tool").or_else(|| data.get("name")))?;
    let args = arguments_from_value(data.get("arguments").or_else(|| data.get("args")))?;
    Ok((name, args))
}

/// `name<arg_key>k</arg_key><arg_value>v</arg_value>...`
///
/// The `</arg_value>` close tag is optional; a value then runs to the next
/// `<arg_key>` or the end of the body.
fn decode_glm_payload(body: &str) -> Decoded {
    const KEY_OPEN: &str = "<arg_key>";
    const KEY_CLOSE: &str = "</arg_key>";
    const VALUE_OPEN: &str = "<arg_value>";
    const VALUE_CLOSE: &str = "</arg_value>";

    let name_end = body.find(KEY_OPEN).unwrap_or(body.len());
    let name = body[..name_end].trim();
    if name.is_empty() {
        return Err(DecodeError::MissingName);
    }
    if !is_valid_tool_name(name) {
        return Err(DecodeError::InvalidName(name.to_string()));
    }

    let mut args = Map::new();
    let mut rest = &body[name_end..];
    while let Some(after_open) = rest.strip_prefix(KEY_OPEN) {
        let key_end = after_open
            .find(KEY_CLOSE)
            .ok_or_else(|| DecodeError::MalformedPair("missing </arg_key>".to_string()))?;
        let key = after_open[..key_end].trim();
        if key.is_empty() {
            return Err(DecodeError::MalformedPair("empty key".to_string()));
        }
        let after_key = after_open[key_end + KEY_CLOSE.len()..].trim_start();
        let value_body = after_key.strip_prefix(VALUE_OPEN).ok_or_else(|| {
            DecodeError::MalformedPair(format!("missing <arg_value> for '{}'", key))
        })?;

        let next_key = value_body.find(KEY_OPEN).unwrap_or(value_body.len());
        let (raw_value, remainder) = match value_body[..next_key].find(VALUE_CLOSE) {
            Some(close) => (
                &value_body[..close],
                value_body[close + VALUE_CLOSE.len()..].trim_start(),
            ),
            None => (&value_body[..next_key], &value_body[next_key..]),
        };

        args.insert(key.to_string(), glm_value(raw_value));
        rest = remainder;
    }

    if !rest.trim().is_empty() {
        return Err(DecodeError::MalformedPair(format!(
            "unexpected trailing text '{}'",
            rest.trim()
        )));
    }

    Ok((name.to_string(), args))
}

/// Values are text unless they hold a nested JSON object or array.
fn glm_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(nested) = serde_json::from_str::<Value>(trimmed) {
            return nested;
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(format: ToolCallFormat, text: &str) -> Vec<ToolCall> {
        StreamingToolParser::decode_all(format, text)
    }

    #[test]
    fn test_scan_json_object_simple() {
        let text = r#"{"path":"a.txt","content":"{nested}"}"#;
        assert_eq!(scan_json_object(text), JsonScan::Complete(text.len() - 1));
    }

    #[test]
    fn test_scan_json_object_incomplete() {
        assert_eq!(scan_json_object(r#"{"path":"a.txt""#), JsonScan::Incomplete);
    }

    #[test]
    fn test_scan_json_object_raw_newline_in_string_is_invalid() {
        assert_eq!(scan_json_object("{\"path\": \"a\nb\"}"), JsonScan::Invalid);
    }

    #[test]
    fn test_scan_json_object_prose_after_newline_is_invalid() {
        assert_eq!(
            scan_json_object("{\"path\": \"a\",\nSo that was the plan"),
            JsonScan::Invalid
        );
    }

    #[test]
    fn test_scan_json_object_trailing_newline_waits() {
        assert_eq!(scan_json_object("{\"path\": \"a\",\n"), JsonScan::Incomplete);
    }

    #[test]
    fn test_supercoder_string_arguments_are_decoded() {
        let text = r#"<@TOOL>{"name": "create", "arguments": "{\"path\": \"a.txt\"}"}</@TOOL>"#;
        let calls = decode(ToolCallFormat::Supercoder, text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["path"], "a.txt");
    }

    #[test]
    fn test_json_block_without_tool_name_is_text() {
        let text = "```json\n{\"foo\": 1}\n```";
        let mut parser = StreamingToolParser::new(ToolCallFormat::JsonBlock);
        assert!(parser.process_fragment(text).is_empty());
        assert!(parser.finish().is_empty());
        assert_eq!(parser.visible_text(), text);
    }

    #[test]
    fn test_qwen_prefix_word_is_not_a_call() {
        let calls = decode(ToolCallFormat::QwenLike, r#"goto=create {"path": "a"}"#);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_qwen_channel_tokens_are_tolerated() {
        let text = r#"<|channel|>commentary to=tool:create <|constrain|>json<|message|>{"path": "a.txt", "content": "x"}<|call|>"#;
        let calls = decode(ToolCallFormat::QwenLike, text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "create");
        assert!(text[calls[0].span.clone()].ends_with("<|call|>"));
    }

    #[test]
    fn test_glm_value_without_close_tag() {
        let (name, args) = decode_glm_payload(
            "replace_lines<arg_key>path</arg_key><arg_value>f.txt<arg_key>start</arg_key><arg_value>2</arg_value>",
        )
        .unwrap();
        assert_eq!(name, "replace_lines");
        assert_eq!(args["path"], "f.txt");
        assert_eq!(args["start"], "2");
    }

    #[test]
    fn test_glm_nested_value_is_structured() {
        let (_, args) =
            decode_glm_payload("tool<arg_key>opts</arg_key><arg_value>{\"a\": [1, 2]}</arg_value>")
                .unwrap();
        assert_eq!(args["opts"]["a"][1], 2);
    }

    #[test]
    fn test_glm_missing_value_tag_is_error() {
        assert!(decode_glm_payload("tool<arg_key>path</arg_key>oops").is_err());
    }

    #[test]
    fn test_function_call_header() {
        assert_eq!(
            parse_function_call_header(r#"<function_call name="code-edit">"#),
            Some("code-edit".to_string())
        );
        assert_eq!(
            parse_function_call_header("<function_call name='create' >"),
            Some("create".to_string())
        );
        assert_eq!(parse_function_call_header("<function_calls>"), None);
    }

    #[test]
    fn test_hold_back_keeps_partial_marker() {
        let mut parser = StreamingToolParser::new(ToolCallFormat::Supercoder);
        parser.process_fragment("hello <@TO");
        assert_eq!(parser.drain_visible(), "hello ");
        parser.process_fragment("OL>{\"name\": \"x\"}</@TOOL> bye");
        parser.finish();
        assert_eq!(parser.drain_visible(), " bye");
    }

    #[test]
    fn test_find_within_only_searches_window() {
        assert_eq!(find_within("ab|>", "|>", 8), Bounded::Found(2));
        assert_eq!(find_within("ab", "|>", 8), Bounded::Pending);
        assert_eq!(find_within("abcdefgh|>", "|>", 8), Bounded::Absent);
        // Token straddling the window edge is outside it
        assert_eq!(find_within("abcdefg|>", "|>", 8), Bounded::Absent);
        // Window edge inside a multibyte char
        assert_eq!(find_within("abcdefgé>", ">", 8), Bounded::Absent);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut parser = StreamingToolParser::new(ToolCallFormat::Supercoder);
        parser.process_fragment("<@TOOL>{\"name\": \"x\"}</@TOOL>");
        parser.finish();
        parser.reset();
        assert!(parser.get_text_content().is_empty());
        assert!(parser.spans().is_empty());
        assert!(!parser.is_message_stopped());
        assert_eq!(parser.calls_emitted(), 0);
    }
}
