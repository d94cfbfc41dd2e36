//! Incremental assembly of a streamed model reply.
//!
//! The reply is one JSON object (`thought`, `answer`, `files`, `plan`,
//! `questions`) delivered in arbitrary fragments. While it streams, the
//! top-level `thought` and `answer` strings are decoded as far as they have
//! arrived so the terminal can show live progress. Once the stream ends the
//! whole buffer is parsed; that parse is the only result that counts.

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StudioError;
use crate::models::GenerationResult;

pub const WATCHED_FIELDS: [&str; 2] = ["thought", "answer"];

/// A watched field grew. `value` is the whole decoded value so far.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StringRole {
    Key,
    Skipped,
    Captured(usize),
}

enum EscapeStep {
    Incomplete,
    Char(char),
    Unit(u16),
}

fn decode_escape(seq: &str) -> EscapeStep {
    let mut chars = seq.chars();
    match chars.next() {
        None => EscapeStep::Incomplete,
        Some('n') => EscapeStep::Char('\n'),
        Some('t') => EscapeStep::Char('\t'),
        Some('r') => EscapeStep::Char('\r'),
        Some('b') => EscapeStep::Char('\u{8}'),
        Some('f') => EscapeStep::Char('\u{c}'),
        Some('u') => {
            let hex = chars.as_str();
            if hex.len() < 4 {
                EscapeStep::Incomplete
            } else {
                u16::from_str_radix(hex, 16)
                    .map(EscapeStep::Unit)
                    .unwrap_or(EscapeStep::Char(char::REPLACEMENT_CHARACTER))
            }
        }
        // `"`, `\`, `/` and anything unexpected stand for themselves
        Some(other) => EscapeStep::Char(other),
    }
}

/// Character-level JSON scanner that tracks nesting, string and escape state
/// and decodes the values of selected top-level string fields.
#[derive(Debug)]
struct FieldScanner {
    fields: Vec<&'static str>,
    values: Vec<Option<String>>,
    stack: Vec<Container>,
    expect_key: bool,
    string: Option<StringRole>,
    raw_escape: bool,
    escape: Option<String>,
    high_surrogate: Option<u16>,
    key_buf: String,
    last_key: Option<String>,
    seen_keys: Vec<String>,
}

impl FieldScanner {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.to_vec(),
            values: vec![None; fields.len()],
            stack: Vec::new(),
            expect_key: false,
            string: None,
            raw_escape: false,
            escape: None,
            high_surrogate: None,
            key_buf: String::new(),
            last_key: None,
            seen_keys: Vec::new(),
        }
    }

    fn in_top_level_object(&self) -> bool {
        self.stack.len() == 1 && self.stack[0] == Container::Object
    }

    /// Feeds one character; returns the index of the watched field that grew, if any.
    fn feed(&mut self, ch: char) -> Option<usize> {
        match self.string {
            Some(StringRole::Captured(idx)) => return self.feed_captured(idx, ch),
            Some(role) => {
                self.feed_plain(role, ch);
                return None;
            }
            None => {}
        }

        match ch {
            '"' => {
                let role = if self.in_top_level_object() && self.expect_key {
                    self.key_buf.clear();
                    StringRole::Key
                } else if self.in_top_level_object() {
                    let watched = self
                        .last_key
                        .as_deref()
                        .and_then(|key| self.fields.iter().position(|f| *f == key));
                    match watched {
                        Some(idx) => {
                            self.values[idx].get_or_insert_with(String::new);
                            StringRole::Captured(idx)
                        }
                        None => StringRole::Skipped,
                    }
                } else {
                    StringRole::Skipped
                };
                self.string = Some(role);
            }
            '{' => {
                self.stack.push(Container::Object);
                if self.stack.len() == 1 {
                    self.expect_key = true;
                }
            }
            '[' => self.stack.push(Container::Array),
            '}' | ']' => {
                self.stack.pop();
            }
            ',' if self.in_top_level_object() => {
                self.expect_key = true;
                self.last_key = None;
            }
            _ => {}
        }
        None
    }

    fn feed_plain(&mut self, role: StringRole, ch: char) {
        let is_key = role == StringRole::Key;
        if self.raw_escape {
            self.raw_escape = false;
            if is_key {
                self.key_buf.push(ch);
            }
            return;
        }
        match ch {
            '\\' => {
                self.raw_escape = true;
                if is_key {
                    self.key_buf.push(ch);
                }
            }
            '"' => {
                self.string = None;
                if is_key {
                    self.expect_key = false;
                    let key = std::mem::take(&mut self.key_buf);
                    if !self.seen_keys.contains(&key) {
                        self.seen_keys.push(key.clone());
                    }
                    self.last_key = Some(key);
                }
            }
            c => {
                if is_key {
                    self.key_buf.push(c);
                }
            }
        }
    }

    fn feed_captured(&mut self, idx: usize, ch: char) -> Option<usize> {
        if let Some(seq) = self.escape.as_mut() {
            seq.push(ch);
            let step = decode_escape(seq);
            let decoded = match step {
                EscapeStep::Incomplete => return None,
                EscapeStep::Char(c) => c,
                EscapeStep::Unit(unit) => {
                    self.escape = None;
                    return self.push_unit(idx, unit);
                }
            };
            self.escape = None;
            return self.push_char(idx, decoded);
        }

        match ch {
            '\\' => {
                self.escape = Some(String::new());
                None
            }
            '"' => {
                self.string = None;
                if self.high_surrogate.take().is_some() {
                    self.append(idx, char::REPLACEMENT_CHARACTER);
                    return Some(idx);
                }
                None
            }
            c => self.push_char(idx, c),
        }
    }

    fn push_unit(&mut self, idx: usize, unit: u16) -> Option<usize> {
        match unit {
            0xD800..=0xDBFF => {
                let grew = self.flush_surrogate(idx);
                self.high_surrogate = Some(unit);
                grew.then_some(idx)
            }
            0xDC00..=0xDFFF => {
                let c = match self.high_surrogate.take() {
                    Some(high) => {
                        let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(unit) - 0xDC00);
                        char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                    }
                    None => char::REPLACEMENT_CHARACTER,
                };
                self.append(idx, c);
                Some(idx)
            }
            other => {
                let c = char::from_u32(u32::from(other)).unwrap_or(char::REPLACEMENT_CHARACTER);
                self.push_char(idx, c)
            }
        }
    }

    fn push_char(&mut self, idx: usize, c: char) -> Option<usize> {
        self.flush_surrogate(idx);
        self.append(idx, c);
        Some(idx)
    }

    fn flush_surrogate(&mut self, idx: usize) -> bool {
        if self.high_surrogate.take().is_some() {
            self.append(idx, char::REPLACEMENT_CHARACTER);
            return true;
        }
        false
    }

    fn append(&mut self, idx: usize, c: char) {
        self.values[idx].get_or_insert_with(String::new).push(c);
    }
}

/// Buffers a streamed reply and exposes the watched fields as they grow.
#[derive(Debug)]
pub struct ResponseAssembler {
    buffer: String,
    scanner: FieldScanner,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::watching(&WATCHED_FIELDS)
    }

    pub fn watching(fields: &[&'static str]) -> Self {
        Self {
            buffer: String::new(),
            scanner: FieldScanner::new(fields),
        }
    }

    /// Appends a fragment and returns the watched fields that grew because of it.
    pub fn push(&mut self, chunk: &str) -> Vec<FieldUpdate> {
        self.buffer.push_str(chunk);

        let mut grown: Vec<usize> = Vec::new();
        for ch in chunk.chars() {
            if let Some(idx) = self.scanner.feed(ch) {
                if !grown.contains(&idx) {
                    grown.push(idx);
                }
            }
        }

        grown
            .into_iter()
            .filter_map(|idx| {
                let value = self.scanner.values[idx].as_ref()?;
                Some(FieldUpdate {
                    field: self.scanner.fields[idx],
                    value: value.clone(),
                })
            })
            .collect()
    }

    /// Current best guess for a watched field.
    pub fn value(&self, field: &str) -> Option<&str> {
        let idx = self.scanner.fields.iter().position(|f| *f == field)?;
        self.scanner.values[idx].as_deref()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Coarse status for when no thought has streamed yet.
    pub fn progress_hint(&self) -> Option<&'static str> {
        if self.value("thought").is_some_and(|t| !t.is_empty()) {
            return None;
        }
        let seen = |key: &str| self.scanner.seen_keys.iter().any(|k| k == key);
        if seen("answer") {
            Some("Drafting Implementation...")
        } else if seen("files") {
            Some("Writing Production Code...")
        } else if seen("questions") {
            Some("Analyzing Requirements...")
        } else {
            None
        }
    }

    /// Parses the complete reply. A reply that is not valid JSON fails the exchange.
    pub fn finish(self) -> Result<GenerationResult, StudioError> {
        serde_json::from_str(self.buffer.trim()).map_err(StudioError::MalformedResponse)
    }
}

#[derive(Debug)]
pub enum Assembly {
    Completed(GenerationResult),
    Cancelled,
}

/// Drains a chunk stream into a [`ResponseAssembler`], calling `on_update`
/// after every chunk. Cancellation is checked once per chunk and also
/// interrupts a pending read; a cancelled assembly is discarded.
pub async fn assemble<S, F>(
    mut stream: S,
    cancel: &CancellationToken,
    mut on_update: F,
) -> anyhow::Result<Assembly>
where
    S: Stream<Item = anyhow::Result<String>> + Unpin,
    F: FnMut(&[FieldUpdate], &ResponseAssembler),
{
    let mut assembler = ResponseAssembler::new();

    loop {
        if cancel.is_cancelled() {
            debug!("Assembly cancelled after {} bytes", assembler.buffer().len());
            return Ok(Assembly::Cancelled);
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Assembly cancelled while waiting for a chunk");
                return Ok(Assembly::Cancelled);
            }
            item = stream.next() => item,
        };

        match next {
            Some(chunk) => {
                let chunk = chunk?;
                let updates = assembler.push(&chunk);
                on_update(&updates, &assembler);
            }
            None => break,
        }
    }

    debug!("Stream finished with {} bytes", assembler.buffer().len());
    Ok(Assembly::Completed(assembler.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const REPLY: &str = r#"{
  "thought": "Plan the layout.\nThen write \"main.js\" é 😀",
  "questions": [],
  "plan": ["ui", "logic"],
  "answer": "Built a shop with a cart.\nEnjoy!",
  "files": { "app/index.html": "<div id=\"a\"></div>", "app/main.js": "var answer = \"nested\";" }
}"#;

    fn chunks_of(text: &str, size: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars.chunks(size).map(|c| c.iter().collect()).collect()
    }

    #[test]
    fn test_final_values_match_parsed_json_for_any_split() {
        let expected: GenerationResult = serde_json::from_str(REPLY).unwrap();

        for size in [1, 2, 3, 5, 8, 13, 64, REPLY.len()] {
            let mut assembler = ResponseAssembler::new();
            for chunk in chunks_of(REPLY, size) {
                assembler.push(&chunk);
            }
            assert_eq!(assembler.value("thought"), expected.thought.as_deref(), "chunk size {}", size);
            assert_eq!(assembler.value("answer"), Some(expected.answer.as_str()), "chunk size {}", size);
            assert_eq!(assembler.finish().unwrap(), expected);
        }
    }

    #[test]
    fn test_intermediate_values_only_grow() {
        let expected: GenerationResult = serde_json::from_str(REPLY).unwrap();
        let final_thought = expected.thought.unwrap();

        for size in [1, 3, 7] {
            let mut assembler = ResponseAssembler::new();
            let mut previous = String::new();
            for chunk in chunks_of(REPLY, size) {
                for update in assembler.push(&chunk) {
                    if update.field == "thought" {
                        assert!(update.value.starts_with(&previous));
                        assert!(final_thought.starts_with(&update.value));
                        assert!(update.value.len() > previous.len());
                        previous = update.value;
                    }
                }
            }
            assert_eq!(previous, final_thought);
        }
    }

    #[test]
    fn test_escaped_quote_does_not_end_value() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(r#"{"answer": "say \"hi\" now"#);
        assert_eq!(assembler.value("answer"), Some(r#"say "hi" now"#));
    }

    #[test]
    fn test_escape_split_across_chunks_is_held_back() {
        let mut assembler = ResponseAssembler::new();
        let updates = assembler.push(r#"{"answer": "a\"#);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].value, "a");

        let updates = assembler.push("n");
        assert_eq!(updates[0].value, "a\n");

        assembler.push(r#"\u00"#);
        assert_eq!(assembler.value("answer"), Some("a\n"));
        assembler.push(r#"e9""#);
        assert_eq!(assembler.value("answer"), Some("a\né"));
    }

    #[test]
    fn test_only_top_level_keys_are_watched() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(r#"{"thoughtful": "no", "files": {"answer": "nested"}, "plan": ["answer"], "answer": "real"}"#);
        assert_eq!(assembler.value("thought"), None);
        assert_eq!(assembler.value("answer"), Some("real"));
    }

    #[test]
    fn test_unchanged_fields_are_not_reported() {
        let mut assembler = ResponseAssembler::new();
        assert_eq!(assembler.push(r#"{"thought": "x", "#).len(), 1);
        assert!(assembler.push(r#""plan": []"#).is_empty());
    }

    #[test]
    fn test_progress_hint_follows_seen_keys() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(r#"{"questions": [], "#);
        assert_eq!(assembler.progress_hint(), Some("Analyzing Requirements..."));
        assembler.push(r#""files": {}, "#);
        assert_eq!(assembler.progress_hint(), Some("Writing Production Code..."));
        assembler.push(r#""answer": ""#);
        assert_eq!(assembler.progress_hint(), Some("Drafting Implementation..."));

        let mut with_thought = ResponseAssembler::new();
        with_thought.push(r#"{"thought": "thinking", "answer": ""#);
        assert_eq!(with_thought.progress_hint(), None);
    }

    #[test]
    fn test_malformed_reply_is_an_error() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(r#"{"answer": "cut off"#);
        assert!(matches!(assembler.finish(), Err(StudioError::MalformedResponse(_))));

        assert!(ResponseAssembler::new().finish().is_err());
    }

    #[tokio::test]
    async fn test_assemble_completes_and_reports_updates() {
        let chunks: Vec<anyhow::Result<String>> = chunks_of(REPLY, 9).into_iter().map(Ok).collect();
        let cancel = CancellationToken::new();
        let mut answers = Vec::new();

        let outcome = assemble(stream::iter(chunks), &cancel, |updates, _| {
            for u in updates {
                if u.field == "answer" {
                    answers.push(u.value.clone());
                }
            }
        })
        .await
        .unwrap();

        match outcome {
            Assembly::Completed(result) => {
                assert_eq!(result.plan, vec!["ui".to_string(), "logic".to_string()]);
                assert_eq!(answers.last().map(String::as_str), Some(result.answer.as_str()));
            }
            Assembly::Cancelled => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_assemble_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let first = stream::iter(vec![Ok::<_, anyhow::Error>(r#"{"answer": "par"#.to_string())]);
        let endless = first.chain(stream::pending());

        let trigger = cancel.clone();
        let mut seen = 0;
        let outcome = assemble(Box::pin(endless), &cancel, |_, _| {
            seen += 1;
            trigger.cancel();
        })
        .await
        .unwrap();

        assert!(matches!(outcome, Assembly::Cancelled));
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn test_assemble_propagates_stream_errors() {
        let cancel = CancellationToken::new();
        let chunks = vec![
            Ok(r#"{"answer": "#.to_string()),
            Err(anyhow::anyhow!("connection reset")),
        ];
        let result = assemble(stream::iter(chunks), &cancel, |_, _| {}).await;
        assert!(result.unwrap_err().to_string().contains("connection reset"));
    }
}
