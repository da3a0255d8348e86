//! Stateful stream processors.
//!
//! Reasoning deltas accumulate into sections that surface at the hub as
//! synthetic `CodexReasoning` tool-call pairs; turn diffs accumulate until
//! the turn ends; command output is truncated to a short preview for the
//! passive renderer.

use relay_protocol::{HubRecord, ToolCallStatus};
use serde_json::json;

const REASONING_TOOL_NAME: &str = "CodexReasoning";

const PREVIEW_MAX_LINES: usize = 10;
const PREVIEW_MAX_CHARS: usize = 1000;

/// Accumulates reasoning deltas and cuts them into sections.
#[derive(Default)]
pub struct ReasoningProcessor {
    buffer: String,
    call_id: Option<String>,
    section: u64,
}

impl ReasoningProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta. The first delta of a section opens a synthetic tool
    /// call.
    pub fn process_delta(&mut self, delta: &str) -> Vec<HubRecord> {
        let mut records = Vec::new();
        if self.call_id.is_none() {
            self.section += 1;
            let call_id = format!("reasoning-{}", self.section);
            records.push(HubRecord::tool_call(
                call_id.clone(),
                REASONING_TOOL_NAME,
                json!({"section": self.section}),
            ));
            self.call_id = Some(call_id);
        }
        self.buffer.push_str(delta);
        records
    }

    /// Close the current section at a section break.
    pub fn handle_section_break(&mut self) -> Vec<HubRecord> {
        self.flush(ToolCallStatus::Completed, None)
    }

    /// Close the final section with the full text when the backend provides
    /// one, falling back to the accumulated buffer.
    pub fn complete(&mut self, full_text: Option<&str>) -> Vec<HubRecord> {
        self.flush(ToolCallStatus::Completed, full_text)
    }

    /// A pending section is flushed as canceled on abort.
    pub fn abort(&mut self) -> Vec<HubRecord> {
        self.flush(ToolCallStatus::Canceled, None)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.call_id = None;
        self.section = 0;
    }

    fn flush(&mut self, status: ToolCallStatus, full_text: Option<&str>) -> Vec<HubRecord> {
        let Some(call_id) = self.call_id.take() else {
            self.buffer.clear();
            return Vec::new();
        };
        let text = match full_text {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => std::mem::take(&mut self.buffer),
        };
        self.buffer.clear();
        vec![HubRecord::tool_call_result(
            call_id,
            status,
            json!({"text": text}),
        )]
    }
}

/// Accumulates `turn_diff` events until flushed at turn end.
#[derive(Default)]
pub struct DiffProcessor {
    latest: Option<String>,
}

impl DiffProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_turn_diff(&mut self, unified_diff: &str) {
        self.latest = Some(unified_diff.to_string());
    }

    /// Take the accumulated diff, leaving the processor empty.
    pub fn flush(&mut self) -> Option<String> {
        self.latest.take()
    }

    pub fn reset(&mut self) {
        self.latest = None;
    }
}

/// Truncate command output for the message buffer; the hub still gets the
/// full text.
pub fn preview(text: &str) -> String {
    let mut cut = text;
    let mut truncated = false;

    if let Some((idx, _)) = cut.char_indices().nth(PREVIEW_MAX_CHARS) {
        cut = &cut[..idx];
        truncated = true;
    }

    let lines: Vec<&str> = cut.lines().collect();
    let body = if lines.len() > PREVIEW_MAX_LINES {
        truncated = true;
        lines[..PREVIEW_MAX_LINES].join("\n")
    } else {
        cut.to_string()
    };

    if truncated {
        format!("{}\n…", body.trim_end_matches('\n'))
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_ids(records: &[HubRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| match r {
                HubRecord::ToolCall { call_id, .. } => call_id.clone(),
                HubRecord::ToolCallResult { call_id, .. } => call_id.clone(),
                HubRecord::Event { .. } => panic!("unexpected event record"),
            })
            .collect()
    }

    #[test]
    fn first_delta_opens_a_section() {
        let mut processor = ReasoningProcessor::new();
        let records = processor.process_delta("**Plan");
        assert_eq!(records.len(), 1);
        match &records[0] {
            HubRecord::ToolCall { name, .. } => assert_eq!(name, REASONING_TOOL_NAME),
            other => panic!("unexpected record: {:?}", other),
        }

        // Subsequent deltas extend the open section silently.
        assert!(processor.process_delta("** draft plan").is_empty());
    }

    #[test]
    fn section_break_closes_with_buffered_text() {
        let mut processor = ReasoningProcessor::new();
        let opened = processor.process_delta("first section");
        let closed = processor.handle_section_break();
        assert_eq!(closed.len(), 1);
        match &closed[0] {
            HubRecord::ToolCallResult { status, output, .. } => {
                assert_eq!(*status, ToolCallStatus::Completed);
                assert_eq!(output["text"], "first section");
            }
            other => panic!("unexpected record: {:?}", other),
        }
        // The result pairs with the opened call.
        assert_eq!(call_ids(&opened), call_ids(&closed));
    }

    #[test]
    fn sections_get_distinct_call_ids() {
        let mut processor = ReasoningProcessor::new();
        let first = processor.process_delta("a");
        processor.handle_section_break();
        let second = processor.process_delta("b");
        assert_ne!(call_ids(&first), call_ids(&second));
    }

    #[test]
    fn complete_prefers_full_text() {
        let mut processor = ReasoningProcessor::new();
        let _ = processor.process_delta("partial");
        let records = processor.complete(Some("the whole reasoning"));
        match &records[0] {
            HubRecord::ToolCallResult { output, .. } => {
                assert_eq!(output["text"], "the whole reasoning");
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn complete_without_open_section_is_a_no_op() {
        let mut processor = ReasoningProcessor::new();
        assert!(processor.complete(None).is_empty());
        assert!(processor.handle_section_break().is_empty());
    }

    #[test]
    fn abort_flushes_pending_section_as_canceled() {
        let mut processor = ReasoningProcessor::new();
        let _ = processor.process_delta("unfinished thought");
        let records = processor.abort();
        match &records[0] {
            HubRecord::ToolCallResult { status, output, .. } => {
                assert_eq!(*status, ToolCallStatus::Canceled);
                assert_eq!(output["text"], "unfinished thought");
            }
            other => panic!("unexpected record: {:?}", other),
        }
        assert!(processor.abort().is_empty(), "abort is idempotent");
    }

    #[test]
    fn diff_processor_keeps_latest_until_flush() {
        let mut processor = DiffProcessor::new();
        assert!(processor.flush().is_none());

        processor.handle_turn_diff("--- v1");
        processor.handle_turn_diff("--- v2");
        assert_eq!(processor.flush().as_deref(), Some("--- v2"));
        assert!(processor.flush().is_none());
    }

    #[test]
    fn preview_truncates_long_output() {
        let long: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let p = preview(&long);
        assert!(p.lines().count() <= PREVIEW_MAX_LINES + 1);
        assert!(p.ends_with('…'));

        let short = "just one line";
        assert_eq!(preview(short), short);
    }

    #[test]
    fn preview_respects_char_budget() {
        let wide = "x".repeat(5000);
        let p = preview(&wide);
        assert!(p.chars().count() <= PREVIEW_MAX_CHARS + 2);
    }
}
