// SPDX-License-Identifier: GPL-3.0-only

//! ddrescue progress stream decoding
//!
//! [`ProgressStreamParser`] turns the raw, terminal-oriented byte stream of a
//! running ddrescue into [`ProgressSnapshot`]s. It keeps a partial-line
//! buffer across chunks, assembles status blocks, detects which of the known
//! layouts the tool prints, and remembers that layout for the rest of the
//! session.

mod fields;
mod layout;
mod terminal;

use rescue_types::{OutputLayout, PassDirection, ProgressSnapshot, RecoveryPhase};
use tracing::{debug, info};

use fields::{parse_size, split_fields};
use layout::Block;
use terminal::LineAssembler;

#[derive(Debug, Default)]
pub struct ProgressStreamParser {
    lines: LineAssembler,
    block: Block,
    layout: Option<OutputLayout>,
    /// Stream-level context copied into every snapshot
    context: ProgressSnapshot,
    last: Option<ProgressSnapshot>,
    messages: Vec<String>,
    last_message: Option<String>,
    completed: bool,
    interrupted: bool,
}

impl ProgressStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip layout sniffing, e.g. when the tool version is already known.
    pub fn with_layout(layout: OutputLayout) -> Self {
        Self {
            layout: Some(layout),
            ..Self::default()
        }
    }

    pub fn layout(&self) -> Option<OutputLayout> {
        self.layout
    }

    pub fn last_snapshot(&self) -> Option<&ProgressSnapshot> {
        self.last.as_ref()
    }

    /// True once the tool has printed its completion line.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// True once the tool has reported an interrupt from the terminal.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Consume a raw output chunk, returning the snapshots it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressSnapshot> {
        let mut snapshots = Vec::new();
        for line in self.lines.push(chunk) {
            self.handle_line(&line, &mut snapshots);
        }
        snapshots
    }

    /// Flush buffered input at end of stream.
    pub fn finish(&mut self) -> Vec<ProgressSnapshot> {
        let mut snapshots = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line, &mut snapshots);
        }
        self.flush_block(&mut snapshots);
        snapshots
    }

    /// Drain the non-progress lines seen since the last call, with
    /// consecutive repeats collapsed.
    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    fn handle_line(&mut self, line: &str, snapshots: &mut Vec<ProgressSnapshot>) {
        if let Some(fields) = split_fields(line) {
            self.push_fields(fields, snapshots);
            return;
        }

        self.flush_block(snapshots);
        let text = line.trim();

        if let Some(rest) = text.strip_prefix("About to copy ") {
            let amount = rest.split(" from ").next().unwrap_or(rest);
            self.context.total_size = parse_size(amount);
            debug!(total = ?self.context.total_size, "input size announced");
        } else if let Some(phase) = RecoveryPhase::from_status_line(text) {
            self.context.phase = Some(phase);
            self.context.pass = pass_number(text);
            self.context.direction = if text.contains("(backwards)") {
                Some(PassDirection::Backwards)
            } else if text.contains("(forwards)") {
                Some(PassDirection::Forwards)
            } else {
                self.context.direction
            };
        } else if text.starts_with("Finished") {
            self.completed = true;
            if let Some(last) = &self.last {
                let mut last = last.clone();
                last.finished = true;
                snapshots.push(last.clone());
                self.last = Some(last);
            }
        } else if text.starts_with("Interrupted by user") {
            self.interrupted = true;
        }

        if self.last_message.as_deref() != Some(text) {
            self.messages.push(text.to_string());
            self.last_message = Some(text.to_string());
        }
    }

    fn push_fields(&mut self, fields: Block, snapshots: &mut Vec<ProgressSnapshot>) {
        let repeats = fields
            .iter()
            .any(|(label, _)| self.block.iter().any(|(seen, _)| seen == label));
        if repeats {
            self.flush_block(snapshots);
        }

        self.block.extend(fields);

        let complete = match self.layout {
            Some(adopted) => layout::is_complete(adopted, &self.block),
            None => OutputLayout::PRIORITY
                .iter()
                .any(|candidate| layout::is_complete(*candidate, &self.block)),
        };
        if complete {
            self.flush_block(snapshots);
        }
    }

    fn flush_block(&mut self, snapshots: &mut Vec<ProgressSnapshot>) {
        if self.block.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.block);

        let layout = match self.layout {
            Some(adopted) if layout::matches(adopted, &block) => adopted,
            Some(adopted) => {
                debug!(layout = %adopted, "dropping block that does not fit the session layout");
                return;
            }
            None => {
                let Some(detected) = OutputLayout::PRIORITY
                    .into_iter()
                    .find(|candidate| layout::matches(*candidate, &block))
                else {
                    debug!(labels = block.len(), "dropping unrecognised status block");
                    return;
                };
                info!(layout = %detected, "detected ddrescue output layout");
                self.layout = Some(detected);
                detected
            }
        };

        let snapshot = layout::decode(layout, &block, &self.context);
        self.last = Some(snapshot.clone());
        snapshots.push(snapshot);
    }
}

/// `Pass 2 (backwards)` or `Retry 1 (forwards)`.
fn pass_number(line: &str) -> Option<u32> {
    let mut words = line.split_whitespace();
    words.by_ref().find(|word| *word == "Pass" || *word == "Retry")?;
    words.next()?.trim_end_matches(':').parse().ok()
}
