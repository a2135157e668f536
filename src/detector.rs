//! UI-State Detector (C3): a pure function from captured pane text to a
//! [`ParsedOutput`] record.
//!
//! This is the heart of the system: its correctness determines whether UI
//! notifications, selection dispatch, and history rendering all work.
//! Detection priority, first match wins: quality-survey auto-dismiss,
//! spinner (WORKING), selection, then PROMPT as the fallback.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiState {
    Working,
    Selection,
    Prompt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionItem {
    pub number: u32,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_freeform: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub state: UiState,
    #[serde(default)]
    pub items: Vec<SelectionItem>,
    #[serde(default)]
    pub selected_index: usize,
    #[serde(default)]
    pub arrow_navigable: bool,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub auto_response: Option<String>,
}

impl Default for ParsedOutput {
    fn default() -> Self {
        Self {
            state: UiState::Working,
            items: Vec::new(),
            selected_index: 0,
            arrow_navigable: false,
            question: String::new(),
            auto_response: None,
        }
    }
}

impl ParsedOutput {
    fn prompt() -> Self {
        Self {
            state: UiState::Prompt,
            ..Default::default()
        }
    }
}

/// Spinner glyphs empirically captured from live agent sessions. Declared
/// a living set; kept as a single named constant so exposing it as
/// configuration later is a small change.
pub const SPINNER_CHARS: &str = "·⏺✢✳✶✻✽";

const BOTTOM_LINES: usize = 5;
const FREEFORM_HINT: &str = "type something";

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<prefix>\s*[›❯]?\s*)(?P<num>\d+)\.\s+(?P<label>.+)$").unwrap())
}

fn hrule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[─╌╍┄┅┈┉━]{3,}\s*$").unwrap())
}

fn footer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(Enter to (select|confirm)|Esc to cancel).*(Esc to cancel|Tab to amend|↑/↓)|Press enter to continue",
        )
        .unwrap()
    })
}

fn spinner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^\s*[{SPINNER_CHARS}]\s+.*\u{{2026}}")).unwrap()
    })
}

fn codex_working_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*•\s+.*\(\d+s\s*•\s*esc to interrupt\)").unwrap())
}

fn survey_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\d:\s*Good\s+0:\s*Dismiss").unwrap())
}

fn chrome_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\?\s+for\s+shortcuts|\d+%\s+context left|shift\+tab to cycle|^\s*[›❯]\s+\S",
        )
        .unwrap()
    })
}

/// Parse raw captured pane text into a structured UI state. Pure: no I/O,
/// no session state, safe to fuzz or unit-test against literal fixtures.
pub fn parse(raw: &str) -> ParsedOutput {
    let mut lines: Vec<&str> = raw.split('\n').collect();

    while let Some(last) = lines.last() {
        if last.trim().is_empty() || chrome_re().is_match(last) {
            lines.pop();
        } else {
            break;
        }
    }

    if let Some(working) = try_working(&lines) {
        return working;
    }
    if let Some(selection) = try_selection(&lines) {
        return selection;
    }
    ParsedOutput::prompt()
}

fn try_working(lines: &[&str]) -> Option<ParsedOutput> {
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(BOTTOM_LINES);
    let tail = &lines[start..];

    for line in tail {
        if survey_re().is_match(line) {
            return Some(ParsedOutput {
                state: UiState::Working,
                auto_response: Some("0".to_string()),
                ..Default::default()
            });
        }
    }

    for line in tail {
        if spinner_re().is_match(line) || codex_working_re().is_match(line) {
            return Some(ParsedOutput {
                state: UiState::Working,
                ..Default::default()
            });
        }
    }

    None
}

struct FoundItem {
    line_idx: usize,
    label: String,
    marker: bool,
}

fn try_selection(lines: &[&str]) -> Option<ParsedOutput> {
    let n = lines.len();
    if n == 0 {
        return None;
    }

    // Phase 1: bottom-up scan for numbered items.
    let mut found: std::collections::HashMap<u32, FoundItem> = std::collections::HashMap::new();
    let mut bottom_item_idx: Option<usize> = None;
    let mut i = n as isize - 1;

    while i >= 0 {
        let line = lines[i as usize];
        if line.trim().is_empty() || footer_re().is_match(line) {
            i -= 1;
            continue;
        }
        break;
    }

    let mut prev_item_line: Option<isize> = None;
    while i >= 0 {
        let idx = i as usize;
        let line = lines[idx];

        if let Some(caps) = item_re().captures(line) {
            let num: u32 = caps["num"].parse().ok()?;
            let label = caps["label"].trim().to_string();
            let prefix = &caps["prefix"];
            let marker = prefix.contains('›') || prefix.contains('❯');

            if bottom_item_idx.is_none() {
                if (idx as isize) < (n as isize - 5) {
                    return None;
                }
                bottom_item_idx = Some(idx);
            }

            if let Some(prev) = prev_item_line {
                let gap = prev - i;
                if gap > 3 {
                    break;
                }
            }

            found.insert(
                num,
                FoundItem {
                    line_idx: idx,
                    label,
                    marker,
                },
            );
            prev_item_line = Some(i);

            if num == 1 {
                break;
            }
        }
        // blank / footer / hrule / 4-space-indent description lines fall
        // through here and simply don't reset the gap counter — the gap
        // check above already tolerates up to 3 lines between items.

        i -= 1;
    }

    if !found.contains_key(&1) || found.len() < 2 {
        return None;
    }

    let max_num = *found.keys().max().unwrap();
    let mut items = Vec::with_capacity(max_num as usize);
    let mut item_lines = Vec::with_capacity(max_num as usize);
    let mut selected_index = 0usize;
    let mut has_marker = false;

    for num in 1..=max_num {
        let entry = found.remove(&num)?; // gap in numbering -> reject
        item_lines.push(entry.line_idx);
        if entry.marker {
            selected_index = items.len();
            has_marker = true;
        }
        items.push(SelectionItem {
            number: num,
            label: entry.label,
            description: String::new(),
            is_freeform: false,
        });
    }

    // Phase 2: forward pass collecting descriptions.
    for pos in 0..items.len() {
        let start = item_lines[pos] + 1;
        let end = item_lines.get(pos + 1).copied().unwrap_or(n);
        for line in lines.iter().take(end).skip(start) {
            if item_re().is_match(line) || footer_re().is_match(line) {
                break;
            }
            if hrule_re().is_match(line) || line.trim().is_empty() {
                continue;
            }
            if let Some(desc) = line.strip_prefix("    ") {
                let desc = desc.trim();
                if !items[pos].description.is_empty() {
                    items[pos].description.push(' ');
                }
                items[pos].description.push_str(desc);
            } else {
                break;
            }
        }
    }

    // Phase 3: gating.
    let has_footer = lines.iter().any(|l| footer_re().is_match(l));

    let first_idx = item_lines[0];
    let mut has_question = false;
    let lower_bound = first_idx.saturating_sub(2);
    for k in (lower_bound..first_idx).rev() {
        let line = lines[k].trim();
        if line.is_empty() {
            continue;
        }
        if line.ends_with('?') || line.ends_with(':') {
            has_question = true;
            break;
        }
    }

    if !has_footer && !has_question {
        return None;
    }

    if !has_marker {
        selected_index = 0;
    }

    for item in items.iter_mut() {
        if item.label.to_lowercase().contains(FREEFORM_HINT) {
            item.is_freeform = true;
        }
    }

    // Extract the question header: walk upward from the first item
    // across consecutive non-blank lines, stop at a horizontal rule or
    // blank.
    let mut question_lines: Vec<&str> = Vec::new();
    for k in (0..first_idx).rev() {
        let trimmed = lines[k].trim();
        if trimmed.is_empty() || hrule_re().is_match(lines[k]) {
            break;
        }
        question_lines.insert(0, trimmed);
    }

    Some(ParsedOutput {
        state: UiState::Selection,
        items,
        selected_index,
        arrow_navigable: has_marker,
        question: question_lines.join(" "),
        auto_response: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_prompt() {
        let out = parse("");
        assert_eq!(out.state, UiState::Prompt);
    }

    #[test]
    fn single_item_with_footer_is_prompt() {
        let text = "1. Only option\nEnter to select · Esc to cancel";
        let out = parse(text);
        assert_eq!(out.state, UiState::Prompt);
    }

    #[test]
    fn arrow_navigable_selection_with_footer() {
        let text = "Proceed?\n❯ 1. Yes\n  2. No\nEnter to select · Esc to cancel";
        let out = parse(text);
        assert_eq!(out.state, UiState::Selection);
        assert!(out.arrow_navigable);
        assert_eq!(out.selected_index, 0);
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].label, "Yes");
    }

    #[test]
    fn number_input_selection_with_question_header() {
        let text = "Pick one option:\n1. Alpha\n2. Beta\n3. Gamma";
        let out = parse(text);
        assert_eq!(out.state, UiState::Selection);
        assert!(!out.arrow_navigable);
        assert_eq!(out.items.len(), 3);
    }

    #[test]
    fn stale_selection_suppressed_bottom_wins() {
        let text = "1. Old A\n2. Old B\n3. Old C\nEnter to select · Esc to cancel\n\nsome agent output\nmore output\n\nDo it?\n❯ 1. Yes\n2. No\nEnter to select · Esc to cancel";
        let out = parse(text);
        assert_eq!(out.state, UiState::Selection);
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].label, "Yes");
        assert_eq!(out.items[1].label, "No");
    }

    #[test]
    fn quality_survey_auto_dismisses() {
        let text = "1: Bad  2: Fine  3: Good  0: Dismiss";
        let out = parse(text);
        assert_eq!(out.state, UiState::Working);
        assert_eq!(out.auto_response.as_deref(), Some("0"));
    }

    #[test]
    fn spinner_present_outranks_valid_selection() {
        let text = "Pick one:\n1. Alpha\n2. Beta\n✳ Moonwalking…";
        let out = parse(text);
        assert_eq!(out.state, UiState::Working);
    }

    #[test]
    fn codex_working_line_detected() {
        let text = "• Working (3s • esc to interrupt)";
        let out = parse(text);
        assert_eq!(out.state, UiState::Working);
    }

    #[test]
    fn freeform_item_marked() {
        let text = "Pick one:\n1. Alpha\n2. Type something else";
        let out = parse(text);
        assert!(out.items[1].is_freeform);
    }

    #[test]
    fn gap_in_numbering_rejects() {
        let text = "Pick one:\n1. Alpha\n3. Gamma\nEnter to select";
        let out = parse(text);
        assert_eq!(out.state, UiState::Prompt);
    }

    #[test]
    fn anchor_too_far_from_bottom_rejects() {
        // Six lines of non-blank, non-chrome agent output follow the
        // numbered block, so after the bottom item (line 1) the nearest
        // anchor is more than 5 lines from the end of the text — the
        // bottom-up scan must refuse to treat this as a live selection.
        let text = "1. Alpha\n2. Beta\nnote\nnote\nnote\nnote\nnote\nnote";
        let out = parse(text);
        assert_eq!(out.state, UiState::Prompt);
    }

    #[test]
    fn descriptions_collected_for_each_item() {
        let text = "Pick one:\n1. Alpha\n    does a thing\n2. Beta\n    does another\nEnter to select";
        let out = parse(text);
        assert_eq!(out.items[0].description, "does a thing");
        assert_eq!(out.items[1].description, "does another");
    }
}
