//! Agent Adapter (C4): a per-agent-kind table of launch command, keyboard
//! shortcuts, and slash commands.
//!
//! Dynamic dispatch over agent kinds is modeled as a tagged variant plus a
//! lookup from tag to an immutable adapter value — no trait object, no
//! class hierarchy. New agents plug in by adding an `AgentKind` variant and
//! a table entry in [`AgentKind::adapter`].

use serde::{Deserialize, Serialize};

/// A keyboard shortcut expansion: the keys to send, and whether a
/// trailing `Enter` should be sent after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub keys: &'static str,
    pub press_enter_after: bool,
}

/// A slash-command descriptor, consumed only by the HTTP shim.
#[derive(Debug, Clone, Copy)]
pub struct SlashCommand {
    pub text: &'static str,
    pub send_enter: bool,
    pub need_confirmation: bool,
    pub show_nav: bool,
}

/// Supported coding-agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
}

impl AgentKind {
    /// Wire-format name used in session ids (`agent-<kind>-<slug>`) and
    /// in the `agent_type` JSON field.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(AgentKind::Claude),
            "codex" => Some(AgentKind::Codex),
            _ => None,
        }
    }

    /// Infer a kind from a session id's `agent-<kind>-` prefix, falling
    /// back to `Claude` if no known prefix matches (mirrors the
    /// rehydration default of the reference behavior this is grounded
    /// on).
    pub fn from_session_id(session_id: &str) -> Self {
        for kind in [AgentKind::Claude, AgentKind::Codex] {
            if session_id.starts_with(&format!("agent-{}-", kind.as_str())) {
                return kind;
            }
        }
        AgentKind::Claude
    }

    /// The immutable adapter value for this kind.
    pub fn adapter(&self) -> &'static AgentAdapter {
        match self {
            AgentKind::Claude => &CLAUDE_ADAPTER,
            AgentKind::Codex => &CODEX_ADAPTER,
        }
    }
}

/// Static configuration for one agent kind.
pub struct AgentAdapter {
    pub kind: AgentKind,
    shortcuts: &'static [(&'static str, Shortcut)],
    pub slash_commands: &'static [SlashCommand],
}

impl AgentAdapter {
    /// The shell command that launches this agent in `working_dir`.
    pub fn launch_command(&self, working_dir: &str) -> String {
        match self.kind {
            AgentKind::Claude => format!("cd {working_dir} && exec claude"),
            AgentKind::Codex => format!("cd {working_dir} && exec codex"),
        }
    }

    /// Normalize `text` (trim + lowercase) and look it up in the shortcut
    /// table. Idempotent and case/whitespace-insensitive, per the
    /// observable contract.
    pub fn expand_shortcut(&self, text: &str) -> Option<Shortcut> {
        let needle = text.trim().to_lowercase();
        self.shortcuts
            .iter()
            .find(|(name, _)| *name == needle)
            .map(|(_, shortcut)| *shortcut)
    }
}

const CLAUDE_SHORTCUTS: &[(&str, Shortcut)] = &[
    ("stop", Shortcut { keys: "Escape", press_enter_after: false }),
    ("cancel", Shortcut { keys: "C-c", press_enter_after: false }),
    ("up", Shortcut { keys: "Up", press_enter_after: false }),
    ("down", Shortcut { keys: "Down", press_enter_after: false }),
    ("left", Shortcut { keys: "Left", press_enter_after: false }),
    ("right", Shortcut { keys: "Right", press_enter_after: false }),
    ("enter", Shortcut { keys: "Enter", press_enter_after: false }),
    ("tab", Shortcut { keys: "BTab", press_enter_after: false }),
];

const CLAUDE_SLASH_COMMANDS: &[SlashCommand] = &[
    SlashCommand { text: "/clear", send_enter: true, need_confirmation: true, show_nav: false },
    SlashCommand { text: "/config", send_enter: true, need_confirmation: false, show_nav: true },
    SlashCommand { text: "/context", send_enter: true, need_confirmation: false, show_nav: false },
    SlashCommand { text: "/compact", send_enter: true, need_confirmation: true, show_nav: false },
    SlashCommand { text: "/model", send_enter: true, need_confirmation: false, show_nav: true },
];

pub static CLAUDE_ADAPTER: AgentAdapter = AgentAdapter {
    kind: AgentKind::Claude,
    shortcuts: CLAUDE_SHORTCUTS,
    slash_commands: CLAUDE_SLASH_COMMANDS,
};

// Codex's TUI only answers to a subset of Claude's shortcuts — no
// left/right/tab entries.
const CODEX_SHORTCUTS: &[(&str, Shortcut)] = &[
    ("stop", Shortcut { keys: "Escape", press_enter_after: false }),
    ("cancel", Shortcut { keys: "C-c", press_enter_after: false }),
    ("up", Shortcut { keys: "Up", press_enter_after: false }),
    ("down", Shortcut { keys: "Down", press_enter_after: false }),
    ("enter", Shortcut { keys: "Enter", press_enter_after: false }),
];

const CODEX_SLASH_COMMANDS: &[SlashCommand] = &[
    SlashCommand { text: "/model", send_enter: true, need_confirmation: false, show_nav: true },
];

pub static CODEX_ADAPTER: AgentAdapter = AgentAdapter {
    kind: AgentKind::Codex,
    shortcuts: CODEX_SHORTCUTS,
    slash_commands: CODEX_SLASH_COMMANDS,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_shortcut_is_case_and_whitespace_insensitive() {
        let a = CLAUDE_ADAPTER.expand_shortcut("  Stop  ").unwrap();
        let b = CLAUDE_ADAPTER.expand_shortcut("stop").unwrap();
        assert_eq!(a.keys, b.keys);
        assert_eq!(a.keys, "Escape");
    }

    #[test]
    fn unknown_shortcut_is_none() {
        assert!(CLAUDE_ADAPTER.expand_shortcut("frobnicate").is_none());
    }

    #[test]
    fn codex_lacks_claude_only_shortcuts() {
        assert!(CODEX_ADAPTER.expand_shortcut("tab").is_none());
        assert!(CODEX_ADAPTER.expand_shortcut("left").is_none());
        assert!(CLAUDE_ADAPTER.expand_shortcut("tab").is_some());
    }

    #[test]
    fn from_session_id_infers_kind() {
        assert_eq!(
            AgentKind::from_session_id("agent-codex-foo"),
            AgentKind::Codex
        );
        assert_eq!(
            AgentKind::from_session_id("agent-claude-foo"),
            AgentKind::Claude
        );
        assert_eq!(AgentKind::from_session_id("unrelated"), AgentKind::Claude);
    }
}
