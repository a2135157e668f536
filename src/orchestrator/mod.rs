//! Session Orchestrator (C5): the only component that knows both "what a
//! session is" (public, persisted) and "what a session is doing right now"
//! (private, ephemeral). The two halves are deliberately never linked by
//! reference — `sessions` and `runtimes` are separate maps keyed by the
//! same session id, so a crash or restart can always reconstruct the
//! former from the Output Log and tmux's own session list without needing
//! the latter at all.

mod slug;

pub use slug::slugify;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentAdapter, AgentKind};
use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::output_log::OutputLog;
use crate::tmux::TmuxClient;

/// Public, persisted facts about a session. Cheap to clone; this is what
/// crosses the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub agent_kind: AgentKind,
    pub working_dir: String,
    pub title: String,
    pub is_alive: bool,
    pub ended_at: Option<f64>,
}

/// Ephemeral, in-memory-only state. Never serialized, never survives a
/// restart — rebuilt by [`Orchestrator::rehydrate`] instead.
struct SessionRuntime {
    last_scrollback_tail: Vec<String>,
    last_history_size: usize,
    /// Most recent visible-pane capture, for [`Orchestrator::capture_output`]'s
    /// `changed` flag.
    last_visible_pane: String,
    /// Serializes keystroke dispatch so two concurrent requests against
    /// the same session can't interleave their tmux `send-keys` calls.
    /// Held as an `Arc` so callers can clone it out of the map and lock
    /// across an `.await` without pinning a `DashMap` shard guard.
    send_lock: Arc<AsyncMutex<()>>,
}

impl SessionRuntime {
    fn fresh() -> Self {
        Self {
            last_scrollback_tail: Vec::new(),
            last_history_size: 0,
            last_visible_pane: String::new(),
            send_lock: Arc::new(AsyncMutex::new(())),
        }
    }
}

pub struct Orchestrator {
    tmux: TmuxClient,
    log: Arc<OutputLog>,
    settings: Settings,
    sessions: DashMap<String, SessionInfo>,
    runtimes: DashMap<String, SessionRuntime>,
    recent_dirs: AsyncMutex<Vec<String>>,
}

const ENTER_DELAY: Duration = Duration::from_millis(150);
const ARROW_STEP_DELAY: Duration = Duration::from_millis(50);
const FREEFORM_PREDELAY: Duration = Duration::from_millis(200);

impl Orchestrator {
    pub fn new(tmux: TmuxClient, log: Arc<OutputLog>, settings: Settings) -> Self {
        Self {
            tmux,
            log,
            settings,
            sessions: DashMap::new(),
            runtimes: DashMap::new(),
            recent_dirs: AsyncMutex::new(Vec::new()),
        }
    }

    /// Rebuild `sessions` at startup: enumerate live `agent-*` tmux
    /// sessions (these become LIVE entries with a fresh runtime), then
    /// union in every session id the Output Log has ever seen that isn't
    /// among them (these become dead, history-only entries).
    pub async fn rehydrate(&self) -> anyhow::Result<()> {
        let live_ids = self
            .tmux
            .list_sessions()
            .unwrap_or_default()
            .into_iter()
            .map(|session| session.name)
            .filter(|name| name.starts_with("agent-"))
            .collect::<Vec<_>>();

        for session_id in &live_ids {
            let agent_kind = AgentKind::from_session_id(session_id);
            let working_dir = self
                .tmux
                .get_session_path(session_id)
                .unwrap_or_else(|_| self.settings.default_working_dir.clone());
            self.sessions.insert(
                session_id.clone(),
                SessionInfo {
                    session_id: session_id.clone(),
                    agent_kind,
                    working_dir,
                    title: session_id.clone(),
                    is_alive: true,
                    ended_at: None,
                },
            );
            self.runtimes
                .insert(session_id.clone(), SessionRuntime::fresh());
        }

        let live_set: std::collections::HashSet<&String> = live_ids.iter().collect();
        for session_id in self.log.session_ids()? {
            if live_set.contains(&session_id) {
                continue;
            }
            self.sessions.entry(session_id.clone()).or_insert(SessionInfo {
                session_id: session_id.clone(),
                agent_kind: AgentKind::from_session_id(&session_id),
                working_dir: self.settings.default_working_dir.clone(),
                title: session_id.clone(),
                is_alive: false,
                ended_at: self.log.latest_ts(&session_id)?,
            });
        }

        info!(live = live_ids.len(), "rehydrated sessions");
        Ok(())
    }

    /// Create and launch a new agent session, returning its assigned id.
    pub async fn create_session(
        &self,
        agent_kind: AgentKind,
        working_dir: &str,
        title: Option<&str>,
    ) -> CoreResult<SessionInfo> {
        if !std::path::Path::new(working_dir).is_dir() {
            return Err(CoreError::BadInput(format!(
                "working_dir '{working_dir}' does not exist or is not a directory"
            )));
        }

        let existing_ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let existing_dirs: Vec<String> = self
            .sessions
            .iter()
            .map(|e| e.value().working_dir.clone())
            .collect();
        let session_id = slugify(
            title.unwrap_or(working_dir),
            agent_kind,
            working_dir,
            &existing_ids,
            &existing_dirs,
        );

        let adapter = agent_kind.adapter();
        let command = adapter.launch_command(working_dir);

        self.tmux
            .create_session_with_command(&session_id, working_dir, &command)
            .map_err(|e| CoreError::Internal(e.into()))?;

        let info = SessionInfo {
            session_id: session_id.clone(),
            agent_kind,
            working_dir: working_dir.to_string(),
            title: title.unwrap_or(&session_id).to_string(),
            is_alive: true,
            ended_at: None,
        };
        self.sessions.insert(session_id.clone(), info.clone());
        self.runtimes
            .insert(session_id.clone(), SessionRuntime::fresh());
        self.record_recent_dir(working_dir).await;

        Ok(info)
    }

    /// Spin up a fresh session seeded with a description of `session_id`'s
    /// problem plus its current transcript, for asynchronous analysis.
    /// Spawns a background task that polls the new session until it
    /// reaches [`crate::detector::UiState::Prompt`] (or exhausts its
    /// attempt budget) before sending the composed prompt, since the new
    /// agent needs time to finish booting.
    pub async fn debug_session(
        self: Arc<Self>,
        session_id: &str,
        description: &str,
    ) -> CoreResult<SessionInfo> {
        let original = self.get_session(session_id)?;
        let (transcript, _) = self.capture_output(session_id)?;

        let new_session = self
            .create_session(AgentKind::Claude, &original.working_dir, Some("debug"))
            .await?;

        let this = self.clone();
        let new_id = new_session.session_id.clone();
        let description = description.to_string();
        let agent_kind = original.agent_kind;
        tokio::spawn(async move {
            this.send_debug_prompt(&new_id, &description, &transcript, agent_kind)
                .await;
        });

        Ok(new_session)
    }

    /// Background half of [`Self::debug_session`]: poll until PROMPT, then
    /// send the composed analysis request. Swallows its own errors — a
    /// debug session that never settles, or whose send fails, must not
    /// take down anything else.
    async fn send_debug_prompt(
        &self,
        session_id: &str,
        description: &str,
        transcript: &str,
        agent_kind: AgentKind,
    ) {
        const ATTEMPTS: u32 = 30;
        const POLL_INTERVAL: Duration = Duration::from_secs(2);

        for _ in 0..ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
            let output = match self.capture_output(session_id) {
                Ok((content, _)) => content,
                Err(_) => return,
            };
            if crate::detector::parse(&output).state == crate::detector::UiState::Prompt {
                let message = format!(
                    "first read docs/architecture.md to understand the application architecture.\n\n\
                     User using {} reported this issue:\n{description}\n\n\
                     just analyze the root cause and do not change the code just yet. \
                     below is the tmux capture :\n\n<tmux-capture>\n{transcript}\n</tmux-capture>",
                    agent_kind.as_str(),
                );
                if let Err(err) = self.send_input(session_id, &message).await {
                    warn!(session_id, error = %err, "debug prompt send failed");
                }
                return;
            }
        }
        warn!(session_id, "debug_prompt_timeout");
    }

    pub fn get_session(&self, session_id: &str) -> CoreResult<SessionInfo> {
        let mut info = self
            .sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))?;
        if info.is_alive {
            info.is_alive = self.tmux.is_alive(session_id).unwrap_or(false);
            if !info.is_alive {
                self.mark_ended(session_id);
                info = self.sessions.get(session_id).unwrap().value().clone();
            }
        }
        Ok(info)
    }

    /// List all known sessions, re-checking liveness only for entries
    /// still believed LIVE (dead sessions never come back, so there is no
    /// reason to keep shelling out for them).
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.get_session(id).ok())
            .collect()
    }

    fn adapter_for(&self, session_id: &str) -> &'static AgentAdapter {
        self.sessions
            .get(session_id)
            .map(|e| e.value().agent_kind)
            .unwrap_or(AgentKind::Claude)
            .adapter()
    }

    /// Dispatch free text to a session: shortcut names expand through the
    /// agent adapter, everything else goes in literally followed by a
    /// delayed Enter.
    pub async fn send_input(&self, session_id: &str, text: &str) -> CoreResult<()> {
        self.ensure_alive(session_id)?;
        let send_lock = self
            .runtimes
            .get(session_id)
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))?
            .send_lock
            .clone();
        let _guard = send_lock.lock().await;

        let adapter = self.adapter_for(session_id);
        if let Some(shortcut) = adapter.expand_shortcut(text) {
            self.tmux
                .send_keys(session_id, shortcut.keys, false)
                .map_err(|e| CoreError::Internal(e.into()))?;
            if shortcut.press_enter_after {
                tokio::time::sleep(ENTER_DELAY).await;
                self.tmux
                    .send_keys(session_id, "Enter", false)
                    .map_err(|e| CoreError::Internal(e.into()))?;
            }
            return Ok(());
        }

        self.tmux
            .send_keys(session_id, text, true)
            .map_err(|e| CoreError::Internal(e.into()))?;
        tokio::time::sleep(ENTER_DELAY).await;
        self.tmux
            .send_keys(session_id, "Enter", false)
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Select an option in a numbered prompt. Captures and parses the pane
    /// itself to find `item_number` and work out how far the on-screen
    /// cursor has to move: arrow-navigable lists (`›`/`❯` marker) get
    /// stepped with Up/Down then Enter, non-navigable lists get the number
    /// typed then Enter. If `freeform_text` is given it is sent as an
    /// additional line after that, once the prompt box has had time to
    /// redraw.
    pub async fn send_selection(
        &self,
        session_id: &str,
        item_number: u32,
        freeform_text: Option<&str>,
    ) -> CoreResult<()> {
        self.ensure_alive(session_id)?;
        let send_lock = self
            .runtimes
            .get(session_id)
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))?
            .send_lock
            .clone();
        let _guard = send_lock.lock().await;

        let (content, _) = self.capture_output(session_id)?;
        let parsed = crate::detector::parse(&content);

        let target_index = parsed
            .items
            .iter()
            .position(|item| item.number == item_number)
            .ok_or_else(|| {
                CoreError::BadInput(format!("item {item_number} not found in selection"))
            })?;

        if parsed.arrow_navigable {
            let delta = target_index as i64 - parsed.selected_index as i64;
            let key = if delta < 0 { "Up" } else { "Down" };
            for i in 0..delta.unsigned_abs() {
                if i > 0 {
                    tokio::time::sleep(ARROW_STEP_DELAY).await;
                }
                self.tmux
                    .send_keys(session_id, key, false)
                    .map_err(|e| CoreError::Internal(e.into()))?;
            }
            tokio::time::sleep(ENTER_DELAY).await;
            self.tmux
                .send_keys(session_id, "Enter", false)
                .map_err(|e| CoreError::Internal(e.into()))?;
        } else {
            self.tmux
                .send_keys(session_id, &item_number.to_string(), true)
                .map_err(|e| CoreError::Internal(e.into()))?;
            tokio::time::sleep(ENTER_DELAY).await;
            self.tmux
                .send_keys(session_id, "Enter", false)
                .map_err(|e| CoreError::Internal(e.into()))?;
        }

        if let Some(text) = freeform_text {
            tokio::time::sleep(FREEFORM_PREDELAY).await;
            self.tmux
                .send_keys(session_id, text, true)
                .map_err(|e| CoreError::Internal(e.into()))?;
            tokio::time::sleep(ENTER_DELAY).await;
            self.tmux
                .send_keys(session_id, "Enter", false)
                .map_err(|e| CoreError::Internal(e.into()))?;
        }
        Ok(())
    }

    /// The current visible-pane text, diffed against the last capture for
    /// this session so the HTTP shim can short-circuit unchanged polls.
    pub fn capture_output(&self, session_id: &str) -> CoreResult<(String, bool)> {
        self.ensure_known(session_id)?;
        let content = self
            .tmux
            .capture_pane(session_id, None)
            .map_err(|e| CoreError::Internal(e.into()))?;

        let mut runtime = self
            .runtimes
            .get_mut(session_id)
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))?;
        let changed = content != runtime.last_visible_pane;
        runtime.last_visible_pane = content.clone();
        Ok((content, changed))
    }

    pub async fn kill_session(&self, session_id: &str) -> CoreResult<()> {
        self.ensure_known(session_id)?;
        let _ = self.tmux.kill_session(session_id);
        self.mark_ended(session_id);
        Ok(())
    }

    /// Remove a session's history entirely: soft-delete its Output Log
    /// chunks and drop it from the in-memory maps.
    pub fn remove_dead_session(&self, session_id: &str) -> CoreResult<()> {
        self.ensure_known(session_id)?;
        self.log
            .soft_delete(session_id)
            .map_err(CoreError::Internal)?;
        self.sessions.remove(session_id);
        self.runtimes.remove(session_id);
        Ok(())
    }

    /// One tick of the background capture loop: for every LIVE session,
    /// compare history size against the last tick, pull any new lines via
    /// the splice-point overlap algorithm, and append them to the Output
    /// Log. Errors on one session are logged and skipped, never allowed
    /// to stall the others.
    pub fn tick(&self) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_alive)
            .map(|e| e.key().clone())
            .collect();

        for session_id in ids {
            if let Err(err) = self.tick_one(&session_id) {
                warn!(session_id, error = %err, "capture tick failed");
            }
        }
    }

    fn tick_one(&self, session_id: &str) -> anyhow::Result<()> {
        let tail = self.settings.capture_tail_lines;
        let (alive, history_size, scrollback) = tokio::task::block_in_place(|| {
            let alive = self.tmux.is_alive(session_id).unwrap_or(false)
                && !self.tmux.is_process_dead(session_id).unwrap_or(true);
            let history_size = self.tmux.get_history_size(session_id).unwrap_or(0);
            let scrollback = self
                .tmux
                .capture_scrollback(session_id, Some(tail))
                .unwrap_or_default();
            (alive, history_size, scrollback)
        });

        // `capture_scrollback` returns history plus the live visible pane;
        // only the first `history_size` lines are actual scrollback, so the
        // visible pane must be excluded before it's treated as new output.
        let mut next_lines = scrollback;
        next_lines.truncate(history_size.min(next_lines.len()));

        let mut runtime = self
            .runtimes
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("no runtime for {session_id}"))?;

        let new_lines = if history_size != runtime.last_history_size
            || next_lines != runtime.last_scrollback_tail
        {
            splice_new_lines(&runtime.last_scrollback_tail, &next_lines)
        } else {
            Vec::new()
        };

        if !new_lines.is_empty() {
            self.log.append(session_id, &new_lines)?;
        }

        runtime.last_history_size = history_size;
        runtime.last_scrollback_tail = next_lines;
        drop(runtime);

        if !alive {
            debug!(session_id, "session process ended, final capture taken");
            self.mark_ended(session_id);
        }
        Ok(())
    }

    fn mark_ended(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if entry.is_alive {
                entry.is_alive = false;
                entry.ended_at = Some(now_secs());
            }
        }
    }

    fn ensure_known(&self, session_id: &str) -> CoreResult<()> {
        if self.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(CoreError::NotFound(session_id.to_string()))
        }
    }

    fn ensure_alive(&self, session_id: &str) -> CoreResult<()> {
        match self.sessions.get(session_id) {
            Some(entry) if entry.is_alive => Ok(()),
            Some(_) => Err(CoreError::Conflict(format!(
                "session '{session_id}' has ended"
            ))),
            None => Err(CoreError::NotFound(session_id.to_string())),
        }
    }

    /// Record `dir` at the front of the recent-directories list (deduping
    /// and capping at 10), then persist it to disk immediately — this is
    /// a small, infrequent write and callers expect it to survive a
    /// crash.
    pub async fn record_recent_dir(&self, dir: &str) {
        let mut dirs = self.recent_dirs.lock().await;
        dirs.retain(|d| d != dir);
        dirs.insert(0, dir.to_string());
        dirs.truncate(10);
        if let Err(err) = self.persist_recent_dirs(&dirs) {
            error!(error = %err, "failed to persist recent dirs");
        }
    }

    pub async fn recent_dirs(&self) -> Vec<String> {
        self.recent_dirs.lock().await.clone()
    }

    pub async fn load_recent_dirs(&self) -> anyhow::Result<()> {
        let path = self.settings.recent_dirs_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let mut dirs = self.recent_dirs.lock().await;
        *dirs = raw.lines().map(|l| l.to_string()).collect();
        Ok(())
    }

    fn persist_recent_dirs(&self, dirs: &[String]) -> anyhow::Result<()> {
        let path = self.settings.recent_dirs_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, dirs.join("\n"))?;
        Ok(())
    }

    pub fn output_log(&self) -> &OutputLog {
        &self.log
    }

    pub fn slash_commands(&self, agent_kind: AgentKind) -> &'static [crate::agents::SlashCommand] {
        agent_kind.adapter().slash_commands
    }
}

/// Find where `next` picks up from `prev` by fingerprinting the last
/// `K = min(5, prev.len())` lines of `prev` and scanning forward in
/// `next` for a matching contiguous run. Falls back to treating the
/// whole of `next` as new if no such run is found (the pane was cleared,
/// scrolled past the window, or this is the first capture).
fn splice_new_lines(prev: &[String], next: &[String]) -> Vec<String> {
    if prev.is_empty() {
        return next.to_vec();
    }
    let k = prev.len().min(5);
    let fingerprint = &prev[prev.len() - k..];

    for start in 0..next.len() {
        if start + k > next.len() {
            break;
        }
        if &next[start..start + k] == fingerprint {
            return next[start + k..].to_vec();
        }
    }
    next.to_vec()
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_finds_overlap_and_returns_only_new_tail() {
        let prev = vec!["a", "b", "c"].into_iter().map(String::from).collect::<Vec<_>>();
        let next = vec!["a", "b", "c", "d", "e"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert_eq!(splice_new_lines(&prev, &next), vec!["d".to_string(), "e".to_string()]);
    }

    #[test]
    fn splice_falls_back_to_everything_when_no_overlap() {
        let prev = vec!["x".to_string(), "y".to_string()];
        let next = vec!["p".to_string(), "q".to_string()];
        assert_eq!(splice_new_lines(&prev, &next), next);
    }

    #[test]
    fn splice_with_empty_prev_returns_everything() {
        let next = vec!["a".to_string()];
        assert_eq!(splice_new_lines(&[], &next), next);
    }
}
