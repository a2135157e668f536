//! Session Orchestrator lifecycle test. Requires a real `tmux` binary on
//! PATH; skips (rather than failing) when one isn't available, matching
//! the tolerance `src/tmux/mod.rs`'s own unit tests use.

use std::sync::Arc;

use agentdeck::agents::AgentKind;
use agentdeck::config::Settings;
use agentdeck::orchestrator::Orchestrator;
use agentdeck::output_log::OutputLog;
use agentdeck::tmux::TmuxClient;

#[tokio::test]
async fn create_list_kill_round_trip() {
    let Ok(tmux) = TmuxClient::new() else {
        eprintln!("skipping: no tmux binary on PATH");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(OutputLog::open(&dir.path().join("output.db")).unwrap());
    let mut settings = Settings::default();
    settings.state_dir = dir.path().to_string_lossy().to_string();

    let orchestrator = Orchestrator::new(tmux, log, settings);

    let working_dir = dir.path().to_string_lossy().to_string();
    let created = orchestrator
        .create_session(AgentKind::Claude, &working_dir, Some("integration-test"))
        .await
        .expect("create_session should succeed when tmux is available");
    assert!(created.is_alive);

    let listed = orchestrator.list_sessions();
    assert!(listed.iter().any(|s| s.session_id == created.session_id));

    let fetched = orchestrator.get_session(&created.session_id).unwrap();
    assert_eq!(fetched.session_id, created.session_id);

    orchestrator.kill_session(&created.session_id).await.unwrap();
    let after_kill = orchestrator.get_session(&created.session_id).unwrap();
    assert!(!after_kill.is_alive);

    orchestrator.remove_dead_session(&created.session_id).unwrap();
    assert!(orchestrator.get_session(&created.session_id).is_err());
}
