//! Output Log integration test against a real on-disk SQLite database,
//! exercising the full open/append/read/search/soft-delete cycle the way
//! a restart would.

use agentdeck::output_log::OutputLog;

#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("output.db");

    {
        let log = OutputLog::open(&db_path).unwrap();
        log.append("agent-claude-demo", &["hello".to_string(), "world".to_string()])
            .unwrap();
        log.append("agent-claude-demo", &["second chunk".to_string()])
            .unwrap();
    }

    let log = OutputLog::open(&db_path).unwrap();
    let page = log.read("agent-claude-demo", None, 10).unwrap();
    assert_eq!(page.chunks.len(), 2);
    assert_eq!(page.chunks[0].content, "hello\nworld");
    assert_eq!(page.chunks[1].content, "second chunk");

    let results = log.search("hello", None, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].snippet.contains("<b>hello</b>"));

    assert_eq!(
        log.session_ids().unwrap(),
        vec!["agent-claude-demo".to_string()]
    );

    log.soft_delete("agent-claude-demo").unwrap();
    assert!(log.read("agent-claude-demo", None, 10).unwrap().chunks.is_empty());
}

#[test]
fn pagination_walks_backward_with_before() {
    let dir = tempfile::tempdir().unwrap();
    let log = OutputLog::open(&dir.path().join("output.db")).unwrap();

    for i in 0..5 {
        log.append("s1", &[format!("chunk-{i}")]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let last_page = log.read("s1", None, 2).unwrap();
    assert_eq!(last_page.chunks.len(), 2);
    assert_eq!(last_page.chunks[1].content, "chunk-4");

    let before = last_page.earliest_ts.unwrap();
    let prior_page = log.read("s1", Some(before), 2).unwrap();
    assert_eq!(prior_page.chunks.len(), 2);
    assert_eq!(prior_page.chunks[1].content, "chunk-2");
}
