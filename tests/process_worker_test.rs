//! The process worker against small shell scripts.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;
use workpool::event::WorkerEvent;
use workpool::model::{AgentIdentity, ItemId};
use workpool::worker::{InvocationContext, ProcessWorker, Worker, WorkerProfile};

fn worker_for(script: &Path, env: &[(&str, &str)]) -> ProcessWorker {
    let profile = WorkerProfile {
        name: "test-worker".to_string(),
        command: "sh".to_string(),
        args: vec![script.display().to_string()],
        prompt_path: None,
        env: env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        prompt_template: "do {issue_id} as {agent_id}".to_string(),
    };
    ProcessWorker::new(profile, None)
}

fn ctx(repo: &Path) -> InvocationContext {
    let session = Uuid::new_v4();
    let item_id = ItemId::from("bd-1");
    InvocationContext {
        agent_id: AgentIdentity::mint(&item_id, &session),
        item_id,
        session_id: session,
        repo_path: repo.to_path_buf(),
        lock_dir: repo.join("locks"),
        deadline: Duration::from_secs(10),
    }
}

fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("worker.sh");
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn streams_events_and_receives_prompt_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r#"
cat > prompt.txt
echo "$WORKPOOL_ITEM_ID $WORKPOOL_AGENT_ID $WORKPOOL_LOCK_DIR $WORKPOOL_SESSION_ID $AGENT_MODE" > env.txt
echo '{"type":"system","subtype":"init"}'
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"on %s"}]}}\n' "$WORKPOOL_ITEM_ID"
echo 'garbage'
echo '{"type":"result","result":"done","is_error":false}'
"#,
    );
    let worker = worker_for(&script, &[("AGENT_MODE", "fix")]);
    let ctx = ctx(dir.path());
    let (tx, mut rx) = mpsc::channel(16);

    worker.run(ctx.clone(), tx).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            WorkerEvent::Text {
                text: "on bd-1".to_string()
            },
            WorkerEvent::Result {
                result: "done".to_string(),
                is_error: false
            },
        ]
    );

    let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
    assert_eq!(prompt, format!("do bd-1 as {}", ctx.agent_id));
    assert_eq!(worker.prompt(&ctx).as_deref(), Some(prompt.as_str()));

    let env = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
    assert_eq!(
        env.trim(),
        format!(
            "bd-1 {} {} {} fix",
            ctx.agent_id,
            ctx.lock_dir.display(),
            ctx.session_id
        )
    );
}

#[tokio::test]
async fn nonzero_exit_reports_status_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cat > /dev/null\necho 'model overloaded' >&2\nexit 3\n");
    let worker = worker_for(&script, &[]);
    let (tx, _rx) = mpsc::channel(16);

    let err = worker.run(ctx(dir.path()), tx).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "test-worker exited with status 3: model overloaded"
    );
}

#[tokio::test]
async fn missing_command_fails_to_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let mut profile = WorkerProfile::default();
    profile.command = dir.path().join("no-such-agent").display().to_string();
    let worker = ProcessWorker::new(profile, None);
    let (tx, _rx) = mpsc::channel(16);

    let err = worker.run(ctx(dir.path()), tx).await.unwrap_err();
    assert!(err.to_string().starts_with("failed to spawn claude"), "{err}");
}

#[tokio::test]
async fn dropping_the_run_kills_the_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cat > /dev/null\n(sleep 1; touch late.txt) &\nsleep 5\n",
    );
    let worker = worker_for(&script, &[]);
    let (tx, _rx) = mpsc::channel(16);

    let run = worker.run(ctx(dir.path()), tx);
    let timed = tokio::time::timeout(Duration::from_millis(300), run).await;
    assert!(timed.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!dir.path().join("late.txt").exists());
}

#[tokio::test]
async fn exit_is_not_held_up_by_background_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r#"
cat > /dev/null
echo '{"type":"result","result":"done","is_error":false}'
(sleep 3) &
exit 0
"#,
    );
    let worker = worker_for(&script, &[]);
    let (tx, mut rx) = mpsc::channel(16);

    let started = Instant::now();
    let run = worker.run(ctx(dir.path()), tx);
    let timed = tokio::time::timeout(Duration::from_secs(2), run).await;

    timed.expect("run waited for the background job").unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        rx.recv().await,
        Some(WorkerEvent::Result {
            result: "done".to_string(),
            is_error: false
        })
    );
}
