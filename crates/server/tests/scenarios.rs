//! End-to-end scenarios over the tool layer: cwd persistence and isolation,
//! background task lifecycle across session close, timeout behavior and
//! path scoping.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boris::config::ServerConfig;
use boris::error::ErrorCode;
use boris::registry::SessionRegistry;
use boris::resolver::Resolver;
use boris::session::Session;
use boris_server::tools::{bash, view};
use tempfile::TempDir;

fn config(dir: &TempDir) -> ServerConfig {
    ServerConfig::new(dir.path(), Resolver::unrestricted()).unwrap()
}

fn session(config: &ServerConfig) -> Arc<Session> {
    Arc::new(Session::new(config.workdir.clone(), config.max_tasks))
}

#[tokio::test]
async fn cwd_persists_within_a_session() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let sess = session(&config);
    let sub = dir.path().join("w1");
    std::fs::create_dir(&sub).unwrap();
    let sub = sub.canonicalize().unwrap();

    bash::run_foreground(&config, &sess, &format!("cd {}", sub.display()), 10_000, None)
        .await
        .unwrap();
    let out = bash::run_foreground(&config, &sess, "pwd", 10_000, None)
        .await
        .unwrap();
    assert!(out.contains(&format!("stdout:\n{}\n", sub.display())));
    assert_eq!(sess.cwd(), sub);
}

#[tokio::test]
async fn cwd_is_isolated_across_sessions() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let a = session(&config);
    let b = session(&config);

    bash::run_foreground(&config, &a, "cd /", 10_000, None)
        .await
        .unwrap();
    let out = bash::run_foreground(&config, &b, "pwd", 10_000, None)
        .await
        .unwrap();
    assert!(out.contains(&format!("stdout:\n{}\n", config.workdir.display())));
    assert_eq!(b.cwd(), config.workdir);

    // B cannot see A's background tasks.
    let started = bash::run_background(&config, &a, "sleep 30").await.unwrap();
    let id = started.strip_prefix("task_id: ").unwrap().lines().next().unwrap();
    let fault = bash::task_output(&config, &b, id).unwrap_err();
    assert_eq!(fault.code, ErrorCode::BashTaskNotFound);
    a.close().await;
}

#[tokio::test]
async fn background_task_survives_the_call_but_dies_with_the_session() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let registry = SessionRegistry::new();
    let sess = session(&config);
    registry.register("client-a", sess.clone());

    let pid_file = dir.path().join("pid");
    let started = bash::run_background(
        &config,
        &sess,
        &format!("echo $$ > {} && sleep 300", pid_file.display()),
    )
    .await
    .unwrap();
    assert!(started.contains("Command started in background."));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !pid_file.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(Path::new(&format!("/proc/{pid}")).exists());

    // Transport reports the session closed.
    let start = Instant::now();
    registry.close_and_remove("client-a").await;
    assert!(start.elapsed() < Duration::from_secs(6));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!Path::new(&format!("/proc/{pid}")).exists());
    assert_eq!(sess.task_count(), 0);
}

#[tokio::test]
async fn timeout_banner_and_cwd_preservation() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let sess = session(&config);
    let before = sess.cwd();

    let out = bash::run_foreground(&config, &sess, "sleep 300", 1_000, None)
        .await
        .unwrap();
    assert!(out.starts_with("Command timed out after 1000ms\n\n"));
    let exit_line = out.lines().find(|l| l.starts_with("exit_code: ")).unwrap();
    assert_ne!(exit_line, "exit_code: 0");
    assert_eq!(sess.cwd(), before);
}

#[tokio::test]
async fn path_scoping_rejects_outside_and_denied_paths() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let resolver = Resolver::new(vec![root.clone()], &["**/.env".to_string()]).unwrap();
    let mut config = ServerConfig::new(&root, resolver).unwrap();
    config.view_before_edit = false;
    let sess = session(&config);

    std::fs::write(root.join("ok.txt"), "fine\n").unwrap();
    std::fs::write(root.join(".env"), "SECRET=1\n").unwrap();

    let fault = view::view(&config, &sess, "/etc/hostname", None)
        .await
        .unwrap_err();
    assert_eq!(fault.code, ErrorCode::AccessDenied);

    let fault = view::view(&config, &sess, ".env", None).await.unwrap_err();
    assert_eq!(fault.code, ErrorCode::AccessDenied);

    let out = view::view(&config, &sess, "ok.txt", None).await.unwrap();
    assert!(out.contains("00001| fine"));
}

#[tokio::test]
async fn oversized_foreground_output_is_truncated() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let sess = session(&config);

    // seq 1 20000 emits well over 30000 characters.
    let out = bash::run_foreground(&config, &sess, "seq 1 20000", 30_000, None)
        .await
        .unwrap();
    assert!(out.contains("[Truncated: output was "));
    assert!(out.contains("showing first 30000]"));
    let body = out.split("stdout:\n").nth(1).unwrap();
    let kept = body.split("\n\n[Truncated").next().unwrap();
    assert_eq!(kept.chars().count(), 30_000);
}

#[tokio::test]
async fn oversized_background_output_is_truncated_on_retrieval() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let sess = session(&config);

    let started = bash::run_background(&config, &sess, "seq 1 20000").await.unwrap();
    let id = started.strip_prefix("task_id: ").unwrap().lines().next().unwrap();
    let task = sess.get_task(id).unwrap();
    tokio::time::timeout(Duration::from_secs(10), task.done_token().cancelled())
        .await
        .unwrap();

    let report = bash::task_output(&config, &sess, id).unwrap();
    assert!(report.contains("status: completed"));
    assert!(report.contains("[Truncated: output was "));
}

#[tokio::test]
async fn completed_task_is_single_read() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let sess = session(&config);

    let started = bash::run_background(&config, &sess, "echo finished").await.unwrap();
    let id = started.strip_prefix("task_id: ").unwrap().lines().next().unwrap();
    assert_eq!(id.len(), 16);

    let task = sess.get_task(id).unwrap();
    tokio::time::timeout(Duration::from_secs(10), task.done_token().cancelled())
        .await
        .unwrap();

    let report = bash::task_output(&config, &sess, id).unwrap();
    assert!(report.contains("status: completed"));
    assert!(report.contains("finished"));

    let fault = bash::task_output(&config, &sess, id).unwrap_err();
    assert_eq!(fault.code, ErrorCode::BashTaskNotFound);
}
