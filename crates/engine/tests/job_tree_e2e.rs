//! End-to-end coverage driving the engine the same way a real script would:
//! fixture shell scripts that speak the control-pipe wire protocol by hand
//! (`exec`-inherited fds 3/4, no client library involved) inside a
//! `tempfile`-materialized job-tree directory.

use std::fs;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use jobtree_engine::{start_engine, EngineConfig, JobExit, ManagerEvent};

fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture script");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

async fn with_timeout<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("test exceeded its 10s safety timeout")
}

fn config(tmp: &TempDir) -> EngineConfig {
    EngineConfig::new(tmp.path().to_path_buf())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_entry_with_no_children_runs_to_completion() {
    let tmp = TempDir::new().unwrap();
    write_script(tmp.path(), "entry", "#!/bin/sh\nexit 0\n");

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    assert_eq!(engine.entry_ident(), "entry");

    let exit = with_timeout(engine.run_until_done()).await;
    assert_eq!(exit, Some(JobExit::Code(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entry_script_exit_code_is_reported() {
    let tmp = TempDir::new().unwrap();
    write_script(tmp.path(), "entry", "#!/bin/sh\nexit 7\n");

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    let exit = with_timeout(engine.run_until_done()).await;
    assert_eq!(exit, Some(JobExit::Code(7)));
}

/// Fan-out four children into a group capped at `-m 2`, fan back in with a
/// single `waitjobs`, and confirm at most two of them were ever `RUNNING`
/// concurrently (tracked via `ManagerEvent`, not by polling).
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_cap_limits_concurrent_children() {
    let tmp = TempDir::new().unwrap();
    write_script(
        tmp.path(),
        "entry",
        r#"#!/bin/sh
idents=""
i=0
while [ "$i" -lt 4 ]; do
  echo "enqueue -g fanout -m 2 child.sh" >&3
  read -r reply <&4
  ident=$(echo "$reply" | cut -d' ' -f2-)
  idents="$idents $ident"
  i=$((i + 1))
done

echo "waitjobs$idents" >&3
read -r _ <&4
exit 0
"#,
    );
    write_script(tmp.path(), "child.sh", "#!/bin/sh\nsleep 0.2\nexit 0\n");

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    let mut events = engine.events();

    let active = Arc::new(AtomicI64::new(0));
    let max_active = Arc::new(AtomicI64::new(0));
    let active_task = active.clone();
    let max_active_task = max_active.clone();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ManagerEvent::JobStarted { ident }) if ident.starts_with("child.sh/") => {
                    let now = active_task.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active_task.fetch_max(now, Ordering::SeqCst);
                }
                Ok(ManagerEvent::JobFinished { ident, .. }) if ident.starts_with("child.sh/") => {
                    active_task.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    let exit = with_timeout(engine.run_until_done()).await;
    assert_eq!(exit, Some(JobExit::Code(0)));
    watcher.abort();

    let observed_max = max_active.load(Ordering::SeqCst);
    assert!(observed_max >= 1, "expected at least one child to run");
    assert!(observed_max <= 2, "group cap -m 2 exceeded: saw {observed_max} concurrent children");
}

/// `sendmsg`/`recvmsg`/`waitrecv`: the entry job delivers a message to a
/// child, waits for delivery, then the child writes the payload it received
/// to a file the test inspects after the tree finishes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_are_delivered_to_the_named_recipient() {
    let tmp = TempDir::new().unwrap();
    write_script(
        tmp.path(),
        "entry",
        r#"#!/bin/sh
echo "enqueue child.sh" >&3
read -r reply <&4
child=$(echo "$reply" | cut -d' ' -f2)

msg="hello-world"
len=${#msg}
printf 'sendmsg %s %d\n%s\n' "$child" "$len" "$msg" >&3
read -r reply <&4
msgid=$(echo "$reply" | cut -d' ' -f2)

echo "waitrecv -t 5 $msgid" >&3
read -r _ <&4

echo "waitjobs $child" >&3
read -r _ <&4
exit 0
"#,
    );
    write_script(
        tmp.path(),
        "child.sh",
        r#"#!/bin/sh
echo "recvmsg -t 5" >&3
read -r header <&4
len=$(echo "$header" | cut -d' ' -f2)
body=$(head -c "$len" <&4)
read -r _ <&4
dir=$(dirname "$0")
printf '%s' "$body" > "$dir/received.txt"
exit 0
"#,
    );

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    let exit = with_timeout(engine.run_until_done()).await;
    assert_eq!(exit, Some(JobExit::Code(0)));

    let received = fs::read_to_string(tmp.path().join("received.txt")).expect("received.txt written");
    assert_eq!(received, "hello-world");
}

/// `waitjobs -t` on a job that outlives the timeout reports `T`; a
/// subsequent `killjobs` terminates it and reports `N` (signaled, no exit
/// code).
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waitjobs_times_out_then_killjobs_terminates() {
    let tmp = TempDir::new().unwrap();
    write_script(
        tmp.path(),
        "entry",
        r#"#!/bin/sh
echo "enqueue sleepy.sh" >&3
read -r reply <&4
child=$(echo "$reply" | cut -d' ' -f2)
dir=$(dirname "$0")

echo "waitjobs -t 0.2 $child" >&3
read -r l1 <&4
printf '%s\n' "$l1" > "$dir/timeout_result.txt"

echo "killjobs -t 5 $child" >&3
read -r l2 <&4
printf '%s\n' "$l2" > "$dir/kill_result.txt"
exit 0
"#,
    );
    write_script(tmp.path(), "sleepy.sh", "#!/bin/sh\nsleep 30\n");

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    let exit = with_timeout(engine.run_until_done()).await;
    assert_eq!(exit, Some(JobExit::Code(0)));

    let timeout_result = fs::read_to_string(tmp.path().join("timeout_result.txt")).unwrap();
    assert!(
        timeout_result.trim_end().ends_with(" T"),
        "expected a timeout token, got {timeout_result:?}"
    );

    let kill_result = fs::read_to_string(tmp.path().join("kill_result.txt")).unwrap();
    assert!(
        kill_result.trim_end().ends_with(" N"),
        "expected a signaled token, got {kill_result:?}"
    );
}

/// `repeat -i 1s` keeps firing `max_instances=1` jobs until the trigger
/// source is shut down; the entry job returns immediately after
/// registering it, so the manager stays non-idle (and `run_until_done`
/// would never resolve) until `shutdown` tears the scheduler down.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interval_trigger_fires_repeatedly_until_shutdown() {
    let tmp = TempDir::new().unwrap();
    write_script(
        tmp.path(),
        "entry",
        r#"#!/bin/sh
echo "repeat -i 1s tick.sh" >&3
read -r _ <&4
exit 0
"#,
    );
    write_script(tmp.path(), "tick.sh", "#!/bin/sh\nexit 0\n");

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    let mut events = engine.events();

    let fired = Arc::new(AtomicI64::new(0));
    let fired_task = fired.clone();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ManagerEvent::JobStarted { ident }) if ident.starts_with("tick.sh/") => {
                    fired_task.fetch_add(1, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    watcher.abort();
    engine.kill_all();
    engine.shutdown();

    let count = fired.load(Ordering::SeqCst);
    assert!(
        (2..=4).contains(&count),
        "expected roughly 2-3 firings over 2.5s at a 1s interval, saw {count}"
    );
}

/// A generous `-c` cap never blocks admission under ordinary CI load; this
/// exercises the CPU-gated admission path end to end without depending on
/// the host actually being under load.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cpu_gated_group_admits_under_a_generous_cap() {
    let tmp = TempDir::new().unwrap();
    write_script(
        tmp.path(),
        "entry",
        r#"#!/bin/sh
echo "enqueue -g cpugroup -c 100.0 child.sh" >&3
read -r reply <&4
child=$(echo "$reply" | cut -d' ' -f2)
echo "waitjobs $child" >&3
read -r _ <&4
exit 0
"#,
    );
    write_script(tmp.path(), "child.sh", "#!/bin/sh\nexit 0\n");

    let engine = start_engine(config(&tmp)).await.expect("start_engine");
    let exit = with_timeout(engine.run_until_done()).await;
    assert_eq!(exit, Some(JobExit::Code(0)));
}
