//! End-to-end supervision scenarios: several processes launched, wired,
//! waited on together, and torn down.

use anyhow::Result;
use std::io::{Read, Write};
use subproc::{HandleError, Spawner, Stdio, wait_all};

#[test]
fn batch_reports_each_status_and_the_failure() -> Result<()> {
    let mut first = Spawner::new("true").spawn()?;
    let mut second = Spawner::new("sh").arg("-c").arg("exit 7").spawn()?;
    let mut third = Spawner::new("true").spawn()?;

    let mut statuses = Vec::new();
    let err = wait_all(
        &mut [&mut first, &mut second, &mut third],
        true,
        Some(&mut statuses),
    )
    .unwrap_err();

    // Individual statuses are recorded, and the aggregate still fails.
    assert_eq!(statuses, vec![0, 7, 0]);
    assert!(matches!(err, HandleError::Failed { status: 7, .. }));

    // Every handle has its own cached record afterwards.
    assert_eq!(first.exit_code()?, 0);
    assert_eq!(second.exit_code()?, 7);
    assert_eq!(third.exit_code()?, 0);
    Ok(())
}

#[test]
fn bytes_cross_the_pipes_intact() -> Result<()> {
    let payload: Vec<u8> = (0..=255).collect();

    let mut handle = Spawner::new("cat")
        .stdin(Stdio::Piped)
        .stdout(Stdio::Piped)
        .spawn()?;

    let mut feed = handle.stdin_stream(false)?;
    feed.write_all(&payload)?;
    drop(feed);

    let mut out = handle.stdout_stream(false)?;
    let mut got = Vec::new();
    let _ = out.read_to_end(&mut got)?;
    assert_eq!(got, payload);
    assert_eq!(handle.wait(true)?, 0);
    Ok(())
}

#[test]
fn stderr_is_captured_separately() -> Result<()> {
    let mut handle = Spawner::new("sh")
        .arg("-c")
        .arg("echo out; echo err >&2")
        .stdout(Stdio::Piped)
        .stderr(Stdio::Piped)
        .spawn()?;

    let mut out = String::new();
    let _ = handle.stdout_stream(false)?.read_to_string(&mut out)?;
    let mut err = String::new();
    let _ = handle.stderr_stream(false)?.read_to_string(&mut err)?;

    assert_eq!(out, "out\n");
    assert_eq!(err, "err\n");
    assert_eq!(handle.wait(true)?, 0);
    Ok(())
}

#[test]
fn poll_then_wait() -> Result<()> {
    let mut handle = Spawner::new("sleep").arg("0.2").spawn()?;
    assert!(matches!(handle.wait(false), Err(HandleError::StillRunning)));
    assert!(!handle.is_terminated());
    assert_eq!(handle.wait(true)?, 0);
    assert!(handle.is_terminated());
    Ok(())
}

#[test]
fn kill_then_wait_observes_termination() -> Result<()> {
    let mut handle = Spawner::new("sleep").arg("30").spawn()?;
    handle.kill(3)?;
    assert!(!handle.is_terminated());
    let status = handle.wait(true)?;
    assert!(handle.is_terminated());
    assert_ne!(status, 0);
    Ok(())
}

#[test]
fn release_is_safe_in_any_state() -> Result<()> {
    // Running.
    Spawner::new("sleep").arg("30").spawn()?.release();
    // Already terminated.
    let mut done = Spawner::new("true").spawn()?;
    let _ = done.wait(true)?;
    done.release();
    Ok(())
}

#[test]
fn detached_launch_leaves_no_record() -> Result<()> {
    let mut handle = Spawner::new("true").detached().spawn()?;
    assert!(handle.is_terminated());
    assert!(handle.pid().is_none());
    assert!(handle.take_stdout().is_none());
    assert_eq!(handle.exit_code()?, -1);
    Ok(())
}
