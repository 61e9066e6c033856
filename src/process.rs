use crate::{Error, Result};
use fslock::LockFile;
use piper::PipedCommand;
use std::{
    io::{Read, Write},
    path::Path,
    process::{Child, ExitStatus},
    str,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Combined stdout/stderr of a child and how it ended. `status` is `None` if
/// the child was killed for running past its deadline.
pub struct Finished {
    pub status: Option<ExitStatus>,
    pub output: String,
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(err) = reader.read_to_end(&mut buf) {
                warn!("failed to read child output: {err}");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Write `input` to the child's stdin and close it. If the write fails the
/// child is killed and reaped before the error is returned.
pub fn feed_stdin(child: &mut Child, input: &[u8]) -> Result<()> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    if let Err(err) = stdin.write_all(input) {
        drop(stdin);
        if let Err(kill_err) = child.kill() {
            warn!("process {} already gone: {kill_err}", child.id());
        }
        child.wait()?;
        return Err(err.into());
    }
    Ok(())
}

/// Wait for `child`, killing it once `timeout` elapses. Output pipes are
/// drained on their own threads so a chatty child cannot stall on a full pipe.
pub fn wait_with_timeout(mut child: Child, timeout: Option<Duration>) -> Result<Finished> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!("killing process {} after deadline", child.id());
                child.kill()?;
                child.wait()?;
                break None;
            }
            _ => thread::sleep(POLL_INTERVAL),
        }
    };

    let mut output = stdout.join().unwrap_or_default();
    output.push_str(&stderr.join().unwrap_or_default());

    Ok(Finished { status, output })
}

fn process_lock(lock_path: &Path) -> Result<LockFile> {
    let mut lock = LockFile::open(lock_path)?;
    lock.lock()?;
    Ok(lock)
}

fn search(resource: &Path) -> Result<String> {
    Ok(format!(
        "ps aux | grep -v grep | grep {}",
        resource.to_str().ok_or(Error::InvalidPath {
            path: resource.into()
        })?
    ))
}

/// Whether some running process references `resource` on its command line.
pub fn resource_in_use(lock_path: &Path, resource: &Path) -> Result<bool> {
    let mut lock = process_lock(lock_path)?;
    let in_use = PipedCommand::run(search(resource)?)?.status.code() == Some(0);
    lock.unlock()?;
    Ok(in_use)
}

/// Pid of the first process referencing `resource`.
pub fn resource_pid(lock_path: &Path, resource: &Path) -> Result<Option<String>> {
    let mut lock = process_lock(lock_path)?;
    let output = PipedCommand::run(search(resource)?)?;
    lock.unlock()?;

    Ok(str::from_utf8(&output.stdout)
        .ok()
        .and_then(|stdout| stdout.lines().next())
        .and_then(|line| line.split_whitespace().nth(1))
        .map(String::from))
}
