use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Output still buffered in the pipes is collected for at most this long once
/// the child has exited. Guards against grandchildren keeping a pipe open.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 4096;

/// One observation from an interactive process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// The process exited. `code` is `None` when it was killed by a signal.
    Closed { code: Option<i32> },
}

/// A running interactive child process.
///
/// Output arrives incrementally through [`ProcessHandle::next_event`]. The
/// child is killed when the handle is dropped.
pub struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    exit: Option<Option<i32>>,
    drained: bool,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub(crate) fn new(mut child: Child) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone(), ProcessEvent::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx, ProcessEvent::Stderr));
        }

        let stdin = child.stdin.take();

        Self {
            child,
            stdin,
            events,
            exit: None,
            drained: false,
            readers,
        }
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write `line` followed by a newline to the child's stdin.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin already closed")
        })?;
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        let result = stdin.write_all(&payload).await;
        zeroize::Zeroize::zeroize(&mut payload);
        result?;
        stdin.flush().await
    }

    /// Close the child's stdin so it sees end-of-file.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Kill the process and wait for it to be reaped.
    pub async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        match self.child.kill().await {
            Ok(()) => {
                self.exit = Some(None);
            }
            Err(e) => warn!("Failed to kill interactive bw: {}", e),
        }
    }

    /// Wait for the next piece of output or for the process to exit.
    ///
    /// After the child exits, any output still in flight is returned first;
    /// `Closed` is returned once everything has been delivered, and on every
    /// call after that.
    pub async fn next_event(&mut self) -> ProcessEvent {
        if self.exit.is_none() {
            let code = tokio::select! {
                biased;
                Some(event) = self.events.recv() => return event,
                status = self.child.wait() => match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!("Failed to wait for interactive bw: {}", e);
                        None
                    }
                },
            };
            self.exit = Some(code);
        }

        let code = self.exit.flatten();
        if self.drained {
            return ProcessEvent::Closed { code };
        }

        match timeout(DRAIN_GRACE, self.events.recv()).await {
            Ok(Some(event)) => event,
            _ => {
                self.drained = true;
                self.events.close();
                ProcessEvent::Closed { code }
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        // kill_on_drop on the child takes care of the process itself
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.child.id())
            .field("exit", &self.exit)
            .finish()
    }
}

fn spawn_reader<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(Vec<u8>) -> ProcessEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Pipe read from interactive bw ended: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{EnvOverrides, Invoker};
    use crate::test_support::{process_is_gone, FakeBw};

    async fn collect_until_closed(handle: &mut ProcessHandle) -> (String, String, Option<i32>) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        loop {
            match handle.next_event().await {
                ProcessEvent::Stdout(b) => out.extend(b),
                ProcessEvent::Stderr(b) => err.extend(b),
                ProcessEvent::Closed { code } => {
                    return (
                        String::from_utf8_lossy(&out).into_owned(),
                        String::from_utf8_lossy(&err).into_owned(),
                        code,
                    )
                }
            }
        }
    }

    #[tokio::test]
    async fn test_output_is_delivered_before_closed() {
        let fake = FakeBw::new("echo first; echo oops >&2; echo second; exit 4");
        let invoker = Invoker::new(fake.script(), Duration::from_secs(5));
        let mut handle = invoker
            .run_interactive(&["login"], &EnvOverrides::new())
            .unwrap();

        let (out, err, code) = collect_until_closed(&mut handle).await;
        assert_eq!(out, "first\nsecond\n");
        assert_eq!(err, "oops\n");
        assert_eq!(code, Some(4));

        // Closed is sticky
        assert_eq!(handle.next_event().await, ProcessEvent::Closed { code: Some(4) });
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let fake = FakeBw::new("cat >/dev/null");
        let invoker = Invoker::new(fake.script(), Duration::from_secs(5));
        let mut handle = invoker
            .run_interactive(&["login"], &EnvOverrides::new())
            .unwrap();
        handle.close_stdin();
        assert!(handle.write_line("123456").await.is_err());
        let (_, _, code) = collect_until_closed(&mut handle).await;
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_kill_terminates_process() {
        let fake = FakeBw::new("exec sleep 30");
        let invoker = Invoker::new(fake.script(), Duration::from_secs(5));
        let mut handle = invoker
            .run_interactive(&["login"], &EnvOverrides::new())
            .unwrap();
        let pid = handle.id().unwrap();

        handle.kill().await;
        assert!(process_is_gone(pid));
        assert!(matches!(
            handle.next_event().await,
            ProcessEvent::Closed { code: None }
        ));
    }

    #[tokio::test]
    async fn test_drop_kills_process() {
        let fake = FakeBw::new("exec sleep 30");
        let invoker = Invoker::new(fake.script(), Duration::from_secs(5));
        let handle = invoker
            .run_interactive(&["login"], &EnvOverrides::new())
            .unwrap();
        let pid = handle.id().unwrap();
        drop(handle);

        // Reaping after kill_on_drop happens in the background
        let mut gone = false;
        for _ in 0..50 {
            if process_is_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone);
    }
}
