//! Child-process integration: blocking runs, redirected streaming runs, and
//! the pipe values the interpreter iterates.
//!
//! A redirected process gets one reader thread per subscribed stream. Each
//! reader pushes lines into a bounded multi-producer single-consumer channel
//! and drops its sender at end-of-stream; when the last sender is gone the
//! channel disconnects, which is the buffer's completion mark. The
//! interpreter consumes the receiver from its single thread, blocking while
//! the buffer is empty and not complete.

use std::{
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
        mpsc::{Receiver, SyncSender, sync_channel},
    },
    thread,
    time::Duration,
};

use crate::errors::{RunResult, RuntimeError};

/// Process-global shell state: the `?` variable and the script directory.
///
/// `?` is deliberately process-global; writes are confined to the process
/// boundary (blocking waits and reaper threads), reads go through the VM's
/// `$`-variable path.
#[derive(Debug, Clone)]
pub struct ShellState {
    last_exit_code: Arc<AtomicI64>,
    pub script_path: PathBuf,
}

impl ShellState {
    #[must_use]
    pub fn new(script_path: PathBuf) -> Self {
        Self {
            last_exit_code: Arc::new(AtomicI64::new(0)),
            script_path,
        }
    }

    #[must_use]
    pub fn last_exit_code(&self) -> i64 {
        self.last_exit_code.load(Ordering::SeqCst)
    }

    pub(crate) fn set_last_exit_code(&self, code: i64) {
        self.last_exit_code.store(code, Ordering::SeqCst);
    }

    fn exit_cell(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.last_exit_code)
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Shared handle to a running child, used by pipes to stop the process and
/// by the reaper thread to record the exit code.
#[derive(Debug)]
pub struct ProcHandle {
    child: Mutex<Child>,
    exited: AtomicBool,
    exit_code: AtomicI64,
    shell_exit: Arc<AtomicI64>,
}

impl ProcHandle {
    fn new(child: Child, shell_exit: Arc<AtomicI64>) -> Self {
        Self {
            child: Mutex::new(child),
            exited: AtomicBool::new(false),
            exit_code: AtomicI64::new(0),
            shell_exit,
        }
    }

    /// Kills the process unconditionally. Already-exited children are fine.
    pub fn stop(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.exited.load(Ordering::SeqCst).then(|| self.exit_code.load(Ordering::SeqCst))
    }

    /// Polls the child until it exits, then records the exit code in both
    /// the handle and the shell's `?` cell.
    ///
    /// Polling keeps the child mutex uncontended so `stop()` never blocks
    /// behind a `wait()` that holds the lock.
    fn reap(self: &Arc<Self>) {
        loop {
            let status = match self.child.lock() {
                Ok(mut child) => child.try_wait(),
                Err(_) => return,
            };
            match status {
                Ok(Some(status)) => {
                    let code = i64::from(status.code().unwrap_or(-1));
                    self.exit_code.store(code, Ordering::SeqCst);
                    self.shell_exit.store(code, Ordering::SeqCst);
                    self.exited.store(true, Ordering::SeqCst);
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(2)),
                Err(_) => return,
            }
        }
    }
}

/// Data fed to a child's stdin.
///
/// Materialised values arrive as pre-rendered lines; a piped-in pipe value
/// streams lazily so `a | b` never buffers `a`'s whole output.
#[derive(Debug)]
pub enum StdinFeed {
    Lines(Vec<String>),
    Stream {
        lines: Receiver<String>,
        source: Arc<ProcHandle>,
    },
}

/// A live, finite, non-restartable stream of child output lines.
#[derive(Debug)]
pub struct Pipe {
    lines: Option<Receiver<String>>,
    handle: Arc<ProcHandle>,
}

impl Pipe {
    /// Returns the next line, blocking while the buffer is empty and not
    /// complete. `None` once every subscribed stream has delivered
    /// end-of-stream.
    pub fn next_line(&mut self) -> Option<String> {
        self.lines.as_ref()?.recv().ok()
    }

    /// Kills the producing process; iteration then terminates once the OS
    /// closes the pipes.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// The recorded exit code, once the child has exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.handle.exit_code()
    }

    /// Extracts the line stream for feeding another process's stdin,
    /// leaving this pipe exhausted.
    pub(crate) fn take_stream(&mut self) -> Option<StdinFeed> {
        self.lines.take().map(|lines| StdinFeed::Stream {
            lines,
            source: Arc::clone(&self.handle),
        })
    }
}

/// One child-process invocation: configuration, launch, and teardown.
#[derive(Debug)]
pub struct ProcessContext {
    program: String,
    args: Vec<String>,
    piped_value: Option<StdinFeed>,
    pub dispose_stdout: bool,
    pub dispose_stderr: bool,
    /// Non-zero exits count as success; set when stderr is redirected away.
    pub allow_non_zero_exit: bool,
    exit_code: Option<i64>,
}

impl ProcessContext {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            piped_value: None,
            dispose_stdout: false,
            dispose_stderr: false,
            allow_non_zero_exit: false,
            exit_code: None,
        }
    }

    pub fn set_piped_value(&mut self, feed: StdinFeed) {
        self.piped_value = Some(feed);
    }

    /// Whether the completed invocation counts as successful.
    #[must_use]
    pub fn success(&self) -> bool {
        self.allow_non_zero_exit || self.exit_code == Some(0)
    }

    /// Runs the process to completion in the caller's pipeline: stdout and
    /// stderr inherit (unless disposed), stdin is fed from the piped value
    /// when present. Returns the exit code and stores it in `?`.
    pub fn start(&mut self, shell: &ShellState) -> RunResult<i64> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(if self.dispose_stdout { Stdio::null() } else { Stdio::inherit() })
            .stderr(if self.dispose_stderr { Stdio::null() } else { Stdio::inherit() })
            .stdin(if self.piped_value.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });
        let mut child = command.spawn().map_err(|e| spawn_error(&self.program, &e))?;
        if let Some(feed) = self.piped_value.take() {
            feed_stdin(child.stdin.take(), feed);
        }
        let status = child
            .wait()
            .map_err(|e| RuntimeError::runtime(format!("waiting for {}: {e}", self.program)))?;
        let code = i64::from(status.code().unwrap_or(-1));
        shell.set_last_exit_code(code);
        self.exit_code = Some(code);
        Ok(code)
    }

    /// Launches the process with stdout/stderr subscribed into the line
    /// buffer (or discarded when the dispose flags are set) and returns the
    /// pipe value over its output.
    ///
    /// `capacity` bounds the line buffer; producers block when it is full,
    /// so no line is ever dropped.
    pub fn start_with_redirect(mut self, shell: &ShellState, capacity: usize) -> RunResult<Pipe> {
        if self.dispose_stderr {
            // A redirected-away stderr means failures are expected noise.
            self.allow_non_zero_exit = true;
        }
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(if self.dispose_stdout { Stdio::null() } else { Stdio::piped() })
            .stderr(if self.dispose_stderr { Stdio::null() } else { Stdio::piped() })
            .stdin(if self.piped_value.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });
        let mut child = command.spawn().map_err(|e| spawn_error(&self.program, &e))?;

        let (sender, receiver) = sync_channel::<String>(capacity);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, sender.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, sender.clone());
        }
        // The readers now hold the only senders: each end-of-stream drops
        // one, and the channel disconnect is the completion mark.
        drop(sender);

        if let Some(feed) = self.piped_value.take() {
            let stdin = child.stdin.take();
            thread::spawn(move || feed_stdin(stdin, feed));
        }

        let handle = Arc::new(ProcHandle::new(child, shell.exit_cell()));
        let reaper = Arc::clone(&handle);
        thread::spawn(move || reaper.reap());

        Ok(Pipe {
            lines: Some(receiver),
            handle,
        })
    }
}

/// Reads lines from a child stream into the buffer until end-of-stream.
///
/// Runs on its own thread; dropping the sender on return decrements the
/// open-pipe count.
fn spawn_line_reader<R: io::Read + Send + 'static>(stream: R, sender: SyncSender<String>) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
}

/// Writes the piped value line-wise into the child's stdin, then closes it.
///
/// A broken pipe means the child stopped reading: the streaming source is
/// stopped and the failure is swallowed rather than propagated.
fn feed_stdin(stdin: Option<std::process::ChildStdin>, feed: StdinFeed) {
    let Some(mut stdin) = stdin else { return };
    match feed {
        StdinFeed::Lines(lines) => {
            for line in lines {
                if writeln!(stdin, "{line}").is_err() {
                    return;
                }
            }
        }
        StdinFeed::Stream { lines, source } => {
            while let Ok(line) = lines.recv() {
                if writeln!(stdin, "{line}").is_err() {
                    source.stop();
                    return;
                }
            }
        }
    }
}

fn spawn_error(program: &str, error: &io::Error) -> RuntimeError {
    if error.kind() == io::ErrorKind::NotFound {
        RuntimeError::not_found(format!("program {program}"))
    } else {
        RuntimeError::runtime(format!("failed to start {program}: {error}"))
    }
}
