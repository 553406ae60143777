use crate::domain::command::finish_all;
use crate::domain::{
    Command, CommandError, Commander, ReadPipe, Signal, Sink, Source, StreamHandle, WritePipe,
    closed_pipe,
};
use nix::errno::Errno;
use nix::sys::signal::{self as nix_signal, Signal as NixSignal};
use nix::sys::wait::{Id, WaitPidFlag, waitid};
use nix::unistd::Pid;
use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::mem;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, warn};

/// Commander spawning real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommander;

impl ProcessCommander {
    pub fn new() -> Self {
        Self
    }
}

impl Commander for ProcessCommander {
    fn command(&self, program: &str, args: Vec<String>) -> Box<dyn Command> {
        Box::new(ProcessCommand::new(program, args))
    }
}

/// Child side of a stream, held until the process is spawned.
enum ChildEnd<T> {
    Unpiped,
    Piped(T),
    Spawned,
}

impl<T: Into<Stdio>> ChildEnd<T> {
    fn take_stdio(&mut self) -> Stdio {
        match mem::replace(self, ChildEnd::Spawned) {
            ChildEnd::Piped(end) => end.into(),
            _ => Stdio::null(),
        }
    }
}

pub struct ProcessCommand {
    path: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    stdin: ChildEnd<PipeReader>,
    stdout: ChildEnd<PipeWriter>,
    stderr: ChildEnd<PipeWriter>,
    streams: Vec<StreamHandle>,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    outcome: OnceLock<Result<(), CommandError>>,
}

impl ProcessCommand {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            path: program.to_string(),
            args,
            dir: None,
            stdin: ChildEnd::Unpiped,
            stdout: ChildEnd::Unpiped,
            stderr: ChildEnd::Unpiped,
            streams: Vec::new(),
            pid: None,
            child: Mutex::new(None),
            outcome: OnceLock::new(),
        }
    }

    fn ensure_pipeable(&self, name: &str, pipeable: bool) -> io::Result<()> {
        if self.pid.is_some() {
            return Err(io::Error::other(format!(
                "{name} requested after {} was started",
                self.path
            )));
        }
        if !pipeable {
            return Err(io::Error::other(format!(
                "{name} already piped for {}",
                self.path
            )));
        }
        Ok(())
    }

    fn output_pipe(&mut self, stderr: bool) -> io::Result<ReadPipe> {
        let (name, end) = if stderr {
            ("stderr", &self.stderr)
        } else {
            ("stdout", &self.stdout)
        };
        self.ensure_pipeable(name, matches!(end, ChildEnd::Unpiped))?;

        let (reader, writer) = io::pipe()?;
        if stderr {
            self.stderr = ChildEnd::Piped(writer);
        } else {
            self.stdout = ChildEnd::Piped(writer);
        }

        let pipe = ReadPipe::new(ProcessSource {
            reader,
            closed: AtomicBool::new(false),
        });
        self.streams.push(StreamHandle::Read(pipe.clone()));
        Ok(pipe)
    }

    fn not_started(&self) -> CommandError {
        CommandError::NotStarted {
            program: self.path.clone(),
        }
    }

    fn nix_pid(&self) -> Result<Pid, CommandError> {
        let pid = self.pid.ok_or_else(|| self.not_started())?;
        let raw = i32::try_from(pid).map_err(|e| CommandError::Failed {
            program: self.path.clone(),
            reason: format!("pid {pid} out of range: {e}"),
        })?;
        Ok(Pid::from_raw(raw))
    }

    fn outcome_of(&self, status: ExitStatus) -> Result<(), CommandError> {
        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(CommandError::Exit {
                program: self.path.clone(),
                args: self.args.clone(),
                code,
            }),
            None => Err(CommandError::Signaled {
                program: self.path.clone(),
                args: self.args.clone(),
                signal: status.signal().unwrap_or_default(),
            }),
        }
    }
}

impl Command for ProcessCommand {
    fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    fn set_dir(&mut self, dir: &Path) {
        self.dir = Some(dir.to_path_buf());
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn stdout_pipe(&mut self) -> io::Result<ReadPipe> {
        self.output_pipe(false)
    }

    fn stderr_pipe(&mut self) -> io::Result<ReadPipe> {
        self.output_pipe(true)
    }

    fn stdin_pipe(&mut self) -> io::Result<WritePipe> {
        self.ensure_pipeable("stdin", matches!(self.stdin, ChildEnd::Unpiped))?;

        let (reader, writer) = io::pipe()?;
        self.stdin = ChildEnd::Piped(reader);

        let pipe = WritePipe::new(ProcessSink {
            writer: Mutex::new(Some(writer)),
        });
        self.streams.push(StreamHandle::Write(pipe.clone()));
        Ok(pipe)
    }

    fn start(&mut self) -> Result<(), CommandError> {
        if self.pid.is_some() {
            return Err(CommandError::AlreadyStarted {
                program: self.path.clone(),
            });
        }

        let mut command = std::process::Command::new(&self.path);
        command
            .args(&self.args)
            .stdin(self.stdin.take_stdio())
            .stdout(self.stdout.take_stdio())
            .stderr(self.stderr.take_stdio());
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }

        debug!("spawning {} {:?} in {:?}", self.path, self.args, self.dir);
        let spawned = command.spawn();
        // Dropping the builder closes our copies of the child ends, so readers
        // observe end-of-stream once the process exits.
        drop(command);

        let child = spawned.map_err(|e| CommandError::Launch {
            program: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.pid = Some(child.id());
        *self
            .child
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Some(child);
        Ok(())
    }

    fn wait(&self) -> Result<(), CommandError> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        let pid = self.nix_pid()?;

        // Block until exit without reaping, so the pid stays valid for
        // `signal` until the reap below happens under the child lock.
        loop {
            match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    debug!("waitid on {pid}: {e}");
                    break;
                }
            }
        }

        let mut child = lock(&self.child);
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        let Some(process) = child.as_mut() else {
            return Err(self.not_started());
        };

        let outcome = match process.wait() {
            Ok(status) => self.outcome_of(status),
            Err(e) => Err(CommandError::Failed {
                program: self.path.clone(),
                reason: format!("waiting for process: {e}"),
            }),
        };
        let _ = self.outcome.set(outcome.clone());
        outcome
    }

    fn run(&mut self) -> Result<(), CommandError> {
        self.start()?;
        let outcome = self.wait();
        if let Err(e) = finish_all(&self.streams) {
            warn!("ending streams of {}: {e}", self.path);
        }
        outcome
    }

    fn signal(&self, signal: Signal) -> Result<(), CommandError> {
        let pid = self.nix_pid()?;
        // Reaping only happens under this lock, so the pid cannot be reused
        // while we hold it.
        let _child = lock(&self.child);
        if self.outcome.get().is_some() {
            return Ok(());
        }

        match nix_signal::kill(pid, to_nix(signal)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(CommandError::Failed {
                program: self.path.clone(),
                reason: format!("sending {signal:?}: {e}"),
            }),
        }
    }
}

fn to_nix(signal: Signal) -> NixSignal {
    match signal {
        Signal::Hangup => NixSignal::SIGHUP,
        Signal::Interrupt => NixSignal::SIGINT,
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parent end of a stdout/stderr OS pipe.
///
/// Closing marks the handle unusable; the descriptor itself is released when
/// the last handle drops, so a close never waits on a blocked reader. The
/// default `finish` is enough: the child end was dropped at spawn, so the pipe
/// drains to end-of-stream once the process exits.
struct ProcessSource {
    reader: PipeReader,
    closed: AtomicBool,
}

impl Source for ProcessSource {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_pipe());
        }
        (&self.reader).read(buf)
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Parent end of a stdin OS pipe. Closing drops the descriptor so the child
/// reads end-of-file.
struct ProcessSink {
    writer: Mutex<Option<PipeWriter>>,
}

impl Sink for ProcessSink {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.writer).as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(closed_pipe()),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match lock(&self.writer).as_mut() {
            Some(writer) => writer.flush(),
            None => Err(closed_pipe()),
        }
    }

    fn close(&self) -> io::Result<()> {
        lock(&self.writer).take();
        Ok(())
    }
}
