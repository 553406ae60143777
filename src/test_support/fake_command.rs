use crate::domain::command::finish_all;
use crate::domain::{Command, CommandError, Commander, ReadPipe, Signal, StreamHandle, WritePipe};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use tracing::warn;

/// What a fake command was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub path: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl Invocation {
    /// True when both the program and the whole argument list match.
    pub fn matches(&self, path: &str, args: &[&str]) -> bool {
        self.path == path && self.args.iter().map(String::as_str).eq(args.iter().copied())
    }
}

type ReadHandler = Arc<dyn Fn(&Invocation) -> io::Result<ReadPipe> + Send + Sync>;
type WriteHandler = Arc<dyn Fn(&Invocation) -> io::Result<WritePipe> + Send + Sync>;
type RunHandler = Arc<dyn Fn(&Invocation) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Handlers {
    stdout: Option<ReadHandler>,
    stderr: Option<ReadHandler>,
    stdin: Option<WriteHandler>,
    run: Option<RunHandler>,
}

#[derive(Default)]
struct Shared {
    handlers: RwLock<Handlers>,
    started: Mutex<Vec<Invocation>>,
}

impl Shared {
    fn handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Commander whose commands are scripted by handler closures.
///
/// Clones share handlers and the invocation log, so a test can keep one clone
/// and hand another to an environment. Handlers may be installed at any time
/// before the command that needs them runs.
///
/// A stream requested without a matching handler panics: every call a test
/// triggers is expected to be scripted.
#[derive(Clone, Default)]
pub struct FakeCommander(Arc<Shared>);

impl FakeCommander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stdout<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Invocation) -> io::Result<ReadPipe> + Send + Sync + 'static,
    {
        self.0.handlers_mut().stdout = Some(Arc::new(handler));
        self
    }

    pub fn on_stderr<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Invocation) -> io::Result<ReadPipe> + Send + Sync + 'static,
    {
        self.0.handlers_mut().stderr = Some(Arc::new(handler));
        self
    }

    pub fn on_stdin<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Invocation) -> io::Result<WritePipe> + Send + Sync + 'static,
    {
        self.0.handlers_mut().stdin = Some(Arc::new(handler));
        self
    }

    /// Scripts process completion. The handler runs on its own thread once the
    /// command starts; without one, commands complete successfully at once.
    pub fn on_run<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.0.handlers_mut().run = Some(Arc::new(handler));
        self
    }

    /// Every invocation started so far, in start order.
    pub fn started(&self) -> Vec<Invocation> {
        lock(&self.0.started).clone()
    }

    /// Same as [`Commander::command`] without boxing, for direct inspection.
    pub fn fake_command(&self, program: &str, args: Vec<String>) -> FakeCommand {
        FakeCommand {
            invocation: Invocation {
                path: program.to_string(),
                args,
                dir: None,
            },
            commander: self.0.clone(),
            streams: Vec::new(),
            requested: Vec::new(),
            started: false,
            completion: Mutex::new(Completion::Idle),
            signals: Mutex::new(Vec::new()),
        }
    }
}

impl Commander for FakeCommander {
    fn command(&self, program: &str, args: Vec<String>) -> Box<dyn Command> {
        Box::new(self.fake_command(program, args))
    }
}

enum Completion {
    Idle,
    Pending(Receiver<Result<(), CommandError>>),
    Done(Result<(), CommandError>),
}

pub struct FakeCommand {
    invocation: Invocation,
    commander: Arc<Shared>,
    streams: Vec<StreamHandle>,
    requested: Vec<&'static str>,
    started: bool,
    completion: Mutex<Completion>,
    signals: Mutex<Vec<Signal>>,
}

impl FakeCommand {
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Signals delivered so far, in order.
    pub fn signals(&self) -> Vec<Signal> {
        lock(&self.signals).clone()
    }

    fn claim(&mut self, stream: &'static str) -> io::Result<()> {
        if self.started {
            return Err(io::Error::other(format!(
                "{stream} requested after {} was started",
                self.invocation.path
            )));
        }
        if self.requested.contains(&stream) {
            return Err(io::Error::other(format!(
                "{stream} already piped for {}",
                self.invocation.path
            )));
        }
        self.requested.push(stream);
        Ok(())
    }

    fn unhandled(&self, stream: &str) -> ! {
        panic!(
            "unexpected {stream} request for {} {:?}",
            self.invocation.path, self.invocation.args
        )
    }

    fn read_pipe(&mut self, stream: &'static str) -> io::Result<ReadPipe> {
        self.claim(stream)?;
        let handler = {
            let handlers = self.commander.handlers();
            if stream == "stdout" {
                handlers.stdout.clone()
            } else {
                handlers.stderr.clone()
            }
        };
        let Some(handler) = handler else {
            self.unhandled(stream)
        };

        let pipe = handler(&self.invocation)?;
        self.streams.push(StreamHandle::Read(pipe.clone()));
        Ok(pipe)
    }
}

impl Command for FakeCommand {
    fn set_path(&mut self, path: &str) {
        self.invocation.path = path.to_string();
    }

    fn set_args(&mut self, args: Vec<String>) {
        self.invocation.args = args;
    }

    fn set_dir(&mut self, dir: &Path) {
        self.invocation.dir = Some(dir.to_path_buf());
    }

    fn path(&self) -> &str {
        &self.invocation.path
    }

    fn args(&self) -> &[String] {
        &self.invocation.args
    }

    fn dir(&self) -> Option<&Path> {
        self.invocation.dir.as_deref()
    }

    fn stdout_pipe(&mut self) -> io::Result<ReadPipe> {
        self.read_pipe("stdout")
    }

    fn stderr_pipe(&mut self) -> io::Result<ReadPipe> {
        self.read_pipe("stderr")
    }

    fn stdin_pipe(&mut self) -> io::Result<WritePipe> {
        self.claim("stdin")?;
        let handler = self.commander.handlers().stdin.clone();
        let Some(handler) = handler else {
            self.unhandled("stdin")
        };

        let pipe = handler(&self.invocation)?;
        self.streams.push(StreamHandle::Write(pipe.clone()));
        Ok(pipe)
    }

    fn start(&mut self) -> Result<(), CommandError> {
        if self.started {
            return Err(CommandError::AlreadyStarted {
                program: self.invocation.path.clone(),
            });
        }
        self.started = true;
        lock(&self.commander.started).push(self.invocation.clone());

        let (done, completion) = mpsc::sync_channel(1);
        let handler = self.commander.handlers().run.clone();
        match handler {
            Some(handler) => {
                let invocation = self.invocation.clone();
                thread::Builder::new()
                    .name(format!("fake-{}", invocation.path))
                    .spawn(move || {
                        let outcome = handler(&invocation).map_err(|e| CommandError::Failed {
                            program: invocation.path.clone(),
                            reason: format!("{e:#}"),
                        });
                        let _ = done.send(outcome);
                    })
                    .map_err(|e| CommandError::Launch {
                        program: self.invocation.path.clone(),
                        reason: e.to_string(),
                    })?;
            }
            None => {
                let _ = done.send(Ok(()));
            }
        }

        *self
            .completion
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Completion::Pending(completion);
        Ok(())
    }

    fn wait(&self) -> Result<(), CommandError> {
        let mut completion = lock(&self.completion);
        let outcome = match &*completion {
            Completion::Idle => {
                return Err(CommandError::NotStarted {
                    program: self.invocation.path.clone(),
                });
            }
            Completion::Done(outcome) => return outcome.clone(),
            Completion::Pending(receiver) => receiver.recv().unwrap_or_else(|_| {
                Err(CommandError::Failed {
                    program: self.invocation.path.clone(),
                    reason: "run handler panicked".to_string(),
                })
            }),
        };
        *completion = Completion::Done(outcome.clone());
        outcome
    }

    fn run(&mut self) -> Result<(), CommandError> {
        self.start()?;
        let outcome = self.wait();
        if let Err(e) = finish_all(&self.streams) {
            warn!("ending streams of {}: {e}", self.invocation.path);
        }
        outcome
    }

    fn signal(&self, signal: Signal) -> Result<(), CommandError> {
        if !self.started {
            return Err(CommandError::NotStarted {
                program: self.invocation.path.clone(),
            });
        }
        lock(&self.signals).push(signal);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::argv;
    use crate::test_support::{ClosableBuffer, DEFAULT_PIPE_CAPACITY, pipe, streaming};
    use std::io::{Read, Write};

    #[test]
    fn test_invocation_matches() {
        let invocation = Invocation {
            path: "docker".into(),
            args: argv(&["build", "/tmp/x"]),
            dir: None,
        };
        assert!(invocation.matches("docker", &["build", "/tmp/x"]));
        assert!(!invocation.matches("docker", &["build"]));
        assert!(!invocation.matches("podman", &["build", "/tmp/x"]));
    }

    #[test]
    fn test_stdout_pipe() {
        let fake = FakeCommander::new();
        fake.on_stdout(|inv| {
            assert_eq!(inv.path, "echo");
            Ok(streaming(format!("{}\n", inv.args.join(" "))))
        });

        let mut cmd = fake.fake_command("echo", argv(&["1", "2"]));
        let mut stdout = cmd.stdout_pipe().unwrap();
        cmd.start().unwrap();

        assert_eq!(stdout.read_to_string_lossy().unwrap(), "1 2\n");
        assert!(cmd.wait().is_ok());
    }

    #[test]
    fn test_stdout_reaches_eof_after_run() {
        let fake = FakeCommander::new();
        fake.on_stdout(|_| Ok(streaming("1 2\n")));

        let mut cmd = fake.fake_command("echo", argv(&["1", "2"]));
        let mut stdout = cmd.stdout_pipe().unwrap();
        cmd.run().unwrap();

        assert_eq!(stdout.read_to_string_lossy().unwrap(), "1 2\n");
        // the caller's own close still fails later reads
        stdout.close().unwrap();
        assert!(stdout.read(&mut [0u8; 1]).is_err());
    }

    #[test]
    fn test_run_waits_for_handler_output() {
        let payload = 4 * DEFAULT_PIPE_CAPACITY;
        let (reader, writer) = pipe();
        let reader = Mutex::new(Some(reader));
        let writer = Mutex::new(Some(writer));

        let fake = FakeCommander::new();
        fake.on_stdout(move |_| Ok(ReadPipe::new(reader.lock().unwrap().take().unwrap())))
            .on_run(move |_| {
                // never closed here; run ends the stream
                let mut writer = writer.lock().unwrap().take().unwrap();
                writer.write_all(&vec![b'z'; payload])?;
                std::mem::forget(writer);
                Ok(())
            });

        let mut cmd = fake.fake_command("yes", vec![]);
        let mut stdout = cmd.stdout_pipe().unwrap();
        let consumer = thread::spawn(move || {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).map(|_| out)
        });
        cmd.run().unwrap();

        let out = consumer.join().unwrap().unwrap();
        assert_eq!(out.len(), payload);
    }

    #[test]
    fn test_stderr_pipe() {
        let expected = "ls: cannot access '/fake': No such file or directory\n";
        let fake = FakeCommander::new();
        fake.on_stderr(move |inv| {
            assert!(inv.matches("ls", &["/fake"]));
            Ok(streaming(expected))
        });

        let mut cmd = fake.fake_command("ls", argv(&["/fake"]));
        let mut stderr = cmd.stderr_pipe().unwrap();
        cmd.start().unwrap();
        assert_eq!(stderr.read_to_string_lossy().unwrap(), expected);
    }

    #[test]
    fn test_stdin_pipe_feeds_run_handler() {
        let (stdin_reader, stdin_writer) = pipe();
        let (stdout_reader, stdout_writer) = pipe();
        let stdin_reader = Mutex::new(Some(stdin_reader));
        let stdout_writer = Mutex::new(Some(stdout_writer));
        let stdin_writer = Mutex::new(Some(stdin_writer));
        let stdout_reader = Mutex::new(Some(stdout_reader));

        let fake = FakeCommander::new();
        fake.on_stdin(move |inv| {
            assert!(inv.matches("wc", &["-c"]));
            let writer = stdin_writer.lock().unwrap().take().unwrap();
            Ok(WritePipe::new(writer))
        })
        .on_stdout(move |_| {
            let reader = stdout_reader.lock().unwrap().take().unwrap();
            Ok(ReadPipe::new(reader))
        })
        .on_run(move |_| {
            let mut input = stdin_reader.lock().unwrap().take().unwrap();
            let mut output = stdout_writer.lock().unwrap().take().unwrap();
            let mut read = Vec::new();
            input.read_to_end(&mut read)?;
            writeln!(output, "{}", read.len())?;
            Ok(())
        });

        let mut cmd = fake.fake_command("wc", argv(&["-c"]));
        let mut stdin = cmd.stdin_pipe().unwrap();
        let mut stdout = cmd.stdout_pipe().unwrap();
        cmd.start().unwrap();

        assert_eq!(stdin.write(b"hello").unwrap(), 5);
        stdin.close().unwrap();

        assert_eq!(stdout.read_to_string_lossy().unwrap(), "5\n");
        assert!(cmd.wait().is_ok());
    }

    #[test]
    fn test_wait_result_is_cached() {
        let fake = FakeCommander::new();
        fake.on_run(|_| anyhow::bail!("exit status 2"));

        let mut cmd = fake.fake_command("false", vec![]);
        cmd.start().unwrap();
        let first = cmd.wait().unwrap_err();
        let second = cmd.wait().unwrap_err();
        assert_eq!(first, second);
        assert!(first.to_string().contains("exit status 2"));
    }

    #[test]
    fn test_panicking_handler_is_a_failure() {
        let fake = FakeCommander::new();
        fake.on_run(|_| panic!("scripted crash"));

        let mut cmd = fake.fake_command("crash", vec![]);
        assert!(matches!(cmd.run(), Err(CommandError::Failed { .. })));
    }

    #[test]
    fn test_without_run_handler_completes() {
        let fake = FakeCommander::new();
        let mut cmd = fake.fake_command("true", vec![]);
        assert!(cmd.run().is_ok());
        assert_eq!(fake.started().len(), 1);
    }

    #[test]
    fn test_lifecycle_errors() {
        let fake = FakeCommander::new();
        fake.on_stdout(|_| Ok(ReadPipe::new(ClosableBuffer::new())));
        let mut cmd = fake.fake_command("true", vec![]);

        assert!(matches!(cmd.wait(), Err(CommandError::NotStarted { .. })));
        cmd.stdout_pipe().unwrap();
        assert!(cmd.stdout_pipe().is_err());
        cmd.start().unwrap();
        assert!(matches!(cmd.start(), Err(CommandError::AlreadyStarted { .. })));
        assert!(cmd.stderr_pipe().is_err());
    }

    #[test]
    #[should_panic(expected = "unexpected stdout request for cat")]
    fn test_unhandled_stream_panics() {
        let fake = FakeCommander::new();
        let mut cmd = fake.fake_command("cat", vec![]);
        let _ = cmd.stdout_pipe();
    }

    #[test]
    fn test_signals_are_recorded() {
        let fake = FakeCommander::new();
        let mut cmd = fake.fake_command("sleep", argv(&["10"]));
        cmd.start().unwrap();
        cmd.signal(Signal::Terminate).unwrap();
        cmd.kill().unwrap();
        assert_eq!(cmd.signals(), vec![Signal::Terminate, Signal::Kill]);
    }

    #[test]
    fn test_signal_before_start_fails() {
        let fake = FakeCommander::new();
        let cmd = fake.fake_command("sleep", argv(&["10"]));
        assert!(matches!(
            cmd.signal(Signal::Interrupt),
            Err(CommandError::NotStarted { .. })
        ));
        assert!(cmd.signals().is_empty());
    }

    #[test]
    fn test_set_parameters() {
        let fake = FakeCommander::new();
        let mut cmd = fake.fake_command("a", vec![]);
        cmd.set_path("b");
        cmd.set_args(argv(&["c"]));
        cmd.set_dir(Path::new("/work"));
        cmd.run().unwrap();

        let started = fake.started();
        assert_eq!(started[0].path, "b");
        assert_eq!(started[0].args, vec!["c"]);
        assert_eq!(started[0].dir.as_deref(), Some(Path::new("/work")));
    }
}
