use super::error::CommandError;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Readable end of a process stream (stdout or stderr).
///
/// Methods take `&self` so the command that produced the stream can close it
/// while the caller still holds a handle.
pub trait Source: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Caller-side close: every later read fails with [`closed_pipe`].
    fn close(&self) -> io::Result<()>;

    /// Producer-side end of stream, issued by the command once it terminated.
    /// Data already produced stays readable; after it is drained reads return 0.
    /// Sources that reach end-of-stream on their own keep the default.
    fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Writable end of a process stream (stdin).
pub trait Sink: Send + Sync {
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn close(&self) -> io::Result<()>;
}

/// Error returned by any stream operation after the stream was closed.
pub fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "read/write on closed pipe")
}

/// Caller-side handle to a readable stream. Clones share the same stream.
#[derive(Clone)]
pub struct ReadPipe(Arc<dyn Source>);

impl ReadPipe {
    pub fn new(source: impl Source + 'static) -> Self {
        Self(Arc::new(source))
    }

    pub fn close(&self) -> io::Result<()> {
        self.0.close()
    }

    pub(crate) fn finish(&self) -> io::Result<()> {
        self.0.finish()
    }

    /// Reads the whole stream into a string, replacing invalid UTF-8.
    pub fn read_to_string_lossy(&mut self) -> io::Result<String> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Read for ReadPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl fmt::Debug for ReadPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadPipe")
    }
}

/// Caller-side handle to a writable stream. Clones share the same stream.
#[derive(Clone)]
pub struct WritePipe(Arc<dyn Sink>);

impl WritePipe {
    pub fn new(sink: impl Sink + 'static) -> Self {
        Self(Arc::new(sink))
    }

    /// Closes the stream, signalling end of input to the reader.
    pub fn close(&self) -> io::Result<()> {
        self.0.close()
    }
}

impl Write for WritePipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl fmt::Debug for WritePipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WritePipe")
    }
}

/// Any stream handle a command must end once it terminates.
#[derive(Clone, Debug)]
pub enum StreamHandle {
    Read(ReadPipe),
    Write(WritePipe),
}

impl StreamHandle {
    pub fn close(&self) -> io::Result<()> {
        match self {
            Self::Read(pipe) => pipe.close(),
            Self::Write(pipe) => pipe.close(),
        }
    }

    /// Ends the stream from the command side: readers see end-of-stream after
    /// draining, stdin is closed.
    pub fn finish(&self) -> io::Result<()> {
        match self {
            Self::Read(pipe) => pipe.finish(),
            Self::Write(pipe) => pipe.close(),
        }
    }
}

/// Termination requests deliverable to a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Hangup,
    Interrupt,
    Terminate,
    Kill,
}

/// An external process invocation.
///
/// Parameters and pipes are set up through `&mut self` before [`start`];
/// [`wait`], [`kill`] and [`signal`] take `&self` so one thread can signal
/// while another waits.
///
/// Stream handles must be requested before [`start`]; a stream requested after
/// start, or twice, is an error.
///
/// [`start`]: Command::start
/// [`wait`]: Command::wait
/// [`kill`]: Command::kill
/// [`signal`]: Command::signal
pub trait Command: Send + Sync {
    fn set_path(&mut self, path: &str);
    fn set_args(&mut self, args: Vec<String>);
    fn set_dir(&mut self, dir: &Path);

    fn path(&self) -> &str;
    fn args(&self) -> &[String];
    fn dir(&self) -> Option<&Path>;

    fn stdout_pipe(&mut self) -> io::Result<ReadPipe>;
    fn stderr_pipe(&mut self) -> io::Result<ReadPipe>;
    fn stdin_pipe(&mut self) -> io::Result<WritePipe>;

    /// Begins execution without waiting for it to finish.
    fn start(&mut self) -> Result<(), CommandError>;

    /// Blocks until the command terminates. Every call returns the same outcome.
    fn wait(&self) -> Result<(), CommandError>;

    /// Starts, waits, then ends every stream obtained from this command.
    /// Output produced before termination stays readable up to end-of-stream;
    /// stdin is closed.
    fn run(&mut self) -> Result<(), CommandError>;

    /// Asks the command to stop immediately. A no-op once it terminated.
    fn kill(&self) -> Result<(), CommandError> {
        self.signal(Signal::Kill)
    }

    /// Delivers `signal`. A no-op once the command terminated.
    fn signal(&self, signal: Signal) -> Result<(), CommandError>;
}

/// Factory binding commands to one execution backend.
pub trait Commander: Send + Sync {
    fn command(&self, program: &str, args: Vec<String>) -> Box<dyn Command>;
}

/// Owned argument list from string slices.
pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_string()).collect()
}

/// Ends every handle, keeping the first failure.
pub(crate) fn finish_all(handles: &[StreamHandle]) -> io::Result<()> {
    let mut first_error = None;
    for handle in handles {
        if let Err(e) = handle.finish() {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Counting {
        data: Mutex<Vec<u8>>,
        closed: Mutex<bool>,
    }

    impl Source for Counting {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            if *self.closed.lock().unwrap() {
                return Err(closed_pipe());
            }
            let mut data = self.data.lock().unwrap();
            let n = buf.len().min(data.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.drain(..n);
            Ok(n)
        }

        fn close(&self) -> io::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn test_argv() {
        assert_eq!(argv(&["up", "-d"]), vec!["up".to_string(), "-d".to_string()]);
        assert!(argv(&[]).is_empty());
    }

    #[test]
    fn test_read_pipe_clones_share_close() {
        let mut pipe = ReadPipe::new(Counting {
            data: Mutex::new(b"hello".to_vec()),
            closed: Mutex::new(false),
        });
        let other = pipe.clone();

        assert_eq!(pipe.read_to_string_lossy().unwrap(), "hello");
        other.close().unwrap();

        let err = pipe.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_finish_keeps_unread_data() {
        let mut pipe = ReadPipe::new(Counting {
            data: Mutex::new(b"hello".to_vec()),
            closed: Mutex::new(false),
        });
        finish_all(&[StreamHandle::Read(pipe.clone())]).unwrap();

        assert_eq!(pipe.read_to_string_lossy().unwrap(), "hello");
        assert_eq!(pipe.read(&mut [0u8; 4]).unwrap(), 0);
    }
}
