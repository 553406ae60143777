use crate::domain::{ReadPipe, Sink, Source, closed_pipe};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Buffer size of [`pipe`], matching a typical OS pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    reader_closed: bool,
    writer_closed: bool,
}

struct Shared {
    state: Mutex<PipeState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, PipeState>) -> MutexGuard<'a, PipeState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Synchronized in-memory pipe with a [`DEFAULT_PIPE_CAPACITY`] buffer.
pub fn pipe() -> (PipeReader, PipeWriter) {
    pipe_with_capacity(DEFAULT_PIPE_CAPACITY)
}

/// In-memory pipe whose writer blocks once `capacity` bytes are unread.
///
/// Reads block until data arrives or the writer closes (end-of-stream).
/// Writes fail once either end is closed. Dropping an end closes it.
pub fn pipe_with_capacity(capacity: usize) -> (PipeReader, PipeWriter) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            buf: VecDeque::new(),
            capacity: capacity.max(1),
            reader_closed: false,
            writer_closed: false,
        }),
        changed: Condvar::new(),
    });
    (PipeReader(shared.clone()), PipeWriter(shared))
}

/// Stream handle that yields `bytes` and then end-of-stream, like the output of
/// a process that already exited.
pub fn streaming(bytes: impl Into<Vec<u8>>) -> ReadPipe {
    let bytes: Vec<u8> = bytes.into();
    let (reader, writer) = pipe_with_capacity(bytes.len());
    {
        let mut state = writer.0.lock();
        state.buf.extend(bytes);
        state.writer_closed = true;
    }
    ReadPipe::new(reader)
}

pub struct PipeReader(Arc<Shared>);

impl Source for PipeReader {
    fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        loop {
            if state.reader_closed {
                return Err(closed_pipe());
            }
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for (slot, byte) in out.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                self.0.changed.notify_all();
                return Ok(n);
            }
            if state.writer_closed || out.is_empty() {
                return Ok(0);
            }
            state = self.0.wait(state);
        }
    }

    fn close(&self) -> io::Result<()> {
        self.0.lock().reader_closed = true;
        self.0.changed.notify_all();
        Ok(())
    }

    /// Ends the writer side: buffered bytes are still delivered, later writes
    /// fail, and a writer that never closes cannot keep readers blocked.
    fn finish(&self) -> io::Result<()> {
        self.0.lock().writer_closed = true;
        self.0.changed.notify_all();
        Ok(())
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Source::read(self, buf)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let _ = Source::close(self);
    }
}

pub struct PipeWriter(Arc<Shared>);

impl Sink for PipeWriter {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.0.lock();
        loop {
            if state.writer_closed || state.reader_closed {
                return Err(closed_pipe());
            }
            let space = state.capacity.saturating_sub(state.buf.len());
            if space > 0 {
                let n = space.min(data.len());
                state.buf.extend(&data[..n]);
                self.0.changed.notify_all();
                return Ok(n);
            }
            state = self.0.wait(state);
        }
    }

    fn close(&self) -> io::Result<()> {
        self.0.lock().writer_closed = true;
        self.0.changed.notify_all();
        Ok(())
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Sink::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let _ = Sink::close(self);
    }
}

#[derive(Default)]
struct BufferState {
    data: Vec<u8>,
    read_pos: usize,
    closed: bool,
}

/// Non-streaming stand-in for a process stream.
///
/// Reads drain what was written and return 0 when nothing is left; after
/// [`close`](Source::close) reads and writes fail. Clones share the buffer, so
/// a test can keep one to inspect what a caller wrote.
#[derive(Clone, Default)]
pub struct ClosableBuffer(Arc<Mutex<BufferState>>);

impl ClosableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(BufferState {
            data: contents.into(),
            ..Default::default()
        })))
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything ever written, read or not.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.lock().data).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Source for ClosableBuffer {
    fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(closed_pipe());
        }
        let start = state.read_pos;
        let n = out.len().min(state.data.len() - start);
        out[..n].copy_from_slice(&state.data[start..start + n]);
        state.read_pos += n;
        Ok(n)
    }

    fn close(&self) -> io::Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

impl Sink for ClosableBuffer {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(closed_pipe());
        }
        state.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn close(&self) -> io::Result<()> {
        Source::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pipe_delivers_then_eof() {
        let (mut reader, mut writer) = pipe();
        writer.write_all(b"hello").unwrap();
        drop(writer);

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_pipe_back_pressure() {
        let (mut reader, mut writer) = pipe_with_capacity(4);
        let producer = thread::spawn(move || {
            writer.write_all(b"0123456789").unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        // only the buffered part is available until we drain
        let mut first = [0u8; 16];
        let n = reader.read(&mut first).unwrap();
        assert!(n <= 4);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        producer.join().unwrap();

        let mut all = first[..n].to_vec();
        all.extend(rest);
        assert_eq!(all, b"0123456789");
    }

    #[test]
    fn test_write_fails_after_reader_closed() {
        let (reader, mut writer) = pipe();
        drop(reader);
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_closing_reader_unblocks_writer() {
        let (reader, mut writer) = pipe_with_capacity(1);
        let producer = thread::spawn(move || writer.write_all(b"abc"));
        thread::sleep(Duration::from_millis(20));
        Source::close(&reader).unwrap();
        assert!(producer.join().unwrap().is_err());
    }

    #[test]
    fn test_read_after_close_fails() {
        let (mut reader, _writer) = pipe();
        Source::close(&reader).unwrap();
        assert!(reader.read(&mut [0u8; 1]).is_err());
    }

    #[test]
    fn test_streaming_reaches_eof() {
        let mut pipe = streaming("la la la\n");
        assert_eq!(pipe.read_to_string_lossy().unwrap(), "la la la\n");
    }

    #[test]
    fn test_streaming_larger_than_capacity() {
        let mut pipe = streaming(vec![b'x'; 3 * DEFAULT_PIPE_CAPACITY]);
        let mut out = Vec::new();
        pipe.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 3 * DEFAULT_PIPE_CAPACITY);
    }

    #[test]
    fn test_finish_delivers_buffered_then_eof() {
        let (mut reader, mut writer) = pipe();
        writer.write_all(b"tail").unwrap();
        Source::finish(&reader).unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"tail");
        assert_eq!(writer.write(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_finish_unblocks_waiting_reader() {
        let (reader, _writer) = pipe();
        let reader = Arc::new(reader);
        let consumer = {
            let reader = reader.clone();
            thread::spawn(move || Source::read(&*reader, &mut [0u8; 8]))
        };
        thread::sleep(Duration::from_millis(20));
        Source::finish(&*reader).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_closable_buffer() {
        let buffer = ClosableBuffer::with_contents("abc");
        let mut handle = ReadPipe::new(buffer.clone());

        assert_eq!(handle.read_to_string_lossy().unwrap(), "abc");
        assert_eq!(Sink::write(&buffer, b"de").unwrap(), 2);
        assert_eq!(buffer.contents(), b"abcde");

        Source::close(&buffer).unwrap();
        assert!(buffer.is_closed());
        assert!(handle.read(&mut [0u8; 1]).is_err());
        assert!(Sink::write(&buffer, b"f").is_err());
    }
}
