//! Deterministic stand-ins for the process and filesystem backends.
//!
//! Public so integration tests and downstream crates can script an
//! [`Environment`](crate::Environment) without Docker.

mod fake_command;
mod fake_fs;
mod pipe;

pub use fake_command::{FakeCommand, FakeCommander, Invocation};
pub use fake_fs::{FakeDir, FakeFile, FakeFilesystem};
pub use pipe::{
    ClosableBuffer, DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe, pipe_with_capacity,
    streaming,
};
