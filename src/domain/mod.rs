pub mod command;
pub mod error;
pub mod filesystem;
pub mod topology;

pub use command::{
    Command, Commander, ReadPipe, Signal, Sink, Source, StreamHandle, WritePipe, argv,
    closed_pipe,
};
pub use error::{CommandError, ComposeError};
pub use filesystem::Filesystem;
pub use topology::{
    ComposeConfig, EnvironmentState, NetworkConfig, NetworkId, ServiceConfig, ServiceId,
    ServiceNetworkConfig,
};
