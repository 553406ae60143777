pub mod declaration;
pub mod local_fs;
pub mod process;

pub use declaration::{Declaration, load_declaration};
pub use local_fs::LocalFilesystem;
pub use process::{ProcessCommand, ProcessCommander};
