mod compose_file;
mod environment;
mod image_builder;
mod network;
mod service;

pub use environment::{COMPOSE_FILE_NAME, CapturedOutput, Environment};
pub use image_builder::{DOCKERFILE_NAME, parse_image_id};
pub use network::{Network, NetworkRef};
pub use service::{Service, ServiceRef};
