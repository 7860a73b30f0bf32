pub mod configs;
pub mod decode;
pub mod upstream;

pub use decode::StreamEvent;
pub use upstream::{UpstreamClient, UpstreamError};
