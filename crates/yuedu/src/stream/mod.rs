pub mod handler;
pub mod sse;

pub use handler::{ProgressStream, StreamHandler, NOT_FOUND_MESSAGE};
