// Logs module - per-process log files

mod router;
mod writer;

pub use router::LogRouter;
pub use writer::{LogStream, LogWriter};
