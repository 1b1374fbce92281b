pub mod job;
pub mod pool;
pub mod scanner;

pub use job::{ImportTask, ImportTaskResult};
pub use pool::{fail_unfinished, ImportWorkerPool};
pub use scanner::DirectoryScanner;
