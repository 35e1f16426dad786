pub mod pool;
pub mod report;
pub mod scanner;
pub mod upload;
