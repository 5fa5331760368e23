pub mod retry;

pub use retry::classify_error;
