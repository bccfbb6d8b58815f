//! git
//!
//! Single interface for all Git operations.

mod gateway;

pub use gateway::{GitError, GitGateway, NumstatEntry};
