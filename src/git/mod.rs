//! Git invocation with transient-failure retry.

#[cfg(test)]
pub(crate) mod fixture;
mod gateway;
pub mod retry;
pub mod runner;
pub mod transient;

pub use gateway::{GitGateway, GitOutput, RunOptions};
pub use retry::{Backoff, RetryPolicy};
pub use runner::{GitInvocation, GitRunner, ProcessGitRunner, RawOutput};
pub use transient::{FailureClass, classify};
