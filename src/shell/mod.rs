//! Secure shell execution: policy, validation and the process gateway.

mod gateway;
pub mod policy;
mod process;
pub mod validator;

pub use gateway::{PipelineOutput, ShellGateway, ShellOutput, ShellRequest};
pub use policy::{DangerousPattern, SecurityPolicy, ShellMode};
pub use validator::validate;

pub(crate) use process::{ProcessTable, drain, read_all};
