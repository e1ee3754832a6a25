//! # Runtime 模块
//!
//! 对话虚拟机与执行协调器。
//!
//! - [`vm`]：指令级执行，每次让出一个 [`Yield`]
//! - [`DialogueRunner`]：把让出分发给呈现层和命令处理器，管理挂起与恢复

mod continuation;
pub(crate) mod runner;
mod timer;
pub mod vm;

pub use continuation::{Continuation, OptionSelector};
pub use runner::{DialogueRunner, RunState, RunnerConfig, RunnerEvent};
pub use vm::{Dialogue, ExecutionState, Yield};
