//! # Yarn Runtime
//!
//! 已编译对话程序的执行协调器。
//!
//! ## 架构概述
//!
//! `yarn-runtime` 是纯逻辑核心，不依赖 IO 或渲染引擎。
//! 协调器驱动对话 VM，把每次让出分发给呈现层或命令处理器，
//! 消费者通过一次性继续回调告诉协调器何时恢复：
//!
//! ```text
//! Host                              DialogueRunner                      Dialogue (VM)
//!   │── load / start ──────────────►│── set_node ──────────────────────►│
//!   │                               │◄── Yield ─────────────────────────│ next()
//!   │◄── display_line(Continuation) │
//!   │── continuation.resume() ─────►│── next() ────────────────────────►│
//!   │◄── display_options(Selector)  │
//!   │── selector.select(id) ───────►│── set_selected_option ───────────►│
//!   │◄── dialogue_complete ─────────│◄── DialogueComplete ──────────────│
//! ```
//!
//! ## 核心类型
//!
//! - [`DialogueRunner`]：执行协调器
//! - [`DialoguePresenter`]：呈现层接口，[`EventDispatcher`] 是原生实现
//! - [`CommandRegistry`]：命令注册与解析
//! - [`CapabilityAdapter`]：把动态宿主对象适配为固定接口
//! - [`VariableStorage`]：变量存储接口，[`MemoryVariableStorage`] 是原生实现
//!
//! ## 使用示例
//!
//! ```ignore
//! use yarn_runtime::{DialogueRunner, EventDispatcher, PresentationEvent, Program, RunnerConfig};
//!
//! let program = Program::from_bytes(&bytes)?;
//! let dispatcher = EventDispatcher::new();
//! let mut runner = DialogueRunner::native(dispatcher.clone(), RunnerConfig::default())
//!     .with_text_resolver(string_table);
//! runner.register_command("shake", |args| shake_camera(args));
//!
//! runner.load(vec![program])?;
//! runner.start()?;
//!
//! while runner.is_dialogue_running() {
//!     for event in dispatcher.take_events() {
//!         match event {
//!             PresentationEvent::DisplayLine { text } => show(text),
//!             PresentationEvent::DisplayOptions { options } => show_choices(options),
//!             _ => {}
//!         }
//!     }
//!     // 等待输入，然后 dispatcher.continue_dialogue() / dispatcher.select_option(id)
//!     runner.update(frame_time)?;
//! }
//! ```
//!
//! ## 模块结构
//!
//! - [`runtime`]：VM、协调器、继续回调
//! - [`commands`]：命令注册表、解析顺序、内置 `wait`
//! - [`capability`]：宿主对象模型与能力适配
//! - [`presentation`]：呈现层接口与事件分发
//! - [`program`]：程序模型与编解码
//! - [`diagnostic`]：程序静态检查

pub mod capability;
pub mod commands;
pub mod diagnostic;
pub mod error;
pub mod line;
pub mod presentation;
pub mod program;
pub mod runtime;
pub mod text;
pub mod value;
pub mod variables;

// 重导出核心类型
pub use capability::{
    Callable, Capability, CapabilityAdapter, CommandProviderCapability, HostCommandProvider,
    HostError, HostObject, HostPresenter, HostVariableStorage, MethodInfo,
    PresentationCapability, ScriptObject, Variant, VariantType, VariableStorageCapability,
};
pub use commands::{
    BlockingCommandFn, CommandFn, CommandHandler, CommandProvider, CommandRegistry,
    ResolvedCommand,
};
pub use diagnostic::{
    Diagnostic, DiagnosticLevel, DiagnosticResult, analyze_program, check_line_ids,
    get_jump_targets,
};
pub use error::{CapabilityError, ProgramError, RuntimeError, YarnError, YarnResult};
pub use line::{Command, DialogueOption, Line, OptionSet};
pub use presentation::{DialoguePresenter, EventDispatcher, ExecutionType, PresentationEvent};
pub use program::{DEFAULT_START, Instruction, Node, Operand, Program};
pub use runtime::{
    Continuation, Dialogue, DialogueRunner, ExecutionState, OptionSelector, RunState,
    RunnerConfig, RunnerEvent, Yield,
};
pub use text::{LineTextResolver, StringTable};
pub use value::Value;
pub use variables::{MemoryVariableStorage, VariableStorage};
