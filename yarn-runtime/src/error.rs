//! # Error 模块
//!
//! 定义 yarn-runtime 中使用的错误类型。
//!
//! - 结构性错误（[`ProgramError::NodeConflict`]、[`CapabilityError::MissingMethod`]）
//!   说明集成配置有误，调用方应中止初始化
//! - 运行时状态错误（[`RuntimeError`]）可恢复，出错时协调器内部状态保持不变

use thiserror::Error;

/// 程序加载错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    /// 合并程序时节点名冲突
    #[error("节点 '{node}' 在多个程序中重复定义")]
    NodeConflict { node: String },

    /// 编译产物无法解码
    #[error("程序解码失败: {message}")]
    Decode { message: String },

    /// 程序无法编码
    #[error("程序编码失败: {message}")]
    Encode { message: String },
}

/// 运行时错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// 节点不存在
    #[error("节点 '{node}' 不存在")]
    UnknownNode { node: String },

    /// 对话未在运行
    #[error("对话未在运行")]
    NotRunning,

    /// 选项 ID 不在最近一次提供的选项集中
    #[error("无效的选项 {id}")]
    InvalidOption { id: usize },

    /// 对话运行中不允许修改程序
    #[error("对话运行中，不允许执行 {operation}")]
    DialogueActive { operation: String },

    /// 尚未加载程序
    #[error("尚未加载任何程序")]
    NoProgramLoaded,

    /// 读取未定义的变量
    #[error("变量 '{name}' 未定义")]
    UndefinedVariable { name: String },

    /// 正在等待选项选择，不能直接继续
    #[error("正在等待选项选择")]
    AwaitingSelection,

    /// 无效的状态操作
    #[error("无效的状态操作: {message}")]
    InvalidState { message: String },
}

/// 能力适配错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    /// 宿主对象缺少能力要求的方法
    #[error("宿主对象 '{object}' 缺少 {capability} 能力要求的方法 '{method}'")]
    MissingMethod {
        capability: &'static str,
        object: String,
        method: String,
    },

    /// 动态调用失败
    #[error("调用 '{object}.{method}' 失败: {message}")]
    Invocation {
        object: String,
        method: String,
        message: String,
    },

    /// 返回值类型不符
    #[error("'{object}.{method}' 返回了 {actual}，期望 {expected}")]
    ReturnType {
        object: String,
        method: String,
        expected: String,
        actual: String,
    },
}

/// yarn-runtime 统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum YarnError {
    /// 程序错误
    #[error("程序错误: {0}")]
    Program(#[from] ProgramError),

    /// 运行时错误
    #[error("运行时错误: {0}")]
    Runtime(#[from] RuntimeError),

    /// 能力适配错误
    #[error("能力适配错误: {0}")]
    Capability(#[from] CapabilityError),
}

/// Result 类型别名
pub type YarnResult<T> = Result<T, YarnError>;
