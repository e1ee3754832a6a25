//! # Presentation 模块
//!
//! 呈现层边界：对白显示、选项显示、对话开始/结束通知，以及未注册命令的兜底处理。
//!
//! ## 设计说明
//!
//! - [`DialoguePresenter`] 是协调器消费的固定接口
//! - 每次交接都附带一个一次性的继续回调（[`Continuation`] / [`OptionSelector`]），
//!   呈现层通过返回 [`ExecutionType`] 告诉协调器是立即继续还是等待回调
//! - [`EventDispatcher`] 是原生实现：把每次调用转成 [`PresentationEvent`] 排队，
//!   由宿主取走并在合适时机触发继续

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CapabilityError, RuntimeError, YarnError, YarnResult};
use crate::line::{Command, Line, OptionSet};
use crate::runtime::{Continuation, OptionSelector};
use crate::text::LineTextResolver;

/// 交接后的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// 立即继续执行
    ContinueExecution,
    /// 暂停，直到继续回调被触发
    PauseExecution,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContinueExecution => "continue",
            Self::PauseExecution => "pause",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 呈现层接口
pub trait DialoguePresenter {
    /// 对话从 `node` 开始
    fn dialogue_started(&mut self, node: &str) -> Result<(), CapabilityError>;

    /// 对话自然结束
    fn dialogue_complete(&mut self) -> Result<(), CapabilityError>;

    /// 显示选项集，选择通过 `on_selected` 回传
    fn display_options(
        &mut self,
        options: &OptionSet,
        text: &dyn LineTextResolver,
        on_selected: OptionSelector,
    ) -> Result<(), CapabilityError>;

    /// 显示一行对白
    fn display_line(
        &mut self,
        line: &Line,
        text: &dyn LineTextResolver,
        on_complete: Continuation,
    ) -> Result<ExecutionType, CapabilityError>;

    /// 处理未注册的命令
    fn execute_command(
        &mut self,
        command: &Command,
        on_complete: Continuation,
    ) -> Result<ExecutionType, CapabilityError>;
}

/// 原生呈现层发出的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresentationEvent {
    /// 对话开始
    DialogueStarted { node: String },
    /// 对话结束
    DialogueComplete,
    /// 显示对白
    DisplayLine { text: String },
    /// 显示选项（选项 ID → 文本）
    DisplayOptions { options: BTreeMap<usize, String> },
    /// 未注册的命令
    UnhandledCommand { text: String },
}

#[derive(Default)]
struct DispatcherState {
    events: VecDeque<PresentationEvent>,
    continuation: Option<Continuation>,
    selector: Option<OptionSelector>,
}

/// 事件分发呈现层
///
/// 克隆得到的句柄共享同一份状态：一份交给协调器，一份留给宿主。
#[derive(Clone, Default)]
pub struct EventDispatcher {
    state: Rc<RefCell<DispatcherState>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取走所有待处理事件
    pub fn take_events(&self) -> Vec<PresentationEvent> {
        self.state.borrow_mut().events.drain(..).collect()
    }

    /// 是否有等待继续的对白
    pub fn is_waiting_for_continue(&self) -> bool {
        self.state.borrow().continuation.is_some()
    }

    /// 是否有等待选择的选项
    pub fn is_waiting_for_selection(&self) -> bool {
        self.state.borrow().selector.is_some()
    }

    /// 继续对话
    ///
    /// 没有等待中的对白时返回 `false`。
    pub fn continue_dialogue(&self) -> YarnResult<bool> {
        // 先取出回调再触发，触发过程中协调器会重新进入本对象
        let continuation = self.state.borrow_mut().continuation.take();
        match continuation {
            Some(c) => {
                c.resume()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 提交选项
    ///
    /// 没有等待中的选项时返回 `false`；选项无效时回调保留，可以重试。
    /// 选择成功但随后的执行失败时回调不再保留。
    pub fn select_option(&self, id: usize) -> YarnResult<bool> {
        let selector = self.state.borrow_mut().selector.take();
        let Some(selector) = selector else {
            return Ok(false);
        };

        match selector.select(id) {
            Ok(()) => Ok(true),
            Err(e @ YarnError::Runtime(RuntimeError::InvalidOption { .. })) => {
                self.state.borrow_mut().selector.get_or_insert(selector);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn push(&self, event: PresentationEvent) {
        self.state.borrow_mut().events.push_back(event);
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventDispatcher")
            .field("events", &state.events)
            .field("waiting_for_continue", &state.continuation.is_some())
            .field("waiting_for_selection", &state.selector.is_some())
            .finish()
    }
}

impl DialoguePresenter for EventDispatcher {
    fn dialogue_started(&mut self, node: &str) -> Result<(), CapabilityError> {
        self.push(PresentationEvent::DialogueStarted {
            node: node.to_string(),
        });
        Ok(())
    }

    fn dialogue_complete(&mut self) -> Result<(), CapabilityError> {
        {
            let mut state = self.state.borrow_mut();
            state.continuation = None;
            state.selector = None;
        }
        self.push(PresentationEvent::DialogueComplete);
        Ok(())
    }

    fn display_options(
        &mut self,
        options: &OptionSet,
        text: &dyn LineTextResolver,
        on_selected: OptionSelector,
    ) -> Result<(), CapabilityError> {
        let options = options
            .options
            .iter()
            .map(|o| (o.id, text.resolve_line_text(&o.line)))
            .collect();
        self.state.borrow_mut().selector = Some(on_selected);
        self.push(PresentationEvent::DisplayOptions { options });
        Ok(())
    }

    fn display_line(
        &mut self,
        line: &Line,
        text: &dyn LineTextResolver,
        on_complete: Continuation,
    ) -> Result<ExecutionType, CapabilityError> {
        let text = text.resolve_line_text(line);
        self.state.borrow_mut().continuation = Some(on_complete);
        self.push(PresentationEvent::DisplayLine { text });
        Ok(ExecutionType::PauseExecution)
    }

    fn execute_command(
        &mut self,
        command: &Command,
        _on_complete: Continuation,
    ) -> Result<ExecutionType, CapabilityError> {
        warn!(command = %command.text, "没有处理该命令的处理器");
        self.push(PresentationEvent::UnhandledCommand {
            text: command.text.clone(),
        });
        Ok(ExecutionType::ContinueExecution)
    }
}
