//! # VM 模块
//!
//! 对话虚拟机：逐条执行已装入程序的指令，每次调用 [`Dialogue::next`] 让出一个 [`Yield`]。
//!
//! ## 执行模型
//!
//! ```text
//! set_node(name) ──► next() ──► Yield::NodeStart
//!                    next() ──► Yield::Line / Options / Command ...
//!                    next() ──► Yield::NodeComplete
//!                    next() ──► Yield::DialogueComplete
//! ```
//!
//! VM 不关心暂停与恢复：何时再次调用 `next` 完全由协调器决定。

use std::collections::VecDeque;
use tracing::warn;

use crate::error::{ProgramError, RuntimeError, YarnResult};
use crate::line::{Command, DialogueOption, Line, OptionSet};
use crate::program::{Instruction, Operand, Program};
use crate::value::Value;
use crate::variables::VariableStorage;

/// VM 让出的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Yield {
    /// 一行对白
    Line(Line),
    /// 一组选项，等待选择
    Options(OptionSet),
    /// 一条命令
    Command(Command),
    /// 进入节点
    NodeStart(String),
    /// 离开节点
    NodeComplete(String),
    /// 对话结束
    DialogueComplete,
}

/// VM 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// 未在执行
    Stopped,
    /// 执行中
    Running,
    /// 等待选项选择
    WaitingOnOptionSelection,
}

/// 当前执行位置
#[derive(Debug, Clone)]
struct Frame {
    node: String,
    pc: usize,
}

/// 对话虚拟机
#[derive(Debug)]
pub struct Dialogue {
    program: Option<Program>,
    frame: Option<Frame>,
    state: ExecutionState,
    /// 已追加但尚未显示的选项
    pending_options: Vec<DialogueOption>,
    /// 最近一次显示的选项集
    offered: Option<OptionSet>,
    /// 一条指令产生多个让出时的排队结果
    queued: VecDeque<Yield>,
}

impl Dialogue {
    pub fn new() -> Self {
        Self {
            program: None,
            frame: None,
            state: ExecutionState::Stopped,
            pending_options: Vec::new(),
            offered: None,
            queued: VecDeque::new(),
        }
    }

    /// 装入程序，替换已有程序
    pub fn set_program(&mut self, program: Program) {
        self.stop();
        self.program = Some(program);
    }

    /// 向已有程序追加节点
    pub fn add_program(&mut self, program: Program) -> Result<(), ProgramError> {
        match &mut self.program {
            Some(existing) => existing.merge(program),
            None => {
                self.program = Some(program);
                Ok(())
            }
        }
    }

    /// 卸载所有程序
    pub fn unload_all(&mut self) {
        self.stop();
        self.program = None;
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    pub fn node_exists(&self, name: &str) -> bool {
        self.program.as_ref().is_some_and(|p| p.node_exists(name))
    }

    pub fn tags_for_node(&self, name: &str) -> Option<&[String]> {
        self.program
            .as_ref()
            .and_then(|p| p.node(name))
            .map(|n| n.tags.as_slice())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.program
            .as_ref()
            .map(|p| p.node_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// 当前节点名
    pub fn current_node(&self) -> Option<&str> {
        self.frame.as_ref().map(|f| f.node.as_str())
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// 设置起始节点
    ///
    /// 清除之前的执行位置，下一次 `next` 让出 `NodeStart`。
    pub fn set_node(&mut self, name: &str) -> Result<(), RuntimeError> {
        let program = self.program.as_ref().ok_or(RuntimeError::NoProgramLoaded)?;
        if !program.node_exists(name) {
            return Err(RuntimeError::UnknownNode {
                node: name.to_string(),
            });
        }

        self.stop();
        self.frame = Some(Frame {
            node: name.to_string(),
            pc: 0,
        });
        self.state = ExecutionState::Running;
        self.queued.push_back(Yield::NodeStart(name.to_string()));
        Ok(())
    }

    /// 提交选项选择
    ///
    /// 只能在让出 `Options` 之后调用；成功后 VM 进入该选项的目标节点。
    pub fn set_selected_option(&mut self, id: usize) -> Result<(), RuntimeError> {
        if self.state != ExecutionState::WaitingOnOptionSelection {
            return Err(RuntimeError::InvalidState {
                message: "没有等待中的选项".to_string(),
            });
        }
        let destination = self
            .offered
            .as_ref()
            .and_then(|set| set.get(id))
            .map(|o| o.destination.clone())
            .ok_or(RuntimeError::InvalidOption { id })?;

        self.transition(&destination)?;
        self.offered = None;
        self.state = ExecutionState::Running;
        Ok(())
    }

    /// 停止执行，丢弃所有待处理的让出
    pub fn stop(&mut self) {
        self.frame = None;
        self.state = ExecutionState::Stopped;
        self.pending_options.clear();
        self.offered = None;
        self.queued.clear();
    }

    /// 执行直到下一个让出点
    pub fn next(&mut self, storage: &mut dyn VariableStorage) -> YarnResult<Yield> {
        if let Some(y) = self.queued.pop_front() {
            return Ok(y);
        }

        match self.state {
            ExecutionState::Running => {}
            ExecutionState::WaitingOnOptionSelection => {
                return Err(RuntimeError::AwaitingSelection.into());
            }
            ExecutionState::Stopped => {
                return Err(RuntimeError::InvalidState {
                    message: "VM 未在执行".to_string(),
                }
                .into());
            }
        }

        loop {
            let Some(instruction) = self.fetch()? else {
                return Ok(self.finish());
            };

            match instruction {
                Instruction::Line { id, substitutions } => {
                    let subs = self.substitute(&substitutions, storage)?;
                    return Ok(Yield::Line(Line::with_substitutions(id, subs)));
                }
                Instruction::AddOption {
                    id,
                    substitutions,
                    destination,
                } => {
                    let subs = self.substitute(&substitutions, storage)?;
                    self.pending_options.push(DialogueOption {
                        id: self.pending_options.len(),
                        line: Line::with_substitutions(id, subs),
                        destination,
                    });
                }
                Instruction::ShowOptions => {
                    if self.pending_options.is_empty() {
                        warn!(node = ?self.current_node(), "显示选项时没有任何选项，已跳过");
                        continue;
                    }
                    let set = OptionSet::new(std::mem::take(&mut self.pending_options));
                    self.offered = Some(set.clone());
                    self.state = ExecutionState::WaitingOnOptionSelection;
                    return Ok(Yield::Options(set));
                }
                Instruction::Command { text } => {
                    return Ok(Yield::Command(Command::new(text)));
                }
                Instruction::Set { variable, value } => {
                    let value = self.evaluate(&value, storage)?;
                    storage.set_value(&variable, value)?;
                }
                Instruction::JumpIf { variable, node } => {
                    let flag = storage.get_value(&variable)?;
                    if flag.as_ref().and_then(Value::as_bool) == Some(true) {
                        self.transition(&node)?;
                        return Ok(self.pop_queued());
                    }
                }
                Instruction::RunNode { node } => {
                    self.transition(&node)?;
                    return Ok(self.pop_queued());
                }
                Instruction::Stop => return Ok(self.finish()),
            }
        }
    }

    /// 取出当前指令并前进，节点末尾返回 `None`
    fn fetch(&mut self) -> Result<Option<Instruction>, RuntimeError> {
        let program = self.program.as_ref().ok_or(RuntimeError::NoProgramLoaded)?;
        let frame = self.frame.as_mut().ok_or_else(|| RuntimeError::InvalidState {
            message: "没有执行位置".to_string(),
        })?;
        let node = program
            .node(&frame.node)
            .ok_or_else(|| RuntimeError::UnknownNode {
                node: frame.node.clone(),
            })?;

        let instruction = node.instructions.get(frame.pc).cloned();
        if instruction.is_some() {
            frame.pc += 1;
        }
        Ok(instruction)
    }

    /// 离开当前节点，进入目标节点
    fn transition(&mut self, target: &str) -> Result<(), RuntimeError> {
        if !self.node_exists(target) {
            return Err(RuntimeError::UnknownNode {
                node: target.to_string(),
            });
        }

        if let Some(current) = self.frame.take() {
            self.queued.push_back(Yield::NodeComplete(current.node));
        }
        self.queued.push_back(Yield::NodeStart(target.to_string()));
        self.frame = Some(Frame {
            node: target.to_string(),
            pc: 0,
        });
        self.pending_options.clear();
        Ok(())
    }

    /// 结束对话
    fn finish(&mut self) -> Yield {
        if let Some(current) = self.frame.take() {
            self.queued.push_back(Yield::NodeComplete(current.node));
        }
        self.queued.push_back(Yield::DialogueComplete);
        self.state = ExecutionState::Stopped;
        self.pending_options.clear();
        self.pop_queued()
    }

    fn pop_queued(&mut self) -> Yield {
        self.queued.pop_front().unwrap_or(Yield::DialogueComplete)
    }

    fn evaluate(&self, operand: &Operand, storage: &dyn VariableStorage) -> YarnResult<Value> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Variable(name) => storage.get_value(name)?.ok_or_else(|| {
                RuntimeError::UndefinedVariable { name: name.clone() }.into()
            }),
        }
    }

    fn substitute(
        &self,
        operands: &[Operand],
        storage: &dyn VariableStorage,
    ) -> YarnResult<Vec<String>> {
        operands
            .iter()
            .map(|op| self.evaluate(op, storage).map(|v| v.to_string()))
            .collect()
    }
}

impl Default for Dialogue {
    fn default() -> Self {
        Self::new()
    }
}
