//! # Runner 模块
//!
//! 对话执行协调器。
//!
//! ## 执行模型
//!
//! ```text
//! start(node) ──► VM.next() ──► Line     ──► presenter.display_line(.., Continuation)
//!                            ──► Options  ──► presenter.display_options(.., OptionSelector)
//!                            ──► Command  ──► CommandRegistry / presenter.execute_command
//!                            ──► NodeStart / NodeComplete ──► RunnerEvent，自动继续
//!                            ──► DialogueComplete ──► Completed，终止
//! ```
//!
//! 1. 每次让出交给一个消费者，并附带一次性继续回调
//! 2. 消费者返回 `ContinueExecution` 或在交接期间同步触发回调时，立即继续
//! 3. 否则协调器挂起，直到回调、`continue_dialogue()` 或 `select_option()` 到来
//!
//! ## 并发模型
//!
//! 单线程、不可重入。同一时刻最多只有一个挂起点，由挂起代号保证：
//! 每次挂起生成新代号，恢复或 `stop()` 后旧代号失效，迟到的回调成为空操作。

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::capability::HostObject;
use crate::commands::{CommandHandler, CommandProvider, CommandRegistry, builtin};
use crate::error::{RuntimeError, YarnResult};
use crate::line::Command;
use crate::presentation::{DialoguePresenter, ExecutionType};
use crate::program::{DEFAULT_START, Program};
use crate::runtime::timer::WaitTimers;
use crate::runtime::vm::{Dialogue, Yield};
use crate::runtime::{Continuation, OptionSelector};
use crate::text::{LineTextResolver, StringTable};
use crate::value::Value;
use crate::variables::{MemoryVariableStorage, VariableStorage};

/// 协调器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// 默认起始节点
    #[serde(default = "default_start_node")]
    pub start_node: String,

    /// `initialize()` 后是否自动开始
    #[serde(default)]
    pub start_automatically: bool,

    /// 原生变量存储的初始快照
    #[serde(default)]
    pub initial_variables: BTreeMap<String, Value>,
}

fn default_start_node() -> String {
    DEFAULT_START.to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            start_node: default_start_node(),
            start_automatically: false,
            initial_variables: BTreeMap::new(),
        }
    }
}

/// 对话运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
}

/// 节点生命周期与完成事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerEvent {
    NodeStart(String),
    NodeComplete(String),
    DialogueComplete,
}

/// 当前挂起点
#[derive(Debug, Clone, PartialEq)]
enum Suspension {
    Line,
    Options(Vec<usize>),
    Command,
}

#[derive(Debug, Default)]
struct Pending {
    generation: u64,
    suspension: Option<Suspension>,
}

struct RunnerCore {
    vm: Dialogue,
    storage: Box<dyn VariableStorage>,
    run_state: RunState,
    config: RunnerConfig,
}

/// 协调器共享状态
///
/// 继续回调通过弱引用访问这里。各部分分别放在独立的 `RefCell` 中，
/// 调用呈现层或命令处理器期间不持有 `core` 的借用。
pub(crate) struct RunnerShared {
    core: RefCell<RunnerCore>,
    presenter: RefCell<Box<dyn DialoguePresenter>>,
    text: RefCell<Box<dyn LineTextResolver>>,
    commands: RefCell<CommandRegistry>,
    timers: RefCell<WaitTimers>,
    pending: RefCell<Pending>,
    events: RefCell<VecDeque<RunnerEvent>>,
    /// 正在执行驱动循环
    driving: Cell<bool>,
    /// 驱动循环内收到的同步恢复请求
    wake: Cell<bool>,
}

impl RunnerShared {
    fn is_running(&self) -> bool {
        self.core.borrow().run_state == RunState::Running
    }

    pub(crate) fn is_pending(&self, generation: u64) -> bool {
        let pending = self.pending.borrow();
        pending.generation == generation && pending.suspension.is_some()
    }

    /// 进入挂起，返回新代号
    fn suspend(&self, suspension: Suspension) -> u64 {
        let mut pending = self.pending.borrow_mut();
        pending.generation += 1;
        pending.suspension = Some(suspension);
        pending.generation
    }

    /// 使当前挂起点失效，指向它的计时器一并丢弃
    fn invalidate_pending(&self) {
        {
            let mut pending = self.pending.borrow_mut();
            pending.generation += 1;
            pending.suspension = None;
        }
        self.timers.borrow_mut().prune_stale();
    }

    fn emit(&self, event: RunnerEvent) {
        self.events.borrow_mut().push_back(event);
    }

    pub(crate) fn schedule(&self, delay: Duration, continuation: Continuation) {
        debug!(delay_ms = delay.as_millis() as u64, "登记等待计时器");
        self.timers.borrow_mut().schedule(delay, continuation);
    }

    /// 继续回调入口
    pub(crate) fn resume(self: &Rc<Self>, generation: u64) -> YarnResult<()> {
        if !self.is_pending(generation) || !self.is_running() {
            debug!(generation, "继续回调已失效，忽略");
            return Ok(());
        }
        self.invalidate_pending();
        self.drive()
    }

    /// 提交选项并恢复
    pub(crate) fn apply_selection(self: &Rc<Self>, id: usize) -> YarnResult<()> {
        let offered = matches!(
            &self.pending.borrow().suspension,
            Some(Suspension::Options(ids)) if ids.contains(&id)
        );
        if !offered {
            return Err(RuntimeError::InvalidOption { id }.into());
        }

        self.core.borrow_mut().vm.set_selected_option(id)?;
        self.invalidate_pending();
        self.drive()
    }

    /// 驱动 VM 直到挂起或结束
    ///
    /// 在驱动循环内部被调用（同步触发回调）时只记录恢复请求，由外层循环继续。
    fn drive(self: &Rc<Self>) -> YarnResult<()> {
        if self.driving.replace(true) {
            self.wake.set(true);
            return Ok(());
        }
        self.wake.set(false);
        let result = self.run_until_suspended();
        self.driving.set(false);
        self.wake.set(false);

        if let Err(e) = &result {
            error!(error = %e, "对话执行失败，已停止");
            self.halt();
        }
        result
    }

    fn run_until_suspended(self: &Rc<Self>) -> YarnResult<()> {
        loop {
            let step = {
                let mut core = self.core.borrow_mut();
                if core.run_state != RunState::Running {
                    return Ok(());
                }
                let RunnerCore { vm, storage, .. } = &mut *core;
                vm.next(storage.as_mut())?
            };

            let proceed = match step {
                Yield::Line(line) => {
                    let continuation = Continuation::new(self, self.suspend(Suspension::Line));
                    let text = self.text.borrow();
                    let exec = self.presenter.borrow_mut().display_line(
                        &line,
                        text.as_ref(),
                        continuation,
                    )?;
                    self.after_handoff(exec)
                }
                Yield::Options(options) => {
                    let selector =
                        OptionSelector::new(self, self.suspend(Suspension::Options(options.ids())));
                    let text = self.text.borrow();
                    self.presenter.borrow_mut().display_options(
                        &options,
                        text.as_ref(),
                        selector,
                    )?;
                    self.after_handoff(ExecutionType::PauseExecution)
                }
                Yield::Command(command) => {
                    let exec = self.dispatch_command(&command)?;
                    self.after_handoff(exec)
                }
                Yield::NodeStart(node) => {
                    debug!(node = %node, "进入节点");
                    self.emit(RunnerEvent::NodeStart(node));
                    true
                }
                Yield::NodeComplete(node) => {
                    debug!(node = %node, "离开节点");
                    self.emit(RunnerEvent::NodeComplete(node));
                    true
                }
                Yield::DialogueComplete => {
                    self.core.borrow_mut().run_state = RunState::Completed;
                    self.invalidate_pending();
                    self.timers.borrow_mut().clear();
                    self.emit(RunnerEvent::DialogueComplete);
                    info!("对话结束");
                    self.presenter.borrow_mut().dialogue_complete()?;
                    return Ok(());
                }
            };

            if !proceed {
                return Ok(());
            }
        }
    }

    /// 交接之后是否继续执行
    fn after_handoff(&self, exec: ExecutionType) -> bool {
        if self.wake.replace(false) {
            return true;
        }
        match exec {
            ExecutionType::ContinueExecution => {
                self.invalidate_pending();
                true
            }
            ExecutionType::PauseExecution => false,
        }
    }

    /// 解析并分发命令
    fn dispatch_command(self: &Rc<Self>, command: &Command) -> YarnResult<ExecutionType> {
        let tokens = command.tokens();
        if tokens.is_empty() {
            debug!("空命令，跳过");
            return Ok(ExecutionType::ContinueExecution);
        }

        // 先克隆出处理器，调用期间不持有注册表借用
        let resolved = self.commands.borrow().resolve(&tokens);
        let Some(resolved) = resolved else {
            debug!(command = %command.text, "未注册的命令，交给呈现层");
            let continuation = Continuation::new(self, self.suspend(Suspension::Command));
            return Ok(self
                .presenter
                .borrow_mut()
                .execute_command(command, continuation)?);
        };

        debug!(command = %resolved.name, args = ?resolved.args, "分发命令");
        match resolved.handler {
            CommandHandler::Immediate(handler) => {
                handler(&resolved.args);
                Ok(ExecutionType::ContinueExecution)
            }
            CommandHandler::Blocking(handler) => {
                let continuation = Continuation::new(self, self.suspend(Suspension::Command));
                handler(&resolved.args, continuation);
                Ok(ExecutionType::PauseExecution)
            }
        }
    }

    /// 停止执行并丢弃所有挂起状态
    fn halt(&self) {
        {
            let mut core = self.core.borrow_mut();
            core.vm.stop();
            core.run_state = RunState::Completed;
        }
        self.invalidate_pending();
        self.timers.borrow_mut().clear();
    }
}

/// 对话执行协调器
///
/// 持有 VM、变量存储、命令注册表和呈现层，驱动开始/继续/停止的生命周期。
///
/// # 使用示例
///
/// ```ignore
/// let dispatcher = EventDispatcher::new();
/// let mut runner = DialogueRunner::native(dispatcher.clone(), RunnerConfig::default());
/// runner.load(vec![program])?;
/// runner.start()?;
///
/// for event in dispatcher.take_events() {
///     // 显示文本 / 选项...
/// }
/// dispatcher.continue_dialogue()?;
/// ```
pub struct DialogueRunner {
    shared: Rc<RunnerShared>,
}

impl DialogueRunner {
    /// 使用指定的呈现层和变量存储创建协调器
    pub fn new(
        presenter: impl DialoguePresenter + 'static,
        storage: impl VariableStorage + 'static,
        config: RunnerConfig,
    ) -> Self {
        let mut commands = CommandRegistry::new();
        commands.register_blocking(builtin::WAIT_COMMAND, builtin::wait);

        let core = RunnerCore {
            vm: Dialogue::new(),
            storage: Box::new(storage),
            run_state: RunState::NotStarted,
            config,
        };

        Self {
            shared: Rc::new(RunnerShared {
                core: RefCell::new(core),
                presenter: RefCell::new(Box::new(presenter)),
                text: RefCell::new(Box::new(StringTable::new())),
                commands: RefCell::new(commands),
                timers: RefCell::new(WaitTimers::default()),
                pending: RefCell::new(Pending::default()),
                events: RefCell::new(VecDeque::new()),
                driving: Cell::new(false),
                wake: Cell::new(false),
            }),
        }
    }

    /// 使用原生变量存储创建协调器，初始快照取自配置
    pub fn native(presenter: impl DialoguePresenter + 'static, config: RunnerConfig) -> Self {
        let storage = MemoryVariableStorage::with_defaults(config.initial_variables.clone());
        Self::new(presenter, storage, config)
    }

    /// 设置行文本解析器
    pub fn with_text_resolver(self, resolver: impl LineTextResolver + 'static) -> Self {
        self.set_text_resolver(resolver);
        self
    }

    pub fn set_text_resolver(&self, resolver: impl LineTextResolver + 'static) {
        *self.shared.text.borrow_mut() = Box::new(resolver);
    }

    /// 初始化：重置变量、装入程序，按配置自动开始
    pub fn initialize(&mut self, programs: Vec<Program>) -> YarnResult<()> {
        self.shared.core.borrow_mut().storage.reset_to_defaults()?;
        if !programs.is_empty() {
            self.load(programs)?;
        }
        if self.shared.core.borrow().config.start_automatically {
            self.start()?;
        }
        Ok(())
    }

    /// 合并并装入程序，替换已装入的程序
    pub fn load(&mut self, programs: Vec<Program>) -> YarnResult<()> {
        let mut core = self.shared.core.borrow_mut();
        if core.run_state == RunState::Running {
            return Err(RuntimeError::DialogueActive {
                operation: "load".to_string(),
            }
            .into());
        }

        let combined = Program::combine(programs)?;
        info!(program = %combined.name, nodes = combined.len(), "装入程序");
        core.vm.set_program(combined);
        Ok(())
    }

    /// 向已装入的程序追加节点
    pub fn add_program(&mut self, program: Program) -> YarnResult<()> {
        self.shared.core.borrow_mut().vm.add_program(program)?;
        Ok(())
    }

    /// 从配置的起始节点开始
    pub fn start(&mut self) -> YarnResult<()> {
        let node = self.shared.core.borrow().config.start_node.clone();
        self.start_at(&node)
    }

    /// 从指定节点开始
    pub fn start_at(&mut self, node: &str) -> YarnResult<()> {
        {
            let mut core = self.shared.core.borrow_mut();
            if core.run_state == RunState::Running {
                return Err(RuntimeError::DialogueActive {
                    operation: "start".to_string(),
                }
                .into());
            }
            core.vm.set_node(node)?;
            core.run_state = RunState::Running;
        }
        self.shared.invalidate_pending();
        self.shared.timers.borrow_mut().clear();
        info!(node, "对话开始");

        let started = self.shared.presenter.borrow_mut().dialogue_started(node);
        if let Err(e) = started {
            error!(error = %e, "对话开始通知失败，已停止");
            self.shared.halt();
            return Err(e.into());
        }
        self.shared.drive()
    }

    /// 从上一个让出点继续
    ///
    /// 当前挂起的对白或命令回调随之失效。
    pub fn continue_dialogue(&mut self) -> YarnResult<()> {
        if !self.shared.is_running() {
            return Err(RuntimeError::NotRunning.into());
        }
        if matches!(
            self.shared.pending.borrow().suspension,
            Some(Suspension::Options(_))
        ) {
            return Err(RuntimeError::AwaitingSelection.into());
        }
        self.shared.invalidate_pending();
        self.shared.drive()
    }

    /// 选择选项并继续
    pub fn select_option(&mut self, id: usize) -> YarnResult<()> {
        if !self.shared.is_running() {
            return Err(RuntimeError::NotRunning.into());
        }
        self.shared.apply_selection(id)
    }

    /// 立即停止，丢弃挂起的回调和计时器
    pub fn stop(&mut self) {
        if self.shared.is_running() {
            info!("对话停止");
        }
        self.shared.halt();
    }

    /// 重置变量并从起始节点重新开始
    pub fn reset_dialogue(&mut self) -> YarnResult<()> {
        self.stop();
        self.shared.core.borrow_mut().storage.reset_to_defaults()?;
        self.start()
    }

    /// 卸载程序
    pub fn clear(&mut self) -> YarnResult<()> {
        let mut core = self.shared.core.borrow_mut();
        if core.run_state == RunState::Running {
            return Err(RuntimeError::DialogueActive {
                operation: "clear".to_string(),
            }
            .into());
        }
        core.vm.unload_all();
        Ok(())
    }

    /// 推进等待计时器，触发到期的回调
    pub fn update(&mut self, delta: Duration) -> YarnResult<()> {
        let due = self.shared.timers.borrow_mut().advance(delta);
        for continuation in due {
            continuation.resume()?;
        }
        Ok(())
    }

    /// 距离下一个计时器到期的时长
    pub fn next_wake(&self) -> Option<Duration> {
        self.shared.timers.borrow().next_wake()
    }

    /// 等待中的计时器数量
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.borrow().len()
    }

    pub fn node_exists(&self, name: &str) -> bool {
        self.shared.core.borrow().vm.node_exists(name)
    }

    pub fn tags_for_node(&self, name: &str) -> YarnResult<Vec<String>> {
        self.shared
            .core
            .borrow()
            .vm
            .tags_for_node(name)
            .map(<[String]>::to_vec)
            .ok_or_else(|| {
                RuntimeError::UnknownNode {
                    node: name.to_string(),
                }
                .into()
            })
    }

    pub fn node_names(&self) -> Vec<String> {
        self.shared.core.borrow().vm.node_names()
    }

    pub fn current_node_name(&self) -> Option<String> {
        self.shared
            .core
            .borrow()
            .vm
            .current_node()
            .map(str::to_string)
    }

    pub fn is_dialogue_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn run_state(&self) -> RunState {
        self.shared.core.borrow().run_state
    }

    pub fn config(&self) -> RunnerConfig {
        self.shared.core.borrow().config.clone()
    }

    /// 取走所有节点/完成事件
    pub fn take_events(&self) -> Vec<RunnerEvent> {
        self.shared.events.borrow_mut().drain(..).collect()
    }

    /// 变量存储
    pub fn variables(&self) -> Ref<'_, dyn VariableStorage> {
        Ref::map(self.shared.core.borrow(), |core| core.storage.as_ref())
    }

    pub fn variables_mut(&mut self) -> RefMut<'_, dyn VariableStorage> {
        RefMut::map(self.shared.core.borrow_mut(), |core| core.storage.as_mut())
    }

    /// 命令注册表
    pub fn commands(&self) -> Ref<'_, CommandRegistry> {
        self.shared.commands.borrow()
    }

    pub fn commands_mut(&mut self) -> RefMut<'_, CommandRegistry> {
        self.shared.commands.borrow_mut()
    }

    /// 注册即时命令，重名时返回 `false`
    pub fn register_command(&mut self, name: &str, handler: impl Fn(&[String]) + 'static) -> bool {
        self.commands_mut().register(name, handler)
    }

    /// 注册阻塞命令，重名时返回 `false`
    pub fn register_blocking_command(
        &mut self,
        name: &str,
        handler: impl Fn(&[String], Continuation) + 'static,
    ) -> bool {
        self.commands_mut().register_blocking(name, handler)
    }

    pub fn remove_command(&mut self, name: &str) -> bool {
        self.commands_mut().remove(name)
    }

    /// 导入命令提供者的所有处理器
    pub fn register_commands_from(&mut self, provider: &dyn CommandProvider) -> YarnResult<usize> {
        Ok(self.commands_mut().register_all(provider)?)
    }

    /// 扫描宿主对象树，注册找到的命令
    pub fn scan_for_commands(&mut self, root: &Rc<dyn HostObject>) -> usize {
        self.commands_mut().scan_for_commands(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::YarnError;
    use crate::presentation::EventDispatcher;
    use crate::program::{Instruction, Node};

    fn runner() -> (DialogueRunner, EventDispatcher) {
        let dispatcher = EventDispatcher::new();
        let mut runner = DialogueRunner::native(dispatcher.clone(), RunnerConfig::default());
        runner
            .load(vec![
                Program::new("main").with_node(
                    "Start",
                    Node::new()
                        .with_tags(["intro", "tutorial"])
                        .with(Instruction::line("line:1"))
                        .with(Instruction::command("wait 2"))
                        .with(Instruction::line("line:2")),
                ),
            ])
            .unwrap();
        (runner, dispatcher)
    }

    #[test]
    fn test_initial_state() {
        let (runner, _) = runner();
        assert_eq!(runner.run_state(), RunState::NotStarted);
        assert!(!runner.is_dialogue_running());
        assert!(runner.node_exists("Start"));
        assert!(!runner.node_exists("Missing"));
        assert_eq!(
            runner.tags_for_node("Start").unwrap(),
            vec!["intro".to_string(), "tutorial".to_string()]
        );
        assert_eq!(
            runner.tags_for_node("Missing").unwrap_err(),
            YarnError::from(RuntimeError::UnknownNode {
                node: "Missing".to_string()
            })
        );
    }

    #[test]
    fn test_start_unknown_node_keeps_state() {
        let (mut runner, _) = runner();
        let err = runner.start_at("Nowhere").unwrap_err();
        assert!(matches!(
            err,
            YarnError::Runtime(RuntimeError::UnknownNode { .. })
        ));
        assert_eq!(runner.run_state(), RunState::NotStarted);
    }

    #[test]
    fn test_resume_operations_require_running() {
        let (mut runner, _) = runner();
        assert_eq!(
            runner.continue_dialogue().unwrap_err(),
            YarnError::from(RuntimeError::NotRunning)
        );
        assert_eq!(
            runner.select_option(0).unwrap_err(),
            YarnError::from(RuntimeError::NotRunning)
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (mut runner, _) = runner();
        runner.start().unwrap();
        assert!(matches!(
            runner.start().unwrap_err(),
            YarnError::Runtime(RuntimeError::DialogueActive { .. })
        ));
        assert_eq!(runner.run_state(), RunState::Running);
        assert_eq!(runner.current_node_name().as_deref(), Some("Start"));
    }

    #[test]
    fn test_clear_while_running() {
        let (mut runner, _) = runner();
        runner.start().unwrap();
        assert!(matches!(
            runner.clear().unwrap_err(),
            YarnError::Runtime(RuntimeError::DialogueActive { .. })
        ));
        assert!(runner.node_exists("Start"));

        runner.stop();
        runner.stop();
        assert_eq!(runner.run_state(), RunState::Completed);
        runner.clear().unwrap();
        assert!(!runner.node_exists("Start"));
    }

    #[test]
    fn test_wait_timer() {
        let (mut runner, dispatcher) = runner();
        runner.start().unwrap();
        dispatcher.take_events();

        dispatcher.continue_dialogue().unwrap();
        assert_eq!(runner.pending_timers(), 1);
        assert_eq!(runner.next_wake(), Some(Duration::from_secs(2)));
        assert!(dispatcher.take_events().is_empty());

        runner.update(Duration::from_millis(1500)).unwrap();
        assert!(dispatcher.take_events().is_empty());
        assert_eq!(runner.next_wake(), Some(Duration::from_millis(500)));

        runner.update(Duration::from_millis(500)).unwrap();
        assert_eq!(runner.pending_timers(), 0);
        assert_eq!(
            dispatcher.take_events(),
            vec![crate::presentation::PresentationEvent::DisplayLine {
                text: String::new()
            }]
        );
    }

    #[test]
    fn test_continue_past_wait_drops_timer() {
        let (mut runner, dispatcher) = runner();
        runner.start().unwrap();
        dispatcher.continue_dialogue().unwrap();
        assert_eq!(runner.pending_timers(), 1);

        runner.continue_dialogue().unwrap();
        assert!(dispatcher.is_waiting_for_continue());
        assert_eq!(runner.pending_timers(), 0);
        assert_eq!(runner.next_wake(), None);
    }

    #[test]
    fn test_stop_cancels_timer_and_late_callback() {
        let (mut runner, dispatcher) = runner();
        runner.start().unwrap();
        dispatcher.continue_dialogue().unwrap();
        assert_eq!(runner.pending_timers(), 1);

        runner.stop();
        assert_eq!(runner.pending_timers(), 0);
        runner.update(Duration::from_secs(10)).unwrap();
        assert_eq!(runner.run_state(), RunState::Completed);
    }

    #[test]
    fn test_late_continuation_after_stop_is_noop() {
        let (mut runner, dispatcher) = runner();
        runner.start().unwrap();
        assert!(dispatcher.is_waiting_for_continue());

        runner.stop();
        assert!(dispatcher.continue_dialogue().unwrap());
        assert_eq!(runner.run_state(), RunState::Completed);
        assert!(runner.take_events().iter().all(|e| *e != RunnerEvent::DialogueComplete));
    }
}
