//! # Continuation 模块
//!
//! 交给呈现层和阻塞命令的一次性继续回调。
//!
//! - 回调只持有协调器的弱引用，协调器销毁后触发回调是安全的空操作
//! - 每个回调绑定一个挂起代号；`stop()` 或其他途径恢复后代号失效，迟到的回调同样是空操作

use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::debug;

use crate::error::YarnResult;
use crate::runtime::runner::RunnerShared;

/// 继续回调
///
/// 对白显示完成、阻塞命令完成或未注册命令处理完成后调用 [`Continuation::resume`]。
pub struct Continuation {
    runner: Weak<RunnerShared>,
    generation: u64,
}

impl Continuation {
    pub(crate) fn new(runner: &Rc<RunnerShared>, generation: u64) -> Self {
        Self {
            runner: Rc::downgrade(runner),
            generation,
        }
    }

    /// 恢复对话
    pub fn resume(self) -> YarnResult<()> {
        match self.runner.upgrade() {
            Some(runner) => runner.resume(self.generation),
            None => {
                debug!(generation = self.generation, "协调器已销毁，忽略继续回调");
                Ok(())
            }
        }
    }

    /// 在 `delay` 之后恢复对话
    ///
    /// 时长为零时立即恢复；否则登记到协调器的计时器，由
    /// [`DialogueRunner::update`](crate::runtime::DialogueRunner::update) 推进。
    pub fn resume_after(self, delay: Duration) -> YarnResult<()> {
        if delay.is_zero() {
            return self.resume();
        }
        if let Some(runner) = self.runner.upgrade() {
            runner.schedule(delay, self);
        }
        Ok(())
    }

    /// 回调是否已失效
    pub fn is_stale(&self) -> bool {
        self.runner
            .upgrade()
            .is_none_or(|runner| !runner.is_pending(self.generation))
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("generation", &self.generation)
            .finish()
    }
}

/// 选项选择回调
///
/// 选项无效时返回错误且回调仍然有效；选择成功后回调失效。
pub struct OptionSelector {
    runner: Weak<RunnerShared>,
    generation: u64,
}

impl OptionSelector {
    pub(crate) fn new(runner: &Rc<RunnerShared>, generation: u64) -> Self {
        Self {
            runner: Rc::downgrade(runner),
            generation,
        }
    }

    /// 选择选项并恢复对话
    pub fn select(&self, id: usize) -> YarnResult<()> {
        let Some(runner) = self.runner.upgrade() else {
            debug!(id, "协调器已销毁，忽略选项选择");
            return Ok(());
        };
        if !runner.is_pending(self.generation) {
            debug!(id, generation = self.generation, "选项回调已失效，忽略");
            return Ok(());
        }
        runner.apply_selection(id)
    }
}

impl fmt::Debug for OptionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionSelector")
            .field("generation", &self.generation)
            .finish()
    }
}
