//! # Timer 模块
//!
//! 协调器持有的等待计时器。
//!
//! 协调器不读取真实时钟：宿主每帧调用 `update(delta)` 推进内部时钟，
//! 到期的继续回调按到期顺序取出。计时器随协调器一起销毁，`stop()` 时清空。

use std::time::Duration;

use crate::runtime::Continuation;

#[derive(Debug)]
struct TimerEntry {
    deadline: Duration,
    continuation: Continuation,
}

#[derive(Debug, Default)]
pub(crate) struct WaitTimers {
    now: Duration,
    entries: Vec<TimerEntry>,
}

impl WaitTimers {
    pub(crate) fn schedule(&mut self, delay: Duration, continuation: Continuation) {
        self.entries.push(TimerEntry {
            deadline: self.now + delay,
            continuation,
        });
    }

    /// 推进时钟，返回所有到期的回调
    pub(crate) fn advance(&mut self, delta: Duration) -> Vec<Continuation> {
        self.now += delta;
        let now = self.now;

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.deadline <= now);
        self.entries = pending;

        due.sort_by_key(|e| e.deadline);
        due.into_iter().map(|e| e.continuation).collect()
    }

    /// 距离最近一个到期还有多久
    pub(crate) fn next_wake(&self) -> Option<Duration> {
        self.entries
            .iter()
            .map(|e| e.deadline.saturating_sub(self.now))
            .min()
    }

    /// 丢弃回调已失效的计时器
    pub(crate) fn prune_stale(&mut self) {
        self.entries.retain(|e| !e.continuation.is_stale());
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
