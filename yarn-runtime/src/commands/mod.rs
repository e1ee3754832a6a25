//! # Commands 模块
//!
//! 对话命令注册表与解析。
//!
//! ## 解析顺序
//!
//! ```text
//! "item give sword"
//!   1. 精确匹配 "item"                    参数 ["give", "sword"]
//!   2. 参数至少两项时，匹配 "give::item"  参数 ["sword"]
//!   3. 都未命中：交给呈现层的兜底处理
//! ```
//!
//! 注册表是扁平的，第二步让它可以模拟 `对象::方法` 形式的寻址。
//! 重名注册返回 `false`，从不覆盖已有处理器。

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::capability::{
    HostCommandProvider, HostObject, VariantType, host_blocking_handler, host_command_handler,
};
use crate::error::CapabilityError;
use crate::runtime::Continuation;

/// 即时命令处理器
pub type CommandFn = Rc<dyn Fn(&[String])>;

/// 阻塞命令处理器，完成后调用继续回调
pub type BlockingCommandFn = Rc<dyn Fn(&[String], Continuation)>;

/// 命令处理器
#[derive(Clone)]
pub enum CommandHandler {
    /// 调用后立即继续
    Immediate(CommandFn),
    /// 直到继续回调被触发才继续
    Blocking(BlockingCommandFn),
}

impl CommandHandler {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("Immediate"),
            Self::Blocking(_) => f.write_str("Blocking"),
        }
    }
}

/// 解析结果
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    /// 命中的注册名
    pub name: String,
    pub handler: CommandHandler,
    pub args: Vec<String>,
}

/// 命令提供者
///
/// 一次性导出一组命令处理器，由 [`CommandRegistry::register_all`] 导入。
pub trait CommandProvider {
    /// 即时命令
    fn command_handlers(&self) -> Result<BTreeMap<String, CommandFn>, CapabilityError>;

    /// 阻塞命令
    fn blocking_command_handlers(
        &self,
    ) -> Result<BTreeMap<String, BlockingCommandFn>, CapabilityError> {
        Ok(BTreeMap::new())
    }
}

/// 命令注册表
#[derive(Debug, Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册即时命令
    pub fn register(&mut self, name: &str, handler: impl Fn(&[String]) + 'static) -> bool {
        self.insert(name, CommandHandler::Immediate(Rc::new(handler)))
    }

    /// 注册阻塞命令
    pub fn register_blocking(
        &mut self,
        name: &str,
        handler: impl Fn(&[String], Continuation) + 'static,
    ) -> bool {
        self.insert(name, CommandHandler::Blocking(Rc::new(handler)))
    }

    /// 注册处理器，重名时返回 `false` 且保留原有处理器
    pub fn insert(&mut self, name: &str, handler: CommandHandler) -> bool {
        if self.handlers.contains_key(name) {
            warn!(command = name, "命令已注册，忽略重复注册");
            return false;
        }
        self.handlers.insert(name.to_string(), handler);
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&CommandHandler> {
        self.handlers.get(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// 按解析顺序查找处理器
    ///
    /// `tokens` 为拆分后的命令文本，第一项是命令名。
    pub fn resolve(&self, tokens: &[String]) -> Option<ResolvedCommand> {
        let (name, args) = tokens.split_first()?;

        if let Some(handler) = self.handlers.get(name) {
            return Some(ResolvedCommand {
                name: name.clone(),
                handler: handler.clone(),
                args: args.to_vec(),
            });
        }

        if args.len() < 2 {
            return None;
        }
        let scoped = format!("{}::{}", args[0], name);
        let handler = self.handlers.get(&scoped)?;
        Some(ResolvedCommand {
            name: scoped,
            handler: handler.clone(),
            args: args[1..].to_vec(),
        })
    }

    /// 导入提供者导出的全部处理器，逐项跳过重名，返回新注册的数量
    pub fn register_all(&mut self, provider: &dyn CommandProvider) -> Result<usize, CapabilityError> {
        let immediate = provider.command_handlers()?;
        let blocking = provider.blocking_command_handlers()?;

        let mut added = 0;
        for (name, handler) in immediate {
            if self.insert(&name, CommandHandler::Immediate(handler)) {
                added += 1;
            }
        }
        for (name, handler) in blocking {
            if self.insert(&name, CommandHandler::Blocking(handler)) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// 先序遍历宿主对象树，注册找到的命令，返回新注册的数量
    ///
    /// 每个对象依次尝试：原生命令提供者、适配为命令提供者、带命令标记的方法。
    /// 任何一步失败都只跳到下一个对象，不会中断扫描。
    pub fn scan_for_commands(&mut self, root: &Rc<dyn HostObject>) -> usize {
        let mut added = 0;
        let mut stack = vec![Rc::clone(root)];

        while let Some(object) = stack.pop() {
            added += self.scan_object(&object);
            // 逆序入栈以保持先序
            stack.extend(object.children().into_iter().rev());
        }
        added
    }

    fn scan_object(&mut self, object: &Rc<dyn HostObject>) -> usize {
        if let Some(provider) = object.as_command_provider() {
            match self.register_all(provider) {
                Ok(added) => return added,
                Err(e) => debug!(object = object.name(), error = %e, "原生命令提供者导出失败"),
            }
        }

        if let Ok(adapter) = HostCommandProvider::new(Rc::clone(object)) {
            match self.register_all(&adapter) {
                Ok(added) => return added,
                Err(e) => debug!(object = object.name(), error = %e, "适配的命令提供者导出失败"),
            }
        }

        self.scan_tagged_methods(object)
    }

    fn scan_tagged_methods(&mut self, object: &Rc<dyn HostObject>) -> usize {
        let mut added = 0;
        for method in object.methods() {
            let Some(command) = &method.command else {
                continue;
            };
            let name = format!("{}::{}", object.name(), command);
            let handler = match (method.params.as_slice(), method.returns) {
                ([VariantType::Array], VariantType::Nil) => CommandHandler::Immediate(
                    host_command_handler(Rc::clone(object), method.name.clone()),
                ),
                ([VariantType::Array, VariantType::Callable], VariantType::Nil) => {
                    CommandHandler::Blocking(host_blocking_handler(
                        Rc::clone(object),
                        method.name.clone(),
                    ))
                }
                _ => {
                    trace!(
                        object = object.name(),
                        method = %method.name,
                        "命令方法签名不匹配，跳过"
                    );
                    continue;
                }
            };
            if self.insert(&name, handler) {
                added += 1;
            }
        }
        added
    }
}
