//! # Capability 模块
//!
//! 把动态类型的宿主对象适配为固定接口。
//!
//! ## 设计说明
//!
//! - 每种能力（[`Capability`]）声明一组必需的方法名
//! - [`CapabilityAdapter`] 在构造时检查宿主对象是否提供全部方法，缺一个就失败，不存在部分适配
//! - 构造成功后，接口调用按方法名和位置参数转发给宿主对象；
//!   宿主侧失败或返回值类型不符都报告为 [`CapabilityError`]
//!
//! | 能力 | 适配后的接口 | 必需方法 |
//! |------|--------------|----------|
//! | [`PresentationCapability`] | [`DialoguePresenter`] | `dialogue_started` `dialogue_complete` `display_options` `display_line` `execute_command` |
//! | [`VariableStorageCapability`] | [`VariableStorage`] | `set_value` `get_value` `clear` `reset_to_defaults` |
//! | [`CommandProviderCapability`] | [`CommandProvider`] | `command_handlers` |

mod object;
mod variant;

pub use object::{HostObject, MethodInfo, ScriptObject};
pub use variant::{Callable, HostError, Variant, VariantType};

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::error;

use crate::commands::{BlockingCommandFn, CommandFn, CommandProvider};
use crate::error::CapabilityError;
use crate::line::{Command, Line, OptionSet};
use crate::presentation::{DialoguePresenter, ExecutionType};
use crate::runtime::{Continuation, OptionSelector};
use crate::text::LineTextResolver;
use crate::value::Value;
use crate::variables::VariableStorage;

/// 能力：一组必需的方法名
pub trait Capability {
    const NAME: &'static str;
    const REQUIRED_METHODS: &'static [&'static str];
}

/// 呈现层能力
#[derive(Debug)]
pub enum PresentationCapability {}

impl Capability for PresentationCapability {
    const NAME: &'static str = "presentation";
    const REQUIRED_METHODS: &'static [&'static str] = &[
        "dialogue_started",
        "dialogue_complete",
        "display_options",
        "display_line",
        "execute_command",
    ];
}

/// 变量存储能力
#[derive(Debug)]
pub enum VariableStorageCapability {}

impl Capability for VariableStorageCapability {
    const NAME: &'static str = "variable_storage";
    const REQUIRED_METHODS: &'static [&'static str] =
        &["set_value", "get_value", "clear", "reset_to_defaults"];
}

/// 命令提供者能力
///
/// `blocking_command_handlers` 可选，缺少时视为没有阻塞命令。
#[derive(Debug)]
pub enum CommandProviderCapability {}

impl Capability for CommandProviderCapability {
    const NAME: &'static str = "command_provider";
    const REQUIRED_METHODS: &'static [&'static str] = &["command_handlers"];
}

/// 适配为呈现层的宿主对象
pub type HostPresenter = CapabilityAdapter<PresentationCapability>;

/// 适配为变量存储的宿主对象
pub type HostVariableStorage = CapabilityAdapter<VariableStorageCapability>;

/// 适配为命令提供者的宿主对象
pub type HostCommandProvider = CapabilityAdapter<CommandProviderCapability>;

/// 能力适配器
pub struct CapabilityAdapter<C: Capability> {
    object: Rc<dyn HostObject>,
    _capability: PhantomData<C>,
}

impl<C: Capability> CapabilityAdapter<C> {
    /// 检查宿主对象并构造适配器
    pub fn new(object: Rc<dyn HostObject>) -> Result<Self, CapabilityError> {
        if let Some(method) = C::REQUIRED_METHODS
            .iter()
            .find(|method| !object.has_method(method))
        {
            return Err(CapabilityError::MissingMethod {
                capability: C::NAME,
                object: object.name().to_string(),
                method: method.to_string(),
            });
        }

        Ok(Self {
            object,
            _capability: PhantomData,
        })
    }

    /// 宿主对象是否满足该能力
    pub fn implemented_by(object: &dyn HostObject) -> bool {
        C::REQUIRED_METHODS
            .iter()
            .all(|method| object.has_method(method))
    }

    /// 转发一次动态调用
    pub fn invoke(&self, method: &str, args: &[Variant]) -> Result<Variant, CapabilityError> {
        self.object
            .call(method, args)
            .map_err(|e| CapabilityError::Invocation {
                object: self.object.name().to_string(),
                method: method.to_string(),
                message: e.message,
            })
    }

    pub fn object(&self) -> &Rc<dyn HostObject> {
        &self.object
    }

    fn return_type_error(&self, method: &str, expected: &str, actual: &Variant) -> CapabilityError {
        CapabilityError::ReturnType {
            object: self.object.name().to_string(),
            method: method.to_string(),
            expected: expected.to_string(),
            actual: actual.variant_type().to_string(),
        }
    }

    /// 调用返回执行方式的方法：`"continue"`/`"pause"` 或 `1`/`0`
    fn invoke_execution(
        &self,
        method: &str,
        args: &[Variant],
    ) -> Result<ExecutionType, CapabilityError> {
        let result = self.invoke(method, args)?;
        match &result {
            Variant::String(s) if s == ExecutionType::ContinueExecution.as_str() => {
                Ok(ExecutionType::ContinueExecution)
            }
            Variant::String(s) if s == ExecutionType::PauseExecution.as_str() => {
                Ok(ExecutionType::PauseExecution)
            }
            Variant::Number(n) if *n == 1.0 => Ok(ExecutionType::ContinueExecution),
            Variant::Number(n) if *n == 0.0 => Ok(ExecutionType::PauseExecution),
            other => Err(self.return_type_error(method, "execution type", other)),
        }
    }
}

impl<C: Capability> fmt::Debug for CapabilityAdapter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityAdapter")
            .field("capability", &C::NAME)
            .field("object", &self.object.name())
            .finish()
    }
}

/// 带解析后文本的对白
fn line_with_text(line: &Line, text: &dyn LineTextResolver) -> Variant {
    let mut variant = Variant::from(line);
    if let Variant::Dictionary(dict) = &mut variant {
        dict.insert(
            "text".to_string(),
            Variant::String(text.resolve_line_text(line)),
        );
    }
    variant
}

impl DialoguePresenter for HostPresenter {
    fn dialogue_started(&mut self, node: &str) -> Result<(), CapabilityError> {
        self.invoke("dialogue_started", &[Variant::from(node)])?;
        Ok(())
    }

    fn dialogue_complete(&mut self) -> Result<(), CapabilityError> {
        self.invoke("dialogue_complete", &[])?;
        Ok(())
    }

    fn display_options(
        &mut self,
        options: &OptionSet,
        text: &dyn LineTextResolver,
        on_selected: OptionSelector,
    ) -> Result<(), CapabilityError> {
        let mut items = Variant::from(options);
        if let Variant::Array(items) = &mut items {
            for (item, option) in items.iter_mut().zip(&options.options) {
                if let Variant::Dictionary(dict) = item {
                    dict.insert("line".to_string(), line_with_text(&option.line, text));
                }
            }
        }

        self.invoke(
            "display_options",
            &[items, Variant::Callable(Callable::from(on_selected))],
        )?;
        Ok(())
    }

    fn display_line(
        &mut self,
        line: &Line,
        text: &dyn LineTextResolver,
        on_complete: Continuation,
    ) -> Result<ExecutionType, CapabilityError> {
        self.invoke_execution(
            "display_line",
            &[
                line_with_text(line, text),
                Variant::Callable(Callable::from(on_complete)),
            ],
        )
    }

    fn execute_command(
        &mut self,
        command: &Command,
        on_complete: Continuation,
    ) -> Result<ExecutionType, CapabilityError> {
        self.invoke_execution(
            "execute_command",
            &[
                Variant::from(command),
                Variant::Callable(Callable::from(on_complete)),
            ],
        )
    }
}

impl VariableStorage for HostVariableStorage {
    fn set_value(&mut self, name: &str, value: Value) -> Result<(), CapabilityError> {
        self.invoke("set_value", &[Variant::from(name), Variant::from(value)])?;
        Ok(())
    }

    fn get_value(&self, name: &str) -> Result<Option<Value>, CapabilityError> {
        let result = self.invoke("get_value", &[Variant::from(name)])?;
        if result.is_nil() {
            return Ok(None);
        }
        result
            .to_value()
            .map(Some)
            .ok_or_else(|| self.return_type_error("get_value", "bool/number/string/nil", &result))
    }

    fn clear(&mut self) -> Result<(), CapabilityError> {
        self.invoke("clear", &[])?;
        Ok(())
    }

    fn reset_to_defaults(&mut self) -> Result<(), CapabilityError> {
        self.invoke("reset_to_defaults", &[])?;
        Ok(())
    }
}

impl HostCommandProvider {
    /// 取出 `名称 → Callable` 字典
    fn callables(&self, method: &str) -> Result<BTreeMap<String, Callable>, CapabilityError> {
        let result = self.invoke(method, &[])?;
        let Variant::Dictionary(dict) = &result else {
            return Err(self.return_type_error(method, "dictionary", &result));
        };

        dict.iter()
            .map(|(name, value)| match value {
                Variant::Callable(c) => Ok((name.clone(), c.clone())),
                other => Err(self.return_type_error(method, "dictionary of callables", other)),
            })
            .collect()
    }
}

impl CommandProvider for HostCommandProvider {
    fn command_handlers(&self) -> Result<BTreeMap<String, CommandFn>, CapabilityError> {
        Ok(self
            .callables("command_handlers")?
            .into_iter()
            .map(|(name, callable)| {
                let handler = callable_command(name.clone(), callable);
                (name, handler)
            })
            .collect())
    }

    fn blocking_command_handlers(
        &self,
    ) -> Result<BTreeMap<String, BlockingCommandFn>, CapabilityError> {
        if !self.object.has_method("blocking_command_handlers") {
            return Ok(BTreeMap::new());
        }
        Ok(self
            .callables("blocking_command_handlers")?
            .into_iter()
            .map(|(name, callable)| {
                let handler = callable_blocking_command(name.clone(), callable);
                (name, handler)
            })
            .collect())
    }
}

fn callable_command(command: String, callable: Callable) -> CommandFn {
    Rc::new(move |args: &[String]| {
        if let Err(e) = callable.call(&[Variant::strings(args.iter().cloned())]) {
            error!(command = %command, error = %e, "宿主命令执行失败");
        }
    })
}

fn callable_blocking_command(command: String, callable: Callable) -> BlockingCommandFn {
    Rc::new(move |args: &[String], on_complete: Continuation| {
        let done = Callable::from(on_complete);
        let result = callable.call(&[
            Variant::strings(args.iter().cloned()),
            Variant::Callable(done.clone()),
        ]);
        if let Err(e) = result {
            error!(command = %command, error = %e, "宿主阻塞命令执行失败，继续对话");
            if let Err(e) = done.call(&[]) {
                error!(command = %command, error = %e, "恢复对话失败");
            }
        }
    })
}

/// 把宿主对象的方法包装为即时命令，参数以字符串数组传入
pub fn host_command_handler(object: Rc<dyn HostObject>, method: String) -> CommandFn {
    let target = Rc::clone(&object);
    let method_name = method.clone();
    callable_command(
        format!("{}::{}", object.name(), method),
        Callable::new(move |args| target.call(&method_name, args)),
    )
}

/// 把宿主对象的方法包装为阻塞命令，第二个参数是继续回调
pub fn host_blocking_handler(object: Rc<dyn HostObject>, method: String) -> BlockingCommandFn {
    let target = Rc::clone(&object);
    let method_name = method.clone();
    callable_blocking_command(
        format!("{}::{}", object.name(), method),
        Callable::new(move |args| target.call(&method_name, args)),
    )
}
