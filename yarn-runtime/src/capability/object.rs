//! # Object 模块
//!
//! 宿主对象模型：按名称动态调用方法，可内省方法签名，组成对象树。

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::capability::{HostError, Variant, VariantType};
use crate::commands::CommandProvider;

/// 方法签名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<VariantType>,
    pub returns: VariantType,
    /// 对话命令名，`None` 表示未标记
    pub command: Option<String>,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: VariantType::Nil,
            command: None,
        }
    }

    pub fn params(mut self, params: impl Into<Vec<VariantType>>) -> Self {
        self.params = params.into();
        self
    }

    pub fn returns(mut self, returns: VariantType) -> Self {
        self.returns = returns;
        self
    }

    /// 标记为对话命令，脚本中以 `name` 调用
    pub fn command(mut self, name: impl Into<String>) -> Self {
        self.command = Some(name.into());
        self
    }
}

/// 动态类型的宿主对象
pub trait HostObject {
    /// 对象名，用于日志和命令作用域
    fn name(&self) -> &str;

    fn has_method(&self, method: &str) -> bool;

    /// 按名称调用方法
    fn call(&self, method: &str, args: &[Variant]) -> Result<Variant, HostError>;

    /// 可内省的方法签名
    fn methods(&self) -> Vec<MethodInfo> {
        Vec::new()
    }

    /// 子对象
    fn children(&self) -> Vec<Rc<dyn HostObject>> {
        Vec::new()
    }

    /// 原生实现的命令提供者
    fn as_command_provider(&self) -> Option<&dyn CommandProvider> {
        None
    }
}

type MethodFn = Rc<dyn Fn(&[Variant]) -> Result<Variant, HostError>>;

struct ScriptMethod {
    info: MethodInfo,
    body: MethodFn,
}

/// 脚本化宿主对象
///
/// 用闭包逐个声明方法，适合脚本集成和测试。
///
/// ```ignore
/// let npc = ScriptObject::new("npc")
///     .with_typed_method(
///         MethodInfo::new("wave").params([VariantType::Array]).command("wave"),
///         |_| Ok(Variant::Nil),
///     )
///     .into_rc();
/// ```
#[derive(Default)]
pub struct ScriptObject {
    name: String,
    methods: BTreeMap<String, ScriptMethod>,
    children: Vec<Rc<dyn HostObject>>,
}

impl ScriptObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 声明一个没有签名信息的方法
    pub fn with_method(
        self,
        name: impl Into<String>,
        body: impl Fn(&[Variant]) -> Result<Variant, HostError> + 'static,
    ) -> Self {
        self.with_typed_method(MethodInfo::new(name), body)
    }

    pub fn with_typed_method(
        mut self,
        info: MethodInfo,
        body: impl Fn(&[Variant]) -> Result<Variant, HostError> + 'static,
    ) -> Self {
        self.methods.insert(
            info.name.clone(),
            ScriptMethod {
                info,
                body: Rc::new(body),
            },
        );
        self
    }

    pub fn with_child(mut self, child: Rc<dyn HostObject>) -> Self {
        self.children.push(child);
        self
    }

    pub fn into_rc(self) -> Rc<dyn HostObject> {
        Rc::new(self)
    }
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObject")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("children", &self.children.len())
            .finish()
    }
}

impl HostObject for ScriptObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn call(&self, method: &str, args: &[Variant]) -> Result<Variant, HostError> {
        let body = self
            .methods
            .get(method)
            .map(|m| Rc::clone(&m.body))
            .ok_or_else(|| HostError::new(format!("对象 '{}' 没有方法 '{method}'", self.name)))?;
        body(args)
    }

    fn methods(&self) -> Vec<MethodInfo> {
        self.methods.values().map(|m| m.info.clone()).collect()
    }

    fn children(&self) -> Vec<Rc<dyn HostObject>> {
        self.children.clone()
    }
}
