//! # Variant 模块
//!
//! 宿主对象动态调用使用的值类型。

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::error::YarnError;
use crate::line::{Command, Line, OptionSet};
use crate::runtime::{Continuation, OptionSelector};
use crate::value::Value;

/// 宿主侧调用失败
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<YarnError> for HostError {
    fn from(e: YarnError) -> Self {
        Self::new(e.to_string())
    }
}

type CallableFn = dyn Fn(&[Variant]) -> Result<Variant, HostError>;

/// 可调用值
///
/// 克隆共享同一个函数；相等性按函数身份比较。
#[derive(Clone)]
pub struct Callable(Rc<CallableFn>);

impl Callable {
    pub fn new(f: impl Fn(&[Variant]) -> Result<Variant, HostError> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// 只能成功调用一次，之后的调用返回 `Nil`
    pub fn once(f: impl FnOnce(&[Variant]) -> Result<Variant, HostError> + 'static) -> Self {
        let slot = RefCell::new(Some(f));
        Self::new(move |args| {
            let f = slot.borrow_mut().take();
            match f {
                Some(f) => f(args),
                None => Ok(Variant::Nil),
            }
        })
    }

    pub fn call(&self, args: &[Variant]) -> Result<Variant, HostError> {
        (self.0)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable")
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// 动态值
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Variant>),
    Dictionary(BTreeMap<String, Variant>),
    Callable(Callable),
}

/// 动态值的类型，用于方法签名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Nil,
    Bool,
    Number,
    String,
    Array,
    Dictionary,
    Callable,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Dictionary => "dictionary",
            Self::Callable => "callable",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Self::Nil => VariantType::Nil,
            Self::Bool(_) => VariantType::Bool,
            Self::Number(_) => VariantType::Number,
            Self::String(_) => VariantType::String,
            Self::Array(_) => VariantType::Array,
            Self::Dictionary(_) => VariantType::Dictionary,
            Self::Callable(_) => VariantType::Callable,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// 字符串数组
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// 转为对话变量值；`Nil` 和复合类型返回 `None`
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Number(n) => Some(Value::Number(*n)),
            Self::String(s) => Some(Value::String(s.clone())),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Variant {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Variant {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Variant {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Callable> for Variant {
    fn from(c: Callable) -> Self {
        Self::Callable(c)
    }
}

impl From<Value> for Variant {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
        }
    }
}

impl From<&Line> for Variant {
    fn from(line: &Line) -> Self {
        let mut dict = BTreeMap::new();
        dict.insert("id".to_string(), Variant::from(line.id.as_str()));
        dict.insert(
            "substitutions".to_string(),
            Variant::strings(line.substitutions.iter().cloned()),
        );
        Self::Dictionary(dict)
    }
}

impl From<&OptionSet> for Variant {
    fn from(options: &OptionSet) -> Self {
        Self::Array(
            options
                .options
                .iter()
                .map(|o| {
                    let mut dict = BTreeMap::new();
                    dict.insert("id".to_string(), Variant::Number(o.id as f64));
                    dict.insert("line".to_string(), Variant::from(&o.line));
                    dict.insert(
                        "destination".to_string(),
                        Variant::from(o.destination.as_str()),
                    );
                    Variant::Dictionary(dict)
                })
                .collect(),
        )
    }
}

impl From<&Command> for Variant {
    fn from(command: &Command) -> Self {
        Self::from(command.text.as_str())
    }
}

impl From<Continuation> for Callable {
    fn from(continuation: Continuation) -> Self {
        Callable::once(move |_| {
            continuation.resume()?;
            Ok(Variant::Nil)
        })
    }
}

impl From<OptionSelector> for Callable {
    fn from(selector: OptionSelector) -> Self {
        Callable::new(move |args| {
            let id = match args {
                [Variant::Number(n)] if *n >= 0.0 && n.fract() == 0.0 => *n as usize,
                _ => return Err(HostError::new("选项回调需要一个非负整数参数")),
            };
            selector.select(id)?;
            Ok(Variant::Nil)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_callable_once() {
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let callable = Callable::once(move |_| {
            counter.set(counter.get() + 1);
            Ok(Variant::Bool(true))
        });

        assert_eq!(callable.call(&[]).unwrap(), Variant::Bool(true));
        assert_eq!(callable.call(&[]).unwrap(), Variant::Nil);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_callable_identity() {
        let a = Callable::new(|_| Ok(Variant::Nil));
        let b = Callable::new(|_| Ok(Variant::Nil));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(Variant::from(Value::from(3.0)), Variant::Number(3.0));
        assert_eq!(Variant::from("x").to_value(), Some(Value::from("x")));
        assert_eq!(Variant::Nil.to_value(), None);
        assert_eq!(Variant::Array(vec![]).to_value(), None);
    }

    #[test]
    fn test_line_conversion() {
        let line = Line::with_substitutions("line:1", vec!["Mae".to_string()]);
        let Variant::Dictionary(dict) = Variant::from(&line) else {
            panic!("应为字典");
        };
        assert_eq!(dict["id"], Variant::from("line:1"));
        assert_eq!(dict["substitutions"], Variant::strings(["Mae"]));
    }
}
