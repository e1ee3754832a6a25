//! # Variables 模块
//!
//! 对话变量存储。
//!
//! - [`VariableStorage`]：协调器和 VM 使用的固定接口
//! - [`MemoryVariableStorage`]：进程内实现，支持重置为初始快照
//!
//! 宿主对象也可以经能力适配后充当变量存储，见
//! [`HostVariableStorage`](crate::capability::HostVariableStorage)。

use std::collections::{BTreeMap, HashMap};

use crate::error::CapabilityError;
use crate::value::Value;

/// 变量存储接口
///
/// 原生实现不会失败；适配的宿主对象可能在动态调用时失败，
/// 因此所有操作都返回 `Result`。
pub trait VariableStorage {
    /// 设置变量
    fn set_value(&mut self, name: &str, value: Value) -> Result<(), CapabilityError>;

    /// 读取变量，不存在时返回 `None`
    fn get_value(&self, name: &str) -> Result<Option<Value>, CapabilityError>;

    /// 清空所有变量
    fn clear(&mut self) -> Result<(), CapabilityError>;

    /// 清空后按初始快照重新填充
    fn reset_to_defaults(&mut self) -> Result<(), CapabilityError>;
}

/// 进程内变量存储
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryVariableStorage {
    initial: BTreeMap<String, Value>,
    store: HashMap<String, Value>,
}

impl MemoryVariableStorage {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用初始快照创建存储，并立即填充
    pub fn with_defaults(initial: BTreeMap<String, Value>) -> Self {
        let store = initial
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { initial, store }
    }

    /// 替换初始快照（不影响当前值，下次重置时生效）
    pub fn set_defaults(&mut self, initial: BTreeMap<String, Value>) {
        self.initial = initial;
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// 当前所有变量（按名称排序）
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.store
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl VariableStorage for MemoryVariableStorage {
    fn set_value(&mut self, name: &str, value: Value) -> Result<(), CapabilityError> {
        self.store.insert(name.to_string(), value);
        Ok(())
    }

    fn get_value(&self, name: &str) -> Result<Option<Value>, CapabilityError> {
        Ok(self.store.get(name).cloned())
    }

    fn clear(&mut self) -> Result<(), CapabilityError> {
        self.store.clear();
        Ok(())
    }

    fn reset_to_defaults(&mut self) -> Result<(), CapabilityError> {
        self.store.clear();
        for (name, value) in &self.initial {
            self.store.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}
