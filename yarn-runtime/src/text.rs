//! # Text 模块
//!
//! 对白文本解析：行 ID + 替换参数 → 显示字符串。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::line::Line;

/// 行文本解析接口
pub trait LineTextResolver {
    /// 解析行文本
    ///
    /// 找不到译文时返回空字符串（而不是行 ID），调用方应把空串视为“无内容可显示”。
    fn resolve_line_text(&self, line: &Line) -> String;
}

/// 字符串表
///
/// 行 ID 到文本模板的映射。模板中的 `{0}`、`{1}`…… 按顺序替换为行的 substitutions。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringTable {
    entries: HashMap<String, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 对象解析（`{ "line:id": "text" }`）
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn insert(&mut self, id: impl Into<String>, text: impl Into<String>) {
        self.entries.insert(id.into(), text.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 遍历所有条目（顺序不定）
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for StringTable
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl LineTextResolver for StringTable {
    fn resolve_line_text(&self, line: &Line) -> String {
        let Some(template) = self.entries.get(&line.id) else {
            debug!(line = %line.id, "字符串表中没有该行");
            return String::new();
        };

        line.substitutions
            .iter()
            .enumerate()
            .fold(template.clone(), |text, (i, sub)| {
                text.replace(&format!("{{{i}}}"), sub)
            })
    }
}
