//! # Line 模块
//!
//! VM 每次让出时产生的瞬时数据：对白行、选项集、命令。
//!
//! 这些值由 VM 产生，交给呈现层或命令分发处理后即被丢弃。

use serde::{Deserialize, Serialize};

/// 对白行
///
/// `id` 是字符串表的键，`substitutions` 按顺序替换文本中的 `{0}`、`{1}`……
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub id: String,
    #[serde(default)]
    pub substitutions: Vec<String>,
}

impl Line {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            substitutions: Vec::new(),
        }
    }

    pub fn with_substitutions(id: impl Into<String>, substitutions: Vec<String>) -> Self {
        Self {
            id: id.into(),
            substitutions,
        }
    }
}

/// 单个选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueOption {
    /// 选项 ID，在同一选项集内唯一，由 VM 分配
    pub id: usize,
    /// 选项文本
    pub line: Line,
    /// 选中后进入的节点
    pub destination: String,
}

/// 选项集
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSet {
    pub options: Vec<DialogueOption>,
}

impl OptionSet {
    pub fn new(options: Vec<DialogueOption>) -> Self {
        Self { options }
    }

    /// 选项集中的所有 ID
    pub fn ids(&self) -> Vec<usize> {
        self.options.iter().map(|o| o.id).collect()
    }

    pub fn get(&self, id: usize) -> Option<&DialogueOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// 对话命令
///
/// 只保存原始文本；拆分为命令名和参数由协调器负责。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub text: String,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// 按空白拆分，空项被丢弃
    pub fn tokens(&self) -> Vec<String> {
        self.text.split_whitespace().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tokens() {
        let cmd = Command::new("  walk   Mae\tleft ");
        assert_eq!(cmd.tokens(), vec!["walk", "Mae", "left"]);

        assert!(Command::new("   ").tokens().is_empty());
    }

    #[test]
    fn test_option_set_lookup() {
        let set = OptionSet::new(vec![
            DialogueOption {
                id: 0,
                line: Line::new("line:yes"),
                destination: "Yes".to_string(),
            },
            DialogueOption {
                id: 1,
                line: Line::new("line:no"),
                destination: "No".to_string(),
            },
        ]);

        assert_eq!(set.ids(), vec![0, 1]);
        assert!(set.contains(1));
        assert!(!set.contains(2));
        assert_eq!(set.get(1).map(|o| o.destination.as_str()), Some("No"));
    }
}
