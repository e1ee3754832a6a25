//! # Program 模块
//!
//! 编译后的对话程序模型。
//!
//! 程序由若干命名节点组成，每个节点带有标签和一串指令。
//! 程序一旦装入 VM 就不再修改；多个程序可以在装入前合并为一个。
//!
//! ## 编码
//!
//! 编译产物以 serde_json 字节形式存储，见 [`Program::from_bytes`] / [`Program::to_bytes`]。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProgramError;
use crate::value::Value;

/// 默认起始节点名
pub const DEFAULT_START: &str = "Start";

/// 指令操作数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// 字面量
    Literal(Value),
    /// 变量引用（运行时从变量存储读取）
    Variable(String),
}

impl Operand {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }
}

/// VM 指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// 输出一行对白
    Line {
        id: String,
        #[serde(default)]
        substitutions: Vec<Operand>,
    },

    /// 向待显示选项集追加一个选项
    AddOption {
        id: String,
        #[serde(default)]
        substitutions: Vec<Operand>,
        /// 选中后进入的节点
        destination: String,
    },

    /// 显示已累积的选项集，等待选择
    ShowOptions,

    /// 输出一条命令（原始文本，由协调器解析）
    Command { text: String },

    /// 设置变量
    Set { variable: String, value: Operand },

    /// 布尔变量为真时跳转到指定节点
    JumpIf { variable: String, node: String },

    /// 跳转到指定节点
    RunNode { node: String },

    /// 结束对话
    Stop,
}

impl Instruction {
    pub fn line(id: impl Into<String>) -> Self {
        Self::Line {
            id: id.into(),
            substitutions: Vec::new(),
        }
    }

    pub fn option(id: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::AddOption {
            id: id.into(),
            substitutions: Vec::new(),
            destination: destination.into(),
        }
    }

    pub fn command(text: impl Into<String>) -> Self {
        Self::Command { text: text.into() }
    }

    pub fn set(variable: impl Into<String>, value: Operand) -> Self {
        Self::Set {
            variable: variable.into(),
            value,
        }
    }

    pub fn run_node(node: impl Into<String>) -> Self {
        Self::RunNode { node: node.into() }
    }

    /// 本指令引用的目标节点（用于诊断）
    pub fn target_node(&self) -> Option<&str> {
        match self {
            Self::AddOption { destination, .. } => Some(destination),
            Self::JumpIf { node, .. } | Self::RunNode { node } => Some(node),
            _ => None,
        }
    }
}

/// 程序节点
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// 节点标签
    #[serde(default)]
    pub tags: Vec<String>,
    /// 指令序列
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }
}

/// 编译后的对话程序
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// 程序名（通常是源文件名）
    #[serde(default)]
    pub name: String,
    /// 节点表，按名称索引
    pub nodes: BTreeMap<String, Node>,
}

impl Program {
    /// 创建空程序
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
        }
    }

    /// 添加节点（构造用，同名节点会被替换）
    pub fn with_node(mut self, name: impl Into<String>, node: Node) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    /// 从编译产物解码
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        serde_json::from_slice(bytes).map_err(|e| ProgramError::Decode {
            message: e.to_string(),
        })
    }

    /// 编码为编译产物
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProgramError> {
        serde_json::to_vec(self).map_err(|e| ProgramError::Encode {
            message: e.to_string(),
        })
    }

    /// 合并多个程序
    ///
    /// 任意两个输入程序的节点名相交即报错，不会静默覆盖。
    pub fn combine<I>(programs: I) -> Result<Self, ProgramError>
    where
        I: IntoIterator<Item = Program>,
    {
        let mut combined = Program::default();
        let mut names = Vec::new();
        for program in programs {
            if !program.name.is_empty() {
                names.push(program.name.clone());
            }
            combined.merge(program)?;
        }
        combined.name = names.join("+");
        Ok(combined)
    }

    /// 将另一个程序并入当前程序
    ///
    /// 先检查冲突再插入，失败时当前程序保持不变。
    pub fn merge(&mut self, other: Program) -> Result<(), ProgramError> {
        if let Some(node) = other.nodes.keys().find(|name| self.nodes.contains_key(*name)) {
            return Err(ProgramError::NodeConflict { node: node.clone() });
        }
        self.nodes.extend(other.nodes);
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_exists(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(name: &str, nodes: &[&str]) -> Program {
        nodes.iter().fold(Program::new(name), |p, n| {
            p.with_node(*n, Node::new().with(Instruction::line(format!("line:{n}"))))
        })
    }

    #[test]
    fn test_combine_disjoint() {
        let combined = Program::combine(vec![
            program("a", &["Start", "Shop"]),
            program("b", &["Forest"]),
            program("c", &["Cave", "Village"]),
        ])
        .unwrap();

        assert_eq!(combined.len(), 5);
        for name in ["Start", "Shop", "Forest", "Cave", "Village"] {
            assert!(combined.node_exists(name), "{name} 应可访问");
        }
        assert_eq!(combined.name, "a+b+c");
    }

    #[test]
    fn test_combine_conflict() {
        let err = Program::combine(vec![
            program("a", &["Start", "Shop"]),
            program("b", &["Shop"]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ProgramError::NodeConflict {
                node: "Shop".to_string()
            }
        );
    }

    #[test]
    fn test_merge_is_atomic() {
        let mut base = program("a", &["Start"]);
        let err = base.merge(program("b", &["Extra", "Start"]));

        assert!(err.is_err());
        assert!(!base.node_exists("Extra"));
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_decode_compiled_program() {
        let bytes = br#"{
            "name": "intro",
            "nodes": {
                "Start": {
                    "tags": ["entry"],
                    "instructions": [
                        { "op": "line", "id": "line:hello", "substitutions": [{ "variable": "$name" }] },
                        { "op": "add_option", "id": "line:yes", "destination": "Yes" },
                        { "op": "show_options" },
                        { "op": "command", "text": "wait 1" },
                        { "op": "set", "variable": "$gold", "value": { "literal": 10 } },
                        { "op": "stop" }
                    ]
                }
            }
        }"#;

        let program = Program::from_bytes(bytes).unwrap();
        let start = program.node("Start").unwrap();
        assert_eq!(start.tags, vec!["entry".to_string()]);
        assert_eq!(start.instructions.len(), 6);
        assert_eq!(
            start.instructions[4],
            Instruction::set("$gold", Operand::literal(10))
        );
        assert_eq!(start.instructions[1].target_node(), Some("Yes"));

        let encoded = program.to_bytes().unwrap();
        assert_eq!(Program::from_bytes(&encoded).unwrap(), program);
    }

    #[test]
    fn test_decode_garbage() {
        let err = Program::from_bytes(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, ProgramError::Decode { .. }));
    }
}
