//! # 诊断模块
//!
//! 已编译程序的静态检查，不依赖 IO。
//!
//! ## 设计原则
//!
//! - 纯函数 API，宿主和工具链都可以直接调用
//! - 诊断分级：Error（必须修复）、Warn（建议修复）、Info（信息提示）

use std::collections::{BTreeSet, HashSet};

use crate::program::{Instruction, Program};
use crate::text::StringTable;

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    /// 信息提示
    Info,
    /// 警告（建议修复）
    Warn,
    /// 错误（必须修复）
    Error,
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// 诊断条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// 程序名
    pub program: String,
    /// 所在节点
    pub node: Option<String>,
    /// 指令下标（从 0 开始）
    pub index: Option<usize>,
    pub message: String,
    pub detail: Option<String>,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, program: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            program: program.to_string(),
            node: None,
            index: None,
            message: message.into(),
            detail: None,
        }
    }

    pub fn error(program: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, program, message)
    }

    pub fn warn(program: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warn, program, message)
    }

    pub fn info(program: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, program, message)
    }

    /// 设置位置
    pub fn at(mut self, node: &str, index: Option<usize>) -> Self {
        self.node = Some(node.to_string());
        self.index = index;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.program)?;
        if let Some(node) = &self.node {
            write!(f, "/{}", node)?;
        }
        if let Some(index) = self.index {
            write!(f, "#{}", index)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\n  | {}", detail)?;
        }
        Ok(())
    }
}

/// 诊断结果
#[derive(Debug, Clone, Default)]
pub struct DiagnosticResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// 合并另一个结果
    pub fn merge(&mut self, other: DiagnosticResult) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn error_count(&self) -> usize {
        self.count(DiagnosticLevel::Error)
    }

    pub fn warn_count(&self) -> usize {
        self.count(DiagnosticLevel::Warn)
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.diagnostics.iter().filter(|d| d.level == level).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// 按级别过滤
    pub fn filter_by_level(&self, min_level: DiagnosticLevel) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level >= min_level)
            .collect()
    }
}

//=============================================================================
// 程序分析 API
//=============================================================================

/// 分析程序
///
/// 执行以下检查：
/// - 跳转目标（`run_node` / `jump_if` / 选项目标）不存在：Error
/// - 从 `start_node` 不可达的节点：Warn
/// - 没有任何选项的 `show_options`：Warn
pub fn analyze_program(program: &Program, start_node: &str) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();

    if !program.node_exists(start_node) {
        result.push(Diagnostic::error(
            &program.name,
            format!("起始节点不存在: {start_node}"),
        ));
    }

    for (name, node) in &program.nodes {
        let mut options = 0;
        for (index, instruction) in node.instructions.iter().enumerate() {
            if let Some(target) = instruction.target_node()
                && !program.node_exists(target)
            {
                result.push(
                    Diagnostic::error(&program.name, format!("跳转目标不存在: {target}"))
                        .at(name, Some(index))
                        .with_detail(format!("{instruction:?}")),
                );
            }

            match instruction {
                Instruction::AddOption { .. } => options += 1,
                Instruction::ShowOptions => {
                    if options == 0 {
                        result.push(
                            Diagnostic::warn(&program.name, "显示选项前没有添加任何选项")
                                .at(name, Some(index)),
                        );
                    }
                    options = 0;
                }
                Instruction::RunNode { .. } | Instruction::Stop => options = 0,
                _ => {}
            }
        }
    }

    if program.node_exists(start_node) {
        let reachable = reachable_nodes(program, start_node);
        for name in program.node_names() {
            if !reachable.contains(name) {
                result.push(
                    Diagnostic::warn(&program.name, format!("节点不可达: {name}"))
                        .at(name, None),
                );
            }
        }
    }

    result
}

/// 检查所有对白和选项 ID 是否都在字符串表中
pub fn check_line_ids(program: &Program, table: &StringTable) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();

    for (name, node) in &program.nodes {
        for (index, instruction) in node.instructions.iter().enumerate() {
            let id = match instruction {
                Instruction::Line { id, .. } | Instruction::AddOption { id, .. } => id,
                _ => continue,
            };
            if !table.contains(id) {
                result.push(
                    Diagnostic::warn(&program.name, format!("字符串表缺少: {id}"))
                        .at(name, Some(index)),
                );
            }
        }
    }

    result
}

/// 程序中所有跳转目标（去重）
pub fn get_jump_targets(program: &Program) -> BTreeSet<String> {
    program
        .nodes
        .values()
        .flat_map(|node| node.instructions.iter())
        .filter_map(Instruction::target_node)
        .map(str::to_string)
        .collect()
}

/// 从 `start` 出发可以到达的节点
fn reachable_nodes<'a>(program: &'a Program, start: &'a str) -> HashSet<&'a str> {
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(name) = stack.pop() {
        if !visited.insert(name) {
            continue;
        }
        let Some(node) = program.node(name) else {
            continue;
        };
        stack.extend(
            node.instructions
                .iter()
                .filter_map(Instruction::target_node),
        );
    }
    visited
}
