//! # Config 模块
//!
//! 播放器配置。
//!
//! ## 配置优先级
//!
//! 1. 命令行参数（最高）
//! 2. 配置文件 (config.json)
//! 3. 默认值（最低）

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use yarn_runtime::{DEFAULT_START, RunnerConfig, Value};

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 已编译程序文件，按顺序合并
    #[serde(default)]
    pub programs: Vec<PathBuf>,

    /// 字符串表文件（JSON，行 ID → 文本）
    #[serde(default)]
    pub string_table: Option<PathBuf>,

    /// 起始节点
    #[serde(default = "default_start_node")]
    pub start_node: String,

    /// 变量初始值
    #[serde(default)]
    pub initial_variables: BTreeMap<String, Value>,

    /// 启动前是否运行程序检查
    ///
    /// 检查结果只输出诊断，有错误时拒绝启动。
    #[serde(default = "default_program_check")]
    pub program_check: bool,
}

fn default_start_node() -> String {
    DEFAULT_START.to_string()
}

fn default_program_check() -> bool {
    cfg!(debug_assertions)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            programs: Vec::new(),
            string_table: None,
            start_node: default_start_node(),
            initial_variables: BTreeMap::new(),
            program_check: default_program_check(),
        }
    }
}

impl AppConfig {
    /// 加载配置文件
    ///
    /// 文件不存在或解析失败时返回默认配置并记录警告。
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Self::default();
        }

        match Self::from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "配置文件加载成功");
                config
            }
            Err(e) => {
                warn!(error = %e, "使用默认配置");
                Self::default()
            }
        }
    }

    /// 读取并解析配置文件
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 保存配置到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.programs.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "至少需要一个程序文件".to_string(),
            ));
        }

        for program in &self.programs {
            if !program.exists() {
                return Err(ConfigError::ValidationFailed(format!(
                    "程序文件不存在: {}",
                    program.display()
                )));
            }
        }

        if let Some(table) = &self.string_table
            && !table.exists()
        {
            return Err(ConfigError::ValidationFailed(format!(
                "字符串表不存在: {}",
                table.display()
            )));
        }

        if self.start_node.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "起始节点不能为空".to_string(),
            ));
        }

        Ok(())
    }

    /// 协调器配置
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            start_node: self.start_node.clone(),
            start_automatically: false,
            initial_variables: self.initial_variables.clone(),
        }
    }
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置格式错误: {0}")]
    Format(#[from] serde_json::Error),

    #[error("配置验证失败: {0}")]
    ValidationFailed(String),
}
