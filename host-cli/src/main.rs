//! # yarn-play
//!
//! 终端对话播放器：从磁盘加载已编译的程序，在终端中逐行播放。
//!
//! ```text
//! yarn-play story.json --strings strings.json --start Intro
//! ```
//!
//! 回车继续，输入数字选择选项，`q` 退出。

mod config;
mod player;

use std::io;
use std::path::PathBuf;
use std::thread;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use yarn_runtime::{
    DialogueRunner, DiagnosticLevel, EventDispatcher, Program, StringTable, Value,
    analyze_program, check_line_ids,
};

use config::AppConfig;
use player::{Player, load_programs, load_string_table};

#[derive(Parser, Debug)]
#[command(name = "yarn-play", about = "Play compiled dialogue programs in the terminal")]
struct Cli {
    /// 程序文件（覆盖配置文件中的列表）
    programs: Vec<PathBuf>,

    /// 配置文件
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 字符串表
    #[arg(short, long)]
    strings: Option<PathBuf>,

    /// 起始节点
    #[arg(short = 'n', long)]
    start: Option<String>,

    /// 变量初始值，形如 `$gold=10`
    #[arg(long = "var", value_parser = parse_variable)]
    variables: Vec<(String, Value)>,

    /// 跳过程序检查
    #[arg(long)]
    no_check: bool,

    /// 日志级别（RUST_LOG 优先）
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

/// 解析 `name=value`，值按 JSON 解析，失败时作为字符串
fn parse_variable(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("缺少 '=': {s}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("变量名为空: {s}"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((name.to_string(), value))
}

/// 命令行参数覆盖配置文件
fn apply_overrides(config: &mut AppConfig, cli: Cli) {
    if !cli.programs.is_empty() {
        config.programs = cli.programs;
    }
    if let Some(strings) = cli.strings {
        config.string_table = Some(strings);
    }
    if let Some(start) = cli.start {
        config.start_node = start;
    }
    config.initial_variables.extend(cli.variables);
    if cli.no_check {
        config.program_check = false;
    }
}

/// 运行程序检查，有错误时返回 `Err`
fn check_program(program: &Program, start: &str, strings: &StringTable) -> Result<()> {
    let mut result = analyze_program(program, start);
    if !strings.is_empty() {
        result.merge(check_line_ids(program, strings));
    }

    for diagnostic in &result.diagnostics {
        match diagnostic.level {
            DiagnosticLevel::Error => error!("{diagnostic}"),
            DiagnosticLevel::Warn => warn!("{diagnostic}"),
            DiagnosticLevel::Info => info!("{diagnostic}"),
        }
    }

    if result.has_errors() {
        bail!("程序检查发现 {} 个错误", result.error_count());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(cli.log_level.into()))
        .with_writer(io::stderr)
        .init();

    let mut config = AppConfig::load(&cli.config);
    apply_overrides(&mut config, cli);
    config.validate()?;

    let programs = load_programs(&config.programs)?;
    let strings = match &config.string_table {
        Some(path) => load_string_table(path)?,
        None => StringTable::new(),
    };

    if config.program_check {
        let combined = Program::combine(programs.iter().cloned())?;
        check_program(&combined, &config.start_node, &strings)?;
    }

    let dispatcher = EventDispatcher::new();
    let mut runner = DialogueRunner::native(dispatcher.clone(), config.runner_config())
        .with_text_resolver(strings);
    runner.initialize(programs)?;
    info!(nodes = runner.node_names().len(), start = %config.start_node, "准备播放");

    let mut player = Player::new(runner, dispatcher);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    player.play(&config.start_node, stdin.lock(), &mut stdout, thread::sleep)?;
    Ok(())
}
