//! # xtask - 开发辅助工具
//!
//! 提供本地质量门禁与开发辅助命令。
//!
//! ## 命令
//!
//! - `check-all`: 运行 fmt、clippy、test
//! - `cov-runtime`: 运行 yarn-runtime 覆盖率
//! - `program-check`: 检查已编译的程序文件（跳转目标、可达性、行 ID）

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;
use xshell::{Shell, cmd};
use yarn_runtime::{
    DEFAULT_START, Diagnostic, DiagnosticResult, Program, StringTable, analyze_program,
    check_line_ids,
};

/// 字符串表文件后缀，其余 `.json` 文件视为程序
const STRINGS_SUFFIX: &str = ".strings.json";

#[derive(Parser)]
#[command(name = "xtask", about = "开发辅助工具")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    /// 运行 fmt、clippy、test 门禁检查
    CheckAll,
    /// 运行 yarn-runtime 覆盖率报告
    CovRuntime,
    /// 检查程序文件
    ///
    /// 不带参数时检查 assets/dialogue/ 下所有文件。
    ProgramCheck {
        /// 文件或目录
        paths: Vec<PathBuf>,
        /// 起始节点
        #[arg(long, default_value = DEFAULT_START)]
        start: String,
    },
}

fn main() -> ExitCode {
    if let Err(e) = real_main() {
        eprintln!("xtask error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::from(0)
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    match cli.command {
        Task::CheckAll => {
            eprintln!("\n==> cargo fmt");
            cmd!(sh, "cargo fmt --all -- --check").run()?;
            eprintln!("\n==> cargo clippy");
            cmd!(sh, "cargo clippy --workspace --all-targets").run()?;
            eprintln!("\n==> cargo test");
            cmd!(sh, "cargo test --workspace").run()?;
        }
        Task::CovRuntime => {
            if cmd!(sh, "cargo llvm-cov --version").quiet().run().is_err() {
                bail!(
                    "cargo llvm-cov 不可用。\n\
请先安装：\n\
  - cargo install cargo-llvm-cov\n\
  - rustup component add llvm-tools-preview\n\
然后重试。"
                );
            }
            cmd!(sh, "cargo llvm-cov -p yarn-runtime --all-features --html").run()?;
            eprintln!("\nCoverage HTML: target/llvm-cov/html/index.html");
        }
        Task::ProgramCheck { paths, start } => {
            let paths = if paths.is_empty() {
                let default = PathBuf::from("assets/dialogue");
                if !default.exists() {
                    bail!(
                        "默认程序目录不存在: {}\n请在 workspace 根目录运行，或指定路径",
                        default.display()
                    );
                }
                vec![default]
            } else {
                paths
            };
            program_check(&paths, &start)?;
        }
    }

    Ok(())
}

//=============================================================================
// program-check 命令实现
//=============================================================================

/// 待检查的文件
#[derive(Debug, Default, PartialEq)]
struct CheckFiles {
    programs: Vec<PathBuf>,
    strings: Vec<PathBuf>,
}

fn is_strings_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(STRINGS_SUFFIX))
}

/// 收集路径下的程序和字符串表
fn collect_files(paths: &[PathBuf]) -> Result<CheckFiles> {
    let mut files = CheckFiles::default();

    for root in paths {
        if !root.exists() {
            bail!("路径不存在: {}", root.display());
        }
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if is_strings_file(path) {
                files.strings.push(path.to_path_buf());
            } else {
                files.programs.push(path.to_path_buf());
            }
        }
    }

    Ok(files)
}

/// 检查一组程序文件
///
/// 所有程序合并后统一分析，跨文件的跳转视为有效。
fn check_files(files: &CheckFiles, start: &str) -> Result<DiagnosticResult> {
    let mut result = DiagnosticResult::new();
    let mut programs = Vec::new();

    for path in &files.programs {
        let id = path.display().to_string();
        let parsed = std::fs::read(path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Program::from_bytes(&bytes).map_err(anyhow::Error::from));
        match parsed {
            Ok(program) => programs.push(program),
            Err(e) => result.push(Diagnostic::error(&id, "无法加载程序").with_detail(e.to_string())),
        }
    }

    let mut table = StringTable::new();
    for path in &files.strings {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取字符串表失败: {}", path.display()))?;
        let parsed = StringTable::from_json(&text)
            .with_context(|| format!("解析字符串表失败: {}", path.display()))?;
        for (id, text) in parsed.iter() {
            table.insert(id, text);
        }
    }

    match Program::combine(programs) {
        Ok(combined) => {
            result.merge(analyze_program(&combined, start));
            if !table.is_empty() {
                result.merge(check_line_ids(&combined, &table));
            }
        }
        Err(e) => result.push(Diagnostic::error("<combined>", e.to_string())),
    }

    Ok(result)
}

fn program_check(paths: &[PathBuf], start: &str) -> Result<()> {
    let files = collect_files(paths)?;
    if files.programs.is_empty() {
        eprintln!("未找到程序文件（.json）");
        return Ok(());
    }

    eprintln!(
        "==> 检查 {} 个程序文件，{} 个字符串表...\n",
        files.programs.len(),
        files.strings.len()
    );

    let result = check_files(&files, start)?;
    print_check_result(&files, &result);

    if result.has_errors() {
        bail!("程序检查发现错误");
    }
    Ok(())
}

/// 输出检查结果
fn print_check_result(files: &CheckFiles, result: &DiagnosticResult) {
    eprintln!("─────────────────────────────────────────────────────");
    eprintln!("检查完成: {} 个程序", files.programs.len());
    eprintln!();

    for diag in &result.diagnostics {
        eprintln!("{}", diag);
    }

    let error_count = result.error_count();
    let warn_count = result.warn_count();

    eprintln!();
    if error_count > 0 {
        eprintln!("❌ {} 个错误, {} 个警告", error_count, warn_count);
    } else if warn_count > 0 {
        eprintln!("⚠️  0 个错误, {} 个警告", warn_count);
    } else {
        eprintln!("✅ 检查通过，无错误");
    }
}
