//! # Player 模块
//!
//! 终端播放循环：把 [`EventDispatcher`] 的事件打印出来，从输入读取继续/选择。

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};
use yarn_runtime::{
    DialogueRunner, EventDispatcher, PresentationEvent, Program, RuntimeError, StringTable,
    YarnError,
};

/// 读取并合并程序文件
pub fn load_programs(paths: &[PathBuf]) -> Result<Vec<Program>> {
    paths
        .iter()
        .map(|path| {
            let bytes =
                fs::read(path).with_context(|| format!("读取程序失败: {}", path.display()))?;
            let program = Program::from_bytes(&bytes)
                .with_context(|| format!("解析程序失败: {}", path.display()))?;
            info!(path = %path.display(), nodes = program.len(), "程序已加载");
            Ok(program)
        })
        .collect()
}

/// 读取字符串表
pub fn load_string_table(path: &Path) -> Result<StringTable> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("读取字符串表失败: {}", path.display()))?;
    StringTable::from_json(&text).with_context(|| format!("解析字符串表失败: {}", path.display()))
}

/// 用户输入
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Next,
    Choice(usize),
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Next,
        "q" | "quit" => Input::Quit,
        other => other
            .parse()
            .map(Input::Choice)
            .unwrap_or_else(|_| Input::Unknown(other.to_string())),
    }
}

/// 终端播放器
pub struct Player {
    runner: DialogueRunner,
    dispatcher: EventDispatcher,
}

impl Player {
    pub fn new(runner: DialogueRunner, dispatcher: EventDispatcher) -> Self {
        Self { runner, dispatcher }
    }

    pub fn runner(&self) -> &DialogueRunner {
        &self.runner
    }

    /// 从 `node` 开始播放，直到对话结束或输入结束
    ///
    /// `sleep` 在等待计时器时被调用，测试中可以替换为空操作。
    pub fn play<R, W, S>(&mut self, node: &str, input: R, output: &mut W, mut sleep: S) -> Result<()>
    where
        R: BufRead,
        W: Write,
        S: FnMut(Duration),
    {
        self.runner.start_at(node)?;
        let mut lines = input.lines();

        loop {
            for event in self.dispatcher.take_events() {
                render(&event, output)?;
            }

            if self.dispatcher.is_waiting_for_selection() {
                write!(output, "> ")?;
                output.flush()?;
                let Some(line) = lines.next().transpose()? else {
                    self.runner.stop();
                    break;
                };
                match parse_input(&line) {
                    Input::Choice(id) => match self.dispatcher.select_option(id) {
                        Ok(_) => {}
                        Err(YarnError::Runtime(RuntimeError::InvalidOption { .. })) => {
                            writeln!(output, "无效选项: {id}")?;
                        }
                        Err(e) => return Err(e.into()),
                    },
                    Input::Quit => {
                        self.runner.stop();
                        break;
                    }
                    Input::Next | Input::Unknown(_) => writeln!(output, "请输入选项编号")?,
                }
            } else if self.dispatcher.is_waiting_for_continue() {
                let Some(line) = lines.next().transpose()? else {
                    self.runner.stop();
                    break;
                };
                if parse_input(&line) == Input::Quit {
                    self.runner.stop();
                    break;
                }
                self.dispatcher.continue_dialogue()?;
            } else if let Some(wake) = self.runner.next_wake() {
                debug!(?wake, "等待计时器");
                sleep(wake);
                self.runner.update(wake)?;
            } else if self.runner.is_dialogue_running() {
                warn!("对话挂起在宿主无法完成的命令上，停止播放");
                self.runner.stop();
                break;
            } else {
                break;
            }
        }

        output.flush()?;
        Ok(())
    }
}

fn render<W: Write>(event: &PresentationEvent, output: &mut W) -> Result<()> {
    match event {
        PresentationEvent::DialogueStarted { node } => debug!(%node, "对话开始"),
        PresentationEvent::DialogueComplete => writeln!(output, "（完）")?,
        PresentationEvent::DisplayLine { text } => {
            if text.is_empty() {
                // 字符串表缺行时解析结果为空，仍需一次继续
                writeln!(output, "...")?;
            } else {
                writeln!(output, "{text}")?;
            }
        }
        PresentationEvent::DisplayOptions { options } => {
            if options.is_empty() {
                bail!("选项集为空");
            }
            for (id, text) in options {
                writeln!(output, "  [{id}] {text}")?;
            }
        }
        PresentationEvent::UnhandledCommand { text } => writeln!(output, "<<{text}>>")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    use tempfile::TempDir;
    use yarn_runtime::{Instruction, Node, RunState, RunnerConfig};

    fn story() -> Program {
        Program::new("story")
            .with_node(
                "Start",
                Node::new()
                    .with(Instruction::line("line:hello"))
                    .with(Instruction::command("wait 1.5"))
                    .with(Instruction::command("lights off"))
                    .with(Instruction::option("line:left", "Left"))
                    .with(Instruction::option("line:right", "Right"))
                    .with(Instruction::ShowOptions),
            )
            .with_node("Left", Node::new().with(Instruction::line("line:left_end")))
            .with_node("Right", Node::new().with(Instruction::line("line:right_end")))
    }

    fn strings() -> StringTable {
        [
            ("line:hello", "Hello."),
            ("line:left", "Go left"),
            ("line:right", "Go right"),
            ("line:left_end", "Dead end."),
            ("line:right_end", "Sunlight."),
        ]
        .into_iter()
        .collect()
    }

    fn player() -> Player {
        let dispatcher = EventDispatcher::new();
        let mut runner = DialogueRunner::native(dispatcher.clone(), RunnerConfig::default())
            .with_text_resolver(strings());
        runner.load(vec![story()]).unwrap();
        Player::new(runner, dispatcher)
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), Input::Next);
        assert_eq!(parse_input("2\n"), Input::Choice(2));
        assert_eq!(parse_input("q"), Input::Quit);
        assert_eq!(parse_input("left"), Input::Unknown("left".to_string()));
    }

    #[test]
    fn test_play_through() {
        let mut player = player();
        let slept = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&slept);
        let mut output = Vec::new();

        player
            .play(
                "Start",
                Cursor::new("\n7\n1\n\n"),
                &mut output,
                move |d| record.borrow_mut().push(d),
            )
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(
            output,
            "Hello.\n<<lights off>>\n  [0] Go left\n  [1] Go right\n> 无效选项: 7\n> Sunlight.\n（完）\n"
        );
        assert_eq!(*slept.borrow(), vec![Duration::from_secs_f64(1.5)]);
        assert_eq!(player.runner().run_state(), RunState::Completed);
    }

    #[test]
    fn test_quit_stops_runner() {
        let mut player = player();
        let mut output = Vec::new();

        player
            .play("Start", Cursor::new("q\n"), &mut output, |_| {})
            .unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "Hello.\n");
        assert!(!player.runner().is_dialogue_running());
    }

    #[test]
    fn test_end_of_input_stops_runner() {
        let mut player = player();
        let mut output = Vec::new();

        player
            .play("Start", Cursor::new("\n"), &mut output, |_| {})
            .unwrap();

        assert!(String::from_utf8(output).unwrap().ends_with("> "));
        assert!(!player.runner().is_dialogue_running());
    }

    #[test]
    fn test_unknown_start_node() {
        let mut player = player();
        let err = player
            .play("Nowhere", Cursor::new(""), &mut Vec::new(), |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("Nowhere"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let program_path = dir.path().join("story.json");
        let strings_path = dir.path().join("strings.json");
        fs::write(&program_path, story().to_bytes().unwrap()).unwrap();
        fs::write(&strings_path, r#"{ "line:hello": "Hello." }"#).unwrap();

        let programs = load_programs(&[program_path]).unwrap();
        assert_eq!(programs.len(), 1);
        assert!(programs[0].node_exists("Left"));

        let table = load_string_table(&strings_path).unwrap();
        assert_eq!(table.get("line:hello"), Some("Hello."));

        assert!(load_programs(&[dir.path().join("missing.json")]).is_err());
        fs::write(&strings_path, "[]").unwrap();
        assert!(load_string_table(&strings_path).is_err());
    }
}
