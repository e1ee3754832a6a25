//! 内置命令

use std::time::Duration;

use tracing::error;

use crate::runtime::Continuation;

/// `wait <秒数>`
pub const WAIT_COMMAND: &str = "wait";

/// 暂停给定秒数后继续
///
/// 参数无法解析时记录错误并立即继续。
pub fn wait(args: &[String], on_complete: Continuation) {
    let result = match parse_duration(args) {
        Some(delay) => on_complete.resume_after(delay),
        None => {
            error!(args = ?args, "wait 命令参数无效，立即继续");
            on_complete.resume()
        }
    };
    if let Err(e) = result {
        error!(error = %e, "wait 命令恢复对话失败");
    }
}

/// 解析秒数，只接受一个非负有限的十进制数
pub fn parse_duration(args: &[String]) -> Option<Duration> {
    let [seconds] = args else {
        return None;
    };
    let seconds: f64 = seconds.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(&args(&["0"])), Some(Duration::ZERO));
        assert_eq!(parse_duration(&args(&["1.5"])), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(&args(&[".25"])), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_duration_rejects_malformed() {
        assert_eq!(parse_duration(&args(&[])), None);
        assert_eq!(parse_duration(&args(&["1,5"])), None);
        assert_eq!(parse_duration(&args(&["soon"])), None);
        assert_eq!(parse_duration(&args(&["-1"])), None);
        assert_eq!(parse_duration(&args(&["NaN"])), None);
        assert_eq!(parse_duration(&args(&["1", "2"])), None);
    }
}
