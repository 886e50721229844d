use std::io::{self, BufRead, Write};

use tracing::warn;

use crate::chat::{ChatRequest, ChatService};

pub const EXIT_COMMANDS: [&str; 4] = ["/exit", "exit", "quit", "/quit"];
pub const PROMPT: &str = "你> ";

/// Interactive loop over one [`ChatService`] session. With `pinned` every
/// turn uses that skill; otherwise the skill is chosen per turn.
///
/// Returns the number of answered turns. A failed request is reported and
/// the loop keeps going; only I/O errors on `input`/`output` end it early.
pub fn run_repl<R: BufRead, W: Write>(
    service: &ChatService,
    pinned: Option<&str>,
    assistant_label: &str,
    mut input: R,
    mut output: W,
) -> io::Result<usize> {
    match pinned {
        Some(skill) => writeln!(output, "[CHAT-SKILL] 使用技能：{skill}")?,
        None => writeln!(output, "[CHAT-AUTO] 将在每次对话中自动选择技能。")?,
    }
    writeln!(
        output,
        "模型：{}，技能目录：{}",
        service.model(),
        service.skills_root().display()
    )?;
    writeln!(output, "进入连续对话模式，输入 /exit 退出。")?;

    let mut answered = 0usize;
    let mut line = String::new();
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let user_text = line.trim();
        if user_text.is_empty() {
            continue;
        }
        if is_exit_command(user_text) {
            break;
        }

        let request = ChatRequest {
            message: user_text.to_string(),
            skill: pinned.map(str::to_string),
            image_data: None,
        };
        match service.handle(request) {
            Ok(reply) => {
                if pinned.is_none() {
                    if let Some(skill) = reply.skill.as_deref() {
                        writeln!(output, "[CHAT-AUTO] 使用技能：{skill}")?;
                    }
                }
                writeln!(output, "\n{assistant_label}> {}\n", reply.reply)?;
                answered += 1;
            }
            Err(error) => {
                warn!(error = %error, "interactive chat turn failed");
                writeln!(output, "请求失败: {error}")?;
            }
        }
    }
    Ok(answered)
}

pub fn is_exit_command(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}
