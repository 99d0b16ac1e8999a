//! 交互输入协作方
//!
//! 注册了 UserInput 时，ASK_USER 会阻塞等待回答；未注册时执行循环暂停并把控制权交还调用方。

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[async_trait]
pub trait UserInput: Send + Sync {
    /// 展示问题（可带选项）并返回用户回答
    async fn prompt(&self, message: &str, options: &[String]) -> Result<String, String>;
}

/// 终端交互：问题写到 stdout，从 stdin 读一行回答；选项可用序号选择
#[derive(Debug, Default)]
pub struct ConsoleInput;

#[async_trait]
impl UserInput for ConsoleInput {
    async fn prompt(&self, message: &str, options: &[String]) -> Result<String, String> {
        let mut text = format!("\n? {}\n", message);
        for (i, opt) in options.iter().enumerate() {
            text.push_str(&format!("  {}. {}\n", i + 1, opt));
        }
        text.push_str("> ");
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(text.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        stdout.flush().await.map_err(|e| e.to_string())?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| e.to_string())?;
        if read == 0 {
            return Err("stdin closed".to_string());
        }
        Ok(pick_option(line.trim(), options))
    }
}

/// 回答是合法序号时替换为对应选项
fn pick_option(answer: &str, options: &[String]) -> String {
    answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| options.get(i))
        .cloned()
        .unwrap_or_else(|| answer.to_string())
}
