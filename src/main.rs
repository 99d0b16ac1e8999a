//! Quill 命令行入口
//!
//! - `quill <objective>`：新建会话并开始生成
//! - `quill --resume <session-id> [answer]`：恢复暂停的会话，answer 为对上一个问题的回答
//! - `quill --list`：列出已保存的会话
//!
//! `--interactive` 时 ASK_USER 直接在终端作答而不暂停；`--config <path>` 追加一个配置文件。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use quill::config::load_config;
use quill::memory::FileSessionStore;
use quill::react::{AgentEvent, ConsoleInput, RunResult, UserInput};
use quill::{observability, Agent};

enum Command {
    Start(String),
    Resume {
        session_id: String,
        answer: Option<String>,
    },
    List,
}

struct Cli {
    command: Command,
    interactive: bool,
    config: Option<PathBuf>,
}

const USAGE: &str = "usage: quill [--interactive] [--config <path>] <objective>
       quill [--interactive] [--config <path>] --resume <session-id> [answer]
       quill --list";

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Cli> {
    let mut interactive = false;
    let mut config = None;
    let mut resume = false;
    let mut list = false;
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--interactive" | "-i" => interactive = true,
            "--resume" | "-r" => resume = true,
            "--list" => list = true,
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => bail!("{}", USAGE),
            _ => positional.push(arg),
        }
    }
    let command = if list {
        Command::List
    } else if resume {
        let mut it = positional.into_iter();
        let session_id = it.next().context(USAGE)?;
        let answer = it.collect::<Vec<_>>().join(" ");
        Command::Resume {
            session_id,
            answer: (!answer.trim().is_empty()).then_some(answer),
        }
    } else {
        let objective = positional.join(" ");
        if objective.trim().is_empty() {
            bail!("{}", USAGE);
        }
        Command::Start(objective)
    };
    Ok(Cli {
        command,
        interactive,
        config,
    })
}

fn print_event(ev: &AgentEvent) {
    match ev {
        AgentEvent::Decomposed { tasks } => eprintln!("· planned {} tasks", tasks),
        AgentEvent::IterationStarted {
            iteration,
            max_iterations,
        } => eprintln!("· iteration {}/{}", iteration, max_iterations),
        AgentEvent::Decision { tool, .. } => eprintln!("  → {}", tool),
        AgentEvent::ToolResult {
            tool,
            success,
            preview,
        } => eprintln!("  {} {}: {}", if *success { "✓" } else { "✗" }, tool, preview),
        AgentEvent::Deficiency { category, detail } => eprintln!("  … missing {}: {}", category, detail),
        AgentEvent::Error { text } => eprintln!("✗ {}", text),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = parse_args(std::env::args().skip(1))?;
    let config = load_config(cli.config.clone()).context("Failed to load config")?;

    if let Command::List = cli.command {
        let store = FileSessionStore::new(&config.app.state_dir);
        for id in store.list().await? {
            println!("{}", id);
        }
        return Ok(());
    }

    let agent = Agent::from_config(config);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_event(&ev);
        }
    });
    let input: Option<Arc<dyn UserInput>> = if cli.interactive {
        Some(Arc::new(ConsoleInput))
    } else {
        None
    };

    let (session_id, result) = match cli.command {
        Command::Start(objective) => {
            let id = agent.create_session(&objective).await?;
            eprintln!("session {}", id);
            let run = agent.execution_loop(&id).with_event_tx(event_tx);
            (id, run.start(input).await)
        }
        Command::Resume { session_id, answer } => {
            let mut run = agent.execution_loop(&session_id).with_event_tx(event_tx);
            if let Some(input) = input {
                run = run.with_user_input(input);
            }
            let result = run.continue_execution(answer).await;
            (session_id, result)
        }
        Command::List => return Ok(()),
    };

    match result.with_context(|| format!("session {} failed", session_id))? {
        RunResult::Completed(report) => {
            eprintln!("{}", report.summary);
            println!("{}", serde_json::to_string_pretty(&report.output)?);
        }
        RunResult::Paused { question, options } => {
            println!("{}", question);
            for (i, opt) in options.iter().enumerate() {
                println!("  {}. {}", i + 1, opt);
            }
            println!("\nanswer with: quill --resume {} \"<answer>\"", session_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_start_and_resume() {
        let cli = parse_args(args(&["-i", "a", "sci-fi", "detective", "story"])).unwrap();
        assert!(cli.interactive);
        assert!(matches!(cli.command, Command::Start(ref o) if o == "a sci-fi detective story"));

        let cli = parse_args(args(&["--resume", "session_1", "黑色", "电影"])).unwrap();
        match cli.command {
            Command::Resume { session_id, answer } => {
                assert_eq!(session_id, "session_1");
                assert_eq!(answer.as_deref(), Some("黑色 电影"));
            }
            _ => panic!("expected resume"),
        }

        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["--resume"])).is_err());
    }
}
