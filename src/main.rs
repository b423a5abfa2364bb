//! Hive 命令行入口
//!
//! `hive [--agent NAME] [--config PATH] [prompt...]`：给出 prompt 时跑一轮后退出，否则进入 stdin 交互循环。
//! 工具确认在终端询问：y = 本次允许，a = 本会话全部允许，其余 = 取消本轮。
//! Ctrl+C 取消当前轮；空闲时退出。`/agents` 列出可用 agent。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};

use hive::config::load_config;
use hive::llm::MockLlmClient;
use hive::permission::{ConfirmationDecision, ConfirmationPrompter, ToolDescription};
use hive::react::ReactEvent;
use hive::{AgentRuntime, TurnOutcome};

type SharedLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

/// 在终端询问确认；与主循环共用同一个 stdin 行读取器
struct StdinPrompter {
    lines: SharedLines,
}

#[async_trait]
impl ConfirmationPrompter for StdinPrompter {
    async fn ask(&self, description: &ToolDescription) -> ConfirmationDecision {
        eprint!(
            "[{}] run tool '{}' with {}? [y]es / [a]ll this session / [n]o: ",
            description.owner, description.tool, description.args_preview
        );
        let _ = tokio::io::stderr().flush().await;
        let answer = self.lines.lock().await.next_line().await.ok().flatten();
        match answer.as_deref().map(str::trim) {
            Some("y") | Some("yes") => ConfirmationDecision::ApproveOnce,
            Some("a") | Some("all") => ConfirmationDecision::ApproveSessionWide,
            _ => ConfirmationDecision::Cancel,
        }
    }
}

struct Args {
    agent: Option<String>,
    config: Option<PathBuf>,
    prompt: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        agent: None,
        config: None,
        prompt: Vec::new(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--agent" => args.agent = Some(it.next().context("--agent needs a value")?),
            "--config" => args.config = Some(it.next().context("--config needs a value")?.into()),
            _ => args.prompt.push(arg),
        }
    }
    Ok(args)
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Finished(text) => println!("{text}"),
        TurnOutcome::Cancelled => eprintln!("(cancelled)"),
        TurnOutcome::RecursionExhausted { rounds } => {
            eprintln!("(stopped after {rounds} tool rounds without a final answer)")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();
    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;

    let lines: SharedLines = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let prompter = Arc::new(StdinPrompter { lines: lines.clone() });
    let runtime = AgentRuntime::from_config(cfg, Arc::new(MockLlmClient), prompter)
        .await
        .context("Failed to build runtime")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ReactEvent>();
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                ReactEvent::ToolCall { tool, .. } => eprintln!("-> {tool}"),
                ReactEvent::PermissionDenied { tool } => eprintln!("!! {tool} is not trusted"),
                ReactEvent::ToolFailure { tool, reason } => eprintln!("!! {tool}: {reason}"),
                _ => {}
            }
        }
    });

    let mut session = runtime
        .open_session(args.agent.as_deref())
        .await
        .context("Failed to open session")?
        .with_events(event_tx);

    let supervisor = session.supervisor().clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !supervisor.interrupt() {
                break;
            }
        }
    });
    let closed = session.supervisor().root_token();

    if !args.prompt.is_empty() {
        let outcome = runtime
            .process_message(&mut session, &args.prompt.join(" "))
            .await
            .context("Turn failed")?;
        print_outcome(&outcome);
        return Ok(());
    }

    loop {
        eprint!("{}> ", session.config().name);
        let _ = tokio::io::stderr().flush().await;
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = async { lines.lock().await.next_line().await } => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/agents" => {
                match runtime.resolver().agent_names().await {
                    Ok(names) => eprintln!("{}", names.join(", ")),
                    Err(e) => eprintln!("error: {e}"),
                }
                continue;
            }
            "/clear" => {
                session.clear();
                continue;
            }
            _ => {}
        }
        if let Some(agent) = input.strip_prefix("/agent ") {
            if let Err(e) = runtime.reconfigure(&mut session, agent.trim()).await {
                eprintln!("error: {e}");
            }
            continue;
        }
        match runtime.process_message(&mut session, input).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
