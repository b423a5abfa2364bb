//! Shell 工具：白名单命令
//!
//! 按 `;`、`&`、`|` 等拆段，每段首词都须在白名单（如 ls、cat、grep）；含危险子串的命令一律拒绝。
//! 进程设置 kill_on_drop，本轮取消时随 future 一起被回收。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::{Tool, ToolContext};

const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

/// 命令连接符；每一段的首词都要在白名单内
const CHAIN_SEPARATORS: &[char] = &[';', '&', '|', '\n', '`', '(', ')'];

const MAX_OUTPUT_CHARS: usize = 8_000;

pub struct ShellTool {
    allowed_commands: HashSet<String>,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(allowed_commands: &[String], timeout_secs: u64) -> Self {
        Self {
            allowed_commands: allowed_commands.iter().map(|s| s.to_lowercase()).collect(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(bad) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("Forbidden pattern: {bad}"));
        }
        if lower.trim().is_empty() {
            return Err("Empty command".to_string());
        }
        if lower.contains("$(") {
            return Err("Command substitution not allowed".to_string());
        }
        for segment in lower.split(CHAIN_SEPARATORS) {
            let Some(name) = segment.split_whitespace().next() else {
                continue;
            };
            if !self.allowed_commands.contains(name) {
                return Err(format!("Command '{name}' not in allowlist"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a whitelisted shell command and return its stdout. Args: {\"command\": \"ls -la\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line; the first word must be allow-listed" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.check(command)?;
        tracing::info!(command = %command, owner = %ctx.owner, "shell tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);

        let output = tokio::select! {
            _ = ctx.cancel_token.cancelled() => return Err("Command cancelled".to_string()),
            r = tokio::time::timeout(self.timeout, cmd.output()) => r
                .map_err(|_| format!("Command timed out after {}s", self.timeout.as_secs()))?
                .map_err(|e| format!("Execution failed: {e}"))?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!("Exit {:?}\nstderr: {}", output.status.code(), stderr.trim()));
        }
        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            text.push_str("\nstderr: ");
            text.push_str(stderr.trim());
        }
        if text.chars().count() > MAX_OUTPUT_CHARS {
            text = format!("{}... (truncated)", text.chars().take(MAX_OUTPUT_CHARS).collect::<String>());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new(&["echo".to_string(), "ls".to_string()], 5)
    }

    #[test]
    fn test_allowlist() {
        let t = tool();
        assert!(t.check("echo hi").is_ok());
        assert!(t.check("LS -la").is_ok());
        assert!(t.check("cat /etc/passwd").unwrap_err().contains("not in allowlist"));
        assert!(t.check("echo x; rm -rf /").unwrap_err().contains("Forbidden"));
        assert!(t.check("   ").unwrap_err().contains("Empty"));
    }

    #[test]
    fn test_chained_commands_checked() {
        let t = tool();
        assert!(t.check("echo x; rm -r dir").unwrap_err().contains("Forbidden"));
        assert!(t.check("chmod +s /bin/sh").unwrap_err().contains("Forbidden"));
        assert!(t.check(":(){ :|:& };:").unwrap_err().contains("Forbidden"));
        assert!(t.check("echo x; cat secret").unwrap_err().contains("'cat'"));
        assert!(t.check("ls | sh").unwrap_err().contains("'sh'"));
        assert!(t.check("echo $(id)").unwrap_err().contains("substitution"));
        assert!(t.check("echo a && ls -la | echo b").is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_allowed_command() {
        let out = tool()
            .execute(serde_json::json!({"command": "echo hive"}), &ToolContext::new("main"))
            .await
            .unwrap();
        assert_eq!(out, "hive");
    }
}
