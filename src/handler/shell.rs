use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use super::Handler;

/// Maximum output size in bytes. Anything beyond this is truncated.
const MAX_OUTPUT_BYTES: usize = 50_000;

/// Commands that are never allowed regardless of mode.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "> /dev/sda",
    "shutdown",
    "reboot",
    "halt",
];

/// Command prefixes and patterns that require write mode.
const WRITE_PATTERNS: &[&str] = &[
    "rm ", "rmdir", "mv ", "cp ", "mkdir", "touch ", "chmod", "chown", "ln ", "dd ", "kill",
    "tee ", "sed -i", "truncate", "git push", "git commit", "git reset",
];

/// Environment variables passed through to commands. Everything else is
/// stripped.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "SHELL", "LANG", "LC_ALL", "TERM", "TZ"];

/// Execution mode for submitted commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShellMode {
    /// Only read-only commands allowed (default).
    ReadOnly,
    /// All commands allowed (except always-blocked ones).
    ReadWrite,
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub mode: ShellMode,
    pub working_dir: PathBuf,
    pub max_output_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            mode: ShellMode::ReadOnly,
            working_dir: std::env::temp_dir().join("mule-sandbox"),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

/// A work-item handler that runs each payload as a shell command line.
/// The dispatcher takes care of running commands one at a time in
/// submission order; this handler only executes and prints.
pub struct ShellHandler {
    config: ShellConfig,
}

impl ShellHandler {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn is_blocked(cmd: &str) -> bool {
        let lower = cmd.to_lowercase();
        BLOCKED_COMMANDS.iter().any(|pat| lower.contains(pat))
    }

    fn is_write_command(cmd: &str) -> bool {
        // Chained commands: every segment must pass on its own.
        cmd.split(&[';', '&', '|'][..])
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .any(Self::segment_is_write)
    }

    fn segment_is_write(segment: &str) -> bool {
        if segment.contains("> ") || segment.contains(">>") {
            return true;
        }
        let lower = segment.to_lowercase();
        WRITE_PATTERNS
            .iter()
            .any(|pat| lower.starts_with(pat) || lower.starts_with(&format!("sudo {pat}")))
    }

    fn truncate_output(output: &str, max_bytes: usize) -> String {
        if output.len() <= max_bytes {
            return output.to_string();
        }
        let truncated = &output[..max_bytes];
        // Back off to the last valid UTF-8 boundary.
        let truncated = match truncated.char_indices().last() {
            Some((i, c)) => &truncated[..i + c.len_utf8()],
            None => truncated,
        };
        format!(
            "{}\n\n[truncated: showing {}/{} bytes]",
            truncated,
            max_bytes,
            output.len()
        )
    }

    fn filtered_env() -> Vec<(String, String)> {
        SAFE_ENV_VARS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
            .collect()
    }
}

#[async_trait]
impl Handler<String> for ShellHandler {
    async fn on_work_item(&self, command: String) -> Result<()> {
        if Self::is_blocked(&command) {
            bail!("blocked: command is on the deny list");
        }
        if self.config.mode == ShellMode::ReadOnly && Self::is_write_command(&command) {
            bail!("blocked: write operation not allowed in read-only mode");
        }

        let work_dir = &self.config.working_dir;
        if !work_dir.exists() {
            tokio::fs::create_dir_all(work_dir).await?;
        }

        tracing::debug!(%command, "executing");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(work_dir)
            .env_clear()
            .envs(Self::filtered_env())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let text = Self::truncate_output(&stdout, self.config.max_output_bytes);
            if !text.is_empty() {
                print!("{text}");
                if !text.ends_with('\n') {
                    println!();
                }
            }
            Ok(())
        } else {
            bail!(
                "exit code {}\nstdout: {}\nstderr: {}",
                output.status.code().unwrap_or(-1),
                Self::truncate_output(&stdout, self.config.max_output_bytes),
                Self::truncate_output(&stderr, self.config.max_output_bytes)
            )
        }
    }
}
