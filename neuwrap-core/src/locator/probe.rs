//! Version probing: proves a candidate is runnable and reads its version.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use super::candidates::{Invocation, ToolCandidate};
use crate::process::platform_shell;

/// Reported when the probe succeeds but prints nothing recognisable.
pub const DETECTED_VERSION: &str = "detected";

/// Flag spellings tried in order.
pub const VERSION_FLAGS: &[&str] = &["--version", "-v", "version"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// A successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub invocation: Invocation,
    pub version: String,
}

/// Verifies candidates. [`SystemProbe`] spawns processes; tests use fakes.
#[async_trait]
pub trait VersionProbe: Send + Sync {
    async fn probe(&self, candidate: &ToolCandidate) -> Option<ProbeHit>;
}

static LABELED_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*[A-Za-z][\w .-]*:\s*v?(\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.-]+)?)")
        .expect("labeled version pattern is valid")
});

static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bv?(\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.-]+)?)")
        .expect("semver pattern is valid")
});

/// Extracts a version from probe output.
///
/// `<label>: <version>` wins over a bare semantic version anywhere in the
/// text; anything else yields [`DETECTED_VERSION`].
pub fn parse_version(output: &str) -> String {
    LABELED_VERSION
        .captures(output)
        .or_else(|| SEMVER.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DETECTED_VERSION.to_string())
}

/// Quotes a program path for the platform shell when needed.
pub(crate) fn shell_quote(program: &str) -> String {
    quote_for(program, cfg!(windows))
}

/// Characters `cmd.exe` treats specially outside quotes.
const CMD_SPECIAL: &str = "&()[]{}^=;!'+,`~|<>%";

fn quote_for(program: &str, windows: bool) -> String {
    if windows {
        let already_quoted = program.len() > 1 && program.starts_with('"') && program.ends_with('"');
        let needs_quotes = program
            .chars()
            .any(|c| c.is_whitespace() || CMD_SPECIAL.contains(c));
        if needs_quotes && !already_quoted {
            format!("\"{}\"", program)
        } else {
            program.to_string()
        }
    } else {
        let plain = !program.is_empty()
            && program
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "/._-+:,@%=".contains(c));
        if plain {
            program.to_string()
        } else {
            format!("'{}'", program.replace('\'', "'\\''"))
        }
    }
}

/// Builds the probe process for one strategy.
fn probe_command(candidate: &ToolCandidate, invocation: Invocation, flag: &str) -> Command {
    let program = candidate.program.to_string_lossy();
    match invocation {
        Invocation::Direct => {
            let mut cmd = Command::new(&candidate.program);
            cmd.arg(flag);
            cmd
        }
        Invocation::Shell => {
            let (shell, shell_arg) = platform_shell();
            let mut cmd = Command::new(shell);
            cmd.arg(shell_arg)
                .arg(format!("{} {}", shell_quote(&program), flag));
            cmd
        }
        Invocation::PowerShell => {
            let mut cmd = Command::new("powershell");
            cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                .arg(&candidate.program)
                .arg(flag);
            cmd
        }
    }
}

/// Probes by actually running the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[async_trait]
impl VersionProbe for SystemProbe {
    async fn probe(&self, candidate: &ToolCandidate) -> Option<ProbeHit> {
        for flag in VERSION_FLAGS {
            for invocation in &candidate.invocations {
                let mut cmd = probe_command(candidate, *invocation, flag);
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);

                let output = match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        debug!(program = %candidate.program.display(), ?invocation, flag, "Probe spawn failed: {}", e);
                        continue;
                    }
                    Err(_) => {
                        debug!(program = %candidate.program.display(), ?invocation, flag, "Probe timed out");
                        continue;
                    }
                };

                if !output.status.success() {
                    debug!(
                        program = %candidate.program.display(),
                        ?invocation,
                        flag,
                        code = ?output.status.code(),
                        "Probe exited unsuccessfully"
                    );
                    continue;
                }

                let text = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );

                return Some(ProbeHit {
                    invocation: *invocation,
                    version: parse_version(&text),
                });
            }
        }

        None
    }
}
