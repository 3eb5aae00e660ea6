// src/exec/summary.rs

//! Results of command and list runs, and how they are rendered into
//! notification bodies.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::config::Templates;
use crate::notify::template::render;

/// Maximum bytes of captured output quoted per command in a notification.
pub const OUTPUT_EXCERPT_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub name: String,
    /// Alias of the host it ran on, `localhost` for local runs.
    pub host: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Captured stdout and stderr, only when output capture was requested.
    pub output: Option<String>,
    /// Why the command could not be run or did not succeed.
    pub error: Option<String>,
}

impl CommandResult {
    pub fn failed(name: &str, host: &str, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            success: false,
            exit_code: None,
            duration,
            output: None,
            error: Some(error.into()),
        }
    }

    fn status_line(&self) -> String {
        let status = if self.success { "ok" } else { "FAILED" };
        let mut line = format!(
            "- {} on {}: {} ({})",
            self.name,
            self.host,
            status,
            format_duration(self.duration)
        );
        if let Some(code) = self.exit_code {
            let _ = write!(line, ", exit {code}");
        }
        if let Some(err) = &self.error {
            let _ = write!(line, ", {err}");
        }
        line
    }
}

/// Which hook list ran, and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRun {
    pub stage: &'static str,
    pub list: String,
    pub results: Vec<CommandResult>,
}

impl HookRun {
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
    pub list: String,
    pub display_name: String,
    /// Set for per-host runs.
    pub host: Option<String>,
    pub success: bool,
    pub duration: Duration,
    pub results: Vec<CommandResult>,
    pub hooks: Vec<HookRun>,
}

impl ListSummary {
    pub fn subject(&self) -> String {
        let status = if self.success { "succeeded" } else { "failed" };
        match &self.host {
            Some(host) => format!("{}@{} {}", self.list, host, status),
            None => format!("{} {}", self.list, status),
        }
    }

    pub fn failed_commands(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Per-command status lines, with excerpts of captured output.
    pub fn results_text(&self) -> String {
        let mut text = String::new();
        for result in &self.results {
            text.push_str(&result.status_line());
            text.push('\n');
            if let Some(output) = result.output.as_deref().filter(|o| !o.trim().is_empty()) {
                for line in excerpt(output, OUTPUT_EXCERPT_LIMIT).lines() {
                    let _ = writeln!(text, "    {line}");
                }
            }
        }
        for hook in &self.hooks {
            let status = if hook.success() { "ok" } else { "FAILED" };
            let _ = writeln!(text, "- {} hook {}: {}", hook.stage, hook.list, status);
        }
        text
    }

    pub fn render_body(&self, templates: &Templates) -> String {
        let template = if self.success {
            &templates.success
        } else {
            &templates.failure
        };

        let succeeded = self.results.iter().filter(|r| r.success).count();
        let mut vars = BTreeMap::new();
        vars.insert("list", self.list.clone());
        vars.insert("name", self.display_name.clone());
        vars.insert("host", self.host.clone().unwrap_or_else(|| "localhost".to_string()));
        vars.insert("status", if self.success { "succeeded" } else { "failed" }.to_string());
        vars.insert("duration", format_duration(self.duration));
        vars.insert("results", self.results_text());
        vars.insert("succeeded", succeeded.to_string());
        vars.insert("failed", (self.results.len() - succeeded).to_string());
        render(template, &vars)
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", d.as_millis())
    } else if secs < 120.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}m{}s", d.as_secs() / 60, d.as_secs() % 60)
    }
}

/// At most `limit` bytes of `text`, cut on a char boundary, marked when cut.
pub fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_respects_char_boundaries() {
        let text = "é".repeat(600);
        let cut = excerpt(&text, OUTPUT_EXCERPT_LIMIT);
        assert!(cut.ends_with("[... truncated]"));
        assert!(cut.len() <= OUTPUT_EXCERPT_LIMIT + "\n[... truncated]".len());
    }

    #[test]
    fn subject_names_list_and_state() {
        let summary = ListSummary {
            list: "nightly".into(),
            display_name: "Nightly".into(),
            host: None,
            success: false,
            duration: Duration::from_secs(2),
            results: vec![],
            hooks: vec![],
        };
        assert_eq!(summary.subject(), "nightly failed");
    }
}
