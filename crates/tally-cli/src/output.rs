//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use tally_core::{DatabaseError, HealthCheck, HealthStatus, Todo};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single todo
    pub fn print_todo(&self, todo: &Todo) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:        {}", todo.id);
                println!("Title:     {}", todo.title);
                println!("Done:      {}", if todo.completed { "yes" } else { "no" });
                if !todo.tags.is_empty() {
                    println!("Tags:      {}", todo.tags.join(", "));
                }
                println!("Created:   {}", todo.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:   {}", todo.updated_at.format("%Y-%m-%d %H:%M"));
                if let Some(ref rev) = todo.rev {
                    println!("Revision:  {}", rev);
                }
            }
            OutputFormat::Json => print_json(todo),
            OutputFormat::Quiet => println!("{}", todo.id),
        }
    }

    /// Print a list of todos
    pub fn print_todos(&self, todos: &[Todo]) {
        match self.format {
            OutputFormat::Human => {
                if todos.is_empty() {
                    println!("No todos found.");
                    return;
                }
                for todo in todos {
                    println!("{}", todo_line(todo));
                }
                println!("\n{} todo(s)", todos.len());
            }
            OutputFormat::Json => print_json(&todos),
            OutputFormat::Quiet => {
                for todo in todos {
                    println!("{}", todo.id);
                }
            }
        }
    }

    /// Print a health verdict
    pub fn print_health(&self, check: &HealthCheck) {
        match self.format {
            OutputFormat::Human => {
                let metrics = &check.metrics;
                println!("Database health: {}", status_label(check.status));
                println!();
                println!("  Connected:      {}", metrics.is_connected);
                println!("  Failures:       {}", metrics.consecutive_failures);
                println!("  Sync:           {}", metrics.sync_status);
                println!(
                    "  Response time:  {}",
                    metrics
                        .last_response_time
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "(none)".to_string())
                );
                println!(
                    "  Last success:   {}",
                    metrics
                        .last_successful_operation
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "(never)".to_string())
                );
                if let Some(quota) = metrics.storage_quota {
                    println!(
                        "  Storage:        {:.1}% ({} of {} bytes)",
                        quota.percentage, quota.used, quota.total
                    );
                }

                if !check.issues.is_empty() {
                    println!();
                    println!("Issues:");
                    for issue in &check.issues {
                        println!("  [{}] {}", issue.severity, issue.message);
                    }
                }
            }
            OutputFormat::Json => print_json(check),
            OutputFormat::Quiet => println!("{}", check.status),
        }
    }

    /// One-line health update, used while watching
    pub fn print_health_change(&self, check: &HealthCheck) {
        match self.format {
            OutputFormat::Human => {
                let issues: Vec<_> = check.issues.iter().map(|i| i.message.as_str()).collect();
                println!(
                    "[{}] {}{}",
                    check.timestamp.format("%H:%M:%S"),
                    status_label(check.status),
                    if issues.is_empty() {
                        String::new()
                    } else {
                        format!(" - {}", issues.join("; "))
                    }
                );
            }
            OutputFormat::Json => match serde_json::to_string(check) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to serialize output: {}", e),
            },
            OutputFormat::Quiet => println!("{}", check.status),
        }
    }

    /// Print a classified database error to stderr
    pub fn print_error(&self, error: &DatabaseError) {
        match self.format {
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({ "error": error }));
            }
            _ => {
                eprintln!("Error: {} ({})", error.message, error.kind);
                if error.retryable {
                    eprintln!("This error is transient; try again.");
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn status_label(status: HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "✓ healthy".to_string(),
        HealthStatus::Degraded => "⚠ degraded".to_string(),
        HealthStatus::Unhealthy => "✗ unhealthy".to_string(),
    }
}

fn todo_line(todo: &Todo) -> String {
    let mark = if todo.completed { "[x]" } else { "[ ]" };
    let tags = if todo.tags.is_empty() {
        String::new()
    } else {
        format!(" #{}", todo.tags.join(" #"))
    };
    format!(
        "{} {} {}{}",
        &todo.id.to_string()[..8],
        mark,
        truncate(&todo.title, 50),
        tags
    )
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ünïcödé text", 8), "ünïcö...");
    }

    #[test]
    fn test_todo_line() {
        let mut todo = Todo::new("Buy milk");
        todo.add_tag("home");
        let line = todo_line(&todo);
        assert!(line.starts_with(&todo.id.to_string()[..8]));
        assert!(line.contains("[ ] Buy milk #home"));

        todo.set_completed(true);
        assert!(todo_line(&todo).contains("[x]"));
    }
}
