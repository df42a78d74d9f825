//! Run summary printed at exit

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use colored::Colorize;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::ExitCode;

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Host changed
    Changed,
    /// Already in the desired state
    Unchanged,
    Skipped,
    /// Completed with a problem that does not abort the run
    Warning,
    Failed,
}

impl Outcome {
    fn tag(&self) -> String {
        let tag = match self {
            Outcome::Changed => "[CHANGED]".green(),
            Outcome::Unchanged => "[OK]".green(),
            Outcome::Skipped => "[SKIPPED]".dimmed(),
            Outcome::Warning => "[WARNING]".yellow(),
            Outcome::Failed => "[FAILED]".red(),
        };
        tag.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub outcome: Outcome,
    pub detail: String,
}

/// Steps, warnings and rollback actions of one command
#[derive(Debug)]
pub struct Report {
    pub command: &'static str,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub rollback: Vec<StepRecord>,
    pub notes: Vec<String>,
    /// Generated basic auth password, shown once
    pub generated_password: Option<(String, SecretString)>,
    pub error: Option<String>,
    exit: ExitCode,
}

impl Report {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            started_at: Utc::now(),
            steps: Vec::new(),
            rollback: Vec::new(),
            notes: Vec::new(),
            generated_password: None,
            error: None,
            exit: ExitCode::Success,
        }
    }

    pub fn step(&mut self, name: impl Into<String>, outcome: Outcome, detail: impl Into<String>) {
        self.steps.push(StepRecord {
            name: name.into(),
            outcome,
            detail: detail.into(),
        });
    }

    pub fn rollback_action(
        &mut self,
        name: impl Into<String>,
        outcome: Outcome,
        detail: impl Into<String>,
    ) {
        self.rollback.push(StepRecord {
            name: name.into(),
            outcome,
            detail: detail.into(),
        });
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Record a fatal error with its exit code
    pub fn fail(&mut self, exit: ExitCode, error: impl Into<String>) {
        self.exit = exit;
        self.error = Some(error.into());
    }

    /// Mark the run as degraded unless a worse outcome is already set
    pub fn degrade(&mut self) {
        if self.exit == ExitCode::Success {
            self.exit = ExitCode::Degraded;
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit
    }

    /// Steps with a warning outcome
    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.outcome == Outcome::Warning)
    }

    pub fn find_step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Human-readable summary
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\nflowerctl {} ({})",
            self.command,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        for step in &self.steps {
            let _ = writeln!(out, "  {} {}: {}", step.outcome.tag(), step.name, step.detail);
        }

        if !self.rollback.is_empty() {
            let _ = writeln!(out, "\n{}", "Rollback:".yellow());
            for step in &self.rollback {
                let _ = writeln!(out, "  {} {}: {}", step.outcome.tag(), step.name, step.detail);
            }
        }

        for note in &self.notes {
            let _ = writeln!(out, "\n{}", note);
        }
        if let Some((user, password)) = &self.generated_password {
            let _ = writeln!(
                out,
                "\nGenerated password for {}: {}\nIt is shown only once; store it now.",
                user,
                password.expose_secret()
            );
        }

        let status = match self.exit {
            ExitCode::Success => "[SUCCESS]".green(),
            ExitCode::Degraded => "[DEGRADED]".yellow(),
            ExitCode::RolledBack => "[ROLLED BACK]".red(),
            _ => "[ERROR]".red(),
        };
        match &self.error {
            Some(error) => {
                let _ = writeln!(out, "\n{} {}", status, error);
            }
            None => {
                let _ = writeln!(out, "\n{} {} finished", status, self.command);
            }
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
