//! Line-oriented terminal front-end for the stats view.

use anyhow::Result;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::FilterField;
use crate::services::error_handling::{TimingsError, UserErrorFormatter};
use crate::services::export_service::{ExportFormat, ExportService};
use crate::services::liveness::{Connectivity, LivenessTracker};
use crate::services::selection::CheckState;
use crate::services::stats_view::{StatsView, ViewSnapshot};

pub const HELP: &str = "\
Commands:
  range <expr>          e.g. '2 weeks', 'yesterday', '2026-01-01..2026-01-31'
  client <text>         substring match, empty clears
  project <text>        substring match, empty clears
  transform <expr>      formula over x, e.g. 'r(x * 1.1, 2)'
  filter <expr>         boolean formula over x, e.g. 'x >= 1'
  toggle <n>            select or unselect row n
  toggle-all            select every visible row, or clear
  summary <n> <text>    set the summary of row n, empty text deletes
  export csv|json|md    selected rows, or all visible rows
  link                  query string reproducing the filters
  show                  redraw the table
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetFilter(FilterField, String),
    /// 1-based row number as displayed.
    Toggle(usize),
    ToggleAll,
    Summary(usize, String),
    Export(ExportFormat),
    Link,
    Show,
    Help,
    Quit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Command>, TimingsError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let unknown = || TimingsError::UnknownCommand {
            command: line.to_string(),
        };

        let command = match head.to_lowercase().as_str() {
            "toggle" => Command::Toggle(parse_position(rest).ok_or_else(unknown)?),
            "toggle-all" | "all" => Command::ToggleAll,
            "summary" => {
                let (position, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Command::Summary(parse_position(position).ok_or_else(unknown)?, text.trim().to_string())
            }
            "export" => Command::Export(rest.parse()?),
            "link" => Command::Link,
            "show" | "ls" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => {
                let field: FilterField = other.parse()?;
                Command::SetFilter(field, rest.to_string())
            }
        };
        Ok(Some(command))
    }
}

fn parse_position(text: &str) -> Option<usize> {
    text.trim().parse().ok().filter(|n| *n > 0)
}

pub enum Outcome {
    Output(String),
    Quit,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// `quit` or end of input.
    Closed,
    /// The idle watchdog fired after this much inactivity.
    Idle(Duration),
}

pub struct Shell {
    view: Arc<StatsView>,
    liveness: LivenessTracker,
    connectivity: Option<watch::Receiver<Connectivity>>,
}

impl Shell {
    pub fn new(view: Arc<StatsView>, liveness: LivenessTracker) -> Self {
        Self {
            view,
            liveness,
            connectivity: None,
        }
    }

    pub fn with_connectivity(mut self, connectivity: watch::Receiver<Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Reads commands until `quit` or end of input, then flushes pending
    /// summary edits.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.view.settle().await;
        output.write_all(self.render().as_bytes()).await?;
        output.flush().await?;

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            self.liveness.touch();
            let outcome = match Command::parse(&line) {
                Ok(None) => continue,
                Ok(Some(command)) => self.execute(command).await,
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(Outcome::Output(text)) => output.write_all(text.as_bytes()).await?,
                Ok(Outcome::Quit) => break,
                Err(e) => {
                    debug!(error = %e, "Command failed");
                    let message = format!("Error: {}\n", UserErrorFormatter::format_for_ui(&e));
                    output.write_all(message.as_bytes()).await?;
                }
            }
            output.flush().await?;
        }

        self.view.flush().await?;
        Ok(())
    }

    /// Runs the session until it closes or `watchdog` resolves, whichever
    /// comes first. An idle session still has its pending edits flushed;
    /// the input is abandoned, so a read that never completes does not hold
    /// the session open.
    pub async fn run_until_idle<R, W>(
        &self,
        input: R,
        output: W,
        watchdog: JoinHandle<Duration>,
    ) -> Result<SessionEnd>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            result = self.run(input, output) => {
                result?;
                Ok(SessionEnd::Closed)
            }
            idle = watchdog => {
                let idle = idle?;
                info!(idle_ms = idle.as_millis() as u64, "Session idle");
                self.view.flush().await?;
                Ok(SessionEnd::Idle(idle))
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Outcome> {
        let text = match command {
            Command::SetFilter(field, value) => {
                // An empty argument resets the field.
                let value = if value.is_empty() {
                    field.default_value().to_string()
                } else {
                    value
                };
                self.view.set_filter(field, value);
                self.view.settle().await;
                self.render()
            }
            Command::Toggle(position) => {
                self.view.toggle_row(position - 1).map_err(|_| TimingsError::UnknownRow { position })?;
                self.render()
            }
            Command::ToggleAll => {
                self.view.toggle_all();
                self.render()
            }
            Command::Summary(position, text) => {
                self.view
                    .edit_summary(position - 1, text)
                    .map_err(|_| TimingsError::UnknownRow { position })?;
                self.render()
            }
            Command::Export(format) => {
                let mut text = ExportService::from_snapshot(&self.view.snapshot()).export(format)?;
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text
            }
            Command::Link => format!("?{}\n", self.view.link()),
            Command::Show => self.render(),
            Command::Help => format!("{}\n", HELP),
            Command::Quit => return Ok(Outcome::Quit),
        };
        Ok(Outcome::Output(text))
    }

    pub fn render(&self) -> String {
        let snapshot = self.view.snapshot();
        let mut notes = Vec::new();
        if let Some(rx) = &self.connectivity {
            if *rx.borrow() == Connectivity::Degraded {
                notes.push("connection lost".to_string());
            }
        }
        for error in self.view.expression_errors() {
            notes.push(error.to_string());
        }
        if let Some(error) = self.view.summary_error() {
            notes.push(format!("summary not saved: {:#}", error));
        }
        match snapshot.unsaved_count() {
            0 => {}
            1 => notes.push("1 summary is not saved".to_string()),
            n => notes.push(format!("{} summaries are not saved", n)),
        }
        render_table(&snapshot, &notes)
    }
}

fn checkbox(state: CheckState) -> &'static str {
    match state {
        CheckState::Unchecked => "[ ]",
        CheckState::Indeterminate => "[-]",
        CheckState::Checked => "[x]",
    }
}

pub fn render_table(snapshot: &ViewSnapshot, notes: &[String]) -> String {
    let mut out = String::new();
    let mut status = String::new();
    if snapshot.status.is_pending || snapshot.status.is_loading {
        status.push_str("  (loading)");
    }
    let _ = writeln!(out, "Range {}{}", snapshot.range, status);
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "! {}", UserErrorFormatter::format_for_ui(error));
    }
    for note in notes {
        let _ = writeln!(out, "! {}", note);
    }

    let client_width = column_width(snapshot.rows.iter().map(|r| r.client.as_str()), "Client");
    let project_width = column_width(snapshot.rows.iter().map(|r| r.project.as_str()), "Project");

    let _ = writeln!(
        out,
        "{} {:>3}  {:<10}  {:<cw$}  {:<pw$}  {:>7}  {:>11}  Summary",
        checkbox(snapshot.check_state),
        "#",
        "Day",
        "Client",
        "Project",
        "Hours",
        "Transformed",
        cw = client_width,
        pw = project_width,
    );
    for (index, row) in snapshot.rows.iter().enumerate() {
        let mark = if snapshot.selected.get(index).copied().unwrap_or(false) {
            "[x]"
        } else {
            "[ ]"
        };
        let unsaved = if snapshot.unsaved.get(index).copied().unwrap_or(false) {
            " (not saved)"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{} {:>3}  {:<10}  {:<cw$}  {:<pw$}  {:>7.2}  {:>11}  {}{}",
            mark,
            index + 1,
            row.day,
            row.client,
            row.project,
            row.total,
            row.transformed.to_string(),
            row.summary,
            unsaved,
            cw = client_width,
            pw = project_width,
        );
    }
    let _ = writeln!(
        out,
        "    {:>3}  {:<10}  {:<cw$}  {:<pw$}  {:>7.2}  {:>11.2}",
        "",
        "Total",
        "",
        "",
        snapshot.total_raw,
        snapshot.total_transformed,
        cw = client_width,
        pw = project_width,
    );
    let _ = writeln!(
        out,
        "{} of {} rows selected",
        snapshot.selected_count(),
        snapshot.rows.len()
    );
    out
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values
        .map(|v| v.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
}
