// src/ui/widgets/summary.rs

use crate::app::{App, AppState};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, Wrap},
};

fn field<'a>(label: &'a str, value: impl Into<Span<'a>>) -> Line<'a> {
    Line::from(vec![Span::styled(format!("{label:<10}"), Style::new().bold()), value.into()])
}

/// Renders the job panel: status while polling, the outcome tally when done.
pub fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Job");

    let lines = match &app.state {
        AppState::Idle => vec![Line::from("No lookup yet.".italic())],
        AppState::Polling { id, target, status, .. } => {
            let elapsed = app.elapsed().map(|e| e.as_secs()).unwrap_or_default();
            vec![
                field("Target", target.as_str()),
                field("Job", id.to_string()),
                field(
                    "Status",
                    Span::styled(format!("{} {status}", app.spinner()), Style::default().fg(Color::Cyan)),
                ),
                field("Elapsed", format!("{elapsed}s")),
            ]
        }
        AppState::Finished(job) => {
            let took = job
                .summary
                .completed_at
                .map(|done| (done - job.summary.created_at).num_seconds())
                .map(|s| format!("{s}s"))
                .unwrap_or_else(|| "-".to_string());
            vec![
                field("Target", job.summary.target.to_string()),
                field("Status", Span::styled(job.summary.status.to_string(), Style::default().fg(Color::Green))),
                field("Took", took),
                Line::from(vec![
                    Span::styled(format!("✓ {}  ", job.tally.succeeded), Style::default().fg(Color::Green)),
                    Span::styled(format!("○ {}  ", job.tally.empty), Style::default().fg(Color::DarkGray)),
                    Span::styled(format!("✗ {}", job.tally.failed), Style::default().fg(Color::Red)),
                ]),
            ]
        }
        AppState::Failed { target, reason } => vec![
            field("Target", target.as_str()),
            field("Status", Span::styled("failed", Style::default().fg(Color::Red))),
            field("Reason", Span::styled(reason.as_str(), Style::default().fg(Color::Red))),
        ],
    };

    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}
