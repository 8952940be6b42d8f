// src/ui/widgets/report_view.rs

use crate::app::{App, AppState, SectionState};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};

/// Lists every report section with an icon for its outcome.
pub fn render_sections(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Sections");
    let AppState::Finished(job) = &app.state else {
        frame.render_widget(block, area);
        return;
    };

    let items: Vec<ListItem> = job
        .sections
        .iter()
        .map(|row| {
            let color = match row.state {
                SectionState::Populated => Color::Green,
                SectionState::Empty(_) => Color::DarkGray,
                SectionState::Failed(_) => Color::Red,
            };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", row.icon()), Style::default().fg(color)),
                Span::raw(row.name.to_string()),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.selected));
    frame.render_stateful_widget(list, area, &mut state);
}

/// Shows the selected section's JSON, or why it is null.
pub fn render_section_body(frame: &mut Frame, app: &App, area: Rect) {
    let Some(row) = app.selected_section() else {
        let hint = match app.state {
            AppState::Polling { .. } => "Waiting for the job to finish...",
            _ => "Enter a domain and press Enter.",
        };
        let block = Block::default().borders(Borders::ALL).title("Report");
        frame.render_widget(Paragraph::new(hint.italic()).block(block), area);
        return;
    };

    let mut lines: Vec<Line> = Vec::new();
    match &row.state {
        SectionState::Populated => {}
        SectionState::Empty(detail) => {
            lines.push(Line::from(Span::styled(format!("empty: {detail}"), Style::default().fg(Color::DarkGray))));
            lines.push(Line::default());
        }
        SectionState::Failed(detail) => {
            lines.push(Line::from(Span::styled(format!("failed: {detail}"), Style::default().fg(Color::Red))));
            lines.push(Line::default());
        }
    }
    lines.extend(row.body.lines().map(|l| Line::from(l.to_string())));

    let block = Block::default().borders(Borders::ALL).title(format!("Report: {}", row.name));
    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll_offset, 0));
    frame.render_widget(paragraph, area);
}
