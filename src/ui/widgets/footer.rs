// src/ui/widgets/footer.rs

use crate::app::{App, AppState};
use ratatui::{
    prelude::*,
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::Paragraph,
};

fn key(label: &str) -> Span<'_> {
    Span::styled(label, Style::new().bold().fg(Color::Yellow))
}

/// Renders the footer with the keys that apply to the current state.
pub fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let spans = match app.state {
        AppState::Idle => Line::from(vec![
            Span::raw("Press "),
            key("Enter"),
            Span::raw(" to look up, "),
            key("Esc"),
            Span::raw(" to quit."),
        ]),
        AppState::Polling { .. } => Line::from(vec![Span::raw("Job running... "), key("[Q]"), Span::raw("uit")]),
        AppState::Finished(_) => Line::from(vec![
            key("[N]"),
            Span::raw("ew lookup, "),
            key("[↑/↓]"),
            Span::raw(" section, "),
            key("[PgUp/PgDn]"),
            Span::raw(" scroll, "),
            key("[Q]"),
            Span::raw("uit"),
        ]),
        AppState::Failed { .. } => {
            Line::from(vec![key("[N]"), Span::raw("ew lookup, "), key("[Q]"), Span::raw("uit")])
        }
    };

    frame.render_widget(Paragraph::new(spans).alignment(Alignment::Center), area);
}
