// src/ui/layout.rs

use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Screen regions, computed once per frame.
pub struct AppLayout {
    pub input: Rect,
    pub summary: Rect,
    pub sections: Rect,
    pub report: Rect,
    pub footer: Rect,
}

/// Input on top, footer at the bottom. In between, a left column with the
/// job summary above the section list, and the selected section on the right.
pub fn create_layout(frame_size: Rect) -> AppLayout {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
        .split(frame_size);

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(main_chunks[1]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(0)])
        .split(content_chunks[0]);

    AppLayout {
        input: main_chunks[0],
        summary: left_chunks[0],
        sections: left_chunks[1],
        report: content_chunks[1],
        footer: main_chunks[2],
    }
}
