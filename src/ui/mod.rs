// src/ui/mod.rs

use crate::app::App;
use ratatui::prelude::*;

mod layout;
mod widgets;

pub fn render(app: &mut App, frame: &mut Frame) {
    let layout = layout::create_layout(frame.area());

    widgets::input::render_input(frame, app, layout.input);
    widgets::summary::render_summary(frame, app, layout.summary);
    widgets::report_view::render_sections(frame, app, layout.sections);
    widgets::report_view::render_section_body(frame, app, layout.report);
    widgets::footer::render_footer(frame, app, layout.footer);
}
