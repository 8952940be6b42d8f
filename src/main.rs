// src/main.rs

use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::Result;
use crossterm::{
    ExecutableCommand,
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tracing::{error, info};
use vanguard_recon::config::ReconConfig;
use vanguard_recon::core::Orchestrator;
use vanguard_recon::logging;

mod app;
mod ui;

use app::{App, AppState};

const TICK: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    color_eyre::install()?;
    // Before the runtime starts, so the local UTC offset is still readable.
    let log_path = logging::initialize_logging()?;

    let mut config = ReconConfig::from_env()?;
    if config.data_dir.is_none() {
        config.data_dir = Some(logging::get_data_dir().join("jobs"));
    }
    info!(log = %log_path.display(), data_dir = ?config.data_dir, "Starting.");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(Arc::new(config)))
}

async fn run(config: Arc<ReconConfig>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config).await?;

    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableMouseCapture)?;
    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let result = event_loop(&mut terminal, &orchestrator).await;

    stdout().execute(LeaveAlternateScreen)?;
    stdout().execute(DisableMouseCapture)?;
    disable_raw_mode()?;
    result
}

async fn event_loop<B: Backend>(terminal: &mut Terminal<B>, orchestrator: &Orchestrator) -> Result<()> {
    let mut app = App::new();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        if event::poll(TICK)? {
            handle_events(&mut app, orchestrator).await?;
        }
        app.on_tick();
        poll_job(&mut app, orchestrator).await;
    }
    Ok(())
}

/// Refreshes the polled job's status and, once terminal, loads its report.
async fn poll_job(app: &mut App, orchestrator: &Orchestrator) {
    let Some(id) = app.polling_id() else { return };

    let summary = match orchestrator.summary(id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            app.state = AppState::Failed { target: String::new(), reason: format!("job {id} not found") };
            return;
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "Polling failed.");
            return;
        }
    };
    if !summary.status.is_terminal() {
        app.set_status(summary.status);
        return;
    }

    let lookup = orchestrator.report(id).await;
    let outcomes = orchestrator.outcomes(id).await;
    match (lookup, outcomes) {
        (Ok(lookup), Ok(outcomes)) => {
            info!(job_id = %id, status = %summary.status, "Job finished.");
            app.finish(summary, lookup, outcomes);
        }
        (Err(e), _) | (_, Err(e)) => error!(job_id = %id, error = %e, "Loading the report failed."),
    }
}

async fn handle_events(app: &mut App, orchestrator: &Orchestrator) -> Result<()> {
    if let Event::Key(key) = event::read()? {
        if key.kind == KeyEventKind::Press {
            match app.state {
                AppState::Idle => handle_idle_input(app, key.code, orchestrator).await,
                AppState::Polling { .. } => {
                    if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                        app.quit();
                    }
                }
                AppState::Finished(_) | AppState::Failed { .. } => handle_finished_input(app, key.code),
            }
        }
    }
    Ok(())
}

async fn handle_idle_input(app: &mut App, key_code: KeyCode, orchestrator: &Orchestrator) {
    match key_code {
        KeyCode::Esc => app.quit(),
        KeyCode::Char('q') if app.input.is_empty() => app.quit(),
        KeyCode::Char(c) => app.input.push(c),
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Enter => {
            if app.input.trim().is_empty() {
                return;
            }
            match orchestrator.submit(&app.input).await {
                Ok(id) => {
                    info!(job_id = %id, input = %app.input, "Lookup submitted.");
                    let target = app.input.trim().to_string();
                    app.start_polling(id, target);
                }
                Err(e) => app.notice = Some(e.to_string()),
            }
        }
        _ => {}
    }
}

fn handle_finished_input(app: &mut App, key_code: KeyCode) {
    match key_code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
        KeyCode::Char('n') => app.reset(),
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        KeyCode::PageUp => app.scroll_up(),
        KeyCode::PageDown => app.scroll_down(),
        _ => {}
    }
}
