// src/app.rs

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use vanguard_recon::core::models::{EmptyReason, JobId, JobStatus, ProbeName, ProbeOutcome};
use vanguard_recon::core::orchestrator::{JobSummary, ReportLookup};
use vanguard_recon::core::report::{OutcomeTally, Report};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// How a report section turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionState {
    Populated,
    Empty(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionRow {
    pub name: ProbeName,
    pub state: SectionState,
    /// Pretty JSON of the section, `null` for empty and failed ones.
    pub body: String,
}

impl SectionRow {
    pub fn icon(&self) -> &'static str {
        match self.state {
            SectionState::Populated => "✓",
            SectionState::Empty(_) => "○",
            SectionState::Failed(_) => "✗",
        }
    }
}

/// One row per report key, annotated with the outcome that produced it.
pub fn section_rows(report: &Report, outcomes: &BTreeMap<ProbeName, ProbeOutcome>) -> Vec<SectionRow> {
    report
        .sections()
        .map(|(name, value)| {
            let state = match outcomes.get(&name) {
                Some(ProbeOutcome::Success { .. }) => SectionState::Populated,
                Some(ProbeOutcome::Empty { reason: EmptyReason::NotFound { detail } }) => {
                    SectionState::Empty(detail.clone())
                }
                Some(ProbeOutcome::Empty { reason: EmptyReason::DependencyUnavailable { dependency } }) => {
                    SectionState::Empty(format!("skipped: {dependency} unavailable"))
                }
                Some(ProbeOutcome::Failed { kind, detail }) => SectionState::Failed(format!("{kind}: {detail}")),
                None => SectionState::Empty("no outcome recorded".to_string()),
            };
            let body = value
                .and_then(|v| serde_json::to_string_pretty(v).ok())
                .unwrap_or_else(|| "null".to_string());
            SectionRow { name, state, body }
        })
        .collect()
}

pub struct FinishedJob {
    pub summary: JobSummary,
    pub tally: OutcomeTally,
    pub sections: Vec<SectionRow>,
}

pub enum AppState {
    Idle,
    Polling {
        id: JobId,
        target: String,
        status: JobStatus,
        started: Instant,
    },
    Finished(FinishedJob),
    Failed {
        target: String,
        reason: String,
    },
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub input: String,
    /// Last submit error, shown under the input.
    pub notice: Option<String>,
    pub tick: usize,
    pub selected: usize,
    pub scroll_offset: u16,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            state: AppState::Idle,
            input: String::new(),
            notice: None,
            tick: 0,
            selected: 0,
            scroll_offset: 0,
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn reset(&mut self) {
        self.state = AppState::Idle;
        self.input.clear();
        self.notice = None;
        self.selected = 0;
        self.scroll_offset = 0;
    }

    pub fn on_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn spinner(&self) -> &'static str {
        SPINNER[self.tick % SPINNER.len()]
    }

    pub fn start_polling(&mut self, id: JobId, target: String) {
        self.notice = None;
        self.state = AppState::Polling { id, target, status: JobStatus::Pending, started: Instant::now() };
    }

    pub fn polling_id(&self) -> Option<JobId> {
        match self.state {
            AppState::Polling { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match &self.state {
            AppState::Polling { started, .. } => Some(started.elapsed()),
            _ => None,
        }
    }

    pub fn set_status(&mut self, new_status: JobStatus) {
        if let AppState::Polling { status, .. } = &mut self.state {
            *status = new_status;
        }
    }

    /// Moves a terminal job into its final view.
    pub fn finish(
        &mut self,
        summary: JobSummary,
        lookup: ReportLookup,
        outcomes: Option<BTreeMap<ProbeName, ProbeOutcome>>,
    ) {
        let target = summary.target.to_string();
        self.selected = 0;
        self.scroll_offset = 0;
        self.state = match lookup {
            ReportLookup::Ready(report) => {
                let outcomes = outcomes.unwrap_or_default();
                AppState::Finished(FinishedJob {
                    tally: OutcomeTally::of(&outcomes),
                    sections: section_rows(&report, &outcomes),
                    summary,
                })
            }
            ReportLookup::Failed { reason } => AppState::Failed { target, reason },
            ReportLookup::InProgress(status) => {
                AppState::Failed { target, reason: format!("job reported terminal but is {status}") }
            }
            ReportLookup::NotFound => AppState::Failed { target, reason: "job disappeared from the store".into() },
        };
    }

    pub fn selected_section(&self) -> Option<&SectionRow> {
        match &self.state {
            AppState::Finished(job) => job.sections.get(self.selected),
            _ => None,
        }
    }

    pub fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
        self.scroll_offset = 0;
    }

    pub fn select_next(&mut self) {
        if let AppState::Finished(job) = &self.state {
            if self.selected + 1 < job.sections.len() {
                self.selected += 1;
                self.scroll_offset = 0;
            }
        }
    }

    pub fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use vanguard_recon::core::models::ErrorKind;
    use vanguard_recon::core::report::merge;
    use vanguard_recon::core::target::Target;

    fn outcomes() -> BTreeMap<ProbeName, ProbeOutcome> {
        BTreeMap::from([
            (ProbeName::Dns, ProbeOutcome::Success { payload: json!({"records": {}}) }),
            (ProbeName::MailServers, ProbeOutcome::failed(ErrorKind::Upstream, "HTTP 500")),
            (ProbeName::Metadata, ProbeOutcome::dependency_unavailable(ProbeName::Content)),
        ])
    }

    fn summary() -> JobSummary {
        JobSummary {
            id: JobId::new(),
            target: Target::parse("example.test").unwrap(),
            status: JobStatus::Completed,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            failure: None,
        }
    }

    #[test]
    fn rows_follow_report_order_and_outcome_kind() {
        let outcomes = outcomes();
        let rows = section_rows(&merge(&outcomes), &outcomes);

        let names: Vec<_> = rows.iter().map(|r| r.name).collect();
        assert_eq!(names, vec![ProbeName::Dns, ProbeName::MailServers, ProbeName::Metadata]);
        assert_eq!(rows[0].state, SectionState::Populated);
        assert_eq!(rows[1].state, SectionState::Failed("upstream: HTTP 500".into()));
        assert_eq!(rows[1].body, "null");
        assert_eq!(rows[2].icon(), "○");
    }

    #[test]
    fn selection_stays_within_the_sections() {
        let outcomes = outcomes();
        let mut app = App::new();
        app.finish(summary(), ReportLookup::Ready(merge(&outcomes)), Some(outcomes));

        app.select_previous();
        assert_eq!(app.selected, 0);
        for _ in 0..10 {
            app.select_next();
        }
        assert_eq!(app.selected, 2);
        assert_eq!(app.selected_section().map(|s| s.name), Some(ProbeName::Metadata));
    }

    #[test]
    fn failed_jobs_show_their_reason() {
        let mut app = App::new();
        app.finish(summary(), ReportLookup::Failed { reason: "target did not resolve".into() }, None);
        assert!(matches!(&app.state, AppState::Failed { reason, .. } if reason == "target did not resolve"));
    }
}
