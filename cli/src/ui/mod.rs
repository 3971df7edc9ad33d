use crate::app::{EntryState, RunEvent, RunState};
use anyhow::Result;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Gauge, Paragraph, Widget},
    Frame, Terminal, TerminalOptions, Viewport,
};
use std::io::{self, IsTerminal};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

const VIEWPORT_HEIGHT: u16 = 3;

/// Consume run events until the sender is dropped. Finished lines scroll
/// above a small inline viewport holding the gauge; `plain` (or a
/// non-terminal stdout) prints the same lines without redrawing.
pub fn spawn_renderer(plain: bool, rx: UnboundedReceiver<RunEvent>) -> JoinHandle<Result<()>> {
    if inline_enabled(plain) {
        tokio::task::spawn_blocking(move || run_inline(rx))
    } else {
        tokio::spawn(run_plain(rx))
    }
}

pub fn inline_enabled(plain: bool) -> bool {
    !plain && io::stdout().is_terminal()
}

async fn run_plain(mut rx: UnboundedReceiver<RunEvent>) -> Result<()> {
    let mut state = RunState::new();
    while let Some(event) = rx.recv().await {
        if let Some(line) = state.handle_event(event) {
            println!("{line}");
        }
    }
    Ok(())
}

fn run_inline(mut rx: UnboundedReceiver<RunEvent>) -> Result<()> {
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions { viewport: Viewport::Inline(VIEWPORT_HEIGHT) },
    )?;
    let mut state = RunState::new();
    terminal.draw(|frame| draw(frame, &state))?;

    while let Some(event) = rx.blocking_recv() {
        if let Some(line) = state.handle_event(event) {
            terminal.insert_before(1, |buf| {
                Paragraph::new(line.clone()).render(buf.area, buf);
            })?;
        }
        terminal.draw(|frame| draw(frame, &state))?;
    }

    terminal.clear()?;
    Ok(())
}

fn draw(frame: &mut Frame, state: &RunState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.size());

    let header = match state.strategy {
        Some(strategy) => format!(
            "{} composition  {}/{} clips done",
            strategy.label(),
            state.completed(),
            state.total
        ),
        None => "Preparing composition".to_string(),
    };
    frame.render_widget(
        Paragraph::new(header).style(Style::default().add_modifier(Modifier::BOLD)),
        rows[0],
    );

    let ratio = state.overall_ratio();
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(format!("{:.0}%", ratio * 100.0));
    frame.render_widget(gauge, rows[1]);

    frame.render_widget(Paragraph::new(activity_line(state)), rows[2]);
}

fn activity_line(state: &RunState) -> Line<'_> {
    if let Some(label) = state.active_label() {
        return Line::from(vec![
            Span::styled("generating ", Style::default().fg(Color::Yellow)),
            Span::raw(label),
            Span::raw(format!("  {:.0}%", state.progress * 100.0)),
        ]);
    }
    if let Some(outcome) = state.outcome {
        let color = if outcome.is_success() { Color::Green } else { Color::Red };
        return Line::from(Span::styled(outcome.label(), Style::default().fg(color)));
    }
    let failed = state
        .entries
        .values()
        .filter(|entry| matches!(entry.state, EntryState::Failed(_)))
        .count();
    match state.status_lines.last() {
        Some(last) if failed > 0 => Line::from(format!("{last} ({failed} failed)")),
        Some(last) => Line::from(last.as_str()),
        None => Line::from("waiting for the first clip"),
    }
}
