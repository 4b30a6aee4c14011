//! # Terminal User Interface (TUI)
//!
//! Interactive terminal UI using `ratatui`. The session runs on the main
//! thread; this thread only draws the latest [`Update`] and turns key
//! presses into [`Command`]s.
//!
//! ## Pages
//!
//! - **Home** - one row per monitored process, its hottest region
//! - **Monitor** - every region of one process
//! - **Maplist** - the memory mappings of one process with their accesses
//!
//! ## Sub-Modules
//!
//! - `keymap` - (page, key) bindings
//! - `theme` - Color scheme

// TUI rendering intentionally uses precision-losing casts and long functions for clarity
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::too_many_lines,
    clippy::needless_pass_by_value
)]

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use std::io;
use std::time::Duration;

pub mod keymap;
mod theme;

use keymap::{Action, Keymap, PageKind};
use theme::{heat_color, BACKGROUND, CAUTION_AMBER, CRITICAL_RED, HUD_GREEN, INFO_DIM};

use crate::session::{Command, Update};
use crate::snapshot::View;

// =============================================================================
// STYLE CONSTANTS
// =============================================================================

const STYLE_HEADING: Style = Style::new().fg(HUD_GREEN).add_modifier(Modifier::BOLD);
const STYLE_LABEL: Style = Style::new().fg(CAUTION_AMBER).add_modifier(Modifier::BOLD);
const STYLE_DIM: Style = Style::new().fg(INFO_DIM);
const STYLE_KEY: Style = Style::new().fg(CAUTION_AMBER);
const STYLE_TEXT: Style = Style::new().fg(ratatui::style::Color::White);

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct LiveApp {
    update: Option<Update>,
    /// Highlighted data row
    selected: usize,
    note: Option<String>,
    help: bool,
    keymap: Keymap,
    should_quit: bool,
}

impl LiveApp {
    fn new() -> Self {
        Self { update: None, selected: 0, note: None, help: false, keymap: Keymap::default(), should_quit: false }
    }

    fn view(&self) -> Option<&View> {
        self.update.as_ref().map(|u| &u.snapshot.view)
    }

    /// Take a new update, keeping the selection while the page stays the same
    fn apply(&mut self, update: Update) {
        let same_page = self.view().is_some_and(|v| PageKind::of(v) == PageKind::of(&update.snapshot.view));
        if !same_page {
            self.selected = 0;
        }
        self.selected = self.selected.min(update.snapshot.view.len().saturating_sub(1));
        if let Some(note) = &update.note {
            self.note = Some(note.clone());
        }
        self.update = Some(update);
    }

    /// Process one key press; returns the command for the session, if any
    fn handle_key(&mut self, key: KeyCode) -> Option<Command> {
        if self.help {
            self.help = false;
            return None;
        }
        let Some(view) = self.view() else {
            // Nothing to navigate yet, but quitting works
            if matches!(key, KeyCode::Char('q' | 'Q')) {
                self.should_quit = true;
                return Some(Command::Quit);
            }
            return None;
        };
        let action = self.keymap.lookup(PageKind::of(view), key)?;
        let rows = view.len();

        match action {
            Action::Session(command) => {
                self.note = None;
                if command == Command::Quit {
                    self.should_quit = true;
                }
                Some(command)
            }
            Action::OpenSelected => view.pid_at(self.selected).map(Command::Open),
            Action::ScrollUp => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            Action::ScrollDown => {
                if self.selected + 1 < rows {
                    self.selected += 1;
                }
                None
            }
            Action::Help => {
                self.help = true;
                None
            }
        }
    }
}

/// Access count of every data row, for coloring
fn row_accesses(view: &View) -> Vec<u64> {
    match view {
        View::Home { processes } => processes.iter().map(|p| p.region.nr_accesses).collect(),
        View::Monitor { regions, .. } => regions.iter().map(|r| r.region.nr_accesses).collect(),
        View::Maplist { mappings, .. } => mappings.iter().map(|m| m.nr_accesses).collect(),
    }
}

// =============================================================================
// RENDERING
// =============================================================================

fn render(f: &mut ratatui::Frame, app: &LiveApp) {
    let Some(update) = &app.update else {
        let waiting = Paragraph::new(Line::from(Span::styled("Waiting for the first sample...", STYLE_DIM)))
            .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(HUD_GREEN)));
        f.render_widget(waiting, f.area());
        return;
    };
    let snapshot = &update.snapshot;
    let header_lines = snapshot.header_lines();

    let outer_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(header_lines.len() as u16 + 3), // Header
            Constraint::Min(0),                                // Table
            Constraint::Length(4),                             // Status bar
        ])
        .split(f.area());

    // Header
    let (mode, mode_color) = if update.selecting {
        ("[SELECTING]", CAUTION_AMBER)
    } else if update.paused {
        ("[PAUSED]", CAUTION_AMBER)
    } else {
        ("[LIVE]", CRITICAL_RED)
    };
    let mut lines = vec![Line::from(vec![
        Span::styled("DAMONTOP", STYLE_HEADING),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(mode, Style::new().fg(mode_color).add_modifier(Modifier::BOLD)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("{:.1}s", snapshot.elapsed_ms as f64 / 1000.0), Style::new().fg(HUD_GREEN)),
        Span::styled(" | ", STYLE_DIM),
        Span::styled(format!("sort: {}", snapshot.sort_key), Style::new().fg(HUD_GREEN)),
    ])];
    lines.extend(header_lines.into_iter().map(|l| Line::from(Span::styled(l, STYLE_TEXT))));
    let header = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(mode_color)));
    f.render_widget(header, outer_layout[0]);

    render_table(f, outer_layout[1], app, update);
    render_status(f, outer_layout[2], app, update);

    if app.help {
        render_help_overlay(f, f.area());
    }
}

fn render_table(f: &mut ratatui::Frame, area: Rect, app: &LiveApp, update: &Update) {
    let snapshot = &update.snapshot;
    let accesses = row_accesses(&snapshot.view);
    let peak = accesses.iter().copied().max().unwrap_or(0);
    let selectable = matches!(snapshot.view, View::Home { .. });

    // Borders and caption take three lines
    let visible = usize::from(area.height.saturating_sub(3)).max(1);
    let offset = app.selected.saturating_sub(visible - 1);

    let mut lines = vec![Line::from(Span::styled(snapshot.caption(), STYLE_LABEL))];
    for (i, row) in snapshot.rows().into_iter().enumerate().skip(offset).take(visible) {
        let mut style = Style::new().fg(heat_color(accesses.get(i).copied().unwrap_or(0), peak));
        if selectable && i == app.selected {
            style = style.add_modifier(Modifier::REVERSED);
        }
        lines.push(Line::from(Span::styled(row, style)));
    }
    if snapshot.view.is_empty() {
        lines.push(Line::from(Span::styled("  (no data yet)", STYLE_DIM)));
    }

    let title = match &snapshot.view {
        View::Home { .. } => " Processes ".to_string(),
        View::Monitor { name, .. } => format!(" Regions of {name} "),
        View::Maplist { name, .. } => format!(" Mappings of {name} "),
    };
    let table = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::new().fg(HUD_GREEN))
            .style(Style::new().bg(BACKGROUND)),
    );
    f.render_widget(table, area);
}

fn render_status(f: &mut ratatui::Frame, area: Rect, app: &LiveApp, update: &Update) {
    let keys: &[(&str, &str)] = match PageKind::of(&update.snapshot.view) {
        PageKind::Home => &[("Q", "Quit"), ("Enter", "Open"), ("R", "Refresh"), ("P", "Pause"), ("?", "Help")],
        PageKind::Monitor => {
            &[("Q", "Quit"), ("H", "Home"), ("B", "Back"), ("L", "Maplist"), ("P", "Pause"), ("?", "Help")]
        }
        PageKind::Maplist => &[("Q", "Quit"), ("H", "Home"), ("B", "Back"), ("R", "Refresh"), ("?", "Help")],
    };
    let mut spans = Vec::new();
    for (key, label) in keys {
        spans.push(Span::styled(*key, STYLE_KEY));
        spans.push(Span::styled(format!(":{label} "), STYLE_DIM));
    }
    if let Some(note) = &app.note {
        spans.push(Span::styled(format!("[{note}]"), Style::new().fg(CAUTION_AMBER)));
    }

    let hint = update.snapshot.hints().into_iter().next().unwrap_or_default();
    let status = Paragraph::new(vec![Line::from(spans), Line::from(Span::styled(hint, STYLE_DIM))])
        .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(HUD_GREEN)));
    f.render_widget(status, area);
}

/// Render the help overlay explaining the columns and keys
fn render_help_overlay(f: &mut ratatui::Frame, area: Rect) {
    let popup_area = centered_popup(area, 80, 22);

    let help_text = vec![
        Line::from(""),
        Line::from(Span::styled("  What You're Looking At", STYLE_HEADING)),
        Line::from(Span::styled("  DAMON splits each process's address space into regions and counts", STYLE_DIM)),
        Line::from(Span::styled("  how often each region was found accessed per aggregation interval.", STYLE_DIM)),
        Line::from(""),
        Line::from(Span::styled("  How to Read It", STYLE_HEADING)),
        Line::from(vec![
            Span::styled("  ACCESS   ", STYLE_LABEL),
            Span::styled("Access count of the region. Higher is hotter.", STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("  AGE      ", STYLE_LABEL),
            Span::styled("Aggregation intervals the count has stayed the same.", STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("  LOCAL    ", STYLE_LABEL),
            Span::styled("Share of accesses from the local NUMA node (--numa).", STYLE_DIM),
        ]),
        Line::from(vec![
            Span::styled("  TYPE     ", STYLE_LABEL),
            Span::styled("Permissions of the mapping holding the region.", STYLE_DIM),
        ]),
        Line::from(""),
        Line::from(Span::styled("  Keys", STYLE_HEADING)),
        Line::from(vec![
            Span::styled("  ↑↓", STYLE_KEY),
            Span::styled(" Select   ", STYLE_TEXT),
            Span::styled("Enter", STYLE_KEY),
            Span::styled(" Regions   ", STYLE_TEXT),
            Span::styled("L", STYLE_KEY),
            Span::styled(" Mappings   ", STYLE_TEXT),
            Span::styled("B", STYLE_KEY),
            Span::styled(" Back   ", STYLE_TEXT),
            Span::styled("H", STYLE_KEY),
            Span::styled(" Home", STYLE_TEXT),
        ]),
        Line::from(vec![
            Span::styled("  1-5", STYLE_KEY),
            Span::styled(" Sort     ", STYLE_TEXT),
            Span::styled("P", STYLE_KEY),
            Span::styled(" Pause     ", STYLE_TEXT),
            Span::styled("R", STYLE_KEY),
            Span::styled(" Refresh    ", STYLE_TEXT),
            Span::styled("Q", STYLE_KEY),
            Span::styled(" Quit", STYLE_TEXT),
        ]),
        Line::from(""),
        Line::from(Span::styled("  Press any key to close", STYLE_DIM)),
    ];

    let help_widget = Paragraph::new(help_text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Help ")
            .style(Style::new().bg(ratatui::style::Color::Black).fg(HUD_GREEN)),
    );

    f.render_widget(ratatui::widgets::Clear, popup_area);
    f.render_widget(help_widget, popup_area);
}

/// Create a centered popup area with given width percentage and height in lines
fn centered_popup(area: Rect, width_percent: u16, height_lines: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Fill(1), Constraint::Length(height_lines), Constraint::Fill(1)])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

// =============================================================================
// LIVE MODE ENTRY POINT
// =============================================================================

/// Run the TUI until the user quits or the session side goes away
///
/// # Errors
/// Returns an error if terminal setup or rendering fails
pub fn run_live(update_rx: Receiver<Update>, command_tx: Sender<Command>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = LiveApp::new();
    let result = (|| -> Result<()> {
        loop {
            loop {
                match update_rx.try_recv() {
                    Ok(update) => app.apply(update),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Ok(()),
                }
            }

            terminal.draw(|f| render(f, &app))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(command) = app.handle_key(key.code) {
                            if command_tx.send(command).is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }

            if app.should_quit {
                return Ok(());
            }
        }
    })();

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SortKey;
    use crate::domain::{IntervalMs, Pid};
    use crate::snapshot::{ProcessRow, RegionStats, Snapshot};

    fn home(pids: &[u32]) -> Update {
        let processes = pids
            .iter()
            .map(|&p| ProcessRow { pid: Pid(p), name: format!("p{p}"), cpu_pct: 0.0, region: RegionStats::default() })
            .collect();
        Update {
            snapshot: Snapshot {
                elapsed_ms: 0,
                interval: IntervalMs(5000),
                sort_key: SortKey::Access,
                view: View::Home { processes },
            },
            note: None,
            paused: false,
            selecting: false,
        }
    }

    #[test]
    fn test_open_selected_row() {
        let mut app = LiveApp::new();
        app.apply(home(&[10, 20, 30]));
        assert_eq!(app.handle_key(KeyCode::Down), None);
        assert_eq!(app.handle_key(KeyCode::Enter), Some(Command::Open(Pid(20))));
    }

    #[test]
    fn test_selection_is_clamped() {
        let mut app = LiveApp::new();
        app.apply(home(&[10, 20, 30]));
        for _ in 0..5 {
            app.handle_key(KeyCode::Down);
        }
        assert_eq!(app.selected, 2);
        app.apply(home(&[10]));
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn test_help_swallows_next_key() {
        let mut app = LiveApp::new();
        app.apply(home(&[10]));
        assert_eq!(app.handle_key(KeyCode::Char('?')), None);
        assert!(app.help);
        assert_eq!(app.handle_key(KeyCode::Char('q')), None);
        assert!(!app.should_quit);
        assert_eq!(app.handle_key(KeyCode::Char('q')), Some(Command::Quit));
        assert!(app.should_quit);
    }

    #[test]
    fn test_note_kept_until_next_command() {
        let mut app = LiveApp::new();
        let mut update = home(&[10]);
        update.note = Some("Process 20 has exited".into());
        app.apply(update);
        app.apply(home(&[10]));
        assert_eq!(app.note.as_deref(), Some("Process 20 has exited"));
        app.handle_key(KeyCode::Char('4'));
        assert_eq!(app.note, None);
    }

    #[test]
    fn test_only_quit_before_first_update() {
        let mut app = LiveApp::new();
        assert_eq!(app.handle_key(KeyCode::Enter), None);
        assert_eq!(app.handle_key(KeyCode::Char('q')), Some(Command::Quit));
    }
}
