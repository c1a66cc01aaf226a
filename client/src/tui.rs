use crate::screen::RISK_BAR_WIDTH;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell as TableCell, Gauge, List, ListItem, Paragraph, Row as TableRow, Table, Tabs, Wrap,
};
use shield_core::SurfaceState;
use shield_core::format::{self, Severity};
use shield_core::loaders::peak_severity;
use shield_core::render::{Cell, Content, FeedKind, ResultCard, StepState, Target, View};
use shield_core::router::{DEFAULT_TAB, TABS, find_tab};

pub const HELP: &str = "tab / shift-tab to switch · tab <id>, run, freeze, unfreeze <id>, metrics, logout, quit";
const STEP_LABELS: [&str; 4] = ["Seed model", "Legit traffic", "Botnet attack", "Cluster & freeze"];
const MAX_COLUMN_WIDTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tab(String),
    NextTab,
    PrevTab,
    Run,
    Freeze,
    Unfreeze(String),
    Metrics,
    Logout,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match (words.next()?, words.next()) {
            ("tab", Some(id)) => Command::Tab(id.to_string()),
            ("run", None) => Command::Run,
            ("freeze", None) => Command::Freeze,
            ("unfreeze", Some(user_id)) => Command::Unfreeze(user_id.to_string()),
            ("metrics", None) => Command::Metrics,
            ("logout", None) => Command::Logout,
            ("quit" | "exit", None) => Command::Quit,
            _ => return None,
        };
        words.next().is_none().then_some(command)
    }
}

/// Command line at the bottom of the dashboard
#[derive(Debug, Default)]
pub struct Prompt {
    input: String,
    status: Option<String>,
}

impl Prompt {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    pub fn on_key(&mut self, key: KeyEvent) -> Option<Command> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
            KeyCode::Char(c) => {
                self.input.push(c);
                None
            }
            KeyCode::Backspace => {
                self.input.pop();
                None
            }
            KeyCode::Tab => Some(Command::NextTab),
            KeyCode::BackTab => Some(Command::PrevTab),
            KeyCode::Esc if self.input.is_empty() => Some(Command::Quit),
            KeyCode::Esc => {
                self.input.clear();
                None
            }
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.input);
                if line.trim().is_empty() {
                    return None;
                }
                let command = Command::parse(&line);
                self.status = command.is_none().then(|| format!("unknown command `{}`", line.trim()));
                command
            }
            _ => None,
        }
    }
}

/// Id of the tab `step` places away from `active`, wrapping around
pub fn cycle_tab(active: Option<&str>, step: isize) -> &'static str {
    let current = active.or(Some(DEFAULT_TAB)).and_then(|id| TABS.iter().position(|t| t.id == id)).unwrap_or(0);
    let next = (current as isize + step).rem_euclid(TABS.len() as isize) as usize;
    TABS[next].id
}

pub fn tint(severity: Severity) -> Style {
    let color = match severity {
        Severity::High => Color::Red,
        Severity::Medium => Color::Yellow,
        Severity::Low => Color::Green,
    };
    Style::default().fg(color)
}

pub fn draw(frame: &mut Frame, state: &SurfaceState, prompt: &Prompt) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    draw_header(frame, state, chunks[0]);
    match state.view {
        View::Auth => draw_auth(frame, state, chunks[2]),
        View::Dashboard => {
            draw_tabs(frame, state, chunks[1]);
            draw_panel(frame, state, chunks[2]);
        }
    }
    draw_prompt(frame, prompt, chunks[3], chunks[4]);
}

fn draw_header(frame: &mut Frame, state: &SurfaceState, area: Rect) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let line = match state.view {
        View::Auth => Line::from(vec![Span::styled("AuthShield", bold), Span::raw(" · sign in")]),
        View::Dashboard => {
            let frozen = state.text(Target::FrozenBadge).unwrap_or("0");
            let badge = match frozen {
                "0" => Style::default().fg(Color::DarkGray),
                _ => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            };
            Line::from(vec![
                Span::styled("AuthShield", bold),
                Span::raw(format!(" · {}   ", state.text(Target::LoggedUser).unwrap_or(format::MISSING))),
                Span::styled(format!("[frozen {frozen}]"), badge),
            ])
        }
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn draw_auth(frame: &mut Frame, state: &SurfaceState, area: Rect) {
    let mut lines = vec![Line::raw("Not signed in. Restart with --username, or run `shield login --remember` first.")];
    for target in [Target::LoginError, Target::RegisterError] {
        if let Some(text) = state.text(target).filter(|t| !t.is_empty()) {
            lines.push(Line::styled(format!("! {text}"), Style::default().fg(Color::Red)));
        }
    }
    let block = Block::default().borders(Borders::ALL).title(" Sign in ");
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

fn draw_tabs(frame: &mut Frame, state: &SurfaceState, area: Rect) {
    let mut tabs = Tabs::new(TABS.iter().map(|t| t.title))
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    if let Some(i) = state.active_tab.as_deref().and_then(|id| TABS.iter().position(|t| t.id == id)) {
        tabs = tabs.select(i);
    }
    frame.render_widget(tabs, area);
}

/// Inline status texts shown under a tab's main panel
fn notes_of(tab: &str) -> &'static [Target] {
    match tab {
        "clusters" => &[Target::ClusterCheckResult],
        "frozen" => &[Target::UnfreezeError],
        "blockchain" => &[Target::WalletResult, Target::ChainActionResult],
        "settings" => &[Target::ThresholdsStatus],
        _ => &[],
    }
}

fn draw_panel(frame: &mut Frame, state: &SurfaceState, area: Rect) {
    let title = match state.subtitle.as_str() {
        "" => format!(" {} ", state.title),
        subtitle => format!(" {} · {subtitle} ", state.title),
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(tab) = state.active_tab.as_deref() else {
        return;
    };
    if tab == "demo" {
        draw_demo(frame, state, inner);
        return;
    }

    let notes: Vec<Line> = notes_of(tab)
        .iter()
        .filter_map(|t| state.text(*t))
        .flat_map(str::lines)
        .map(|l| Line::raw(format!("» {l}")))
        .collect();
    let target = find_tab(tab).and_then(|t| t.resource).map(|r| r.target());
    let content = target.and_then(|t| state.content(t));
    let has_peak = content.and_then(peak_severity).is_some();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(u16::from(tab == "events")),
            Constraint::Min(1),
            Constraint::Length(u16::from(has_peak)),
            Constraint::Length(notes.len() as u16),
        ])
        .split(inner);

    if tab == "events" {
        draw_stats(frame, state, chunks[0]);
    }
    match (content, target) {
        (Some(content), Some(t)) => {
            draw_content(frame, content, state.is_loading(t), chunks[1]);
            draw_peak(frame, content, chunks[2]);
        }
        (None, Some(t)) if state.is_loading(t) => {
            frame.render_widget(Paragraph::new("loading…").style(Style::default().fg(Color::DarkGray)), chunks[1]);
        }
        _ => {}
    }
    frame.render_widget(Paragraph::new(notes).wrap(Wrap { trim: false }), chunks[3]);
}

fn draw_stats(frame: &mut Frame, state: &SurfaceState, area: Rect) {
    let stat = |label: &str, target: Target, style: Style| {
        vec![
            Span::raw(format!("{label} ")),
            Span::styled(state.text(target).unwrap_or(format::MISSING).to_string(), style.add_modifier(Modifier::BOLD)),
            Span::raw("   "),
        ]
    };
    let line: Vec<Span> = [
        stat("total", Target::StatTotal, Style::default()),
        stat("legit", Target::StatLegit, Style::default().fg(Color::Green)),
        stat("suspicious", Target::StatSuspicious, Style::default().fg(Color::Red)),
        stat("frozen", Target::StatFrozen, Style::default().fg(Color::Magenta)),
    ]
    .concat();
    frame.render_widget(Paragraph::new(Line::from(line)), area);
}

fn draw_content(frame: &mut Frame, content: &Content, loading: bool, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(u16::from(loading))])
        .split(area);

    match content {
        Content::Empty(text) => {
            frame.render_widget(Paragraph::new(text.as_str()).style(Style::default().fg(Color::DarkGray)), chunks[0])
        }
        Content::Error(msg) => {
            frame.render_widget(Paragraph::new(format!("! {msg}")).style(Style::default().fg(Color::Red)), chunks[0])
        }
        Content::Rows(rows) => frame.render_widget(rows_table(rows), chunks[0]),
    }
    if loading {
        frame.render_widget(Paragraph::new("refreshing…").style(Style::default().fg(Color::DarkGray)), chunks[1]);
    }
}

fn rows_table(rows: &[shield_core::render::Row]) -> Table<'static> {
    let columns = rows.iter().map(|r| r.cells.len()).max().unwrap_or(0);
    let widths: Vec<Constraint> = (0..columns)
        .map(|i| {
            let widest = rows.iter().filter_map(|r| r.cells.get(i)).map(cell_width).max().unwrap_or(0);
            Constraint::Length(widest.min(MAX_COLUMN_WIDTH) as u16)
        })
        .collect();
    let rows: Vec<TableRow> = rows.iter().map(|r| TableRow::new(r.cells.iter().map(table_cell))).collect();
    Table::new(rows, widths).column_spacing(2)
}

fn cell_width(cell: &Cell) -> usize {
    match cell.severity() {
        Some(severity) => cell.text.chars().count() + RISK_BAR_WIDTH + severity.as_str().len() + 2,
        None => cell.text.chars().count(),
    }
}

fn table_cell(cell: &Cell) -> TableCell<'static> {
    match (cell.score, cell.severity()) {
        (Some(score), Some(severity)) => TableCell::from(Line::from(vec![
            Span::raw(format!("{} ", cell.text)),
            Span::styled(format::risk_bar(score, RISK_BAR_WIDTH), tint(severity)),
            Span::styled(format!(" {}", severity.as_str()), tint(severity)),
        ])),
        _ => TableCell::from(cell.text.clone()),
    }
}

fn draw_peak(frame: &mut Frame, content: &Content, area: Rect) {
    let Some(severity) = peak_severity(content) else {
        return;
    };
    let peak = content.rows().iter().flat_map(|r| r.cells.iter()).filter_map(|c| c.score).fold(0.0, f64::max);
    let gauge = Gauge::default()
        .gauge_style(tint(severity))
        .ratio(peak.clamp(0.0, 1.0))
        .label(format!("peak risk {} {}", format::score(peak), severity.as_str()));
    frame.render_widget(gauge, area);
}

fn draw_demo(frame: &mut Frame, state: &SurfaceState, area: Rect) {
    let result_height = state.result.as_ref().map_or(0, |card| card.rows.len() as u16 + 3);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(result_height),
        ])
        .split(area);

    let steps: Vec<Span> = state
        .steps
        .iter()
        .zip(STEP_LABELS)
        .enumerate()
        .map(|(i, (step, label))| {
            let (mark, style) = match step {
                StepState::Pending => ("·", Style::default().fg(Color::DarkGray)),
                StepState::Active => ("…", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                StepState::Done => ("✔", Style::default().fg(Color::Green)),
                StepState::Error => ("✗", Style::default().fg(Color::Red)),
            };
            Span::styled(format!("[{} {mark}] {label}  ", i + 1), style)
        })
        .collect();
    frame.render_widget(Paragraph::new(Line::from(steps)), chunks[0]);

    // newest lines stay in view
    let visible = chunks[1].height as usize;
    let skip = state.feed.len().saturating_sub(visible);
    let items: Vec<ListItem> =
        state.feed[skip..].iter().map(|l| ListItem::new(Line::styled(l.text.clone(), feed_style(l.kind)))).collect();
    frame.render_widget(List::new(items), chunks[1]);

    let button = |label: &'static str, enabled: bool| match enabled {
        true => Span::styled(label, Style::default().fg(Color::Black).bg(Color::Green)),
        false => Span::styled(label, Style::default().fg(Color::DarkGray)),
    };
    let buttons =
        Line::from(vec![button(" run ", state.run_enabled), Span::raw("  "), button(" freeze ", state.freeze_enabled)]);
    frame.render_widget(Paragraph::new(buttons), chunks[2]);

    if let Some(card) = &state.result {
        draw_result(frame, card, chunks[3]);
    }
}

fn feed_style(kind: FeedKind) -> Style {
    match kind {
        FeedKind::Plain => Style::default(),
        FeedKind::Head => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        FeedKind::Info => Style::default().fg(Color::Blue),
        FeedKind::Legit => Style::default().fg(Color::Green),
        FeedKind::Bot => Style::default().fg(Color::Red),
        FeedKind::Warn => Style::default().fg(Color::Yellow),
        FeedKind::Frozen => Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
    }
}

fn draw_result(frame: &mut Frame, card: &ResultCard, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(format!(" {} ", card.title), Style::default().add_modifier(Modifier::BOLD)));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(inner);
    frame.render_widget(Paragraph::new(card.subtitle.as_str()), chunks[0]);
    frame.render_widget(rows_table(&card.rows), chunks[1]);
}

fn draw_prompt(frame: &mut Frame, prompt: &Prompt, status_area: Rect, input_area: Rect) {
    let status = Paragraph::new(prompt.status().unwrap_or(HELP)).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(status, status_area);

    let block = Block::default().borders(Borders::ALL).title(" command ");
    let inner = block.inner(input_area);
    frame.render_widget(Paragraph::new(format!("> {}", prompt.input())).block(block), input_area);
    let x = inner.x.saturating_add(2 + prompt.input().chars().count() as u16).min(inner.right().saturating_sub(1));
    frame.set_cursor_position((x, inner.y));
}
