use shield_core::format;
use shield_core::render::{Cell, Content};

pub const RISK_BAR_WIDTH: usize = 10;

/// Plain lines for one panel, as printed by the one-shot commands
pub fn draw_content(content: &Content, loading: bool) -> Vec<String> {
    let mut lines = match content {
        Content::Empty(text) => vec![format!("  {text}")],
        Content::Error(msg) => vec![format!("  ! {msg}")],
        Content::Rows(rows) => rows
            .iter()
            .map(|row| format!("  {}", row.cells.iter().map(draw_cell).collect::<Vec<_>>().join(" │ ")))
            .collect(),
    };
    if loading {
        lines.push("  refreshing…".to_string());
    }
    lines
}

fn draw_cell(cell: &Cell) -> String {
    match (cell.score, cell.severity()) {
        (Some(score), Some(severity)) => {
            format!("{} {} {}", cell.text, format::risk_bar(score, RISK_BAR_WIDTH), severity.as_str())
        }
        _ => cell.text.clone(),
    }
}
