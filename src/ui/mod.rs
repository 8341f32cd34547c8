use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use ratatui::Frame;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, FocusPane, OverlayState, View};
use crate::highlight::{build_highlight_regex, match_ranges};
use crate::record::{Field, Record, RecordDraft};
use crate::search::TablePage;
use crate::session::{EditSessionController, SessionStatus};
use crate::validation::FieldErrors;

const TABLE_COLUMNS: [Field; 8] = [
    Field::Name,
    Field::Email,
    Field::PhoneNumber,
    Field::Dob,
    Field::City,
    Field::District,
    Field::Province,
    Field::Country,
];
const CELL_WIDTH: usize = 24;

pub fn draw_app(
    frame: &mut Frame,
    state: &AppState,
    records: &[Record],
    session: &EditSessionController,
    table_state: &mut TableState,
) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(4)])
        .split(frame.size());

    let page = state.table.render(records);

    match state.view {
        View::Registry => {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
                .split(vertical[0]);
            draw_form(frame, state, columns[0]);
            draw_table(frame, state, &page, columns[1], table_state);
        }
        View::Profiles => draw_profiles(frame, records, vertical[0]),
    }

    let status = Paragraph::new(build_status_line(state, &page, records.len(), session))
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(status, vertical[1]);

    render_overlay(frame, state, session);
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn draw_form(frame: &mut Frame, state: &AppState, area: Rect) {
    let focused = state.focus == FocusPane::Form && state.overlay().is_none();
    let picture_label = match state.form.picture() {
        Some(file) => format!("{} (attached)", file.path().display()),
        None => state.picture_path.clone(),
    };
    let lines = field_lines(
        state.form.draft(),
        state.form.errors(),
        focused.then_some(state.form_field()),
        &picture_label,
    );
    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title("New Record")
                .borders(Borders::ALL)
                .border_style(focus_style(focused)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

/// One label/value line per field, with the field's error underneath.
fn field_lines(
    draft: &RecordDraft,
    errors: &FieldErrors,
    selected: Option<Field>,
    picture_label: &str,
) -> Vec<Line<'static>> {
    let mut lines = Vec::with_capacity(Field::all().len() * 2);
    for field in Field::all() {
        let is_selected = selected == Some(field);
        let marker = if is_selected { "▸ " } else { "  " };
        let required = if field.is_required() { "*" } else { "" };
        let value = match field {
            Field::ProfilePicture => {
                let mut label = picture_label.to_string();
                if label.is_empty() && draft.profile_picture.is_some() {
                    label = picture_summary(draft.profile_picture.as_ref());
                }
                label
            }
            _ => draft.value(field).to_string(),
        };
        let mut value_display = value;
        if is_selected {
            value_display.push('▌');
        }
        let label_style = if is_selected {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        lines.push(Line::from(vec![
            Span::raw(marker),
            Span::styled(format!("{}{}: ", field.label(), required), label_style),
            Span::raw(value_display),
        ]));
        if let Some(error) = errors.get(field) {
            lines.push(Line::from(Span::styled(
                format!("    {error}"),
                Style::default().fg(Color::Red),
            )));
        }
    }
    lines
}

fn draw_table(
    frame: &mut Frame,
    state: &AppState,
    page: &TablePage<'_>,
    area: Rect,
    table_state: &mut TableState,
) {
    let focused = state.focus == FocusPane::Table && state.overlay().is_none();
    let highlight_regex = build_highlight_regex(&[state.table.search_term().to_string()]);
    let highlight_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);

    let mut header_cells = vec![Cell::from("#")];
    header_cells.extend(TABLE_COLUMNS.iter().map(|field| Cell::from(field.label())));
    header_cells.push(Cell::from("Picture"));
    let header = Row::new(header_cells).style(Style::default().add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = page
        .rows
        .iter()
        .map(|row| {
            let mut cells = vec![Cell::from((row.index + 1).to_string())];
            for field in TABLE_COLUMNS {
                let text = truncate_to_width(&row.record.field_text(field), CELL_WIDTH);
                cells.push(Cell::from(Line::from(highlight_spans(
                    &text,
                    highlight_regex.as_ref(),
                    highlight_style,
                ))));
            }
            cells.push(Cell::from(picture_summary(row.record.profile_picture.as_ref())));
            Row::new(cells)
        })
        .collect();

    let mut widths = vec![Constraint::Length(4)];
    widths.extend(TABLE_COLUMNS.iter().map(|_| Constraint::Min(6)));
    widths.push(Constraint::Length(10));

    let title = if page.total_pages == 0 {
        "Records (no matches)".to_string()
    } else {
        format!("Records · page {}/{}", page.page, page.total_pages)
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(focus_style(focused)),
        )
        .highlight_style(if focused {
            Style::default().bg(Color::DarkGray)
        } else {
            Style::default()
        });

    if page.is_empty() {
        table_state.select(None);
    }
    frame.render_stateful_widget(table, area, table_state);
}

fn draw_profiles(frame: &mut Frame, records: &[Record], area: Rect) {
    let mut lines = Vec::new();
    if records.is_empty() {
        lines.push(Line::from(Span::styled(
            "No profiles yet.",
            Style::default().fg(Color::Gray),
        )));
    }
    for (index, record) in records.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{}. {}", index + 1, record.name),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {}", picture_summary(record.profile_picture.as_ref())),
                Style::default().fg(Color::Gray),
            ),
        ]));
        lines.push(Line::from(format!(
            "   {} · {}",
            record.email, record.phone_number
        )));
        let address: Vec<String> = [Field::City, Field::District, Field::Province, Field::Country]
            .into_iter()
            .map(|field| record.field_text(field))
            .filter(|value| !value.is_empty())
            .collect();
        let mut details = address.join(", ");
        if let Some(dob) = record.dob {
            details.push_str(&format!(" · born {dob}"));
        }
        lines.push(Line::from(Span::styled(
            format!("   {details}"),
            Style::default().fg(Color::Gray),
        )));
        lines.push(Line::from(""));
    }
    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title(format!("Profiles ({})", records.len()))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn build_status_line(
    state: &AppState,
    page: &TablePage<'_>,
    total: usize,
    session: &EditSessionController,
) -> Text<'static> {
    let mut spans = vec![
        Span::raw(format!("Records: {total}")),
        Span::raw(" | Matches: "),
        Span::styled(
            page.total_matches.to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ];

    if state.is_search_active() || !state.table.search_term().is_empty() {
        spans.push(Span::raw(" | Search: "));
        let mut query = state.search.query.clone();
        if state.is_search_active() {
            query.push('▌');
        }
        spans.push(Span::styled(query, Style::default().fg(Color::Yellow)));
    }

    if let SessionStatus::Saving { index } = session.status() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            format!("Saving record {}…", index + 1),
            Style::default().fg(Color::Magenta),
        ));
    }

    if let Some(message) = &state.status_message {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(message.clone(), Style::default().fg(Color::Cyan)));
    }

    let keys = match (state.view, state.focus) {
        (View::Profiles, _) => "p/Esc back • q quit",
        (View::Registry, FocusPane::Form) => {
            "↑/↓ field • ←/→ choose • Enter attach picture • Ctrl-s submit • Tab table • Ctrl-q quit"
        }
        (View::Registry, FocusPane::Table) => {
            "j/k move • n/b page • / search • e edit • d delete • p profiles • Tab form • q quit"
        }
    };

    Text::from(vec![
        Line::from(spans),
        Line::from(vec![
            Span::styled(
                "Keys: ",
                Style::default()
                    .fg(Color::Gray)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(keys, Style::default().fg(Color::DarkGray)),
        ]),
    ])
}

fn render_overlay(frame: &mut Frame, state: &AppState, session: &EditSessionController) {
    match state.overlay() {
        Some(OverlayState::Edit(overlay)) => {
            let (Some(draft), Some(errors)) = (session.draft(), session.errors()) else {
                return;
            };
            let area = centered_rect(60, 70, frame.size());
            frame.render_widget(Clear, area);
            let picture_label = if session.picture_loading() {
                format!("{} (loading…)", overlay.picture_path)
            } else if !overlay.picture_path.is_empty() {
                overlay.picture_path.clone()
            } else {
                String::new()
            };
            let saving = session.is_saving();
            let mut lines = field_lines(
                draft,
                errors,
                (!saving).then_some(overlay.field()),
                &picture_label,
            );
            lines.push(Line::from(""));
            let hint = if saving {
                "Saving… • Esc to discard"
            } else {
                "Ctrl-s save • Esc cancel • Enter on picture to load it"
            };
            lines.push(Line::from(Span::styled(hint, Style::default().fg(Color::Gray))));
            let title = session
                .index()
                .map(|index| format!("Edit Record {}", index + 1))
                .unwrap_or_else(|| "Edit Record".to_string());
            let paragraph = Paragraph::new(lines)
                .block(
                    Block::default()
                        .title(title)
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Cyan)),
                )
                .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::ConfirmDelete(overlay)) => {
            let area = centered_rect(50, 25, frame.size());
            frame.render_widget(Clear, area);
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Delete record?",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(format!("#{} {}", overlay.index + 1, overlay.name)),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter/y to delete • Esc/n to keep",
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(
                Block::default()
                    .title("Delete")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Red)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        None => {}
    }
}

fn picture_summary(picture: Option<&crate::picture::ProfilePicture>) -> String {
    match picture {
        Some(picture) => format!("PNG {:.1} KB", picture.byte_len() as f64 / 1024.0),
        None => "—".to_string(),
    }
}

fn highlight_spans(text: &str, regex: Option<&Regex>, highlight_style: Style) -> Vec<Span<'static>> {
    let ranges = match_ranges(regex, text);
    if ranges.is_empty() {
        return vec![Span::raw(text.to_string())];
    }
    let mut spans = Vec::with_capacity(ranges.len() * 2 + 1);
    let mut last = 0;
    for (start, end) in ranges {
        if start > last {
            spans.push(Span::raw(text[last..start].to_string()));
        }
        spans.push(Span::styled(text[start..end].to_string(), highlight_style));
        last = end;
    }
    if last < text.len() {
        spans.push(Span::raw(text[last..].to_string()));
    }
    spans
}

/// Cuts `text` to at most `max_width` terminal columns, ending in `…` when
/// shortened.
fn truncate_to_width(text: &str, max_width: usize) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let width = grapheme.width();
        if used + width + 1 > max_width {
            break;
        }
        out.push_str(grapheme);
        used += width;
    }
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_to_width("Pokhara", 10), "Pokhara");
        assert_eq!(truncate_to_width("Kathmandu Valley", 8), "Kathman…");
        assert!(truncate_to_width("काठमाडौं उपत्यका", 6).width() <= 6);
    }

    #[test]
    fn highlight_splits_around_matches() {
        let regex = build_highlight_regex(&["pal".into()]);
        let spans = highlight_spans("Nepal", regex.as_ref(), Style::default());
        let parts: Vec<&str> = spans.iter().map(|span| span.content.as_ref()).collect();
        assert_eq!(parts, vec!["Ne", "pal"]);
    }
}
