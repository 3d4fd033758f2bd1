use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Flex, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, Wrap,
};

use crate::app::{App, AuthField, AuthMode, Mode, TableLayout};
use crate::backend::Backend;
use crate::dates::{format_duration, format_timestamp};
use crate::dialogs::DialogFocus;
use crate::form::FormField;
use crate::list::Column;
use crate::models::TimeEntryRow;
use crate::storage::ThemePreference;

pub fn draw<B: Backend>(frame: &mut Frame, app: &mut App<B>) {
    let size = frame.area();
    let theme = theme_from(app.theme);
    draw_background(frame, size, &theme);

    match app.mode {
        Mode::Loading => draw_overlay(frame, size, "Checking session...", &theme),
        Mode::Auth => draw_auth(frame, app, size, &theme),
        Mode::Timesheet | Mode::ProjectDialog | Mode::TaskDialog | Mode::EntryForm => {
            draw_timesheet(frame, app, size, &theme)
        }
    }

    match app.mode {
        Mode::ProjectDialog => draw_project_dialog(frame, app, size, &theme),
        Mode::TaskDialog => draw_task_dialog(frame, app, size, &theme),
        Mode::EntryForm => draw_entry_form(frame, app, size, &theme),
        Mode::Loading | Mode::Auth | Mode::Timesheet => {}
    }

    if !app.show_help {
        if let Some(toast) = app.active_toast() {
            draw_toast(frame, size, &toast.message, toast.is_error, &theme);
        }
    }

    if app.show_help {
        draw_help(frame, size, &theme);
    }
}

fn draw_timesheet<B: Backend>(frame: &mut Frame, app: &mut App<B>, area: Rect, theme: &Theme) {
    let content = area.inner(Margin {
        vertical: 1,
        horizontal: 2,
    });

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(2),
        ])
        .split(content);

    let header = Paragraph::new(header_line(app, theme)).block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(theme.border_style())
            .style(theme.panel_style()),
    );
    frame.render_widget(header, chunks[0]);

    let toolbar = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[1]);

    let mut search = vec![Span::raw(app.list.search_input().to_string())];
    if app.searching {
        search.push(Span::styled("▏", Style::default().fg(theme.accent)));
    }
    if app.list.is_search_pending() {
        search.push(Span::styled("  searching...", theme.muted_style()));
    }
    let search_block = if app.searching {
        panel_block("Search", theme).border_style(Style::default().fg(theme.accent))
    } else {
        panel_block("Search", theme)
    };
    frame.render_widget(Paragraph::new(Line::from(search)).block(search_block), toolbar[0]);

    let filter = Paragraph::new(Line::from(Span::styled(
        app.project_filter_label().to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    )))
    .block(panel_block("Project", theme));
    frame.render_widget(filter, toolbar[1]);

    draw_entry_table(frame, app, chunks[2], theme);

    let footer = Paragraph::new(footer_line(app, theme)).block(
        Block::default()
            .borders(Borders::TOP)
            .border_style(theme.border_style())
            .style(theme.panel_style()),
    );
    frame.render_widget(footer, chunks[3]);
}

const COLUMN_WIDTHS: [Constraint; 7] = [
    Constraint::Length(16),
    Constraint::Length(16),
    Constraint::Fill(1),
    Constraint::Length(18),
    Constraint::Length(18),
    Constraint::Length(9),
    Constraint::Length(12),
];

fn draw_entry_table<B: Backend>(frame: &mut Frame, app: &mut App<B>, area: Rect, theme: &Theme) {
    let block = panel_block("Time Entries", theme);
    let inner = block.inner(area);

    let sort = app.list.sort();
    let header = Row::new(Column::ALL.iter().map(|column| {
        let mut label = column.label().to_string();
        if sort.column == *column {
            label.push(' ');
            label.push_str(sort.direction.arrow());
        }
        Cell::from(Span::styled(label, theme.title_style()))
    }));

    let visible = (inner.height as usize).saturating_sub(1);
    let scroll = app.list.scroll_offset(visible);
    let (cursor_row, cursor_column) = app.list.cursor();
    let editing = app.list.editing();
    let rows: Vec<Row> = app
        .list
        .rows()
        .iter()
        .enumerate()
        .skip(scroll)
        .take(visible)
        .map(|(index, row)| {
            Row::new(Column::ALL.iter().map(|column| {
                let editing_here = editing
                    .filter(|edit| edit.entry_id == row.entry.id && edit.column == *column);
                if let Some(edit) = editing_here {
                    return Cell::from(Span::styled(
                        format!("{}▏", edit.display()),
                        Style::default()
                            .fg(theme.highlight)
                            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
                    ));
                }
                let text = cell_text(row, *column);
                if index == cursor_row && *column == cursor_column {
                    Cell::from(Span::styled(
                        text,
                        Style::default()
                            .bg(theme.accent)
                            .fg(theme.accent_contrast())
                            .add_modifier(Modifier::BOLD),
                    ))
                } else {
                    Cell::from(text)
                }
            }))
            .style(theme.panel_style())
        })
        .collect();

    let column_areas = Layout::horizontal(COLUMN_WIDTHS)
        .flex(Flex::Start)
        .spacing(1)
        .split(inner);
    app.table_layout = TableLayout {
        header_y: inner.y,
        first_row_y: inner.y + 1,
        scroll,
        rows: rows.len(),
        columns: Column::ALL
            .iter()
            .zip(column_areas.iter())
            .map(|(column, rect)| (*column, rect.x, rect.width))
            .collect(),
    };

    if rows.is_empty() {
        frame.render_widget(block, area);
        let message = if app.list.search_input().is_empty() && app.list.project_filter().is_none() {
            "No time entries yet. Press n to add one."
        } else {
            "No time entries match the current filters."
        };
        let empty = Paragraph::new(message)
            .alignment(Alignment::Center)
            .style(theme.muted_style());
        let body = Rect {
            y: inner.y + 2,
            height: inner.height.saturating_sub(2),
            ..inner
        };
        frame.render_widget(header_only(header, theme), inner);
        frame.render_widget(empty, body);
        return;
    }

    let table = Table::new(rows, COLUMN_WIDTHS)
        .header(header)
        .flex(Flex::Start)
        .column_spacing(1)
        .block(block);
    frame.render_widget(table, area);
}

fn header_only<'a>(header: Row<'a>, theme: &Theme) -> Table<'a> {
    Table::new(Vec::<Row>::new(), COLUMN_WIDTHS)
        .header(header)
        .flex(Flex::Start)
        .column_spacing(1)
        .style(theme.panel_style())
}

fn cell_text(row: &TimeEntryRow, column: Column) -> String {
    let entry = &row.entry;
    match column {
        Column::Project => row.project_name().to_string(),
        Column::Task => row.task_name().to_string(),
        Column::Description => entry.description.clone().unwrap_or_default(),
        Column::StartTime => format_timestamp(&entry.start_time),
        Column::EndTime => entry
            .end_time
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string()),
        Column::Duration => entry
            .duration
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string()),
        Column::InvoiceNumber => entry.invoice_number.clone().unwrap_or_default(),
    }
}

fn header_line<B: Backend>(app: &App<B>, theme: &Theme) -> Line<'static> {
    let user = app.user_email().unwrap_or("Signed in").to_string();
    let last_refresh = app
        .last_refresh
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "Never".to_string());
    Line::from(vec![
        Span::styled("Timesheet", theme.title_style()),
        Span::raw("  "),
        Span::styled("User", theme.muted_style()),
        Span::raw(": "),
        Span::styled(user, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled("Last refresh", theme.muted_style()),
        Span::raw(": "),
        Span::raw(last_refresh),
    ])
}

fn footer_line<B: Backend>(app: &App<B>, theme: &Theme) -> Line<'static> {
    let pagination = app.list.pagination();
    let pages = pagination.total_pages().max(1);
    Line::from(vec![
        Span::styled(
            format!(
                "Page {} of {} ({} entries)",
                pagination.page(),
                pages,
                pagination.total()
            ),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
        Span::styled("[ ] page", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("/ search", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("n new", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("p projects", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("t tasks", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("h help", theme.muted_style()),
        Span::raw(" · "),
        Span::styled("q quit", theme.muted_style()),
    ])
}

fn draw_overlay(frame: &mut Frame, area: Rect, message: &str, theme: &Theme) {
    let block = centered_rect(60, 20, area);
    frame.render_widget(Clear, block);
    let paragraph = Paragraph::new(message)
        .alignment(Alignment::Center)
        .block(panel_block("Status", theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn draw_auth<B: Backend>(frame: &mut Frame, app: &App<B>, area: Rect, theme: &Theme) {
    let block = centered_rect(60, 40, area);
    frame.render_widget(Clear, block);

    let form = &app.auth_form;
    let (title, action) = match form.mode {
        AuthMode::SignIn => ("Sign In", "Sign in to track your time"),
        AuthMode::SignUp => ("Sign Up", "Create an account to start tracking"),
    };
    let masked = "•".repeat(form.password.chars().count());

    let mut lines = vec![
        Line::from(action),
        Line::from(""),
        field_line("Email", &form.email, form.focus == AuthField::Email, theme),
        field_line("Password", &masked, form.focus == AuthField::Password, theme),
        Line::from(""),
        Line::from(Span::styled(
            "Tab switch field • Enter submit • Ctrl+T sign in/up • Esc quit",
            theme.muted_style(),
        )),
    ];

    if let Some(status) = &form.status {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            status.clone(),
            Style::default().fg(theme.error),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block(title, theme))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, block);
}

fn field_line(label: &str, value: &str, focused: bool, theme: &Theme) -> Line<'static> {
    let label = Span::styled(
        format!("{label:<16}"),
        Style::default().add_modifier(Modifier::BOLD),
    );
    if focused {
        Line::from(vec![
            label,
            Span::styled(format!("{value}▏"), Style::default().fg(theme.accent)),
        ])
    } else {
        Line::from(vec![label, Span::raw(value.to_string())])
    }
}

fn draw_project_dialog<B: Backend>(frame: &mut Frame, app: &mut App<B>, area: Rect, theme: &Theme) {
    let Some(dialog) = app.project_dialog.as_mut() else {
        return;
    };
    let block = centered_rect(70, 70, area);
    frame.render_widget(Clear, block);
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)])
        .split(block);

    let title = if dialog.is_editing() {
        "Edit Project"
    } else {
        "New Project"
    };
    let form = Paragraph::new(vec![
        field_line("Name", &dialog.name, dialog.focus == DialogFocus::Name, theme),
        field_line(
            "Description",
            &dialog.description,
            dialog.focus == DialogFocus::Description,
            theme,
        ),
        Line::from(""),
        Line::from(Span::styled(
            "Enter save • Tab next field • Esc cancel/close",
            theme.muted_style(),
        )),
    ])
    .block(panel_block(title, theme));
    frame.render_widget(form, sections[0]);

    let items: Vec<ListItem> = dialog
        .projects
        .iter()
        .map(|project| {
            let mut spans = vec![Span::styled(
                project.name.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )];
            if let Some(description) = &project.description {
                spans.push(Span::styled(format!("  {description}"), theme.muted_style()));
            }
            ListItem::new(Line::from(spans)).style(theme.panel_style())
        })
        .collect();
    let list = List::new(items)
        .block(panel_block("Projects (e edit · d delete)", theme))
        .highlight_style(list_highlight(dialog.focus == DialogFocus::List, theme))
        .highlight_symbol("▍ ");
    frame.render_stateful_widget(list, sections[1], &mut dialog.list_state);
}

fn draw_task_dialog<B: Backend>(frame: &mut Frame, app: &mut App<B>, area: Rect, theme: &Theme) {
    let Some(dialog) = app.task_dialog.as_mut() else {
        return;
    };
    let block = centered_rect(70, 70, area);
    frame.render_widget(Clear, block);
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(block);

    let title = if dialog.is_editing() {
        "Edit Task"
    } else {
        "New Task"
    };
    let project = dialog
        .project_name()
        .map(|name| format!("◂ {name} ▸"))
        .unwrap_or_else(|| "◂ Select project ▸".to_string());
    let form = Paragraph::new(vec![
        field_line("Name", &dialog.name, dialog.focus == DialogFocus::Name, theme),
        field_line(
            "Description",
            &dialog.description,
            dialog.focus == DialogFocus::Description,
            theme,
        ),
        field_line("Project", &project, dialog.focus == DialogFocus::Project, theme),
        Line::from(""),
        Line::from(Span::styled(
            "Enter save • Tab next field • Left/Right pick project • Esc cancel/close",
            theme.muted_style(),
        )),
    ])
    .block(panel_block(title, theme));
    frame.render_widget(form, sections[0]);

    let items: Vec<ListItem> = dialog
        .tasks
        .iter()
        .map(|row| {
            let project = row
                .project
                .as_ref()
                .map(|project| project.name.clone())
                .unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::styled(
                    row.task.name.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("  {project}"), theme.muted_style()),
            ]))
            .style(theme.panel_style())
        })
        .collect();
    let list = List::new(items)
        .block(panel_block("Tasks (e edit · d delete)", theme))
        .highlight_style(list_highlight(dialog.focus == DialogFocus::List, theme))
        .highlight_symbol("▍ ");
    frame.render_stateful_widget(list, sections[1], &mut dialog.list_state);
}

fn draw_entry_form<B: Backend>(frame: &mut Frame, app: &App<B>, area: Rect, theme: &Theme) {
    let Some(form) = app.form.as_ref() else {
        return;
    };
    let block = centered_rect(60, 60, area);
    frame.render_widget(Clear, block);

    let mut lines = Vec::new();
    for field in FormField::ALL {
        let focused = form.focus == field;
        let value = match field {
            FormField::Project => format!("◂ {} ▸", form.project_name().unwrap_or("Select project")),
            FormField::Task if !form.task_enabled() => "Select a project first".to_string(),
            FormField::Task => format!("◂ {} ▸", form.task_name().unwrap_or("No task")),
            FormField::Description => form.description.clone(),
            FormField::StartTime => form.start_time.clone(),
            FormField::EndTime => form.end_time.clone(),
            FormField::InvoiceNumber => form.invoice_number.clone(),
        };
        if field == FormField::Task && !form.task_enabled() {
            lines.push(Line::from(vec![
                Span::styled(
                    format!("{:<16}", field.label()),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(value, theme.muted_style()),
            ]));
        } else {
            lines.push(field_line(field.label(), &value, focused, theme));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Times as YYYY-MM-DDTHH:MM (local)",
        theme.muted_style(),
    )));
    lines.push(Line::from(Span::styled(
        "Tab/Up/Down field • Left/Right pick • Enter save • Esc cancel",
        theme.muted_style(),
    )));

    let title = if form.editing_id().is_some() {
        "Edit Time Entry"
    } else {
        "New Time Entry"
    };
    let paragraph = Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(panel_block(title, theme))
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, block);
}

fn list_highlight(active: bool, theme: &Theme) -> Style {
    if active {
        Style::default()
            .bg(theme.accent)
            .fg(theme.accent_contrast())
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .fg(theme.highlight)
            .add_modifier(Modifier::BOLD)
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1]);
    vertical[1]
}

fn draw_toast(frame: &mut Frame, area: Rect, message: &str, is_error: bool, theme: &Theme) {
    let width = (message.len() as u16 + 6).clamp(20, area.width.saturating_sub(2));
    let height = 3;
    let x = area.x + area.width.saturating_sub(width + 1);
    let y = area.y + area.height.saturating_sub(height + 4);
    let rect = Rect::new(x, y, width, height);

    frame.render_widget(Clear, rect);
    let (style, title) = if is_error {
        (Style::default().fg(theme.error).add_modifier(Modifier::BOLD), "Error")
    } else {
        (Style::default().fg(theme.success).add_modifier(Modifier::BOLD), "Done")
    };
    let paragraph = Paragraph::new(Line::from(Span::styled(message, style)))
        .alignment(Alignment::Center)
        .block(panel_block(title, theme));
    frame.render_widget(paragraph, rect);
}

fn draw_help(frame: &mut Frame, area: Rect, theme: &Theme) {
    let block = centered_rect(70, 80, area);
    frame.render_widget(Clear, block);

    let header_style = Style::default().add_modifier(Modifier::BOLD).fg(theme.accent);
    let key_style = Style::default().fg(theme.highlight);

    let sections: [(&str, &[(&str, &str)]); 4] = [
        (
            "Table",
            &[
                ("Arrows / Tab", "Move between cells"),
                ("Enter", "Edit cell / save edit"),
                ("Esc", "Discard edit"),
                ("s", "Sort by current column"),
                ("[ / ]", "Previous / next page"),
            ],
        ),
        (
            "Filters",
            &[
                ("/", "Search description and invoice"),
                ("f / F", "Next / previous project filter"),
            ],
        ),
        (
            "Entries",
            &[
                ("n", "New time entry"),
                ("e", "Edit entry in form"),
                ("x", "Delete entry"),
                ("p", "Manage projects"),
                ("t", "Manage tasks"),
            ],
        ),
        (
            "General",
            &[
                ("r", "Refresh"),
                ("c", "Cycle theme"),
                ("o", "Sign out"),
                ("h / Esc", "Close help"),
                ("q", "Quit"),
            ],
        ),
    ];

    let mut rows = Vec::new();
    for (index, (title, keys)) in sections.iter().enumerate() {
        if index > 0 {
            rows.push(Row::new(vec![Cell::from(""), Cell::from("")]));
        }
        rows.push(Row::new(vec![
            Cell::from(Span::styled(*title, header_style)),
            Cell::from(""),
        ]));
        for (key, action) in keys.iter() {
            rows.push(Row::new(vec![
                Cell::from(Span::styled(*key, key_style)),
                Cell::from(*action),
            ]));
        }
    }

    let table = Table::new(rows, [Constraint::Length(20), Constraint::Min(10)])
        .block(panel_block("Help", theme))
        .column_spacing(2);

    frame.render_widget(table, block);
}

fn draw_background(frame: &mut Frame, area: Rect, theme: &Theme) {
    let block = Block::default().style(Style::default().bg(theme.bg).fg(theme.text));
    frame.render_widget(block, area);
}

fn panel_block(title: &str, theme: &Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(theme.border_style())
        .style(theme.panel_style())
        .title(Line::from(Span::styled(
            format!(" {} ", title),
            theme.title_style(),
        )))
}

#[derive(Clone, Copy)]
struct Theme {
    bg: Color,
    panel: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    highlight: Color,
    success: Color,
    error: Color,
    accent_dark: Color,
}

impl Theme {
    fn panel_style(&self) -> Style {
        Style::default().bg(self.panel).fg(self.text)
    }

    fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }

    fn title_style(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    fn muted_style(&self) -> Style {
        Style::default().fg(self.muted)
    }

    fn accent_contrast(&self) -> Color {
        if matches!(self.bg, Color::Rgb(242, 244, 248)) {
            self.accent_dark
        } else {
            Color::Black
        }
    }
}

fn theme_from(pref: ThemePreference) -> Theme {
    match pref {
        ThemePreference::Terminal => Theme {
            bg: Color::Reset,
            panel: Color::Reset,
            border: Color::DarkGray,
            text: Color::Reset,
            muted: Color::DarkGray,
            accent: Color::Cyan,
            highlight: Color::Yellow,
            success: Color::Green,
            error: Color::Red,
            accent_dark: Color::Black,
        },
        ThemePreference::Dark => Theme {
            bg: Color::Rgb(16, 20, 28),
            panel: Color::Rgb(24, 30, 42),
            border: Color::Rgb(60, 74, 96),
            text: Color::Rgb(226, 232, 240),
            muted: Color::Rgb(148, 163, 184),
            accent: Color::Rgb(96, 165, 250),
            highlight: Color::Rgb(251, 191, 36),
            success: Color::Rgb(74, 222, 128),
            error: Color::Rgb(248, 113, 113),
            accent_dark: Color::Rgb(30, 58, 138),
        },
        ThemePreference::Light => Theme {
            bg: Color::Rgb(242, 244, 248),
            panel: Color::Rgb(255, 255, 255),
            border: Color::Rgb(203, 213, 225),
            text: Color::Rgb(15, 23, 42),
            muted: Color::Rgb(100, 116, 139),
            accent: Color::Rgb(37, 99, 235),
            highlight: Color::Rgb(217, 119, 6),
            success: Color::Rgb(22, 163, 74),
            error: Color::Rgb(220, 38, 38),
            accent_dark: Color::Rgb(219, 234, 254),
        },
    }
}
