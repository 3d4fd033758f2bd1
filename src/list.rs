//! State of the time entry table: search, project filter, sort, pagination
//! and the single inline cell editor.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::cache::Fetched;
use crate::dates::{parse_local_input, to_local_input, to_rfc3339};
use crate::debounce::{Debouncer, SEARCH_DEBOUNCE};
use crate::models::TimeEntryRow;
use crate::query::{Query, SortDirection, Table};

pub const PAGE_SIZE: usize = 10;

pub const ENTRY_COLUMNS: &str = "*, project:projects(name), task:tasks(name)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Project,
    Task,
    Description,
    StartTime,
    EndTime,
    Duration,
    InvoiceNumber,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Project,
        Column::Task,
        Column::Description,
        Column::StartTime,
        Column::EndTime,
        Column::Duration,
        Column::InvoiceNumber,
    ];

    pub fn sort_key(self) -> &'static str {
        match self {
            Column::Project => "project_id",
            Column::Task => "task_id",
            Column::Description => "description",
            Column::StartTime => "start_time",
            Column::EndTime => "end_time",
            Column::Duration => "duration",
            Column::InvoiceNumber => "invoice_number",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Column::Project => "Project",
            Column::Task => "Task",
            Column::Description => "Description",
            Column::StartTime => "Start Time",
            Column::EndTime => "End Time",
            Column::Duration => "Duration",
            Column::InvoiceNumber => "Invoice #",
        }
    }

    pub fn is_editable(self) -> bool {
        !matches!(self, Column::Duration)
    }

    pub fn index(self) -> usize {
        Column::ALL
            .iter()
            .position(|column| *column == self)
            .unwrap_or(0)
    }

    fn offset(self, delta: isize) -> Column {
        let len = Column::ALL.len() as isize;
        let index = (self.index() as isize + delta).clamp(0, len - 1);
        Column::ALL[index as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sort {
    pub column: Column,
    pub direction: SortDirection,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            column: Column::StartTime,
            direction: SortDirection::Descending,
        }
    }
}

impl Sort {
    /// The active column flips direction; any other column starts ascending.
    pub fn toggle(&mut self, column: Column) {
        if self.column == column {
            self.direction = self.direction.flipped();
        } else {
            self.column = column;
            self.direction = SortDirection::Ascending;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: usize,
    total: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, total: 0 }
    }
}

impl Pagination {
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(PAGE_SIZE)
    }

    pub fn next(&mut self) -> bool {
        if self.page >= self.total_pages() {
            return false;
        }
        self.page += 1;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.page <= 1 {
            return false;
        }
        self.page -= 1;
        true
    }

    pub fn reset(&mut self) -> bool {
        let changed = self.page != 1;
        self.page = 1;
        changed
    }

    /// Records the server count; returns whether the page had to be clamped.
    pub fn set_total(&mut self, total: usize) -> bool {
        self.total = total;
        let last = self.total_pages().max(1);
        if self.page > last {
            self.page = last;
            return true;
        }
        false
    }
}

/// Everything the list query depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub page: usize,
    pub search: String,
    pub sort: Sort,
    pub project: Option<String>,
}

impl ListKey {
    pub fn query(&self) -> Query {
        let mut query = Query::new(Table::TimeEntries).select(ENTRY_COLUMNS);
        if !self.search.is_empty() {
            query = query.any_ilike(&["description", "invoice_number"], self.search.clone());
        }
        if let Some(project_id) = &self.project {
            query = query.eq("project_id", project_id.clone());
        }
        query
            .order(self.sort.column.sort_key(), self.sort.direction)
            .range((self.page - 1) * PAGE_SIZE, PAGE_SIZE)
            .count_exact()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub id: Option<String>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellBuffer {
    Text(String),
    Choice { options: Vec<Choice>, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellEdit {
    pub entry_id: String,
    pub column: Column,
    pub buffer: CellBuffer,
    original: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl CellEdit {
    fn open(row: &TimeEntryRow, column: Column, options: Vec<Choice>) -> Self {
        let entry = &row.entry;
        let original = match column {
            Column::Project => entry.project_id.clone(),
            Column::Task => entry.task_id.clone(),
            Column::Description => entry.description.clone(),
            Column::StartTime => Some(to_local_input(&entry.start_time)),
            Column::EndTime => entry.end_time.as_ref().map(to_local_input),
            Column::Duration => None,
            Column::InvoiceNumber => entry.invoice_number.clone(),
        };

        let buffer = match column {
            Column::Project | Column::Task => {
                let index = options
                    .iter()
                    .position(|choice| choice.id == original)
                    .unwrap_or(0);
                CellBuffer::Choice { options, index }
            }
            _ => CellBuffer::Text(original.clone().unwrap_or_default()),
        };

        Self {
            entry_id: entry.id.clone(),
            column,
            buffer,
            original,
            start_time: entry.start_time,
            end_time: entry.end_time,
        }
    }

    fn value(&self) -> Option<String> {
        match &self.buffer {
            CellBuffer::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            CellBuffer::Choice { options, index } => {
                options.get(*index).and_then(|choice| choice.id.clone())
            }
        }
    }

    pub fn display(&self) -> String {
        match &self.buffer {
            CellBuffer::Text(text) => text.clone(),
            CellBuffer::Choice { options, index } => options
                .get(*index)
                .map(|choice| choice.label.clone())
                .unwrap_or_default(),
        }
    }

    fn commit(self) -> EditOutcome {
        let value = self.value();
        if value == self.original {
            return EditOutcome::Unchanged;
        }

        let patch = match self.column {
            // A task only belongs to one project.
            Column::Project => json!({ "project_id": value, "task_id": null }),
            Column::Task => json!({ "task_id": value }),
            Column::Description => json!({ "description": value }),
            Column::InvoiceNumber => json!({ "invoice_number": value }),
            Column::StartTime => {
                let Some(text) = value else {
                    return EditOutcome::Invalid("Start time is required.".to_string());
                };
                let start = match parse_local_input(&text) {
                    Ok(start) => start,
                    Err(err) => return EditOutcome::Invalid(err),
                };
                if self.end_time.is_some_and(|end| end < start) {
                    return EditOutcome::Invalid("Start time cannot be after end time.".to_string());
                }
                json!({ "start_time": to_rfc3339(&start) })
            }
            Column::EndTime => match value {
                None => json!({ "end_time": Value::Null }),
                Some(text) => {
                    let end = match parse_local_input(&text) {
                        Ok(end) => end,
                        Err(err) => return EditOutcome::Invalid(err),
                    };
                    if end < self.start_time {
                        return EditOutcome::Invalid(
                            "End time cannot be before start time.".to_string(),
                        );
                    }
                    json!({ "end_time": to_rfc3339(&end) })
                }
            },
            Column::Duration => return EditOutcome::Unchanged,
        };

        EditOutcome::Update(CellUpdate {
            entry_id: self.entry_id,
            column: self.column,
            patch,
        })
    }
}

/// A single-field write produced by committing a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub entry_id: String,
    pub column: Column,
    pub patch: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Update(CellUpdate),
    Unchanged,
    Invalid(String),
}

#[derive(Debug)]
pub struct ListView {
    search_input: String,
    search: String,
    debouncer: Debouncer<String>,
    project_filter: Option<String>,
    sort: Sort,
    pagination: Pagination,
    rows: Vec<TimeEntryRow>,
    cursor_row: usize,
    cursor_column: Column,
    editing: Option<CellEdit>,
}

impl Default for ListView {
    fn default() -> Self {
        Self::new()
    }
}

impl ListView {
    pub fn new() -> Self {
        Self {
            search_input: String::new(),
            search: String::new(),
            debouncer: Debouncer::new(SEARCH_DEBOUNCE),
            project_filter: None,
            sort: Sort::default(),
            pagination: Pagination::default(),
            rows: Vec::new(),
            cursor_row: 0,
            cursor_column: Column::Description,
            editing: None,
        }
    }

    pub fn key(&self) -> ListKey {
        ListKey {
            page: self.pagination.page(),
            search: self.search.clone(),
            sort: self.sort,
            project: self.project_filter.clone(),
        }
    }

    pub fn search_input(&self) -> &str {
        &self.search_input
    }

    pub fn is_search_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn push_search_char(&mut self, ch: char, now: Instant) {
        self.search_input.push(ch);
        self.debouncer.push(self.search_input.clone(), now);
    }

    pub fn pop_search_char(&mut self, now: Instant) {
        self.search_input.pop();
        self.debouncer.push(self.search_input.clone(), now);
    }

    pub fn clear_search(&mut self, now: Instant) {
        self.search_input.clear();
        self.debouncer.push(String::new(), now);
    }

    /// Applies a settled search term; returns whether the query changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.debouncer.poll(now) {
            Some(term) if term != self.search => {
                self.search = term;
                self.pagination.reset();
                true
            }
            _ => false,
        }
    }

    pub fn project_filter(&self) -> Option<&str> {
        self.project_filter.as_deref()
    }

    pub fn set_project_filter(&mut self, project_id: Option<String>) -> bool {
        if self.project_filter == project_id {
            return false;
        }
        self.project_filter = project_id;
        self.pagination.reset();
        true
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    pub fn toggle_sort(&mut self, column: Column) {
        self.sort.toggle(column);
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn next_page(&mut self) -> bool {
        self.pagination.next()
    }

    pub fn previous_page(&mut self) -> bool {
        self.pagination.previous()
    }

    /// Stores a fetched page; returns `true` when the page was clamped and
    /// has to be fetched again.
    pub fn apply(&mut self, fetched: Fetched<TimeEntryRow>) -> bool {
        let total = fetched.total.unwrap_or(fetched.rows.len());
        self.rows = fetched.rows;
        if self.cursor_row >= self.rows.len() {
            self.cursor_row = self.rows.len().saturating_sub(1);
        }
        if let Some(edit) = &self.editing {
            if !self.rows.iter().any(|row| row.entry.id == edit.entry_id) {
                self.editing = None;
            }
        }
        self.pagination.set_total(total)
    }

    pub fn clear_rows(&mut self) {
        self.rows.clear();
        self.cursor_row = 0;
        self.editing = None;
        self.pagination.set_total(0);
    }

    pub fn rows(&self) -> &[TimeEntryRow] {
        &self.rows
    }

    pub fn cursor(&self) -> (usize, Column) {
        (self.cursor_row, self.cursor_column)
    }

    /// First row to draw so the cursor stays inside a `visible`-row window.
    pub fn scroll_offset(&self, visible: usize) -> usize {
        if visible == 0 {
            return 0;
        }
        self.cursor_row.saturating_sub(visible - 1)
    }

    pub fn current_row(&self) -> Option<&TimeEntryRow> {
        self.rows.get(self.cursor_row)
    }

    pub fn editing(&self) -> Option<&CellEdit> {
        self.editing.as_ref()
    }

    /// Moves the cursor; an open editor loses focus and commits.
    pub fn move_cursor(&mut self, rows: isize, columns: isize) -> Option<EditOutcome> {
        let outcome = self.commit_edit();
        if !self.rows.is_empty() {
            let last = self.rows.len() as isize - 1;
            self.cursor_row = (self.cursor_row as isize + rows).clamp(0, last) as usize;
        }
        self.cursor_column = self.cursor_column.offset(columns);
        outcome
    }

    /// Points the cursor at a cell; an editor open elsewhere commits first.
    pub fn select_cell(&mut self, row: usize, column: Column) -> Option<EditOutcome> {
        let same_cell = self.cursor_row == row && self.cursor_column == column;
        let outcome = if same_cell { None } else { self.commit_edit() };
        if row < self.rows.len() {
            self.cursor_row = row;
        }
        self.cursor_column = column;
        outcome
    }

    /// Opens the editor on the cursor cell. Any editor already open on a
    /// different cell is committed, and its outcome returned.
    pub fn begin_edit(&mut self, options: Vec<Choice>) -> Option<EditOutcome> {
        let column = self.cursor_column;
        let Some(row) = self.rows.get(self.cursor_row) else {
            return None;
        };
        if !column.is_editable() {
            return None;
        }
        if let Some(edit) = &self.editing {
            if edit.entry_id == row.entry.id && edit.column == column {
                return None;
            }
        }

        let edit = CellEdit::open(row, column, options);
        let previous = self.editing.replace(edit);
        previous.map(CellEdit::commit)
    }

    pub fn commit_edit(&mut self) -> Option<EditOutcome> {
        self.editing.take().map(CellEdit::commit)
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn edit_push(&mut self, ch: char) {
        if let Some(CellEdit {
            buffer: CellBuffer::Text(text),
            ..
        }) = self.editing.as_mut()
        {
            text.push(ch);
        }
    }

    pub fn edit_pop(&mut self) {
        if let Some(CellEdit {
            buffer: CellBuffer::Text(text),
            ..
        }) = self.editing.as_mut()
        {
            text.pop();
        }
    }

    pub fn edit_cycle(&mut self, delta: isize) {
        if let Some(CellEdit {
            buffer: CellBuffer::Choice { options, index },
            ..
        }) = self.editing.as_mut()
        {
            if options.is_empty() {
                return;
            }
            let len = options.len() as isize;
            *index = (*index as isize + delta).rem_euclid(len) as usize;
        }
    }
}
