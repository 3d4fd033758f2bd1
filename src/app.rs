use chrono::{DateTime, Local, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::backend::{Backend, BackendError, encode_row};
use crate::cache::{KeyFamily, QueryCache, QueryKey};
use crate::dialogs::{DialogFocus, ProjectDialog, Submission, TaskDialog};
use crate::form::TimeEntryForm;
use crate::list::{CellBuffer, Choice, Column, EditOutcome, ListView};
use crate::models::{NewTimeEntry, Project, Session, Task, TaskRow, TimeEntry, TimeEntryRow};
use crate::query::{Query, SortDirection, Table};
use crate::session::{Auth, AuthEvent, GuardState, SessionGuard, Subscription};
use crate::storage::{self, ThemePreference};

const TOAST_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Loading,
    Auth,
    Timesheet,
    ProjectDialog,
    TaskDialog,
    EntryForm,
}

impl Mode {
    /// Views that need a signed-in user.
    fn is_protected(self) -> bool {
        matches!(
            self,
            Mode::Timesheet | Mode::ProjectDialog | Mode::TaskDialog | Mode::EntryForm
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthField {
    Email,
    Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    SignIn,
    SignUp,
}

pub struct AuthForm {
    pub email: String,
    pub password: String,
    pub focus: AuthField,
    pub mode: AuthMode,
    pub status: Option<String>,
}

impl AuthForm {
    fn new() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            focus: AuthField::Email,
            mode: AuthMode::SignIn,
            status: None,
        }
    }

    fn focused_mut(&mut self) -> &mut String {
        match self.focus {
            AuthField::Email => &mut self.email,
            AuthField::Password => &mut self.password,
        }
    }
}

/// Screen positions of the entry table from the last draw, for mouse hits.
#[derive(Debug, Clone, Default)]
pub struct TableLayout {
    pub header_y: u16,
    pub first_row_y: u16,
    /// Index of the first drawn row.
    pub scroll: usize,
    pub rows: usize,
    /// Column, first x, width.
    pub columns: Vec<(Column, u16, u16)>,
}

enum TableHit {
    Header(Column),
    Cell(usize, Column),
}

impl TableLayout {
    fn hit(&self, x: u16, y: u16) -> Option<TableHit> {
        let column = self
            .columns
            .iter()
            .find(|(_, start, width)| x >= *start && x < start + width)
            .map(|(column, _, _)| *column)?;
        if y == self.header_y {
            return Some(TableHit::Header(column));
        }
        let row = y.checked_sub(self.first_row_y)? as usize;
        (row < self.rows).then_some(TableHit::Cell(self.scroll + row, column))
    }
}

pub struct App<B: Backend> {
    pub should_quit: bool,
    pub mode: Mode,
    pub theme: ThemePreference,
    pub show_help: bool,
    pub searching: bool,
    pub list: ListView,
    pub projects: Vec<Project>,
    pub last_refresh: Option<DateTime<Local>>,
    pub auth_form: AuthForm,
    pub project_dialog: Option<ProjectDialog>,
    pub task_dialog: Option<TaskDialog>,
    pub form: Option<TimeEntryForm>,
    pub table_layout: TableLayout,
    backend: B,
    auth: Auth,
    cache: QueryCache,
    guard: Option<SessionGuard>,
    auth_listener: Option<Subscription>,
    return_to: Mode,
    needs_session_check: bool,
    needs_refresh: bool,
    persist: bool,
    toast: Option<Toast>,
}

impl<B: Backend> App<B> {
    pub fn new(
        backend: B,
        session: Option<Session>,
        theme: ThemePreference,
        persist: bool,
    ) -> Self {
        let auth = Auth::new(session, persist);
        let guard = SessionGuard::mount(auth.events());
        App {
            should_quit: false,
            mode: Mode::Loading,
            theme,
            show_help: false,
            searching: false,
            list: ListView::new(),
            projects: Vec::new(),
            last_refresh: None,
            auth_form: AuthForm::new(),
            project_dialog: None,
            task_dialog: None,
            form: None,
            table_layout: TableLayout::default(),
            backend,
            auth,
            cache: QueryCache::new(),
            guard: Some(guard),
            auth_listener: None,
            return_to: Mode::Timesheet,
            needs_session_check: true,
            needs_refresh: false,
            persist,
            toast: None,
        }
    }

    pub fn user_email(&self) -> Option<&str> {
        self.auth.email()
    }

    pub fn project_filter_label(&self) -> &str {
        self.list
            .project_filter()
            .and_then(|id| self.projects.iter().find(|project| project.id == id))
            .map(|project| project.name.as_str())
            .unwrap_or("All Projects")
    }

    /// Runs the work queued by input and auth events: settled searches,
    /// session checks and list refreshes.
    pub fn tick(&mut self, now: Instant) {
        if self.list.tick(now) {
            let outcome = self.list.commit_edit();
            self.apply_edit(outcome);
            self.needs_refresh = true;
        }
        self.poll_auth_events();
        if self.needs_session_check {
            self.check_session();
        }
        if self.needs_refresh && self.mode.is_protected() {
            self.refresh_data();
        }
    }

    pub fn check_session(&mut self) {
        self.needs_session_check = false;
        let lookup = self.lookup_session();
        let Some(guard) = self.guard.as_mut() else {
            return;
        };
        guard.resolve(lookup);
        match guard.state() {
            GuardState::Authenticated => self.open_view(self.return_to),
            GuardState::Unauthenticated => self.redirect_to_auth(self.return_to),
            GuardState::Resolving => {}
        }
    }

    fn lookup_session(&mut self) -> Result<Option<Session>, BackendError> {
        let session = self.auth.get_session(&mut self.backend, Utc::now())?;
        if let Some(session) = &session {
            self.backend.get_user(&session.access_token)?;
        }
        Ok(session)
    }

    fn poll_auth_events(&mut self) {
        if let Some(guard) = self.guard.as_mut() {
            if guard.poll_events() && guard.state() == GuardState::Unauthenticated {
                let from = if self.mode.is_protected() {
                    self.mode
                } else {
                    self.return_to
                };
                self.redirect_to_auth(from);
            }
        }

        let signed_in = self.auth_listener.as_ref().is_some_and(|listener| {
            let mut signed_in = false;
            while let Some(event) = listener.try_next() {
                signed_in |= event == AuthEvent::SignedIn;
            }
            signed_in
        });
        if signed_in {
            self.enter_protected();
        }
    }

    fn redirect_to_auth(&mut self, from: Mode) {
        info!(?from, "redirecting to sign-in");
        if let Some(mut guard) = self.guard.take() {
            guard.unmount();
        }
        self.return_to = from;
        self.cache.clear();
        self.list.clear_rows();
        self.projects.clear();
        self.last_refresh = None;
        self.needs_refresh = false;
        self.searching = false;
        self.auth_form.password.clear();
        self.auth_form.focus = AuthField::Email;
        self.mode = Mode::Auth;
        self.auth_listener = Some(self.auth.events().subscribe());
    }

    fn enter_protected(&mut self) {
        self.auth_listener = None;
        self.guard = Some(SessionGuard::mount(self.auth.events()));
        self.needs_session_check = true;
        self.mode = Mode::Loading;
    }

    fn open_view(&mut self, mode: Mode) {
        self.return_to = Mode::Timesheet;
        self.mode = Mode::Timesheet;
        self.needs_refresh = true;
        match mode {
            Mode::ProjectDialog => self.open_projects(),
            Mode::TaskDialog => self.open_tasks(),
            Mode::EntryForm if self.form.is_some() => self.mode = Mode::EntryForm,
            _ => {}
        }
    }

    fn current_user_id(&mut self) -> Option<String> {
        match self.auth.get_session(&mut self.backend, Utc::now()) {
            Ok(session) => session.map(|session| session.user.id),
            Err(err) => {
                warn!(%err, "session lookup failed");
                None
            }
        }
    }

    pub fn refresh_data(&mut self) {
        self.needs_refresh = false;
        if self.current_user_id().is_none() {
            return;
        }

        match self.fetch_projects() {
            Ok(projects) => self.projects = projects,
            Err(err) => self.report("Error loading projects", &err),
        }

        // A clamped page is fetched once more at its new position.
        for _ in 0..2 {
            let key = self.list.key();
            let query = key.query();
            let cache_key = QueryKey::TimeEntries(key);
            match self
                .cache
                .fetch::<TimeEntryRow>(&self.backend, cache_key.clone(), &query)
            {
                Ok(fetched) => {
                    self.last_refresh = self.cache.get(&cache_key).map(|cached| cached.fetched_at);
                    if !self.list.apply(fetched) {
                        break;
                    }
                }
                Err(err) => {
                    self.list.clear_rows();
                    self.report("Error loading time entries", &err);
                    break;
                }
            }
        }
    }

    fn reload(&mut self) {
        self.invalidate(&[KeyFamily::Projects, KeyFamily::Tasks, KeyFamily::TimeEntries]);
    }

    fn invalidate(&mut self, families: &[KeyFamily]) {
        for family in families {
            self.cache.invalidate(*family);
        }
        self.needs_refresh = true;
    }

    fn fetch_projects(&mut self) -> Result<Vec<Project>, BackendError> {
        let query = Query::new(Table::Projects).order("name", SortDirection::Ascending);
        self.cache
            .fetch::<Project>(&self.backend, QueryKey::Projects, &query)
            .map(|fetched| fetched.rows)
    }

    fn fetch_task_rows(&mut self) -> Result<Vec<TaskRow>, BackendError> {
        let query = Query::new(Table::Tasks)
            .select("*, project:projects(name)")
            .order("name", SortDirection::Ascending);
        self.cache
            .fetch::<TaskRow>(&self.backend, QueryKey::Tasks, &query)
            .map(|fetched| fetched.rows)
    }

    fn fetch_tasks_for(&mut self, project_id: &str) -> Result<Vec<Task>, BackendError> {
        let query = Query::new(Table::Tasks)
            .eq("project_id", project_id)
            .order("name", SortDirection::Ascending);
        self.cache
            .fetch::<Task>(&self.backend, QueryKey::TasksFor(project_id.to_string()), &query)
            .map(|fetched| fetched.rows)
    }

    fn report(&mut self, context: &str, err: &BackendError) {
        warn!(%err, "{context}");
        self.set_toast(format!("{context}: {err}"), true);
    }

    pub fn handle_key_event(&mut self, key: KeyEvent, now: Instant) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        if self.show_help {
            match key.code {
                KeyCode::Char('h') | KeyCode::Esc => self.show_help = false,
                KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            }
            return;
        }

        match self.mode {
            Mode::Loading => {
                if key.code == KeyCode::Char('q') {
                    self.should_quit = true;
                }
            }
            Mode::Auth => self.handle_auth_input(key),
            Mode::Timesheet => self.handle_timesheet_input(key, now),
            Mode::ProjectDialog => self.handle_project_dialog_input(key),
            Mode::TaskDialog => self.handle_task_dialog_input(key),
            Mode::EntryForm => self.handle_form_input(key),
        }
    }

    pub fn handle_mouse_event(&mut self, mouse: MouseEvent) {
        if self.mode != Mode::Timesheet || self.show_help {
            return;
        }
        if !matches!(mouse.kind, MouseEventKind::Down(MouseButton::Left)) {
            return;
        }
        match self.table_layout.hit(mouse.column, mouse.row) {
            Some(TableHit::Header(column)) => {
                let outcome = self.list.commit_edit();
                self.apply_edit(outcome);
                self.list.toggle_sort(column);
                self.needs_refresh = true;
            }
            Some(TableHit::Cell(row, column)) => {
                self.searching = false;
                let outcome = self.list.select_cell(row, column);
                self.apply_edit(outcome);
                self.begin_cell_edit();
            }
            None => {}
        }
    }

    fn handle_auth_input(&mut self, key: KeyEvent) {
        let form = &mut self.auth_form;
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                form.focus = match form.focus {
                    AuthField::Email => AuthField::Password,
                    AuthField::Password => AuthField::Email,
                };
            }
            KeyCode::Char('t') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                form.mode = match form.mode {
                    AuthMode::SignIn => AuthMode::SignUp,
                    AuthMode::SignUp => AuthMode::SignIn,
                };
                form.status = None;
            }
            KeyCode::Enter => self.submit_auth(),
            KeyCode::Backspace => {
                form.focused_mut().pop();
            }
            KeyCode::Char(ch) => {
                if !ch.is_control() {
                    form.focused_mut().push(ch);
                }
            }
            _ => {}
        }
    }

    fn submit_auth(&mut self) {
        let email = self.auth_form.email.trim().to_string();
        let password = self.auth_form.password.clone();
        if email.is_empty() || password.is_empty() {
            self.auth_form.status = Some("Email and password are required.".to_string());
            return;
        }

        let result = match self.auth_form.mode {
            AuthMode::SignIn => self
                .auth
                .sign_in(&mut self.backend, &email, &password)
                .map(|()| true),
            AuthMode::SignUp => self.auth.sign_up(&mut self.backend, &email, &password),
        };

        match result {
            Ok(true) => {
                self.auth_form.password.clear();
                self.auth_form.status = None;
                self.poll_auth_events();
            }
            Ok(false) => {
                self.auth_form.status =
                    Some("Check your email to confirm your account.".to_string());
            }
            Err(err) => {
                warn!(%err, "authentication failed");
                self.auth_form.status = Some(err.to_string());
            }
        }
    }

    fn sign_out(&mut self) {
        self.list.cancel_edit();
        self.auth.sign_out(&mut self.backend);
        self.poll_auth_events();
    }

    fn handle_timesheet_input(&mut self, key: KeyEvent, now: Instant) {
        if self.searching {
            self.handle_search_input(key, now);
            return;
        }
        if self.list.editing().is_some() {
            self.handle_cell_input(key);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('h') => self.show_help = true,
            KeyCode::Char('r') => self.reload(),
            KeyCode::Char('/') => self.searching = true,
            KeyCode::Char('f') => self.cycle_project_filter(1),
            KeyCode::Char('F') => self.cycle_project_filter(-1),
            KeyCode::Char('s') => {
                let (_, column) = self.list.cursor();
                self.list.toggle_sort(column);
                self.needs_refresh = true;
            }
            KeyCode::Char(']') | KeyCode::PageDown => {
                if self.list.next_page() {
                    self.needs_refresh = true;
                }
            }
            KeyCode::Char('[') | KeyCode::PageUp => {
                if self.list.previous_page() {
                    self.needs_refresh = true;
                }
            }
            KeyCode::Up => self.move_cursor(-1, 0),
            KeyCode::Down => self.move_cursor(1, 0),
            KeyCode::Left | KeyCode::BackTab => self.move_cursor(0, -1),
            KeyCode::Right | KeyCode::Tab => self.move_cursor(0, 1),
            KeyCode::Enter => self.begin_cell_edit(),
            KeyCode::Char('n') => self.open_entry_form(None),
            KeyCode::Char('e') => {
                let entry = self.list.current_row().map(|row| row.entry.clone());
                if let Some(entry) = entry {
                    self.open_entry_form(Some(entry));
                }
            }
            KeyCode::Char('x') | KeyCode::Delete => self.delete_current_entry(),
            KeyCode::Char('p') => self.open_projects(),
            KeyCode::Char('t') => self.open_tasks(),
            KeyCode::Char('c') => self.cycle_theme(),
            KeyCode::Char('o') => self.sign_out(),
            _ => {}
        }
    }

    fn handle_search_input(&mut self, key: KeyEvent, now: Instant) {
        match key.code {
            KeyCode::Esc => {
                self.list.clear_search(now);
                self.searching = false;
            }
            KeyCode::Enter | KeyCode::Tab | KeyCode::Down => self.searching = false,
            KeyCode::Backspace => self.list.pop_search_char(now),
            KeyCode::Char(ch) => {
                if !ch.is_control() {
                    self.list.push_search_char(ch, now);
                }
            }
            _ => {}
        }
    }

    fn handle_cell_input(&mut self, key: KeyEvent) {
        let is_choice = matches!(
            self.list.editing().map(|edit| &edit.buffer),
            Some(CellBuffer::Choice { .. })
        );
        match key.code {
            KeyCode::Esc => self.list.cancel_edit(),
            KeyCode::Enter => {
                let outcome = self.list.commit_edit();
                self.apply_edit(outcome);
            }
            KeyCode::Tab => self.move_cursor(0, 1),
            KeyCode::BackTab => self.move_cursor(0, -1),
            KeyCode::Up | KeyCode::Left if is_choice => self.list.edit_cycle(-1),
            KeyCode::Down | KeyCode::Right if is_choice => self.list.edit_cycle(1),
            KeyCode::Up => self.move_cursor(-1, 0),
            KeyCode::Down => self.move_cursor(1, 0),
            KeyCode::Backspace => self.list.edit_pop(),
            KeyCode::Char(ch) => {
                if !ch.is_control() {
                    self.list.edit_push(ch);
                }
            }
            _ => {}
        }
    }

    fn move_cursor(&mut self, rows: isize, columns: isize) {
        let outcome = self.list.move_cursor(rows, columns);
        self.apply_edit(outcome);
    }

    fn begin_cell_edit(&mut self) {
        let (_, column) = self.list.cursor();
        let current_project = self
            .list
            .current_row()
            .and_then(|row| row.entry.project_id.clone());

        let options = match column {
            Column::Project => {
                let mut options = Vec::new();
                if current_project.is_none() {
                    options.push(Choice {
                        id: None,
                        label: "Select project".to_string(),
                    });
                }
                options.extend(self.projects.iter().map(|project| Choice {
                    id: Some(project.id.clone()),
                    label: project.name.clone(),
                }));
                options
            }
            Column::Task => {
                let mut options = vec![Choice {
                    id: None,
                    label: "No task".to_string(),
                }];
                if let Some(project_id) = current_project {
                    match self.fetch_tasks_for(&project_id) {
                        Ok(tasks) => options.extend(tasks.into_iter().map(|task| Choice {
                            id: Some(task.id),
                            label: task.name,
                        })),
                        Err(err) => {
                            self.set_toast(err.to_string(), true);
                            return;
                        }
                    }
                }
                options
            }
            _ => Vec::new(),
        };

        let outcome = self.list.begin_edit(options);
        self.apply_edit(outcome);
    }

    /// Sends a committed cell. Failures leave the row as it was.
    fn apply_edit(&mut self, outcome: Option<EditOutcome>) {
        match outcome {
            Some(EditOutcome::Update(update)) => {
                match self
                    .backend
                    .update(Table::TimeEntries, &update.entry_id, &update.patch)
                {
                    Ok(()) => {
                        info!(entry = %update.entry_id, column = ?update.column, "time entry updated");
                        self.invalidate(&[KeyFamily::TimeEntries]);
                        self.set_toast("Time entry updated successfully", false);
                    }
                    Err(err) => {
                        warn!(%err, entry = %update.entry_id, "time entry update failed");
                        self.set_toast(err.to_string(), true);
                    }
                }
            }
            Some(EditOutcome::Invalid(message)) => self.set_toast(message, true),
            Some(EditOutcome::Unchanged) | None => {}
        }
    }

    fn cycle_project_filter(&mut self, delta: isize) {
        let mut options: Vec<Option<&str>> = vec![None];
        options.extend(self.projects.iter().map(|project| Some(project.id.as_str())));
        let current = self.list.project_filter();
        let index = options
            .iter()
            .position(|option| *option == current)
            .unwrap_or(0) as isize;
        let next = options[(index + delta).rem_euclid(options.len() as isize) as usize]
            .map(str::to_string);
        if self.list.set_project_filter(next) {
            self.needs_refresh = true;
        }
    }

    fn cycle_theme(&mut self) {
        self.theme = self.theme.next();
        if self.persist {
            if let Err(err) = storage::write_theme(self.theme) {
                warn!(%err, "failed to save theme");
            }
        }
    }

    fn delete_current_entry(&mut self) {
        let Some(id) = self.list.current_row().map(|row| row.entry.id.clone()) else {
            return;
        };
        self.list.cancel_edit();
        match self.backend.delete(Table::TimeEntries, &id) {
            Ok(()) => {
                info!(entry = %id, "time entry deleted");
                self.invalidate(&[KeyFamily::TimeEntries]);
                self.set_toast("Time entry deleted successfully", false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn open_projects(&mut self) {
        match self.fetch_projects() {
            Ok(projects) => {
                self.project_dialog = Some(ProjectDialog::new(projects));
                self.mode = Mode::ProjectDialog;
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn open_tasks(&mut self) {
        let loaded = self.fetch_task_rows().and_then(|tasks| {
            self.fetch_projects()
                .map(|projects| (tasks, projects))
        });
        match loaded {
            Ok((tasks, projects)) => {
                self.task_dialog = Some(TaskDialog::new(tasks, projects));
                self.mode = Mode::TaskDialog;
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn close_dialog(&mut self) {
        self.project_dialog = None;
        self.task_dialog = None;
        self.mode = Mode::Timesheet;
    }

    fn handle_project_dialog_input(&mut self, key: KeyEvent) {
        let Some(dialog) = self.project_dialog.as_mut() else {
            self.mode = Mode::Timesheet;
            return;
        };
        match (dialog.focus, key.code) {
            (_, KeyCode::Esc) => {
                if dialog.is_editing() {
                    dialog.reset();
                } else {
                    self.close_dialog();
                }
            }
            (_, KeyCode::Tab) => dialog.next_focus(),
            (DialogFocus::List, KeyCode::Up) => dialog.move_selection(-1),
            (DialogFocus::List, KeyCode::Down) => dialog.move_selection(1),
            (DialogFocus::List, KeyCode::Enter | KeyCode::Char('e')) => dialog.edit_selected(),
            (DialogFocus::List, KeyCode::Char('d') | KeyCode::Delete) => {
                self.delete_selected_project()
            }
            (_, KeyCode::Enter) => self.submit_project(),
            (_, KeyCode::Backspace) => {
                if let Some(text) = dialog.focused_text_mut() {
                    text.pop();
                }
            }
            (_, KeyCode::Char(ch)) if !ch.is_control() => {
                if let Some(text) = dialog.focused_text_mut() {
                    text.push(ch);
                }
            }
            _ => {}
        }
    }

    fn submit_project(&mut self) {
        let Some(dialog) = &self.project_dialog else {
            return;
        };
        let submission = match dialog.submission() {
            Ok(submission) => submission,
            Err(message) => {
                self.set_toast(message, true);
                return;
            }
        };

        let result = match &submission {
            Submission::Create(draft) => encode_row(draft)
                .and_then(|row| self.backend.insert(Table::Projects, &row))
                .map(|_| "Project created successfully"),
            Submission::Update { id, draft } => encode_row(draft)
                .and_then(|row| self.backend.update(Table::Projects, id, &row))
                .map(|()| "Project updated successfully"),
        };

        match result {
            Ok(message) => {
                info!("{message}");
                self.invalidate(&[KeyFamily::Projects, KeyFamily::Tasks, KeyFamily::TimeEntries]);
                self.reload_project_dialog();
                if let Some(dialog) = self.project_dialog.as_mut() {
                    dialog.reset();
                }
                self.set_toast(message, false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn delete_selected_project(&mut self) {
        let Some(id) = self
            .project_dialog
            .as_ref()
            .and_then(|dialog| dialog.selected())
            .map(|project| project.id.clone())
        else {
            return;
        };
        match self.backend.delete(Table::Projects, &id) {
            Ok(()) => {
                info!(project = %id, "project deleted");
                self.invalidate(&[KeyFamily::Projects, KeyFamily::Tasks, KeyFamily::TimeEntries]);
                self.reload_project_dialog();
                self.set_toast("Project deleted successfully", false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn reload_project_dialog(&mut self) {
        match self.fetch_projects() {
            Ok(projects) => {
                if let Some(dialog) = self.project_dialog.as_mut() {
                    dialog.set_projects(projects);
                }
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn handle_task_dialog_input(&mut self, key: KeyEvent) {
        let Some(dialog) = self.task_dialog.as_mut() else {
            self.mode = Mode::Timesheet;
            return;
        };
        match (dialog.focus, key.code) {
            (_, KeyCode::Esc) => {
                if dialog.is_editing() {
                    dialog.reset();
                } else {
                    self.close_dialog();
                }
            }
            (_, KeyCode::Tab) => dialog.next_focus(),
            (DialogFocus::Project, KeyCode::Left | KeyCode::Up) => dialog.cycle_project(-1),
            (DialogFocus::Project, KeyCode::Right | KeyCode::Down) => dialog.cycle_project(1),
            (DialogFocus::List, KeyCode::Up) => dialog.move_selection(-1),
            (DialogFocus::List, KeyCode::Down) => dialog.move_selection(1),
            (DialogFocus::List, KeyCode::Enter | KeyCode::Char('e')) => dialog.edit_selected(),
            (DialogFocus::List, KeyCode::Char('d') | KeyCode::Delete) => {
                self.delete_selected_task()
            }
            (_, KeyCode::Enter) => self.submit_task(),
            (_, KeyCode::Backspace) => {
                if let Some(text) = dialog.focused_text_mut() {
                    text.pop();
                }
            }
            (_, KeyCode::Char(ch)) if !ch.is_control() => {
                if let Some(text) = dialog.focused_text_mut() {
                    text.push(ch);
                }
            }
            _ => {}
        }
    }

    fn submit_task(&mut self) {
        let Some(dialog) = &self.task_dialog else {
            return;
        };
        let submission = match dialog.submission() {
            Ok(submission) => submission,
            Err(message) => {
                self.set_toast(message, true);
                return;
            }
        };

        let result = match &submission {
            Submission::Create(draft) => encode_row(draft)
                .and_then(|row| self.backend.insert(Table::Tasks, &row))
                .map(|_| "Task created successfully"),
            Submission::Update { id, draft } => encode_row(draft)
                .and_then(|row| self.backend.update(Table::Tasks, id, &row))
                .map(|()| "Task updated successfully"),
        };

        match result {
            Ok(message) => {
                info!("{message}");
                self.invalidate(&[KeyFamily::Tasks, KeyFamily::TimeEntries]);
                self.reload_task_dialog();
                if let Some(dialog) = self.task_dialog.as_mut() {
                    dialog.reset();
                }
                self.set_toast(message, false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn delete_selected_task(&mut self) {
        let Some(id) = self
            .task_dialog
            .as_ref()
            .and_then(|dialog| dialog.selected())
            .map(|row| row.task.id.clone())
        else {
            return;
        };
        match self.backend.delete(Table::Tasks, &id) {
            Ok(()) => {
                info!(task = %id, "task deleted");
                self.invalidate(&[KeyFamily::Tasks, KeyFamily::TimeEntries]);
                self.reload_task_dialog();
                self.set_toast("Task deleted successfully", false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn reload_task_dialog(&mut self) {
        match self.fetch_task_rows() {
            Ok(tasks) => {
                if let Some(dialog) = self.task_dialog.as_mut() {
                    dialog.set_tasks(tasks);
                }
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn open_entry_form(&mut self, entry: Option<TimeEntry>) {
        let projects = match self.fetch_projects() {
            Ok(projects) => projects,
            Err(err) => {
                self.set_toast(err.to_string(), true);
                return;
            }
        };
        self.form = Some(match &entry {
            Some(entry) => TimeEntryForm::from_entry(entry, projects),
            None => TimeEntryForm::new(projects),
        });
        self.mode = Mode::EntryForm;
        self.load_form_tasks();
    }

    /// Fetches the task options for the form's project when they are missing.
    fn load_form_tasks(&mut self) {
        let Some(project_id) = self
            .form
            .as_ref()
            .and_then(|form| form.pending_task_query())
            .map(str::to_string)
        else {
            return;
        };
        match self.fetch_tasks_for(&project_id) {
            Ok(tasks) => {
                if let Some(form) = self.form.as_mut() {
                    form.set_task_options(&project_id, tasks);
                }
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn handle_form_input(&mut self, key: KeyEvent) {
        let Some(form) = self.form.as_mut() else {
            self.mode = Mode::Timesheet;
            return;
        };
        match key.code {
            KeyCode::Esc => {
                self.form = None;
                self.mode = Mode::Timesheet;
                return;
            }
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.previous_field(),
            KeyCode::Left => form.cycle(-1),
            KeyCode::Right => form.cycle(1),
            KeyCode::Enter => {
                self.submit_entry_form();
                return;
            }
            KeyCode::Backspace => form.pop_char(),
            KeyCode::Char(ch) => {
                if !ch.is_control() {
                    form.push_char(ch);
                }
            }
            _ => {}
        }
        self.load_form_tasks();
    }

    fn submit_entry_form(&mut self) {
        let Some(form) = &self.form else {
            return;
        };
        let payload = match form.payload() {
            Ok(payload) => payload,
            Err(message) => {
                self.set_toast(message, true);
                return;
            }
        };
        let editing = form.editing_id().map(str::to_string);
        let Some(user_id) = self.current_user_id() else {
            self.set_toast("You must be logged in to create a time entry", true);
            return;
        };

        let result = match editing {
            Some(id) => encode_row(&payload)
                .and_then(|row| self.backend.update(Table::TimeEntries, &id, &row))
                .map(|()| "Time entry updated successfully"),
            None => {
                let entry = NewTimeEntry {
                    user_id,
                    fields: payload,
                };
                encode_row(&entry)
                    .and_then(|row| self.backend.insert(Table::TimeEntries, &row))
                    .map(|_| "Time entry created successfully")
            }
        };

        match result {
            Ok(message) => {
                info!("{message}");
                self.invalidate(&[KeyFamily::TimeEntries]);
                self.form = None;
                self.mode = Mode::Timesheet;
                self.set_toast(message, false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    pub fn active_toast(&mut self) -> Option<ToastView> {
        let toast = self.toast.as_ref()?;
        if toast.created_at.elapsed() > TOAST_TTL {
            self.toast = None;
            return None;
        }
        Some(ToastView {
            message: toast.message.clone(),
            is_error: toast.is_error,
        })
    }

    fn set_toast(&mut self, message: impl Into<String>, is_error: bool) {
        self.toast = Some(Toast {
            message: message.into(),
            created_at: Instant::now(),
            is_error,
        });
    }
}

struct Toast {
    message: String,
    created_at: Instant,
    is_error: bool,
}

pub struct ToastView {
    pub message: String,
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, MemoryBackend, USER_ID};
    use serde_json::{Value, json};

    fn press(app: &mut App<MemoryBackend>, code: KeyCode) {
        app.handle_key_event(KeyEvent::new(code, KeyModifiers::NONE), Instant::now());
    }

    fn type_text(app: &mut App<MemoryBackend>, text: &str) {
        for ch in text.chars() {
            press(app, KeyCode::Char(ch));
        }
    }

    fn toast(app: &mut App<MemoryBackend>) -> Option<String> {
        app.active_toast().map(|toast| toast.message)
    }

    fn signed_in_app() -> App<MemoryBackend> {
        let mut app = App::new(MemoryBackend::new(), None, ThemePreference::Terminal, false);
        app.tick(Instant::now());
        assert_eq!(app.mode, Mode::Auth);

        type_text(&mut app, "me@example.com");
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "hunter22");
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.mode, Mode::Loading);

        app.tick(Instant::now());
        assert_eq!(app.mode, Mode::Timesheet);
        app
    }

    fn seed_project(app: &App<MemoryBackend>, name: &str) -> String {
        let row = app
            .backend
            .insert(Table::Projects, &json!({ "name": name }))
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    fn seed_entry(app: &App<MemoryBackend>, project_id: &str, task_id: Value, hour: u32) -> String {
        let row = app
            .backend
            .insert(
                Table::TimeEntries,
                &json!({
                    "user_id": USER_ID,
                    "project_id": project_id,
                    "task_id": task_id,
                    "description": format!("Entry {hour}"),
                    "start_time": format!("2024-01-01T{hour:02}:00:00Z"),
                    "end_time": null,
                    "invoice_number": null,
                }),
            )
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn created_entry_appears_with_names_and_duration() {
        let mut app = signed_in_app();

        press(&mut app, KeyCode::Char('p'));
        assert_eq!(app.mode, Mode::ProjectDialog);
        type_text(&mut app, "Acme");
        press(&mut app, KeyCode::Enter);
        assert_eq!(toast(&mut app).as_deref(), Some("Project created successfully"));
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.mode, Mode::Timesheet);

        press(&mut app, KeyCode::Char('t'));
        assert_eq!(app.mode, Mode::TaskDialog);
        type_text(&mut app, "Build");
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Enter);
        assert_eq!(toast(&mut app).as_deref(), Some("Task created successfully"));
        press(&mut app, KeyCode::Esc);

        press(&mut app, KeyCode::Char('n'));
        assert_eq!(app.mode, Mode::EntryForm);
        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Right);
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "Kickoff");
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "2024-01-01T09:00");
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "2024-01-01T10:00");
        press(&mut app, KeyCode::Enter);
        assert_eq!(toast(&mut app).as_deref(), Some("Time entry created successfully"));
        assert_eq!(app.mode, Mode::Timesheet);

        app.tick(Instant::now());
        let rows = app.list.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.duration, Some(3600));
        assert_eq!(rows[0].entry.user_id, USER_ID);
        assert_eq!(rows[0].project_name(), "Acme");
        assert_eq!(rows[0].task_name(), "Build");
        assert_eq!(rows[0].entry.description.as_deref(), Some("Kickoff"));
    }

    #[test]
    fn signed_out_create_issues_no_insert() {
        let mut app = App::new(MemoryBackend::new(), None, ThemePreference::Terminal, false);
        seed_project(&app, "Acme");

        app.open_entry_form(None);
        press(&mut app, KeyCode::Right);
        if let Some(form) = app.form.as_mut() {
            form.start_time = "2024-01-01T09:00".to_string();
        }
        app.submit_entry_form();

        assert_eq!(
            toast(&mut app).as_deref(),
            Some("You must be logged in to create a time entry")
        );
        let inserted = app
            .backend
            .calls()
            .into_iter()
            .any(|call| matches!(call, Call::Insert(Table::TimeEntries, _)));
        assert!(!inserted);
    }

    #[test]
    fn rapid_search_keystrokes_issue_one_query() {
        let mut app = signed_in_app();
        let before = app.backend.select_count(Table::TimeEntries);
        let start = Instant::now();

        press(&mut app, KeyCode::Char('/'));
        for (i, ch) in "abc".chars().enumerate() {
            let at = start + Duration::from_millis(i as u64 * 100);
            app.handle_key_event(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE), at);
            app.tick(at + Duration::from_millis(50));
        }
        assert_eq!(app.backend.select_count(Table::TimeEntries), before);

        app.tick(start + Duration::from_millis(500));
        assert_eq!(app.backend.select_count(Table::TimeEntries), before + 1);
        assert_eq!(app.list.key().search, "abc");

        app.tick(start + Duration::from_millis(1_000));
        assert_eq!(app.backend.select_count(Table::TimeEntries), before + 1);
    }

    #[test]
    fn next_on_last_page_is_a_no_op() {
        let mut app = signed_in_app();
        let project = seed_project(&app, "Acme");
        for hour in 0..12 {
            seed_entry(&app, &project, Value::Null, hour);
        }
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());
        assert_eq!(app.list.pagination().total_pages(), 2);

        press(&mut app, KeyCode::Char(']'));
        app.tick(Instant::now());
        assert_eq!(app.list.pagination().page(), 2);
        assert_eq!(app.list.rows().len(), 2);

        let before = app.backend.select_count(Table::TimeEntries);
        press(&mut app, KeyCode::Char(']'));
        app.tick(Instant::now());
        assert_eq!(app.list.pagination().page(), 2);
        assert_eq!(app.backend.select_count(Table::TimeEntries), before);
    }

    #[test]
    fn project_cell_edit_clears_task_in_same_update() {
        let mut app = signed_in_app();
        let acme = seed_project(&app, "Acme");
        let globex = seed_project(&app, "Globex");
        let task = app
            .backend
            .insert(Table::Tasks, &json!({ "name": "Build", "project_id": acme }))
            .unwrap();
        let entry = seed_entry(&app, &acme, task["id"].clone(), 9);
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());

        press(&mut app, KeyCode::Left);
        press(&mut app, KeyCode::Left);
        assert_eq!(app.list.cursor(), (0, Column::Project));
        press(&mut app, KeyCode::Enter);
        assert!(app.list.editing().is_some());
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Enter);

        let update = app
            .backend
            .calls()
            .into_iter()
            .find(|call| matches!(call, Call::Update { .. }));
        assert_eq!(
            update,
            Some(Call::Update {
                table: Table::TimeEntries,
                id: entry,
                patch: json!({ "project_id": globex, "task_id": null }),
            })
        );
        assert!(app.list.editing().is_none());
    }

    #[test]
    fn switching_cells_commits_open_edit() {
        let mut app = signed_in_app();
        let acme = seed_project(&app, "Acme");
        let entry = seed_entry(&app, &acme, Value::Null, 9);
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());

        press(&mut app, KeyCode::Enter);
        type_text(&mut app, " notes");
        press(&mut app, KeyCode::Tab);

        let calls = app.backend.calls();
        assert!(calls.contains(&Call::Update {
            table: Table::TimeEntries,
            id: entry,
            patch: json!({ "description": "Entry 9 notes" }),
        }));
    }

    #[test]
    fn failed_list_query_degrades_to_empty_page() {
        let mut app = signed_in_app();
        app.invalidate(&[KeyFamily::TimeEntries]);
        app.backend.fail_next("permission denied");
        app.tick(Instant::now());

        assert!(app.list.rows().is_empty());
        assert_eq!(
            toast(&mut app).as_deref(),
            Some("Error loading time entries: permission denied")
        );
    }

    #[test]
    fn sign_in_returns_to_interrupted_view() {
        let mut app = signed_in_app();
        press(&mut app, KeyCode::Char('p'));
        assert_eq!(app.mode, Mode::ProjectDialog);

        app.auth.sign_out(&mut app.backend);
        app.tick(Instant::now());
        assert_eq!(app.mode, Mode::Auth);
        assert!(app.list.rows().is_empty());

        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "hunter22");
        press(&mut app, KeyCode::Enter);
        app.tick(Instant::now());
        assert_eq!(app.mode, Mode::ProjectDialog);
    }

    #[test]
    fn sign_out_key_redirects_to_auth() {
        let mut app = signed_in_app();
        press(&mut app, KeyCode::Char('o'));
        assert_eq!(app.mode, Mode::Auth);
        assert!(app.user_email().is_none());
    }

    #[test]
    fn project_filter_cycles_through_all_projects() {
        let mut app = signed_in_app();
        seed_project(&app, "Acme");
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());

        assert_eq!(app.project_filter_label(), "All Projects");
        press(&mut app, KeyCode::Char('f'));
        assert_eq!(app.project_filter_label(), "Acme");
        press(&mut app, KeyCode::Char('f'));
        assert_eq!(app.project_filter_label(), "All Projects");
    }

    #[test]
    fn header_click_toggles_sort() {
        let mut app = signed_in_app();
        app.table_layout = TableLayout {
            header_y: 5,
            first_row_y: 6,
            scroll: 0,
            rows: 0,
            columns: vec![(Column::Project, 0, 10), (Column::Description, 11, 20)],
        };
        let click = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 15,
            row: 5,
            modifiers: KeyModifiers::NONE,
        };
        app.handle_mouse_event(click);
        assert_eq!(app.list.sort().column, Column::Description);
        assert_eq!(app.list.sort().direction, SortDirection::Ascending);
    }

    #[test]
    fn signed_out_edit_issues_no_update() {
        let mut app = App::new(MemoryBackend::new(), None, ThemePreference::Terminal, false);
        let project = seed_project(&app, "Acme");
        seed_entry(&app, &project, Value::Null, 9);
        let stored = app.backend.rows(Table::TimeEntries).remove(0);
        let entry: TimeEntry = serde_json::from_value(stored).unwrap();

        app.open_entry_form(Some(entry));
        assert_eq!(app.mode, Mode::EntryForm);
        app.submit_entry_form();

        assert_eq!(
            toast(&mut app).as_deref(),
            Some("You must be logged in to create a time entry")
        );
        let updated = app
            .backend
            .calls()
            .into_iter()
            .any(|call| matches!(call, Call::Update { .. }));
        assert!(!updated);
        assert_eq!(app.mode, Mode::EntryForm);
    }

    #[test]
    fn header_click_commits_open_edit() {
        let mut app = signed_in_app();
        let acme = seed_project(&app, "Acme");
        let mut latest = String::new();
        for hour in 0..12 {
            latest = seed_entry(&app, &acme, Value::Null, hour);
        }
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());
        assert_eq!(app.list.rows()[0].entry.id, latest);

        press(&mut app, KeyCode::Enter);
        type_text(&mut app, " edited");
        app.table_layout = TableLayout {
            header_y: 5,
            first_row_y: 6,
            scroll: 0,
            rows: 10,
            columns: vec![(Column::Description, 0, 20), (Column::StartTime, 21, 18)],
        };
        app.handle_mouse_event(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 25,
            row: 5,
            modifiers: KeyModifiers::NONE,
        });
        app.tick(Instant::now());

        assert!(app.list.editing().is_none());
        assert!(app.backend.calls().contains(&Call::Update {
            table: Table::TimeEntries,
            id: latest.clone(),
            patch: json!({ "description": "Entry 11 edited" }),
        }));
        assert_eq!(app.list.sort().direction, SortDirection::Ascending);
        assert!(app.list.rows().iter().all(|row| row.entry.id != latest));
    }

    #[test]
    fn failed_cell_update_keeps_row_and_reports() {
        let mut app = signed_in_app();
        let acme = seed_project(&app, "Acme");
        seed_entry(&app, &acme, Value::Null, 9);
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());

        press(&mut app, KeyCode::Enter);
        type_text(&mut app, " notes");
        app.backend.fail_next("new row violates row-level security policy");
        press(&mut app, KeyCode::Enter);

        assert_eq!(
            toast(&mut app).as_deref(),
            Some("new row violates row-level security policy")
        );
        assert!(app.list.editing().is_none());
        assert_eq!(
            app.list.rows()[0].entry.description.as_deref(),
            Some("Entry 9")
        );
        assert_eq!(
            app.backend.rows(Table::TimeEntries)[0]["description"],
            json!("Entry 9")
        );
    }

    #[test]
    fn failed_project_submit_shows_backend_message() {
        let mut app = signed_in_app();
        press(&mut app, KeyCode::Char('p'));
        type_text(&mut app, "Acme");
        app.backend
            .fail_next("duplicate key value violates unique constraint");
        press(&mut app, KeyCode::Enter);

        assert_eq!(
            toast(&mut app).as_deref(),
            Some("duplicate key value violates unique constraint")
        );
        assert_eq!(app.mode, Mode::ProjectDialog);
        assert!(app.backend.rows(Table::Projects).is_empty());
        assert_eq!(
            app.project_dialog.as_ref().map(|dialog| dialog.name.as_str()),
            Some("Acme")
        );
    }

    #[test]
    fn failed_task_delete_shows_backend_message() {
        let mut app = signed_in_app();
        let acme = seed_project(&app, "Acme");
        app.backend
            .insert(Table::Tasks, &json!({ "name": "Build", "project_id": acme }))
            .unwrap();

        press(&mut app, KeyCode::Char('t'));
        assert_eq!(app.mode, Mode::TaskDialog);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Tab);
        app.backend.fail_next("violates foreign key constraint");
        press(&mut app, KeyCode::Char('d'));

        assert_eq!(
            toast(&mut app).as_deref(),
            Some("violates foreign key constraint")
        );
        assert_eq!(app.backend.rows(Table::Tasks).len(), 1);
        assert_eq!(app.task_dialog.as_ref().map(|dialog| dialog.tasks.len()), Some(1));
    }

    #[test]
    fn failed_session_lookup_redirects_to_auth() {
        let session = Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: i64::MAX,
            user: crate::models::User {
                id: USER_ID.to_string(),
                email: Some("me@example.com".to_string()),
            },
        };
        let mut app = App::new(
            MemoryBackend::new(),
            Some(session),
            ThemePreference::Terminal,
            false,
        );
        app.backend.fail_next("invalid JWT");
        app.tick(Instant::now());

        assert_eq!(app.mode, Mode::Auth);
        assert!(app.list.rows().is_empty());
        assert_eq!(app.backend.select_count(Table::TimeEntries), 0);
    }

    #[test]
    fn click_on_scrolled_table_selects_underlying_row() {
        let mut app = signed_in_app();
        let acme = seed_project(&app, "Acme");
        for hour in 0..6 {
            seed_entry(&app, &acme, Value::Null, hour);
        }
        press(&mut app, KeyCode::Char('r'));
        app.tick(Instant::now());

        app.table_layout = TableLayout {
            header_y: 5,
            first_row_y: 6,
            scroll: 3,
            rows: 3,
            columns: vec![(Column::InvoiceNumber, 0, 12)],
        };
        app.handle_mouse_event(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 2,
            row: 7,
            modifiers: KeyModifiers::NONE,
        });

        assert_eq!(app.list.cursor(), (4, Column::InvoiceNumber));
        let editing = app.list.editing().map(|edit| edit.entry_id.clone());
        assert_eq!(editing, Some(app.list.rows()[4].entry.id.clone()));
    }
}
