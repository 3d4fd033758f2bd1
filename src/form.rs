use crate::dates::{parse_local_input, to_local_input, to_rfc3339};
use crate::models::{Project, Task, TimeEntry, TimeEntryPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Project,
    Task,
    Description,
    StartTime,
    EndTime,
    InvoiceNumber,
}

impl FormField {
    pub const ALL: [FormField; 6] = [
        FormField::Project,
        FormField::Task,
        FormField::Description,
        FormField::StartTime,
        FormField::EndTime,
        FormField::InvoiceNumber,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::Project => "Project",
            FormField::Task => "Task",
            FormField::Description => "Description",
            FormField::StartTime => "Start Time",
            FormField::EndTime => "End Time",
            FormField::InvoiceNumber => "Invoice Number",
        }
    }

    fn is_text(self) -> bool {
        !matches!(self, FormField::Project | FormField::Task)
    }
}

/// Create/edit form for a single time entry.
#[derive(Debug, Clone)]
pub struct TimeEntryForm {
    editing: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub invoice_number: String,
    pub focus: FormField,
    projects: Vec<Project>,
    tasks: Vec<Task>,
    tasks_for: Option<String>,
}

impl TimeEntryForm {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            editing: None,
            project_id: None,
            task_id: None,
            description: String::new(),
            start_time: String::new(),
            end_time: String::new(),
            invoice_number: String::new(),
            focus: FormField::Project,
            projects,
            tasks: Vec::new(),
            tasks_for: None,
        }
    }

    /// Populates the form from a stored entry, converting instants back to
    /// local wall-clock input.
    pub fn from_entry(entry: &TimeEntry, projects: Vec<Project>) -> Self {
        Self {
            editing: Some(entry.id.clone()),
            project_id: entry.project_id.clone(),
            task_id: entry.task_id.clone(),
            description: entry.description.clone().unwrap_or_default(),
            start_time: to_local_input(&entry.start_time),
            end_time: entry
                .end_time
                .as_ref()
                .map(to_local_input)
                .unwrap_or_default(),
            invoice_number: entry.invoice_number.clone().unwrap_or_default(),
            focus: FormField::Project,
            projects,
            tasks: Vec::new(),
            tasks_for: None,
        }
    }

    pub fn editing_id(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    pub fn select_project(&mut self, project_id: Option<String>) {
        if self.project_id == project_id {
            return;
        }
        self.project_id = project_id;
        self.task_id = None;
        self.tasks.clear();
        self.tasks_for = None;
    }

    /// The project whose task list still has to be fetched, if any.
    pub fn pending_task_query(&self) -> Option<&str> {
        match &self.project_id {
            Some(project_id) if self.tasks_for.as_ref() != Some(project_id) => {
                Some(project_id.as_str())
            }
            _ => None,
        }
    }

    /// Stores the result of a task query. Results for a project that is no
    /// longer selected are dropped.
    pub fn set_task_options(&mut self, project_id: &str, tasks: Vec<Task>) {
        if self.project_id.as_deref() != Some(project_id) {
            return;
        }
        self.tasks = tasks
            .into_iter()
            .filter(|task| task.project_id == project_id)
            .collect();
        self.tasks_for = Some(project_id.to_string());
        if let Some(task_id) = &self.task_id {
            if !self.tasks.iter().any(|task| &task.id == task_id) {
                self.task_id = None;
            }
        }
    }

    #[cfg(test)]
    pub fn task_options(&self) -> &[Task] {
        if self.project_id.is_none() {
            return &[];
        }
        &self.tasks
    }

    pub fn task_enabled(&self) -> bool {
        self.project_id.is_some()
    }

    pub fn project_name(&self) -> Option<&str> {
        let id = self.project_id.as_ref()?;
        self.projects
            .iter()
            .find(|project| &project.id == id)
            .map(|project| project.name.as_str())
    }

    pub fn task_name(&self) -> Option<&str> {
        let id = self.task_id.as_ref()?;
        self.tasks
            .iter()
            .find(|task| &task.id == id)
            .map(|task| task.name.as_str())
    }

    pub fn next_field(&mut self) {
        let index = FormField::ALL
            .iter()
            .position(|field| *field == self.focus)
            .unwrap_or(0);
        self.focus = FormField::ALL[(index + 1) % FormField::ALL.len()];
    }

    pub fn previous_field(&mut self) {
        let index = FormField::ALL
            .iter()
            .position(|field| *field == self.focus)
            .unwrap_or(0);
        let len = FormField::ALL.len();
        self.focus = FormField::ALL[(index + len - 1) % len];
    }

    pub fn push_char(&mut self, ch: char) {
        if let Some(field) = self.focused_text_mut() {
            field.push(ch);
        }
    }

    pub fn pop_char(&mut self) {
        if let Some(field) = self.focused_text_mut() {
            field.pop();
        }
    }

    fn focused_text_mut(&mut self) -> Option<&mut String> {
        if !self.focus.is_text() {
            return None;
        }
        Some(match self.focus {
            FormField::Description => &mut self.description,
            FormField::StartTime => &mut self.start_time,
            FormField::EndTime => &mut self.end_time,
            _ => &mut self.invoice_number,
        })
    }

    /// Steps the focused picker through its options.
    pub fn cycle(&mut self, delta: isize) {
        match self.focus {
            FormField::Project => {
                let ids: Vec<String> = self.projects.iter().map(|p| p.id.clone()).collect();
                let next = cycle_id(&ids, self.project_id.as_deref(), delta, false);
                self.select_project(next);
            }
            FormField::Task => {
                if !self.task_enabled() {
                    return;
                }
                let ids: Vec<String> = self.tasks.iter().map(|t| t.id.clone()).collect();
                self.task_id = cycle_id(&ids, self.task_id.as_deref(), delta, true);
            }
            _ => {}
        }
    }

    /// Validates the fields and converts local times to UTC instants.
    pub fn payload(&self) -> Result<TimeEntryPayload, String> {
        let project_id = self
            .project_id
            .clone()
            .ok_or_else(|| "Please select a project".to_string())?;
        if self.start_time.trim().is_empty() {
            return Err("Start time is required".to_string());
        }
        let start = parse_local_input(&self.start_time)?;
        let end = if self.end_time.trim().is_empty() {
            None
        } else {
            Some(parse_local_input(&self.end_time)?)
        };
        if end.is_some_and(|end| end < start) {
            return Err("End time cannot be before start time".to_string());
        }

        Ok(TimeEntryPayload {
            project_id,
            task_id: self.task_id.clone(),
            description: non_empty(&self.description),
            start_time: to_rfc3339(&start),
            end_time: end.as_ref().map(to_rfc3339),
            invoice_number: non_empty(&self.invoice_number),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn cycle_id(ids: &[String], current: Option<&str>, delta: isize, allow_none: bool) -> Option<String> {
    let mut slots: Vec<Option<&str>> = Vec::with_capacity(ids.len() + 1);
    if allow_none || current.is_none() {
        slots.push(None);
    }
    slots.extend(ids.iter().map(|id| Some(id.as_str())));
    if slots.is_empty() {
        return None;
    }
    let index = slots.iter().position(|slot| *slot == current).unwrap_or(0) as isize;
    let len = slots.len() as isize;
    let next = (index + delta).rem_euclid(len) as usize;
    slots[next].map(str::to_string)
}
