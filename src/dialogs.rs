//! Project and task management dialogs.
//!
//! Each dialog keeps the fetched list, a small form and the id of the row
//! being edited. Submitting yields a [`Submission`] for the app to send.

use ratatui::widgets::ListState;

use crate::models::{Project, ProjectDraft, TaskDraft, TaskRow};

#[derive(Debug, Clone, PartialEq)]
pub enum Submission<D> {
    Create(D),
    Update { id: String, draft: D },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogFocus {
    Name,
    Description,
    Project,
    List,
}

pub struct ProjectDialog {
    pub projects: Vec<Project>,
    pub name: String,
    pub description: String,
    pub focus: DialogFocus,
    pub list_state: ListState,
    editing: Option<String>,
}

impl ProjectDialog {
    pub fn new(projects: Vec<Project>) -> Self {
        let mut list_state = ListState::default();
        list_state.select((!projects.is_empty()).then_some(0));
        Self {
            projects,
            name: String::new(),
            description: String::new(),
            focus: DialogFocus::Name,
            list_state,
            editing: None,
        }
    }

    pub fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
        clamp_selection(&mut self.list_state, self.projects.len());
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn selected(&self) -> Option<&Project> {
        self.list_state
            .selected()
            .and_then(|index| self.projects.get(index))
    }

    /// Loads the selected project into the form for editing.
    pub fn edit_selected(&mut self) {
        let Some(project) = self.selected().cloned() else {
            return;
        };
        self.name = project.name;
        self.description = project.description.unwrap_or_default();
        self.editing = Some(project.id);
        self.focus = DialogFocus::Name;
    }

    pub fn reset(&mut self) {
        self.name.clear();
        self.description.clear();
        self.editing = None;
        self.focus = DialogFocus::Name;
    }

    pub fn submission(&self) -> Result<Submission<ProjectDraft>, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Project name is required".to_string());
        }
        let draft = ProjectDraft {
            name: name.to_string(),
            description: non_empty(&self.description),
        };
        Ok(match &self.editing {
            Some(id) => Submission::Update {
                id: id.clone(),
                draft,
            },
            None => Submission::Create(draft),
        })
    }

    pub fn next_focus(&mut self) {
        self.focus = match self.focus {
            DialogFocus::Name => DialogFocus::Description,
            DialogFocus::Description => DialogFocus::List,
            DialogFocus::Project | DialogFocus::List => DialogFocus::Name,
        };
    }

    pub fn focused_text_mut(&mut self) -> Option<&mut String> {
        match self.focus {
            DialogFocus::Name => Some(&mut self.name),
            DialogFocus::Description => Some(&mut self.description),
            DialogFocus::Project | DialogFocus::List => None,
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        move_selection(&mut self.list_state, self.projects.len(), delta);
    }
}

pub struct TaskDialog {
    pub tasks: Vec<TaskRow>,
    pub projects: Vec<Project>,
    pub name: String,
    pub description: String,
    pub project_id: Option<String>,
    pub focus: DialogFocus,
    pub list_state: ListState,
    editing: Option<String>,
}

impl TaskDialog {
    pub fn new(tasks: Vec<TaskRow>, projects: Vec<Project>) -> Self {
        let mut list_state = ListState::default();
        list_state.select((!tasks.is_empty()).then_some(0));
        Self {
            tasks,
            projects,
            name: String::new(),
            description: String::new(),
            project_id: None,
            focus: DialogFocus::Name,
            list_state,
            editing: None,
        }
    }

    pub fn set_tasks(&mut self, tasks: Vec<TaskRow>) {
        self.tasks = tasks;
        clamp_selection(&mut self.list_state, self.tasks.len());
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn selected(&self) -> Option<&TaskRow> {
        self.list_state
            .selected()
            .and_then(|index| self.tasks.get(index))
    }

    pub fn project_name(&self) -> Option<&str> {
        let id = self.project_id.as_ref()?;
        self.projects
            .iter()
            .find(|project| &project.id == id)
            .map(|project| project.name.as_str())
    }

    pub fn edit_selected(&mut self) {
        let Some(row) = self.selected().cloned() else {
            return;
        };
        self.name = row.task.name;
        self.description = row.task.description.unwrap_or_default();
        self.project_id = Some(row.task.project_id);
        self.editing = Some(row.task.id);
        self.focus = DialogFocus::Name;
    }

    pub fn reset(&mut self) {
        self.name.clear();
        self.description.clear();
        self.project_id = None;
        self.editing = None;
        self.focus = DialogFocus::Name;
    }

    pub fn cycle_project(&mut self, delta: isize) {
        if self.projects.is_empty() {
            return;
        }
        let len = self.projects.len() as isize;
        let current = self
            .project_id
            .as_ref()
            .and_then(|id| self.projects.iter().position(|p| &p.id == id));
        let next = match current {
            Some(index) => (index as isize + delta).rem_euclid(len) as usize,
            None if delta < 0 => self.projects.len() - 1,
            None => 0,
        };
        self.project_id = Some(self.projects[next].id.clone());
    }

    pub fn submission(&self) -> Result<Submission<TaskDraft>, String> {
        let Some(project_id) = self.project_id.clone() else {
            return Err("Please select a project".to_string());
        };
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Task name is required".to_string());
        }
        let draft = TaskDraft {
            name: name.to_string(),
            description: non_empty(&self.description),
            project_id,
        };
        Ok(match &self.editing {
            Some(id) => Submission::Update {
                id: id.clone(),
                draft,
            },
            None => Submission::Create(draft),
        })
    }

    pub fn next_focus(&mut self) {
        self.focus = match self.focus {
            DialogFocus::Name => DialogFocus::Description,
            DialogFocus::Description => DialogFocus::Project,
            DialogFocus::Project => DialogFocus::List,
            DialogFocus::List => DialogFocus::Name,
        };
    }

    pub fn focused_text_mut(&mut self) -> Option<&mut String> {
        match self.focus {
            DialogFocus::Name => Some(&mut self.name),
            DialogFocus::Description => Some(&mut self.description),
            DialogFocus::Project | DialogFocus::List => None,
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        move_selection(&mut self.list_state, self.tasks.len(), delta);
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn clamp_selection(state: &mut ListState, len: usize) {
    match state.selected() {
        _ if len == 0 => state.select(None),
        Some(index) if index >= len => state.select(Some(len - 1)),
        None => state.select(Some(0)),
        Some(_) => {}
    }
}

fn move_selection(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        return;
    }
    let selected = state.selected().unwrap_or(0) as isize;
    let next = (selected + delta).rem_euclid(len as isize) as usize;
    state.select(Some(next));
}
