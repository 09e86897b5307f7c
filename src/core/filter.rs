use chrono::NaiveDate;
use std::collections::HashSet;

use super::todo::{Priority, Todo, TodoState};

/// Ephemeral todo filters. Empty sets mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    pub tags_include: HashSet<String>,
    pub tags_exclude: HashSet<String>,
    pub states: HashSet<TodoState>,
    pub priorities: HashSet<Priority>,
    /// Inclusive range matched against scheduled or deadline date.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub files: HashSet<String>,
    pub categories: HashSet<String>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.tags_include.is_empty()
            && self.tags_exclude.is_empty()
            && self.states.is_empty()
            && self.priorities.is_empty()
            && self.date_range.is_none()
            && self.files.is_empty()
            && self.categories.is_empty()
    }

    pub fn matches(&self, todo: &Todo) -> bool {
        if self.tags_exclude.iter().any(|t| todo.has_tag(t)) {
            return false;
        }
        if !self.tags_include.is_empty() && !self.tags_include.iter().any(|t| todo.has_tag(t)) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&todo.state) {
            return false;
        }
        if !self.priorities.is_empty() {
            match todo.priority {
                Some(p) if self.priorities.contains(&p) => {}
                _ => return false,
            }
        }
        if let Some((from, to)) = self.date_range {
            let in_range = |d: Option<NaiveDate>| d.is_some_and(|d| d >= from && d <= to);
            if !in_range(todo.scheduled_date()) && !in_range(todo.deadline_date()) {
                return false;
            }
        }
        if !self.files.is_empty() && !self.files.contains(&todo.file) {
            return false;
        }
        if !self.categories.is_empty() {
            match &todo.category {
                Some(c) if self.categories.contains(c) => {}
                _ => return false,
            }
        }
        true
    }
}

pub fn apply_filters<'a>(todos: &'a [Todo], filters: &FilterState) -> Vec<&'a Todo> {
    if filters.is_empty() {
        return todos.iter().collect();
    }
    todos.iter().filter(|t| filters.matches(t)).collect()
}
