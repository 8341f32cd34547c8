use unicode_segmentation::UnicodeSegmentation;

use crate::config::AppConfig;
use crate::countries::CountryList;
use crate::form::EntryForm;
use crate::record::{Field, Province};
use crate::search::TableView;

const MAX_INPUT_GRAPHEMES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Registry,
    Profiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Form,
    Table,
}

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub active: bool,
    pub query: String,
}

/// Cursor inside the edit modal. The working copy itself lives in the edit
/// session controller.
#[derive(Debug, Clone, Default)]
pub struct EditOverlay {
    pub selected_field: usize,
    pub picture_path: String,
}

impl EditOverlay {
    pub fn field(&self) -> Field {
        field_at(self.selected_field)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteOverlay {
    pub index: usize,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum OverlayState {
    Edit(EditOverlay),
    ConfirmDelete(DeleteOverlay),
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub view: View,
    pub focus: FocusPane,
    pub form: EntryForm,
    pub form_field: usize,
    pub picture_path: String,
    pub table: TableView,
    pub selected_row: usize,
    pub search: SearchState,
    pub overlay: Option<OverlayState>,
    pub status_message: Option<String>,
    pub countries: CountryList,
}

impl AppState {
    pub fn new(config: &AppConfig, countries: CountryList) -> Self {
        Self {
            view: View::Registry,
            focus: FocusPane::Form,
            form: EntryForm::new(config.form.default_country.clone()),
            form_field: 0,
            picture_path: String::new(),
            table: TableView::new(config.table.page_size, config.table.page_reset),
            selected_row: 0,
            search: SearchState::default(),
            overlay: None,
            status_message: None,
            countries,
        }
    }

    pub fn form_field(&self) -> Field {
        field_at(self.form_field)
    }

    pub fn move_form_field(&mut self, delta: isize) {
        self.form_field = step_index(self.form_field, delta, Field::all().len());
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            FocusPane::Form => FocusPane::Table,
            FocusPane::Table => FocusPane::Form,
        };
    }

    pub fn toggle_view(&mut self) {
        self.view = match self.view {
            View::Registry => View::Profiles,
            View::Profiles => View::Registry,
        };
    }

    /// Moves the row cursor within the rows currently on screen.
    pub fn move_selection(&mut self, delta: isize, visible_rows: usize) {
        if visible_rows == 0 {
            self.selected_row = 0;
            return;
        }
        let next = (self.selected_row as isize + delta).clamp(0, visible_rows as isize - 1);
        self.selected_row = next as usize;
    }

    pub fn clamp_selection(&mut self, visible_rows: usize) {
        if self.selected_row >= visible_rows {
            self.selected_row = visible_rows.saturating_sub(1);
        }
    }

    pub fn begin_search(&mut self) {
        self.search.active = true;
        self.focus = FocusPane::Table;
    }

    pub fn finish_search(&mut self) {
        self.search.active = false;
    }

    pub fn cancel_search(&mut self) {
        self.search.active = false;
        self.search.query.clear();
        self.table.set_search_term("");
        self.selected_row = 0;
    }

    pub fn push_search_char(&mut self, ch: char) {
        push_char(&mut self.search.query, ch);
        self.apply_search();
    }

    pub fn pop_search_char(&mut self) {
        if pop_grapheme(&mut self.search.query) {
            self.apply_search();
        }
    }

    pub fn is_search_active(&self) -> bool {
        self.search.active
    }

    fn apply_search(&mut self) {
        self.table.set_search_term(self.search.query.clone());
        self.selected_row = 0;
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn open_edit(&mut self) {
        self.overlay = Some(OverlayState::Edit(EditOverlay::default()));
    }

    pub fn open_delete(&mut self, index: usize, name: String) {
        self.overlay = Some(OverlayState::ConfirmDelete(DeleteOverlay { index, name }));
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn edit_overlay(&self) -> Option<&EditOverlay> {
        match self.overlay.as_ref() {
            Some(OverlayState::Edit(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn edit_overlay_mut(&mut self) -> Option<&mut EditOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::Edit(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn delete_overlay(&self) -> Option<&DeleteOverlay> {
        match self.overlay.as_ref() {
            Some(OverlayState::ConfirmDelete(overlay)) => Some(overlay),
            _ => None,
        }
    }

    /// Next value for a choice field: provinces cycle through the fixed list
    /// (including blank), countries through the fetched names.
    pub fn cycle_choice(&self, field: Field, current: &str, step: isize) -> Option<String> {
        match field {
            Field::Province => {
                let mut options = vec![String::new()];
                options.extend(Province::all().into_iter().map(|p| p.to_string()));
                let position = options
                    .iter()
                    .position(|option| option == current.trim())
                    .unwrap_or(0);
                let next = step_index(position, step, options.len());
                options.get(next).cloned()
            }
            Field::Country => self.countries.cycle(current, step),
            _ => None,
        }
    }
}

pub fn field_at(position: usize) -> Field {
    let fields = Field::all();
    fields
        .get(position)
        .copied()
        .unwrap_or(Field::Name)
}

fn step_index(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (current as isize + delta).rem_euclid(len as isize) as usize
}

/// Appends `ch` unless the buffer is already at the input limit.
pub fn push_char(buffer: &mut String, ch: char) -> bool {
    if buffer.graphemes(true).count() >= MAX_INPUT_GRAPHEMES {
        return false;
    }
    buffer.push(ch);
    true
}

/// Removes the last user-perceived character.
pub fn pop_grapheme(buffer: &mut String) -> bool {
    let Some((offset, _)) = buffer.grapheme_indices(true).next_back() else {
        return false;
    };
    buffer.truncate(offset);
    true
}
