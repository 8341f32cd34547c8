use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;
use ratatui::Terminal;

use crate::config::AppConfig;
use crate::countries::CountryList;
use crate::form::SubmitOutcome;
use crate::picture::PictureFile;
use crate::record::Field;
use crate::session::{EditSessionController, SessionError, SessionEvent};
use crate::storage::{KeyValueStore, RecordStore, StorageHandle};
use crate::ui;

pub mod state;

pub use state::{AppState, FocusPane, OverlayState, View};

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    NextPage,
    PreviousPage,
    ToggleFocus,
    ToggleProfiles,
    StartSearch,
    EditRecord,
    DeleteRecord,
}

pub struct App<S: KeyValueStore = StorageHandle> {
    pub config: Arc<AppConfig>,
    store: RecordStore<S>,
    state: AppState,
    session: EditSessionController,
    table_state: TableState,
    should_quit: bool,
    tick_rate: Duration,
}

impl<S: KeyValueStore> App<S> {
    pub fn new(config: Arc<AppConfig>, store: RecordStore<S>, countries: CountryList) -> Self {
        let mut state = AppState::new(&config, countries);
        if store.recovered_from_corruption() {
            state.set_status_message(Some(format!(
                "Stored records were unreadable and have been set aside under '{}.corrupt'",
                store.key()
            )));
        }
        let session = EditSessionController::new(config.edit.save_delay());
        Self {
            config,
            store,
            state,
            session,
            table_state: TableState::default(),
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &RecordStore<S> {
        &self.store
    }

    pub fn session(&self) -> &EditSessionController {
        &self.session
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        self.finish_pending_save();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    let selected = self.state.selected_row;
                    self.table_state.select(Some(selected));
                    ui::draw_app(
                        frame,
                        &self.state,
                        self.store.records(),
                        &self.session,
                        &mut self.table_state,
                    );
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    pub fn on_tick(&mut self) {
        match self.session.poll(&mut self.store) {
            Ok(Some(event)) => self.handle_session_event(event),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(?err, "failed to commit edit");
                self.state
                    .set_status_message(Some("Could not save changes; press Ctrl-s to retry"));
            }
        }
    }

    fn finish_pending_save(&mut self) {
        if !self.session.is_saving() {
            return;
        }
        match self.session.flush(&mut self.store) {
            Ok(Some(event)) => tracing::info!(?event, "pending edit flushed on exit"),
            Ok(None) => {}
            Err(err) => tracing::error!(?err, "pending edit lost on exit"),
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Committed { index } => {
                self.state.close_overlay();
                self.after_list_change();
                self.state
                    .set_status_message(Some(format!("Record {} updated", index + 1)));
            }
            SessionEvent::Discarded { index } => {
                self.state.close_overlay();
                self.state.set_status_message(Some(format!(
                    "Record {} changed while saving; edit discarded",
                    index + 1
                )));
            }
            SessionEvent::PictureAttached => {
                self.state.set_status_message(Some("Picture loaded"));
            }
            SessionEvent::PictureFailed { message } => {
                self.state
                    .set_status_message(Some(format!("Picture could not be read: {message}")));
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
        {
            self.handle_action(Action::Quit);
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        if self.state.is_search_active() {
            self.handle_search_key(key);
            return;
        }

        if self.state.view == View::Profiles {
            match key.code {
                KeyCode::Esc | KeyCode::Char('p') => self.handle_action(Action::ToggleProfiles),
                KeyCode::Char('q') => self.handle_action(Action::Quit),
                _ => {}
            }
            return;
        }

        if key.code == KeyCode::Tab {
            self.handle_action(Action::ToggleFocus);
            return;
        }

        if self.state.focus == FocusPane::Form {
            self.handle_form_key(key);
            return;
        }

        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::Char('n') | KeyCode::Right | KeyCode::PageDown => Some(Action::NextPage),
            KeyCode::Char('b') | KeyCode::Left | KeyCode::PageUp => Some(Action::PreviousPage),
            KeyCode::Char('p') => Some(Action::ToggleProfiles),
            KeyCode::Char('/') => Some(Action::StartSearch),
            KeyCode::Char('e') | KeyCode::Enter => Some(Action::EditRecord),
            KeyCode::Char('d') | KeyCode::Delete => Some(Action::DeleteRecord),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => {
                self.finish_pending_save();
                self.should_quit = true;
            }
            Action::SelectNext => {
                let rows = self.visible_rows();
                self.state.move_selection(1, rows);
            }
            Action::SelectPrevious => {
                let rows = self.visible_rows();
                self.state.move_selection(-1, rows);
            }
            Action::NextPage => {
                self.state.table.next_page(self.store.records());
                self.state.selected_row = 0;
            }
            Action::PreviousPage => {
                self.state.table.previous_page();
                self.state.selected_row = 0;
            }
            Action::ToggleFocus => self.state.toggle_focus(),
            Action::ToggleProfiles => self.state.toggle_view(),
            Action::StartSearch => {
                self.state.begin_search();
                self.state
                    .set_status_message(Some("Search: type to filter • Enter keep • Esc clear"));
            }
            Action::EditRecord => self.handle_edit_record(),
            Action::DeleteRecord => self.handle_delete_record(),
        }
    }

    fn visible_rows(&self) -> usize {
        self.state.table.render(self.store.records()).rows.len()
    }

    fn selected_index(&self) -> Option<usize> {
        self.state
            .table
            .row_index(self.store.records(), self.state.selected_row)
    }

    fn after_list_change(&mut self) {
        self.state.table.clamp_page(self.store.records());
        let rows = self.visible_rows();
        self.state.clamp_selection(rows);
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.state.cancel_search();
                self.state.set_status_message(None::<String>);
            }
            KeyCode::Enter => self.state.finish_search(),
            KeyCode::Backspace => self.state.pop_search_char(),
            KeyCode::Char(ch) if !has_command_modifier(key) => self.state.push_search_char(ch),
            _ => {}
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        let field = self.state.form_field();
        match key.code {
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.submit_form();
            }
            KeyCode::Up => self.state.move_form_field(-1),
            KeyCode::Down => self.state.move_form_field(1),
            KeyCode::Left | KeyCode::Right => {
                let step = if key.code == KeyCode::Left { -1 } else { 1 };
                let current = self.state.form.draft().value(field).to_string();
                if let Some(next) = self.state.cycle_choice(field, &current, step) {
                    self.state.form.change_field(field, next);
                }
            }
            KeyCode::Enter if field == Field::ProfilePicture => {
                let path = self.state.picture_path.trim().to_string();
                if path.is_empty() {
                    return;
                }
                let file = probe_picture(&path);
                if self.state.form.attach_picture(file) {
                    self.state
                        .set_status_message(Some(format!("Attached {path}")));
                } else {
                    self.state
                        .set_status_message(Some("Profile picture must be a PNG file"));
                }
            }
            KeyCode::Enter => self.state.move_form_field(1),
            KeyCode::Delete if field == Field::ProfilePicture => {
                self.state.picture_path.clear();
                self.state.form.clear_picture();
            }
            KeyCode::Backspace => {
                if field == Field::ProfilePicture {
                    state::pop_grapheme(&mut self.state.picture_path);
                } else {
                    let mut value = self.state.form.draft().value(field).to_string();
                    if state::pop_grapheme(&mut value) {
                        self.state.form.change_field(field, value);
                    }
                }
            }
            KeyCode::Char(ch) if !has_command_modifier(key) => {
                if field == Field::ProfilePicture {
                    state::push_char(&mut self.state.picture_path, ch);
                } else {
                    let mut value = self.state.form.draft().value(field).to_string();
                    if state::push_char(&mut value, ch) {
                        self.state.form.change_field(field, value);
                    }
                }
            }
            _ => {}
        }
    }

    fn submit_form(&mut self) {
        match self.state.form.submit(&mut self.store) {
            Ok(SubmitOutcome::Added { index }) => {
                self.state.picture_path.clear();
                self.state.form_field = 0;
                self.after_list_change();
                self.state
                    .set_status_message(Some(format!("Record {} added", index + 1)));
            }
            Ok(SubmitOutcome::Rejected(errors)) => {
                self.state
                    .set_status_message(Some(format!("Fix the form: {errors}")));
            }
            Ok(SubmitOutcome::PictureUnreadable(err)) => {
                self.state
                    .set_status_message(Some(format!("{err}; submit again to retry")));
            }
            Err(err) => {
                tracing::error!(?err, "failed to add record");
                self.state.set_status_message(Some("Failed to save record"));
            }
        }
    }

    fn handle_edit_record(&mut self) {
        let Some(index) = self.selected_index() else {
            self.state.set_status_message(Some("No record selected"));
            return;
        };
        match self.session.begin(&self.store, index) {
            Ok(()) => {
                self.state.open_edit();
                self.state.set_status_message(Some(
                    "Editing: ↑/↓ field • Ctrl-s save • Esc cancel",
                ));
            }
            Err(err) => {
                self.state.set_status_message(Some(err.to_string()));
            }
        }
    }

    fn handle_delete_record(&mut self) {
        let Some(index) = self.selected_index() else {
            self.state.set_status_message(Some("No record selected"));
            return;
        };
        let name = self
            .store
            .get(index)
            .map(|record| record.name.clone())
            .unwrap_or_default();
        self.state.open_delete(index, name);
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        match self.state.overlay() {
            Some(OverlayState::ConfirmDelete(_)) => {
                match key.code {
                    KeyCode::Esc | KeyCode::Char('n') => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Delete canceled"));
                    }
                    KeyCode::Enter | KeyCode::Char('y') => self.submit_delete(),
                    _ => {}
                }
                true
            }
            Some(OverlayState::Edit(_)) => {
                self.handle_edit_key(key);
                true
            }
            None => false,
        }
    }

    fn submit_delete(&mut self) {
        let Some(index) = self.state.delete_overlay().map(|overlay| overlay.index) else {
            return;
        };
        self.state.close_overlay();
        match self.store.remove(index) {
            Ok(Some(record)) => {
                self.after_list_change();
                self.state
                    .set_status_message(Some(format!("Deleted {}", record.name)));
            }
            Ok(None) => {
                self.state.set_status_message(Some("Record no longer exists"));
            }
            Err(err) => {
                tracing::error!(?err, index, "failed to delete record");
                self.state.set_status_message(Some("Failed to delete record"));
            }
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            self.session.cancel();
            self.state.close_overlay();
            self.state.set_status_message(Some("Edit canceled"));
            return;
        }
        if self.session.is_saving() {
            return;
        }
        let Some(field) = self.state.edit_overlay().map(|overlay| overlay.field()) else {
            return;
        };
        let outcome = match key.code {
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                let outcome = self.session.save();
                if outcome.is_ok() {
                    self.state.set_status_message(Some("Saving…"));
                }
                outcome
            }
            KeyCode::Up | KeyCode::BackTab => {
                self.move_edit_field(-1);
                Ok(())
            }
            KeyCode::Down | KeyCode::Tab => {
                self.move_edit_field(1);
                Ok(())
            }
            KeyCode::Left | KeyCode::Right => {
                let step = if key.code == KeyCode::Left { -1 } else { 1 };
                let current = self.edit_value(field);
                match self.state.cycle_choice(field, &current, step) {
                    Some(next) => self.session.change_field(field, next),
                    None => Ok(()),
                }
            }
            KeyCode::Enter if field == Field::ProfilePicture => {
                let path = self
                    .state
                    .edit_overlay()
                    .map(|overlay| overlay.picture_path.trim().to_string())
                    .unwrap_or_default();
                if path.is_empty() {
                    Ok(())
                } else {
                    let outcome = self.session.change_file(probe_picture(&path));
                    if outcome.is_ok() {
                        self.state
                            .set_status_message(Some(format!("Loading {path}…")));
                    }
                    outcome
                }
            }
            KeyCode::Backspace => {
                if field == Field::ProfilePicture {
                    if let Some(overlay) = self.state.edit_overlay_mut() {
                        state::pop_grapheme(&mut overlay.picture_path);
                    }
                    Ok(())
                } else {
                    let mut value = self.edit_value(field);
                    if state::pop_grapheme(&mut value) {
                        self.session.change_field(field, value)
                    } else {
                        Ok(())
                    }
                }
            }
            KeyCode::Char(ch) if !has_command_modifier(key) => {
                if field == Field::ProfilePicture {
                    if let Some(overlay) = self.state.edit_overlay_mut() {
                        state::push_char(&mut overlay.picture_path, ch);
                    }
                    Ok(())
                } else {
                    let mut value = self.edit_value(field);
                    if state::push_char(&mut value, ch) {
                        self.session.change_field(field, value)
                    } else {
                        Ok(())
                    }
                }
            }
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            self.report_session_error(err);
        }
    }

    fn move_edit_field(&mut self, delta: isize) {
        let len = Field::all().len() as isize;
        if let Some(overlay) = self.state.edit_overlay_mut() {
            overlay.selected_field =
                (overlay.selected_field as isize + delta).rem_euclid(len) as usize;
        }
    }

    fn edit_value(&self, field: Field) -> String {
        self.session
            .draft()
            .map(|draft| draft.value(field).to_string())
            .unwrap_or_default()
    }

    fn report_session_error(&mut self, err: SessionError) {
        match &err {
            SessionError::Invalid(errors) => {
                self.state
                    .set_status_message(Some(format!("Fix the form: {errors}")));
            }
            SessionError::Picture(picture) => {
                self.state
                    .set_status_message(Some(format!("{picture}; choose the file again")));
            }
            SessionError::Closed | SessionError::MissingRecord(_) => {
                self.state.close_overlay();
                self.state.set_status_message(Some(err.to_string()));
            }
            SessionError::SaveInProgress => {
                self.state.set_status_message(Some(err.to_string()));
            }
        }
    }
}

fn has_command_modifier(key: KeyEvent) -> bool {
    key.modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER)
}

/// Builds an upload candidate for a typed path. An unreadable path still
/// yields a candidate so the encoder can report the read failure.
fn probe_picture(path: &str) -> PictureFile {
    PictureFile::probe(path).unwrap_or_else(|err| {
        tracing::debug!(%err, "could not sniff picture type");
        PictureFile::new(path)
    })
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("entering alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("creating terminal backend")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("leaving alternate screen")?;
    terminal.show_cursor().context("showing cursor")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::storage::MemoryStorage;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    fn type_text(app: &mut App<Arc<MemoryStorage>>, text: &str) {
        for ch in text.chars() {
            app.handle_key(key(KeyCode::Char(ch)));
        }
    }

    fn app_with(records: usize) -> anyhow::Result<App<Arc<MemoryStorage>>> {
        let mut config = AppConfig::default();
        config.edit.save_delay_ms = 0;
        let mut store = RecordStore::load(Arc::new(MemoryStorage::new()))?;
        for i in 0..records {
            store.add(Record {
                name: format!("Person {i}"),
                email: format!("p{i}@example.com"),
                phone_number: "9800000000".into(),
                ..Record::default()
            })?;
        }
        Ok(App::new(Arc::new(config), store, CountryList::new()))
    }

    #[test]
    fn form_submission_adds_a_record() -> anyhow::Result<()> {
        let mut app = app_with(0)?;
        type_text(&mut app, "Gita");
        app.handle_key(key(KeyCode::Down));
        type_text(&mut app, "gita@example.com");
        app.handle_key(key(KeyCode::Down));
        type_text(&mut app, "1234567");
        app.handle_key(ctrl('s'));

        assert_eq!(app.store().len(), 1);
        assert_eq!(app.store().get(0).map(|r| r.name.as_str()), Some("Gita"));
        assert!(app.state().form.draft().name.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_form_is_not_submitted() -> anyhow::Result<()> {
        let mut app = app_with(0)?;
        type_text(&mut app, "Gita");
        app.handle_key(ctrl('s'));
        assert!(app.store().is_empty());
        assert_eq!(app.state().form.draft().name, "Gita");
        Ok(())
    }

    #[test]
    fn edit_modal_commits_on_tick() -> anyhow::Result<()> {
        let mut app = app_with(7)?;
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('n')));
        app.handle_key(key(KeyCode::Char('j')));
        app.handle_key(key(KeyCode::Char('e')));
        assert_eq!(app.session().index(), Some(6));

        app.handle_key(key(KeyCode::Backspace));
        type_text(&mut app, "X");
        app.handle_key(ctrl('s'));
        assert!(app.session().is_saving());

        app.on_tick();
        assert!(app.state().overlay().is_none());
        assert_eq!(app.store().get(6).map(|r| r.name.as_str()), Some("Person X"));
        Ok(())
    }

    #[test]
    fn escape_cancels_edit_without_writing() -> anyhow::Result<()> {
        let mut app = app_with(3)?;
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Enter));
        type_text(&mut app, "zzz");
        app.handle_key(key(KeyCode::Esc));
        app.on_tick();
        assert!(!app.session().is_open());
        assert_eq!(app.store().get(0).map(|r| r.name.as_str()), Some("Person 0"));
        Ok(())
    }

    #[test]
    fn delete_uses_full_list_index_under_search() -> anyhow::Result<()> {
        let mut app = app_with(12)?;
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('/')));
        type_text(&mut app, "person 11");
        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Char('d')));
        app.handle_key(key(KeyCode::Char('y')));

        assert_eq!(app.store().len(), 11);
        assert!(app
            .store()
            .records()
            .iter()
            .all(|record| record.name != "Person 11"));
        Ok(())
    }

    #[test]
    fn deleting_last_row_of_final_page_clamps_page() -> anyhow::Result<()> {
        let mut app = app_with(6)?;
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('n')));
        assert_eq!(app.state().table.page(), 2);
        app.handle_key(key(KeyCode::Char('d')));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.store().len(), 5);
        assert_eq!(app.state().table.page(), 1);
        Ok(())
    }

    #[test]
    fn quit_flushes_a_pending_save() -> anyhow::Result<()> {
        let mut app = app_with(1)?;
        app.session = EditSessionController::new(Duration::from_secs(60));
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('e')));
        app.handle_key(key(KeyCode::Down));
        type_text(&mut app, ".np");
        app.handle_key(ctrl('s'));
        app.handle_key(ctrl('c'));
        assert!(app.should_quit());
        assert_eq!(
            app.store().get(0).map(|r| r.email.as_str()),
            Some("p0@example.com.np")
        );
        Ok(())
    }
}
