use std::time::{Duration, Instant};

use anyhow::Result;

use crate::picture::{spawn_encode, PendingPicture, PictureError, PictureFile};
use crate::record::{Field, Record, RecordDraft};
use crate::storage::{KeyValueStore, RecordStore};
use crate::validation::{validate_field, validate_picture_file, FieldErrors};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no record is being edited")]
    Closed,
    #[error("there is no record at index {0}")]
    MissingRecord(usize),
    #[error("a save is already in progress")]
    SaveInProgress,
    #[error("{0}")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Picture(#[from] PictureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Closed,
    Editing { index: usize },
    Saving { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Committed { index: usize },
    /// The record at the session's index changed before the commit was due.
    Discarded { index: usize },
    PictureAttached,
    PictureFailed { message: String },
}

/// Edit-in-place state for a single record: a working copy, its field
/// errors and a deferred commit back into the store.
#[derive(Debug)]
pub struct EditSessionController {
    save_delay: Duration,
    session: Option<Session>,
}

/// The scheduled commit lives inside the session it belongs to, so closing
/// the session always drops it.
#[derive(Debug)]
struct Session {
    index: usize,
    original: Record,
    draft: RecordDraft,
    errors: FieldErrors,
    picture: Option<PendingPicture>,
    commit: Option<PendingCommit>,
}

#[derive(Debug)]
struct PendingCommit {
    record: Record,
    due: Instant,
}

impl EditSessionController {
    pub fn new(save_delay: Duration) -> Self {
        Self {
            save_delay,
            session: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match &self.session {
            None => SessionStatus::Closed,
            Some(session) if session.commit.is_some() => SessionStatus::Saving {
                index: session.index,
            },
            Some(session) => SessionStatus::Editing {
                index: session.index,
            },
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_saving(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.commit.is_some())
    }

    pub fn index(&self) -> Option<usize> {
        self.session.as_ref().map(|session| session.index)
    }

    pub fn draft(&self) -> Option<&RecordDraft> {
        self.session.as_ref().map(|session| &session.draft)
    }

    pub fn errors(&self) -> Option<&FieldErrors> {
        self.session.as_ref().map(|session| &session.errors)
    }

    pub fn picture_loading(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.picture.is_some())
            .unwrap_or(false)
    }

    /// Opens a session on a copy of the record at `index`. An already open
    /// (not saving) session is replaced.
    pub fn begin<S: KeyValueStore>(
        &mut self,
        store: &RecordStore<S>,
        index: usize,
    ) -> Result<(), SessionError> {
        if self.is_saving() {
            return Err(SessionError::SaveInProgress);
        }
        let record = store.get(index).ok_or(SessionError::MissingRecord(index))?;
        if let Some(previous) = &self.session {
            tracing::debug!(index = previous.index, "replacing open edit session");
        }
        self.session = Some(Session {
            index,
            original: record.clone(),
            draft: RecordDraft::from(record),
            errors: FieldErrors::default(),
            picture: None,
            commit: None,
        });
        tracing::debug!(index, "edit session opened");
        Ok(())
    }

    pub fn change_field(
        &mut self,
        field: Field,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        let session = self.editable()?;
        if session.draft.set(field, value) {
            let outcome = validate_field(field, &session.draft);
            session.errors.record(field, outcome);
        }
        Ok(())
    }

    /// Replaces the working copy's picture. A non-PNG file is rejected and
    /// the current picture kept; a PNG is encoded in the background.
    pub fn change_file(&mut self, file: PictureFile) -> Result<(), SessionError> {
        let session = self.editable()?;
        if let Err(error) = validate_picture_file(&file) {
            session.errors.insert(Field::ProfilePicture, error.clone());
            return Err(SessionError::Invalid(FieldErrors::single(
                Field::ProfilePicture,
                error,
            )));
        }
        session.errors.clear(Field::ProfilePicture);
        session.picture = Some(spawn_encode(&file));
        Ok(())
    }

    /// Validates the whole working copy and schedules it for commit after the
    /// save delay. Waits for an in-flight picture first.
    pub fn save(&mut self) -> Result<(), SessionError> {
        let save_delay = self.save_delay;
        let session = self.editable()?;
        if let Some(pending) = session.picture.take() {
            session.draft.profile_picture = Some(pending.wait()?);
        }
        let record = match session.draft.clone().into_record() {
            Ok(record) => record,
            Err(errors) => {
                session.errors = errors.clone();
                return Err(SessionError::Invalid(errors));
            }
        };
        session.errors = FieldErrors::default();
        tracing::debug!(
            index = session.index,
            delay_ms = save_delay.as_millis() as u64,
            "save scheduled"
        );
        session.commit = Some(PendingCommit {
            record,
            due: Instant::now() + save_delay,
        });
        Ok(())
    }

    /// Closes the session without writing, dropping any scheduled commit.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(
                index = session.index,
                dropped_commit = session.commit.is_some(),
                "edit session cancelled"
            );
        }
    }

    /// Advances background work: picks up a finished picture and applies a
    /// commit whose delay has elapsed. Meant to be called from the UI tick.
    pub fn poll<S: KeyValueStore>(
        &mut self,
        store: &mut RecordStore<S>,
    ) -> Result<Option<SessionEvent>> {
        if let Some(event) = self.poll_picture() {
            return Ok(Some(event));
        }
        let due = self
            .session
            .as_ref()
            .and_then(|session| session.commit.as_ref())
            .is_some_and(|commit| commit.due <= Instant::now());
        if !due {
            return Ok(None);
        }
        self.apply_pending(store)
    }

    /// Applies a scheduled commit right away, ignoring the remaining delay.
    pub fn flush<S: KeyValueStore>(
        &mut self,
        store: &mut RecordStore<S>,
    ) -> Result<Option<SessionEvent>> {
        self.apply_pending(store)
    }

    fn poll_picture(&mut self) -> Option<SessionEvent> {
        let session = self.session.as_mut()?;
        let outcome = session.picture.as_ref()?.try_resolve()?;
        session.picture = None;
        match outcome {
            Ok(picture) => {
                session.draft.profile_picture = Some(picture);
                Some(SessionEvent::PictureAttached)
            }
            Err(err) => Some(SessionEvent::PictureFailed {
                message: err.to_string(),
            }),
        }
    }

    fn apply_pending<S: KeyValueStore>(
        &mut self,
        store: &mut RecordStore<S>,
    ) -> Result<Option<SessionEvent>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let Some(commit) = session.commit.take() else {
            return Ok(None);
        };
        let index = session.index;
        if store.get(index) != Some(&session.original) {
            tracing::warn!(index, "record changed while saving; commit discarded");
            self.session = None;
            return Ok(Some(SessionEvent::Discarded { index }));
        }
        // On a storage failure the session stays open so the save can be retried.
        store.update(index, commit.record)?;
        self.session = None;
        Ok(Some(SessionEvent::Committed { index }))
    }

    fn editable(&mut self) -> Result<&mut Session, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::Closed)?;
        if session.commit.is_some() {
            return Err(SessionError::SaveInProgress);
        }
        Ok(session)
    }
}
