use anyhow::Result;

use crate::picture::{spawn_encode, PictureError, PictureFile};
use crate::record::{Field, RecordDraft};
use crate::storage::{KeyValueStore, RecordStore};
use crate::validation::{validate_draft, validate_field, validate_picture_file, FieldErrors};

#[derive(Debug)]
pub enum SubmitOutcome {
    /// The record was appended at `index` and the form reset.
    Added { index: usize },
    /// Validation failed; nothing was written and the form is untouched.
    Rejected(FieldErrors),
    /// The attached picture could not be read. The form keeps its contents
    /// so the submit can be retried.
    PictureUnreadable(PictureError),
}

/// The entry form: a draft, the errors shown beside each field and the
/// picture chosen for upload.
#[derive(Debug, Clone)]
pub struct EntryForm {
    draft: RecordDraft,
    errors: FieldErrors,
    picture: Option<PictureFile>,
    default_country: String,
}

impl Default for EntryForm {
    fn default() -> Self {
        Self::new(crate::record::DEFAULT_COUNTRY)
    }
}

impl EntryForm {
    pub fn new(default_country: impl Into<String>) -> Self {
        let default_country = default_country.into();
        Self {
            draft: RecordDraft::with_country(default_country.clone()),
            errors: FieldErrors::default(),
            picture: None,
            default_country,
        }
    }

    pub fn draft(&self) -> &RecordDraft {
        &self.draft
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn picture(&self) -> Option<&PictureFile> {
        self.picture.as_ref()
    }

    pub fn change_field(&mut self, field: Field, value: impl Into<String>) {
        if self.draft.set(field, value) {
            let outcome = validate_field(field, &self.draft);
            self.errors.record(field, outcome);
        }
    }

    /// Attaches a picture for upload at submit time. A file that is not a PNG
    /// is refused and any previous attachment is kept.
    pub fn attach_picture(&mut self, file: PictureFile) -> bool {
        let outcome = validate_picture_file(&file);
        let accepted = outcome.is_ok();
        self.errors.record(Field::ProfilePicture, outcome);
        if accepted {
            self.picture = Some(file);
        }
        accepted
    }

    pub fn clear_picture(&mut self) {
        self.picture = None;
        self.errors.clear(Field::ProfilePicture);
    }

    pub fn validate(&mut self) -> bool {
        let mut errors = validate_draft(&self.draft);
        if let Some(error) = self.errors.get(Field::ProfilePicture) {
            errors.insert(Field::ProfilePicture, error.clone());
        }
        self.errors = errors;
        self.errors.is_valid()
    }

    pub fn reset(&mut self) {
        self.draft = RecordDraft::with_country(self.default_country.clone());
        self.errors = FieldErrors::default();
        self.picture = None;
    }

    /// Validates the draft, encodes the attached picture and appends the
    /// record. Blocks while the picture is read.
    pub fn submit<S: KeyValueStore>(&mut self, store: &mut RecordStore<S>) -> Result<SubmitOutcome> {
        if !self.validate() {
            tracing::debug!(errors = self.errors.len(), "entry form rejected");
            return Ok(SubmitOutcome::Rejected(self.errors.clone()));
        }
        let mut draft = self.draft.clone();
        if let Some(file) = &self.picture {
            match spawn_encode(file).wait() {
                Ok(picture) => draft.profile_picture = Some(picture),
                Err(err) => return Ok(SubmitOutcome::PictureUnreadable(err)),
            }
        }
        let record = match draft.into_record() {
            Ok(record) => record,
            Err(errors) => {
                self.errors = errors.clone();
                return Ok(SubmitOutcome::Rejected(errors));
            }
        };
        store.add(record)?;
        self.reset();
        Ok(SubmitOutcome::Added {
            index: store.len() - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::picture::PNG_SIGNATURE;
    use crate::storage::MemoryStorage;
    use crate::validation::ValidationError;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn empty_store() -> anyhow::Result<RecordStore<Arc<MemoryStorage>>> {
        RecordStore::load(Arc::new(MemoryStorage::new()))
    }

    fn fill(form: &mut EntryForm) {
        form.change_field(Field::Name, "Kamala");
        form.change_field(Field::Email, "kamala@example.com");
        form.change_field(Field::PhoneNumber, "9812345678");
    }

    #[test]
    fn missing_required_fields_block_submit() -> anyhow::Result<()> {
        let mut store = empty_store()?;
        let mut form = EntryForm::default();
        form.change_field(Field::Email, "kamala@example.com");

        let outcome = form.submit(&mut store)?;
        assert_matches!(outcome, SubmitOutcome::Rejected(ref errors) if errors.len() == 2);
        assert!(store.is_empty());
        assert_eq!(form.draft().email, "kamala@example.com");
        Ok(())
    }

    #[test]
    fn valid_submit_appends_and_resets() -> anyhow::Result<()> {
        let mut store = empty_store()?;
        let mut form = EntryForm::new("Bhutan");
        fill(&mut form);
        form.change_field(Field::Country, "Nepal");

        assert_matches!(form.submit(&mut store)?, SubmitOutcome::Added { index: 0 });
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).map(|r| r.country.as_str()), Some("Nepal"));
        assert!(form.draft().name.is_empty());
        assert_eq!(form.draft().country, "Bhutan");
        Ok(())
    }

    #[test]
    fn field_errors_update_as_you_type() {
        let mut form = EntryForm::default();
        form.change_field(Field::PhoneNumber, "123");
        assert_eq!(
            form.errors().get(Field::PhoneNumber),
            Some(&ValidationError::PhoneInvalid)
        );
        form.change_field(Field::PhoneNumber, "1234567");
        assert!(form.errors().get(Field::PhoneNumber).is_none());
    }

    #[test]
    fn rejected_picture_blocks_submit() -> anyhow::Result<()> {
        let mut store = empty_store()?;
        let mut form = EntryForm::default();
        fill(&mut form);
        assert!(!form.attach_picture(PictureFile::new("scan.gif")));
        assert!(form.picture().is_none());

        let outcome = form.submit(&mut store)?;
        assert_matches!(
            outcome,
            SubmitOutcome::Rejected(ref errors)
                if errors.get(Field::ProfilePicture) == Some(&ValidationError::PictureNotPng)
        );
        assert!(store.is_empty());

        form.clear_picture();
        assert_matches!(form.submit(&mut store)?, SubmitOutcome::Added { .. });
        Ok(())
    }

    #[test]
    fn picture_is_encoded_at_submit() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("face.png");
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(b"\0\0\0\rIHDR");
        fs::write(&path, &bytes)?;

        let mut store = empty_store()?;
        let mut form = EntryForm::default();
        fill(&mut form);
        assert!(form.attach_picture(PictureFile::new(&path)));
        form.submit(&mut store)?;

        let picture = store
            .get(0)
            .and_then(|r| r.profile_picture.clone())
            .expect("picture stored");
        assert_eq!(picture.decode()?, bytes);
        Ok(())
    }

    #[test]
    fn unreadable_picture_keeps_the_form() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut store = empty_store()?;
        let mut form = EntryForm::default();
        fill(&mut form);
        assert!(form.attach_picture(PictureFile::new(temp.path().join("gone.png"))));

        assert_matches!(
            form.submit(&mut store)?,
            SubmitOutcome::PictureUnreadable(PictureError::Read { .. })
        );
        assert!(store.is_empty());
        assert_eq!(form.draft().name, "Kamala");
        assert!(form.picture().is_some());
        Ok(())
    }
}
