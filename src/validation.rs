use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::picture::PictureFile;
use crate::record::{BirthDate, Field, Province, RecordDraft};

static EMAIL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\S+@\S+\.\S+").expect("valid email regex"));
static PHONE_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{7,}$").expect("valid phone regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name is required")]
    NameRequired,
    #[error("Email is required")]
    EmailRequired,
    #[error("Email is invalid")]
    EmailInvalid,
    #[error("Phone number is required")]
    PhoneRequired,
    #[error("Phone number is invalid")]
    PhoneInvalid,
    #[error("Date of birth is invalid")]
    DobInvalid,
    #[error("Province is invalid")]
    ProvinceInvalid,
    #[error("Profile picture must be a PNG file")]
    PictureNotPng,
}

pub fn validate_name(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::NameRequired);
    }
    Ok(())
}

pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmailRequired);
    }
    if !EMAIL_SHAPE.is_match(value) {
        return Err(ValidationError::EmailInvalid);
    }
    Ok(())
}

pub fn validate_phone_number(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::PhoneRequired);
    }
    if !PHONE_DIGITS.is_match(trimmed) {
        return Err(ValidationError::PhoneInvalid);
    }
    Ok(())
}

pub fn validate_dob(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    trimmed
        .parse::<BirthDate>()
        .map(|_| ())
        .map_err(|_| ValidationError::DobInvalid)
}

pub fn validate_province(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    trimmed
        .parse::<Province>()
        .map(|_| ())
        .map_err(|_| ValidationError::ProvinceInvalid)
}

/// Accepts a picture upload when it is a PNG by content type or by extension.
pub fn validate_picture_file(file: &PictureFile) -> Result<(), ValidationError> {
    if file.is_png() {
        Ok(())
    } else {
        Err(ValidationError::PictureNotPng)
    }
}

/// Checks one field of a draft. The picture slot only ever holds an encoded
/// PNG, so it has no text rule here; uploads go through
/// [`validate_picture_file`].
pub fn validate_field(field: Field, draft: &RecordDraft) -> Result<(), ValidationError> {
    let value = draft.value(field);
    match field {
        Field::Name => validate_name(value),
        Field::Email => validate_email(value),
        Field::PhoneNumber => validate_phone_number(value),
        Field::Dob => validate_dob(value),
        Field::Province => validate_province(value),
        Field::City | Field::District | Field::Country | Field::ProfilePicture => Ok(()),
    }
}

pub fn validate_draft(draft: &RecordDraft) -> FieldErrors {
    let mut errors = FieldErrors::default();
    for field in Field::all() {
        errors.record(field, validate_field(field, draft));
    }
    errors
}

/// Field-level errors keyed in form order. A field without an entry is
/// valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    errors: IndexMap<Field, ValidationError>,
}

impl FieldErrors {
    pub fn single(field: Field, error: ValidationError) -> Self {
        let mut errors = Self::default();
        errors.insert(field, error);
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: Field) -> Option<&ValidationError> {
        self.errors.get(&field)
    }

    pub fn insert(&mut self, field: Field, error: ValidationError) {
        self.errors.insert(field, error);
        self.errors.sort_keys();
    }

    pub fn clear(&mut self, field: Field) {
        self.errors.shift_remove(&field);
    }

    /// Stores the outcome of a single-field check, clearing any stale error
    /// when the field is now valid.
    pub fn record(&mut self, field: Field, outcome: Result<(), ValidationError>) {
        match outcome {
            Ok(()) => self.clear(field),
            Err(error) => self.insert(field, error),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &ValidationError)> {
        self.errors.iter().map(|(field, error)| (*field, error))
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (_, error) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}
