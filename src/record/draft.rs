use std::str::FromStr;

use crate::picture::ProfilePicture;
use crate::validation::{validate_draft, FieldErrors, ValidationError};

use super::{Field, Record, DEFAULT_COUNTRY};

/// A record as typed into the entry form or edit modal: every field is raw
/// text until the whole-record validator turns it into a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub dob: String,
    pub city: String,
    pub district: String,
    pub province: String,
    pub country: String,
    pub profile_picture: Option<ProfilePicture>,
}

impl Default for RecordDraft {
    fn default() -> Self {
        Self::with_country(DEFAULT_COUNTRY)
    }
}

impl RecordDraft {
    pub fn with_country(country: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            phone_number: String::new(),
            dob: String::new(),
            city: String::new(),
            district: String::new(),
            province: String::new(),
            country: country.into(),
            profile_picture: None,
        }
    }

    pub fn value(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Email => &self.email,
            Field::PhoneNumber => &self.phone_number,
            Field::Dob => &self.dob,
            Field::City => &self.city,
            Field::District => &self.district,
            Field::Province => &self.province,
            Field::Country => &self.country,
            Field::ProfilePicture => self
                .profile_picture
                .as_ref()
                .map(ProfilePicture::as_str)
                .unwrap_or(""),
        }
    }

    /// Replaces a text field. The picture is not a text field; it only
    /// changes through the picture encoder, so `false` is returned for it.
    pub fn set(&mut self, field: Field, value: impl Into<String>) -> bool {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Email => &mut self.email,
            Field::PhoneNumber => &mut self.phone_number,
            Field::Dob => &mut self.dob,
            Field::City => &mut self.city,
            Field::District => &mut self.district,
            Field::Province => &mut self.province,
            Field::Country => &mut self.country,
            Field::ProfilePicture => return false,
        };
        *slot = value.into();
        true
    }

    pub fn into_record(self) -> Result<Record, FieldErrors> {
        validate_draft(&self).into_result()?;
        let dob = parse_optional(&self.dob)
            .map_err(|_| FieldErrors::single(Field::Dob, ValidationError::DobInvalid))?;
        let province = parse_optional(&self.province)
            .map_err(|_| FieldErrors::single(Field::Province, ValidationError::ProvinceInvalid))?;
        Ok(Record {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone_number: self.phone_number.trim().to_string(),
            dob,
            city: self.city.trim().to_string(),
            district: self.district.trim().to_string(),
            province,
            country: self.country.trim().to_string(),
            profile_picture: self.profile_picture,
        })
    }
}

impl From<&Record> for RecordDraft {
    fn from(record: &Record) -> Self {
        Self {
            name: record.name.clone(),
            email: record.email.clone(),
            phone_number: record.phone_number.clone(),
            dob: record.field_text(Field::Dob),
            city: record.city.clone(),
            district: record.district.clone(),
            province: record.field_text(Field::Province),
            country: record.country.clone(),
            profile_picture: record.profile_picture.clone(),
        }
    }
}

fn parse_optional<T: FromStr>(raw: &str) -> Result<Option<T>, T::Err> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        trimmed.parse().map(Some)
    }
}
