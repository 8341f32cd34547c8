use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

use crate::picture::ProfilePicture;

mod draft;

pub use draft::RecordDraft;

pub const DEFAULT_COUNTRY: &str = "Nepal";

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// One person's entry in the registry.
///
/// Serialized as a flat camelCase map; absent optional values are written as
/// empty strings so the persisted list stays a list of string maps.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub dob: Option<BirthDate>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub district: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub province: Option<Province>,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub profile_picture: Option<ProfilePicture>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            phone_number: String::new(),
            dob: None,
            city: String::new(),
            district: String::new(),
            province: None,
            country: default_country(),
            profile_picture: None,
        }
    }
}

impl Record {
    /// Display form of a field, empty when the field is unset.
    pub fn field_text(&self, field: Field) -> String {
        match field {
            Field::Name => self.name.clone(),
            Field::Email => self.email.clone(),
            Field::PhoneNumber => self.phone_number.clone(),
            Field::Dob => self.dob.map(|dob| dob.to_string()).unwrap_or_default(),
            Field::City => self.city.clone(),
            Field::District => self.district.clone(),
            Field::Province => self
                .province
                .map(|province| province.to_string())
                .unwrap_or_default(),
            Field::Country => self.country.clone(),
            Field::ProfilePicture => self
                .profile_picture
                .as_ref()
                .map(|picture| picture.as_str().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn has_picture(&self) -> bool {
        self.profile_picture.is_some()
    }
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

/// Form fields in the order the entry form and edit modal present them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum Field {
    Name,
    Email,
    PhoneNumber,
    Dob,
    City,
    District,
    Province,
    Country,
    ProfilePicture,
}

impl Field {
    pub fn all() -> Vec<Field> {
        Field::iter().collect()
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::Email => "Email",
            Field::PhoneNumber => "Phone Number",
            Field::Dob => "DOB",
            Field::City => "City",
            Field::District => "District",
            Field::Province => "Province",
            Field::Country => "Country",
            Field::ProfilePicture => "Profile Picture",
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self, Field::Name | Field::Email | Field::PhoneNumber)
    }

    /// Fields whose text takes part in table search. Picture payloads are
    /// encoded binary and never match meaningfully.
    pub fn is_searchable(self) -> bool {
        !matches!(self, Field::ProfilePicture)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
pub enum Province {
    #[strum(to_string = "Province No. 1")]
    One,
    #[strum(to_string = "Province No. 2")]
    Two,
    #[strum(to_string = "Province No. 3")]
    Three,
    #[strum(to_string = "Province No. 4")]
    Four,
    // Older entry forms wrote this one without the space.
    #[strum(to_string = "Province No. 5", serialize = "Province No.5")]
    Five,
    #[strum(to_string = "Province No. 6")]
    Six,
    #[strum(to_string = "Province No. 7")]
    Seven,
}

impl Province {
    pub fn all() -> Vec<Province> {
        Province::iter().collect()
    }
}

/// Calendar date of birth, written as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BirthDate(Date);

impl FromStr for BirthDate {
    type Err = time::error::Parse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Date::parse(s.trim(), DATE_FORMAT).map(Self)
    }
}

impl fmt::Display for BirthDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(DATE_FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&formatted)
    }
}
