use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PageError;

/// A stored record: flat map of field name to value.
pub type Fields = BTreeMap<String, String>;

/// Field name under which the picture URL is stored.
pub const PROFILE_PICTURE: &str = "profilePicture";

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub district: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl UserProfile {
    /// Builds a profile from a stored record. Missing scalar fields load as
    /// empty strings; unknown fields are ignored.
    pub fn from_fields(fields: &Fields) -> Self {
        let scalar = |field: ProfileField| {
            fields
                .get(field.as_str())
                .cloned()
                .unwrap_or_default()
        };

        Self {
            first_name: scalar(ProfileField::FirstName),
            last_name: scalar(ProfileField::LastName),
            email: scalar(ProfileField::Email),
            gender: scalar(ProfileField::Gender),
            district: scalar(ProfileField::District),
            profile_picture: fields.get(PROFILE_PICTURE).cloned(),
        }
    }

    /// The five editable fields, without the picture.
    pub fn scalar_fields(&self) -> Fields {
        ProfileField::ALL
            .iter()
            .map(|field| (field.as_str().to_string(), self.get(*field).to_string()))
            .collect()
    }

    /// Every field, including the picture when one is set.
    pub fn to_fields(&self) -> Fields {
        let mut fields = self.scalar_fields();
        if let Some(picture) = &self.profile_picture {
            fields.insert(PROFILE_PICTURE.to_string(), picture.clone());
        }
        fields
    }

    pub fn get(&self, field: ProfileField) -> &str {
        match field {
            ProfileField::FirstName => &self.first_name,
            ProfileField::LastName => &self.last_name,
            ProfileField::Email => &self.email,
            ProfileField::Gender => &self.gender,
            ProfileField::District => &self.district,
        }
    }

    pub fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        let slot = match field {
            ProfileField::FirstName => &mut self.first_name,
            ProfileField::LastName => &mut self.last_name,
            ProfileField::Email => &mut self.email,
            ProfileField::Gender => &mut self.gender,
            ProfileField::District => &mut self.district,
        };
        *slot = value.into();
    }
}

/// Plain text profile card, as shown on the page in view mode.
impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "নমস্কার, {}", self.first_name)?;
        writeln!(
            f,
            "Picture: {}",
            self.profile_picture.as_deref().unwrap_or("(none)")
        )?;
        writeln!(f, "Name: {} {}", self.first_name, self.last_name)?;
        writeln!(f, "email: {}", self.email)?;
        writeln!(f, "Gender: {}", self.gender)?;
        write!(f, "District: {}", self.district)
    }
}

/// The editable scalar fields of a profile, addressed by their stored names.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub enum ProfileField {
    FirstName,
    LastName,
    Email,
    Gender,
    District,
}

impl ProfileField {
    pub const ALL: [ProfileField; 5] = [
        ProfileField::FirstName,
        ProfileField::LastName,
        ProfileField::Email,
        ProfileField::Gender,
        ProfileField::District,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::FirstName => "firstName",
            ProfileField::LastName => "lastName",
            ProfileField::Email => "email",
            ProfileField::Gender => "gender",
            ProfileField::District => "district",
        }
    }

    /// Human label used by prompts.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::FirstName => "First name",
            ProfileField::LastName => "Last name",
            ProfileField::Email => "Email",
            ProfileField::Gender => "Gender",
            ProfileField::District => "District",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileField {
    type Err = PageError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ProfileField::ALL
            .into_iter()
            .find(|field| field.as_str() == name)
            .ok_or_else(|| PageError::UnknownField(name.to_string()))
    }
}

/// An image picked by the user, not yet uploaded.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ImageFile {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}
