use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::Itertools;
use lostfound_geo::Gazetteer;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::lostfound::TAGS;

/// Maximum number of photos per incident.
pub const MAX_IMAGES: usize = 5;

/// Maximum size of a single photo in bytes.
pub const MAX_IMAGE_BYTES: usize = 500 * 1024;

thread_local! {
    static RE_PHONE_NUMBER: Regex = Regex::new(r"^\d{10}$").unwrap();
}

/// Rejected input, keyed by the offending field.
#[derive(Debug, Error)]
#[error("invalid input: {}", describe(.fields))]
pub struct Invalid {
    pub fields: BTreeMap<&'static str, String>,
}

impl Invalid {
    pub fn field(name: &'static str, message: impl Into<String>) -> Self {
        Self { fields: BTreeMap::from([(name, message.into())]) }
    }
}

fn describe(fields: &BTreeMap<&'static str, String>) -> String {
    fields.iter().map(|(name, message)| format!("{}: {}", name, message)).join(", ")
}

#[derive(Default)]
struct Checks {
    fields: BTreeMap<&'static str, String>,
}

impl Checks {
    fn fail(&mut self, name: &'static str, message: impl Into<String>) {
        self.fields.entry(name).or_insert_with(|| message.into());
    }

    fn finish(self) -> Result<(), Invalid> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(Invalid { fields: self.fields })
        }
    }
}

/// A report of a lost item as submitted by a user.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub location: String,

    pub date_lost: Option<NaiveDate>,

    #[serde(default)]
    pub date_found: Option<NaiveDate>,

    #[serde(default)]
    pub phone_number: String,
}

impl NewIncident {
    pub fn validate(&self, gazetteer: &Gazetteer) -> Result<(), Invalid> {
        let mut checks = Checks::default();

        if self.description.trim().is_empty() {
            checks.fail("description", "Description is required.");
        }

        if self.date_lost.is_none() {
            checks.fail("dateLost", "Date Lost is required.");
        }

        check_phone_number(&mut checks, &self.phone_number);

        if self.location.is_empty() {
            checks.fail("location", "Location is required.");
        } else if !gazetteer.contains(&self.location) {
            checks.fail("location", format!("Unknown location {:?}.", self.location));
        }

        if let Some(tag) = self.tags.iter().find(|tag| !TAGS.contains(&tag.as_str())) {
            checks.fail("tags", format!("Unknown tag {:?}.", tag));
        }

        checks.finish()
    }

    /// Tags in submission order with repeated selections removed.
    pub fn unique_tags(&self) -> Vec<String> {
        self.tags.iter().unique().cloned().collect()
    }
}

/// Changes the owner of an incident can make after reporting it.
/// Fields that are not set stay as they are.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentUpdate {
    pub status: Option<String>,
    pub description: Option<String>,
    pub date_found: Option<NaiveDate>,
    pub phone_number: Option<String>,
}

impl IncidentUpdate {
    pub fn validate(&self) -> Result<(), Invalid> {
        let mut checks = Checks::default();

        if let Some(status) = &self.status {
            if status.trim().is_empty() {
                checks.fail("status", "Status must not be empty.");
            }
        }

        if let Some(description) = &self.description {
            if description.trim().is_empty() {
                checks.fail("description", "Description is required.");
            }
        }

        if let Some(phone_number) = &self.phone_number {
            check_phone_number(&mut checks, phone_number);
        }

        checks.finish()
    }
}

fn check_phone_number(checks: &mut Checks, phone_number: &str) {
    let phone_number = phone_number.trim();

    if phone_number.is_empty() {
        checks.fail("phoneNumber", "Phone number is required.");
    } else if !RE_PHONE_NUMBER.with(|re| re.is_match(phone_number)) {
        checks.fail("phoneNumber", "Phone number must be 10 digits.");
    }
}

/// Checks the name and size of an uploaded photo and returns the name to store it under.
pub fn validate_image(name: &str, size: usize) -> Result<String, Invalid> {
    if size == 0 {
        return Err(Invalid::field("images", "Photo is empty."));
    }

    if size > MAX_IMAGE_BYTES {
        return Err(Invalid::field("images", format!("Photo exceeds the {}KB size limit.", MAX_IMAGE_BYTES / 1024)));
    }

    // keep names safe to use as a single path segment and in urls
    let name = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') { ch } else { '_' })
        .collect::<String>();

    if name.trim_matches('.').is_empty() {
        return Err(Invalid::field("images", "Photo needs a file name."));
    }

    Ok(name)
}

/// Checks that `path` may be added to the photos of an incident. Replacing a photo
/// that is already referenced is always allowed.
pub fn check_photo_limit(image_paths: &[String], path: &str) -> Result<(), Invalid> {
    if image_paths.iter().any(|p| p == path) {
        return Ok(());
    }

    if image_paths.len() >= MAX_IMAGES {
        return Err(Invalid::field("images", format!("At most {} photos per incident.", MAX_IMAGES)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use lostfound_geo::gazetteer;

    use super::*;

    fn report() -> NewIncident {
        NewIncident {
            tags: vec!["Wallets".into(), "Keys".into(), "Wallets".into()],
            description: "Brown leather wallet".into(),
            location: "Ndola".into(),
            date_lost: NaiveDate::from_ymd_opt(2024, 6, 12),
            date_found: None,
            phone_number: "0977123456".into(),
        }
    }

    #[test]
    fn accepts_a_complete_report() {
        report().validate(gazetteer().unwrap()).unwrap();
        assert_eq!(report().unique_tags(), vec!["Wallets".to_owned(), "Keys".to_owned()]);
    }

    #[test]
    fn reports_every_missing_field() {
        let empty: NewIncident = serde_yaml::from_str("{}").unwrap();

        let err = empty.validate(gazetteer().unwrap()).unwrap_err();
        let fields = err.fields.keys().copied().collect::<Vec<_>>();
        assert_eq!(fields, vec!["dateLost", "description", "location", "phoneNumber"]);
    }

    #[test]
    fn phone_number_needs_ten_digits() {
        let mut report = report();
        report.phone_number = "12345".into();

        let err = report.validate(gazetteer().unwrap()).unwrap_err();
        assert_eq!(err.fields["phoneNumber"], "Phone number must be 10 digits.");
    }

    #[test]
    fn location_and_tags_come_from_fixed_lists() {
        let mut report = report();
        report.location = "Atlantis".into();
        report.tags.push("Spaceships".into());

        let err = report.validate(gazetteer().unwrap()).unwrap_err();
        assert!(err.fields.contains_key("location"));
        assert!(err.fields.contains_key("tags"));
    }

    #[test]
    fn update_checks_only_given_fields() {
        IncidentUpdate::default().validate().unwrap();

        let update = IncidentUpdate { phone_number: Some("abc".into()), ..Default::default() };
        assert!(update.validate().is_err());

        let update = IncidentUpdate { status: Some("Claimed".into()), ..Default::default() };
        update.validate().unwrap();
    }

    #[test]
    fn image_limits() {
        assert_eq!(validate_image("my wallet.jpg", 1000).unwrap(), "my_wallet.jpg");
        assert!(validate_image("a.jpg", MAX_IMAGE_BYTES + 1).is_err());
        assert!(validate_image("..", 1000).is_err());
        assert!(validate_image("a.jpg", 0).is_err());
        assert_eq!(validate_image("../../etc/passwd", 10).unwrap(), ".._.._etc_passwd");
    }

    #[test]
    fn photo_limit_allows_replacing() {
        let full = (1..=MAX_IMAGES).map(|n| format!("p/{}.jpg", n)).collect::<Vec<_>>();

        assert!(check_photo_limit(&full[..4], "p/new.jpg").is_ok());
        assert!(check_photo_limit(&full, "p/new.jpg").is_err());
        assert!(check_photo_limit(&full, "p/3.jpg").is_ok());
    }
}
