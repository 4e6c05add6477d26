//! Normalized voter records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fingerprint::{Fingerprint, VoterId};
use crate::geo::Address;

/// Collapse whitespace, strip everything but alphanumerics and spaces, and
/// title-case each word.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|word| !word.is_empty())
        .map(|word| title_case(&word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    word.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                single_char_mapping(c, c.to_uppercase())
            } else {
                single_char_mapping(c, c.to_lowercase())
            }
        })
        .collect()
}

// Multi-char mappings (ß -> SS, İ -> i̇) are left alone so the result stays a fixed point.
fn single_char_mapping(c: char, mut mapped: impl Iterator<Item = char>) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(m), None) => m,
        _ => c,
    }
}

/// Collapse whitespace, strip punctuation, upper-case (state codes).
pub fn normalize_upper(s: &str) -> String {
    normalize(s).to_uppercase()
}

/// Trim and lower-case (email addresses keep their punctuation).
pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Keep digits only.
pub fn normalize_phone(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Positions of the fields in a bulk-file row.
///
/// The voter-ID column is not part of the layout: it moves between file
/// vintages and is discovered with [`crate::columns::ColumnFinder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub surname: usize,
    pub forename: usize,
    pub middle_name: usize,
    pub suffix: usize,
    pub house: usize,
    pub street: usize,
    pub apartment: usize,
    pub city: usize,
    pub state: usize,
    pub postal_code: usize,
    pub phone: usize,
    pub email: usize,
    pub date_of_birth: usize,
}

impl Default for ColumnLayout {
    /// Layout of the county board of elections extract.
    fn default() -> Self {
        Self {
            surname: 1,
            forename: 2,
            middle_name: 3,
            suffix: 4,
            house: 5,
            street: 6,
            apartment: 7,
            city: 11,
            state: 12,
            postal_code: 13,
            phone: 15,
            email: 16,
            date_of_birth: 27,
        }
    }
}

/// A voter as needed to prefill election forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub surname: String,
    pub forename: String,
    /// At most one character.
    pub middle_initial: String,
    pub suffix: String,
    pub house: String,
    pub street: String,
    pub apartment: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone: String,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub voter_id: VoterId,
}

impl VoterRecord {
    /// Materialize a record from a bulk-file row whose voter ID was already parsed.
    ///
    /// Missing cells read as empty. An unparseable date of birth is logged and
    /// dropped rather than losing the voter.
    pub fn from_row(row: &[String], layout: &ColumnLayout, voter_id: VoterId) -> Self {
        let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or("");

        let middle_initial = normalize(cell(layout.middle_name))
            .chars()
            .next()
            .map(String::from)
            .unwrap_or_default();

        let dob_cell = cell(layout.date_of_birth).trim();
        let date_of_birth = if dob_cell.is_empty() {
            None
        } else {
            match NaiveDate::parse_from_str(dob_cell, "%m/%d/%Y") {
                Ok(date) => Some(date),
                Err(e) => {
                    warn!(voter_id = %voter_id, value = dob_cell, error = %e, "Unparseable date of birth");
                    None
                }
            }
        };

        Self {
            surname: normalize(cell(layout.surname)),
            forename: normalize(cell(layout.forename)),
            middle_initial,
            suffix: normalize(cell(layout.suffix)),
            house: normalize(cell(layout.house)),
            street: normalize(cell(layout.street)),
            apartment: normalize(cell(layout.apartment)),
            city: normalize(cell(layout.city)),
            state: normalize_upper(cell(layout.state)),
            postal_code: normalize(cell(layout.postal_code)),
            phone: normalize_phone(cell(layout.phone)),
            email: normalize_email(cell(layout.email)),
            date_of_birth,
            voter_id,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.voter_id.fingerprint()
    }

    /// "house street", as printed on a ballot application.
    pub fn street_address(&self) -> String {
        format!("{} {}", self.house, self.street).trim().to_string()
    }

    /// The residence as a geocodable address.
    pub fn residence(&self) -> Address {
        Address::new(&self.house, &self.street, &self.postal_code)
    }
}
