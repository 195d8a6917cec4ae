// src/models/student.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::booklet::parse_padded_id;

/// Represents the 'students' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,

    /// Teacher the student is enrolled with.
    pub owner_id: i64,
}

impl Student {
    /// Registration number printed on answer sheets: the id zero-padded to 5 digits.
    pub fn registration(&self) -> String {
        format!("{:05}", self.id)
    }
}

/// Parses a printed registration number ("00042") back into a student id.
pub fn parse_registration(registration: &str) -> Option<i64> {
    parse_padded_id(registration)
}
