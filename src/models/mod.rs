// src/models/mod.rs

pub mod booklet;
pub mod question;
pub mod result;
pub mod student;
