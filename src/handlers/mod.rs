// src/handlers/mod.rs

pub mod results;
