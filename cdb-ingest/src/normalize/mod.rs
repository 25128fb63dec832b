//! Deterministic text normalization used ahead of geocoding and
//! dedup-key construction. Pure functions, no network calls.

pub mod address;
pub mod phone;

pub use address::{clean_city, clean_street, clean_text, normalize_state};
pub use phone::normalize_phone;
