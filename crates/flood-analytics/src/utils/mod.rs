//! Utilities module - text normalization, display formatting and known-name matching

pub mod name_matcher;
pub mod text_utils;

// Re-export commonly used utilities
pub use name_matcher::{NameMatch, NameMatcher};
pub use text_utils::TextUtils;
