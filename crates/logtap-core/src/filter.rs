//! Filter patterns.
//!
//! A [`LineFilter`] carries two compiled forms of the same pattern: an
//! anchored one for live gating (the whole line must match) and an unanchored
//! one for narrowing already-buffered records (substring find). The two
//! granularities stay separate.
//!
//! A pattern that fails to compile is logged once and then simply never
//! matches.

use crate::error::FilterError;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct LineFilter {
    pattern: String,
    compiled: Option<Compiled>,
}

#[derive(Debug, Clone)]
struct Compiled {
    full: Regex,
    find: Regex,
}

impl LineFilter {
    /// Compile `pattern`, logging and keeping an inert filter on failure.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        match Self::try_new(pattern.clone()) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err.source, "filter never matches");
                Self { pattern, compiled: None }
            }
        }
    }

    pub fn try_new(pattern: impl Into<String>) -> Result<Self, FilterError> {
        let pattern = pattern.into();
        let compile = |src: &str| {
            Regex::new(src).map_err(|source| FilterError {
                pattern: pattern.clone(),
                source,
            })
        };
        let find = compile(&pattern)?;
        let full = compile(&format!("^(?:{pattern})$"))?;
        Ok(Self {
            pattern,
            compiled: Some(Compiled { full, find }),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    /// Whole-string match, used to decide whether a live line becomes a record.
    pub fn matches_line(&self, text: &str) -> bool {
        self.compiled.as_ref().is_some_and(|c| c.full.is_match(text))
    }

    /// Substring find, used to narrow buffered records.
    pub fn finds_in(&self, text: &str) -> bool {
        self.compiled.as_ref().is_some_and(|c| c.find.is_match(text))
    }
}
