//! Identifier types shared between the session and orchestration layers.

use std::fmt;

use super::error::{FlowError, FlowResult};

const MAX_KEY_LEN: usize = 128;

/// Caller supplied request identifier, safe to use as a single path component.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Accepts ASCII alphanumerics, `-` and `_`, up to 128 characters.
    pub fn parse(raw: &str) -> FlowResult<Self> {
        if raw.is_empty() {
            return Err(FlowError::invalid("identifier is empty"));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(FlowError::invalid("identifier is too long"));
        }
        if !raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(FlowError::invalid(format!(
                "identifier {raw:?} contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
