//! Domain name attribute values

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::TypeError;

const MAX_DOMAIN_LEN: usize = 253;

fn is_valid_label(label: &str) -> bool {
    static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    LABEL
        .get_or_init(|| Regex::new(r"^(?:[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9_])?)$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(label))
}

/// A validated, lower-cased domain name without trailing dot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainName(String);

impl DomainName {
    /// Parse and normalize a domain name
    pub fn new(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        if trimmed.is_empty() || trimmed.len() > MAX_DOMAIN_LEN {
            return Err(TypeError::new("domain", format!("\"{s}\"")));
        }

        let normalized = trimmed.to_ascii_lowercase();
        if !normalized.split('.').all(is_valid_label) {
            return Err(TypeError::new("domain", format!("\"{s}\"")));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` equals `parent` or lies beneath it
    pub fn is_subdomain_of(&self, parent: &DomainName) -> bool {
        if self.0 == parent.0 {
            return true;
        }
        self.0
            .strip_suffix(parent.0.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DomainName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
