use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScienceError};

const PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// A validated DOI. Casing is kept as given; comparisons ignore it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
pub struct Doi(String);

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();

        let mut stripped = trimmed;
        for prefix in PREFIXES {
            if let Some(head) = stripped.get(..prefix.len())
                && head.eq_ignore_ascii_case(prefix)
            {
                stripped = stripped[prefix.len()..].trim_start();
                break;
            }
        }

        // "10." registrant, a slash, and a non-empty suffix.
        let Some((registrant, suffix)) = stripped.split_once('/') else {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        };
        if !registrant.starts_with("10.") || registrant.len() <= 3 || suffix.is_empty() {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        }
        if stripped.chars().any(char::is_whitespace) {
            return Err(ScienceError::InvalidDoi(input.to_string()));
        }

        Ok(Self(stripped.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Doi {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_doi() {
        let doi = Doi::parse("10.1000/xyz123").unwrap();
        assert_eq!(doi.as_str(), "10.1000/xyz123");
    }

    #[test]
    fn strips_resolver_and_scheme_prefixes() {
        for input in [
            "https://doi.org/10.1000/xyz123",
            "http://dx.doi.org/10.1000/xyz123",
            "doi:10.1000/xyz123",
            "DOI: 10.1000/xyz123",
            "  10.1000/xyz123\n",
        ] {
            assert_eq!(Doi::parse(input).unwrap().as_str(), "10.1000/xyz123", "{input}");
        }
    }

    #[test]
    fn keeps_casing_but_compares_case_insensitively() {
        let upper = Doi::parse("10.48550/arXiv.1706.03762").unwrap();
        assert_eq!(upper.as_str(), "10.48550/arXiv.1706.03762");
        assert_eq!(upper, Doi::parse("10.48550/arxiv.1706.03762").unwrap());
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["not-a-doi", "10.1000", "10.1000/", "10./abc", "", "10.1000/a b"] {
            assert!(Doi::parse(input).is_err(), "{input}");
        }
    }
}
