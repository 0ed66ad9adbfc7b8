//! Endpoint identifiers.
//!
//! An endpoint id is `scheme:ssp`. Two schemes get extra validation:
//!   dtn — `dtn:none` is the null endpoint
//!   ipn — ssp must be `<node>.<service>`, both decimal
//!
//! Anything else only needs a well-formed scheme and a non-empty ssp.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The null endpoint. Used as the default report-to.
pub const NULL_EID: &str = "dtn:none";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EidError {
    #[error("endpoint id is empty")]
    Empty,
    #[error("endpoint id {0:?} has no scheme separator")]
    MissingScheme(String),
    #[error("endpoint id {0:?} has an invalid scheme")]
    BadScheme(String),
    #[error("endpoint id {0:?} has an empty scheme-specific part")]
    EmptySsp(String),
    #[error("ipn endpoint id {0:?} must be <node>.<service>")]
    BadIpn(String),
}

/// A validated endpoint id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Eid(String);

impl Eid {
    pub fn parse(text: &str) -> Result<Self, EidError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EidError::Empty);
        }
        let (scheme, ssp) = text
            .split_once(':')
            .ok_or_else(|| EidError::MissingScheme(text.to_string()))?;

        let scheme_ok = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(EidError::BadScheme(text.to_string()));
        }
        if ssp.is_empty() {
            return Err(EidError::EmptySsp(text.to_string()));
        }

        if scheme.eq_ignore_ascii_case("ipn") {
            let valid = ssp
                .split_once('.')
                .map(|(node, service)| is_decimal(node) && is_decimal(service))
                .unwrap_or(false);
            if !valid {
                return Err(EidError::BadIpn(text.to_string()));
            }
        }

        Ok(Self(text.to_string()))
    }

    pub fn null() -> Self {
        Self(NULL_EID.to_string())
    }

    pub fn is_null(&self) -> bool {
        self.0 == NULL_EID
    }

    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(s, _)| s).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for Eid {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Eid::parse(s)
    }
}

impl TryFrom<String> for Eid {
    type Error = EidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Eid::parse(&value)
    }
}

impl From<Eid> for String {
    fn from(eid: Eid) -> Self {
        eid.0
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
