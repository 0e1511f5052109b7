//! Identity of the update service a client binds to.
//!
//! Endpoint format: `package/component`
//!
//! A component starting with `.` is relative to the package, so
//! `ota.update/.UpdateService` names `ota.update.UpdateService`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named service endpoint in the form `package/component`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceEndpoint {
    package: String,
    component: String,
}

impl ServiceEndpoint {
    /// The endpoint used when no other is configured.
    pub const DEFAULT: &'static str = "ota.update/.UpdateService";

    pub fn new(package: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            component: component.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Fully qualified component name, expanding the relative `.` form.
    pub fn qualified_component(&self) -> String {
        if self.component.starts_with('.') {
            format!("{}{}", self.package, self.component)
        } else {
            self.component.clone()
        }
    }
}

impl Default for ServiceEndpoint {
    fn default() -> Self {
        Self::new("ota.update", ".UpdateService")
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.component)
    }
}

impl FromStr for ServiceEndpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (package, component) = s
            .split_once('/')
            .ok_or_else(|| EndpointParseError::MissingSlash(s.to_string()))?;

        if package.is_empty() {
            return Err(EndpointParseError::EmptyPackage);
        }
        if component.is_empty() || component == "." {
            return Err(EndpointParseError::EmptyComponent);
        }

        Ok(Self::new(package, component))
    }
}

impl TryFrom<String> for ServiceEndpoint {
    type Error = EndpointParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ServiceEndpoint> for String {
    fn from(endpoint: ServiceEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Error parsing an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("endpoint must contain '/' separator, got: {0}")]
    MissingSlash(String),
    #[error("endpoint package cannot be empty")]
    EmptyPackage,
    #[error("endpoint component cannot be empty")]
    EmptyComponent,
}
