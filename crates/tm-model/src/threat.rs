//! Threat catalog entries
//!
//! Categorical attributes arrive as free-form strings. They are stored as
//! received so unrecognised values survive a round trip, and resolved through
//! the typed accessors [`Threat::stride`] and [`Threat::likelihood_level`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// STRIDE threat classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrideCategory {
    /// Impersonating a user or component
    Spoofing,
    /// Unauthorised modification of data or code
    Tampering,
    /// Denying an action without the ability to prove otherwise
    Repudiation,
    /// Exposure of information to unauthorised parties
    #[serde(rename = "Information Disclosure")]
    InformationDisclosure,
    /// Degrading or denying service
    #[serde(rename = "Denial of Service")]
    DenialOfService,
    /// Gaining capabilities without authorisation
    #[serde(rename = "Elevation of Privilege")]
    ElevationOfPrivilege,
}

impl StrideCategory {
    /// All categories in canonical display order
    pub const ALL: [StrideCategory; 6] = [
        StrideCategory::Spoofing,
        StrideCategory::Tampering,
        StrideCategory::Repudiation,
        StrideCategory::InformationDisclosure,
        StrideCategory::DenialOfService,
        StrideCategory::ElevationOfPrivilege,
    ];

    /// Sentinel bucket for absent or unrecognised categories
    pub const SENTINEL: &'static str = "Uncategorized";

    /// Display label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Spoofing => "Spoofing",
            Self::Tampering => "Tampering",
            Self::Repudiation => "Repudiation",
            Self::InformationDisclosure => "Information Disclosure",
            Self::DenialOfService => "Denial of Service",
            Self::ElevationOfPrivilege => "Elevation of Privilege",
        }
    }

    /// Parse a free-form label
    ///
    /// Case-insensitive; `_`, `-` and repeated whitespace are treated as a
    /// single space, so `"denial_of_service"` and `"Denial of  Service"` both
    /// resolve.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(&normalized))
    }
}

impl fmt::Display for StrideCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Likelihood assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Likelihood {
    /// Likely to be exploited
    High,
    /// Plausible
    Medium,
    /// Unlikely
    Low,
}

impl Likelihood {
    /// All levels, highest first
    pub const ALL: [Likelihood; 3] = [Likelihood::High, Likelihood::Medium, Likelihood::Low];

    /// Sentinel bucket for threats without an assessment
    pub const SENTINEL: &'static str = "Not Assessed";

    /// Display label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Parse a free-form label (case-insensitive)
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.label().eq_ignore_ascii_case(trimmed))
    }
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sentinel for threats without a target asset
pub const UNKNOWN_TARGET: &str = "Unknown Target";

/// Sentinel for threats without a source actor
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

/// A single catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threat {
    /// Catalog key, unique within a model
    pub name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Targeted asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Threat source / actor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Impact statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    /// Raw likelihood label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<String>,
    /// Raw STRIDE category label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride_category: Option<String>,
    /// Mitigations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mitigations: Vec<String>,
    /// Preconditions for the attack
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
    /// Attack vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<String>,
    /// Reviewer notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Threat {
    /// Create a threat with only a name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// With STRIDE category label
    #[inline]
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.stride_category = Some(category.into());
        self
    }

    /// With likelihood label
    #[inline]
    #[must_use]
    pub fn with_likelihood(mut self, likelihood: impl Into<String>) -> Self {
        self.likelihood = Some(likelihood.into());
        self
    }

    /// With target asset
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// With threat source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Resolved STRIDE category, `None` if absent or unrecognised
    #[must_use]
    pub fn stride(&self) -> Option<StrideCategory> {
        self.stride_category.as_deref().and_then(StrideCategory::parse)
    }

    /// Resolved likelihood, `None` if absent or unrecognised
    #[must_use]
    pub fn likelihood_level(&self) -> Option<Likelihood> {
        self.likelihood.as_deref().and_then(Likelihood::parse)
    }

    /// Target label with sentinel fallback
    #[must_use]
    pub fn target_label(&self) -> &str {
        non_blank(self.target.as_deref()).unwrap_or(UNKNOWN_TARGET)
    }

    /// Source label with sentinel fallback
    #[must_use]
    pub fn source_label(&self) -> &str {
        non_blank(self.source.as_deref()).unwrap_or(UNKNOWN_SOURCE)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize(raw: &str) -> String {
    raw.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
