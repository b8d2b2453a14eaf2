//! Controlled vocabularies shared by the metadata files and the manifest.

// External crates
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base of the `describedBy` URLs.
pub const AIND_SCHEMA_URL: &str =
    "https://raw.githubusercontent.com/AllenNeuralDynamics/aind-data-schema/main/src/aind_data_schema/core";

/// Timestamp layout used in dataset and manifest names.
pub const NAME_DATETIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Data modalities produced by the mesoscope rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modality {
    /// Planar optical physiology.
    Pophys,
    /// Behavior data.
    Behavior,
    /// Behavior camera videos.
    BehaviorVideos,
}

impl Modality {
    /// Short name, also used as the manifest key.
    pub fn abbreviation(self) -> &'static str {
        match self {
            Modality::Pophys => "pophys",
            Modality::Behavior => "behavior",
            Modality::BehaviorVideos => "behavior-videos",
        }
    }

    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            Modality::Pophys => "Planar optical physiology",
            Modality::Behavior => "Behavior",
            Modality::BehaviorVideos => "Behavior videos",
        }
    }

    /// Inverse of [`Modality::abbreviation`].
    pub fn from_abbreviation(abbreviation: &str) -> Option<Self> {
        match abbreviation {
            "pophys" => Some(Modality::Pophys),
            "behavior" => Some(Modality::Behavior),
            "behavior-videos" => Some(Modality::BehaviorVideos),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Serialized form of a controlled-vocabulary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedTerm {
    /// Human readable name.
    pub name: String,
    /// Short name, if the term has one.
    pub abbreviation: Option<String>,
}

impl From<Modality> for NamedTerm {
    fn from(m: Modality) -> Self {
        Self {
            name: m.name().to_string(),
            abbreviation: Some(m.abbreviation().to_string()),
        }
    }
}

/// Acquisition platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Multiplane optical physiology (mesoscope).
    MultiplaneOphys,
}

impl Platform {
    /// Short name used in dataset names.
    pub fn abbreviation(self) -> &'static str {
        match self {
            Platform::MultiplaneOphys => "multiplane-ophys",
        }
    }

    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            Platform::MultiplaneOphys => "Multiplane optical physiology platform",
        }
    }
}

impl From<Platform> for NamedTerm {
    fn from(p: Platform) -> Self {
        Self {
            name: p.name().to_string(),
            abbreviation: Some(p.abbreviation().to_string()),
        }
    }
}

/// Institutions named in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organization {
    /// Allen Institute for Neural Dynamics
    Aind,
    /// Allen Institute
    Ai,
}

impl Organization {
    /// Short name, e.g. `AIND`.
    pub fn abbreviation(self) -> &'static str {
        match self {
            Organization::Aind => "AIND",
            Organization::Ai => "AI",
        }
    }

    /// Full name.
    pub fn name(self) -> &'static str {
        match self {
            Organization::Aind => "Allen Institute for Neural Dynamics",
            Organization::Ai => "Allen Institute",
        }
    }
}

impl From<Organization> for NamedTerm {
    fn from(o: Organization) -> Self {
        Self {
            name: o.name().to_string(),
            abbreviation: Some(o.abbreviation().to_string()),
        }
    }
}

/// Person or entity with an optional registry identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidName {
    /// Full name.
    pub name: String,
    /// Short name, if any.
    pub abbreviation: Option<String>,
    /// Registry the identifier belongs to.
    pub registry: Option<NamedTerm>,
    /// Identifier within `registry`.
    pub registry_identifier: Option<String>,
}

impl PidName {
    /// Name only, no registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abbreviation: None,
            registry: None,
            registry_identifier: None,
        }
    }
}

/// A funding source of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Funding {
    /// Funding organization.
    pub funder: NamedTerm,
    /// Grant, if known.
    pub grant_number: Option<String>,
    /// Person or group funded, if known.
    pub fundee: Option<String>,
}

impl Funding {
    /// Funding by `funder` with no grant details.
    pub fn from_funder(funder: Organization) -> Self {
        Self {
            funder: funder.into(),
            grant_number: None,
            fundee: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_abbreviations_round_trip() {
        for m in [Modality::Pophys, Modality::Behavior, Modality::BehaviorVideos] {
            assert_eq!(Modality::from_abbreviation(m.abbreviation()), Some(m));
        }
        assert_eq!(Modality::from_abbreviation("ecephys"), None);
    }
}
