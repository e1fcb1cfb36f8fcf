//! Hazard-zone registry.
//!
//! Zones are validated once, when the registry is built. Evaluation code can
//! therefore assume every zone has a finite centre and a positive radius.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HazardCategory {
    Fire,
    Leak,
    Electrical,
    Obstruction,
    General,
}

/// Ordered by urgency, `Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardZone {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub category: HazardCategory,
    pub severity: Severity,
    pub label: String,
}

impl HazardZone {
    fn validate(&self) -> Result<(), LinkError> {
        if self.id.trim().is_empty() {
            return Err(LinkError::Registry("zone with an empty id".into()));
        }
        if self.label.trim().is_empty() {
            return Err(LinkError::Registry(format!("zone {}: empty label", self.id)));
        }
        if !(self.x.is_finite() && self.y.is_finite()) {
            return Err(LinkError::Registry(format!(
                "zone {}: centre ({}, {}) is not finite",
                self.id, self.x, self.y
            )));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(LinkError::Registry(format!(
                "zone {}: radius must be positive, got {}",
                self.id, self.radius
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    zone: Vec<HazardZone>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HazardRegistry {
    zones: Vec<HazardZone>,
}

impl HazardRegistry {
    pub fn new(zones: Vec<HazardZone>) -> Result<Self, LinkError> {
        let mut seen = HashSet::new();
        for zone in &zones {
            zone.validate()?;
            if !seen.insert(zone.id.as_str()) {
                return Err(LinkError::Registry(format!("duplicate zone id {}", zone.id)));
            }
        }
        Ok(Self { zones })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LinkError> {
        let file: RegistryFile = toml::from_str(text)?;
        Self::new(file.zone)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&text)?;
        log::info!("Loaded {} hazard zones from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Loads `path`, or falls back to [`HazardRegistry::builtin`] when the
    /// file does not exist. A file that exists but is invalid is an error.
    pub fn load_or_builtin(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No hazard registry at {}, using built-in zones", path.display());
            return Ok(Self::builtin());
        }
        Self::load(path)
    }

    /// The demonstration facility layout.
    pub fn builtin() -> Self {
        let zone = |id: &str, x, y, radius, category, severity, label: &str| HazardZone {
            id: id.to_string(),
            x,
            y,
            radius,
            category,
            severity,
            label: label.to_string(),
        };
        Self {
            zones: vec![
                zone("h1", 25.0, 75.0, 12.0, HazardCategory::Leak, Severity::Critical, "WING B GAS LEAK"),
                zone("h2", 75.0, 25.0, 8.0, HazardCategory::Electrical, Severity::High, "EXPOSED WIRING"),
                zone("h3", 50.0, 45.0, 10.0, HazardCategory::Fire, Severity::Critical, "ACTIVE THERMAL EVENT"),
            ],
        }
    }

    pub fn zones(&self) -> &[HazardZone] {
        &self.zones
    }

    pub fn get(&self, id: &str) -> Option<&HazardZone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
