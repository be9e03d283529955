//! Projection (coordinate reference system) identifiers
//!
//! hubflow never transforms coordinates between projections. A projection is
//! only compared, so that sources in a different system are rejected instead
//! of being silently misplaced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Projection of a grid or a vector layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
    /// PROJ string if available
    proj: Option<String>,
}

impl Projection {
    /// Create a projection from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
            proj: None,
        }
    }

    /// Create a projection from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
            proj: None,
        }
    }

    /// Create a projection from a PROJ string
    pub fn from_proj(proj: impl Into<String>) -> Self {
        Self {
            wkt: None,
            epsg: None,
            proj: Some(proj.into()),
        }
    }

    /// Parse `EPSG:<code>`, a PROJ string (`+proj=...`) or fall back to WKT.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(code) = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .and_then(|c| c.parse().ok())
        {
            return Self::from_epsg(code);
        }
        if trimmed.starts_with("+proj") {
            return Self::from_proj(trimmed);
        }
        Self::from_wkt(trimmed)
    }

    /// WGS84 geographic (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Get PROJ string
    pub fn proj(&self) -> Option<&str> {
        self.proj.as_deref()
    }

    /// Check if two projections are equivalent
    pub fn is_equivalent(&self, other: &Projection) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.proj, &other.proj) {
            return a == b;
        }
        false
    }

    /// String identifier, e.g. `EPSG:32633`
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_parse() {
        assert_eq!(Projection::parse("EPSG:32633").epsg(), Some(32633));
        assert_eq!(Projection::parse("+proj=utm +zone=33").proj(), Some("+proj=utm +zone=33"));
        assert!(Projection::parse("PROJCS[\"x\"]").wkt().is_some());
    }

    #[test]
    fn test_projection_equivalence() {
        let a = Projection::from_epsg(4326);
        assert!(a.is_equivalent(&Projection::wgs84()));
        assert!(!a.is_equivalent(&Projection::from_epsg(3035)));
        assert!(!a.is_equivalent(&Projection::from_wkt("GEOGCS")));
    }
}
