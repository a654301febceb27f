//! Deterministic asset file names.
//!
//! `<Namespace>-<objectId>[-scale<factor>].<ext>`. The updater parses these
//! names back into node identities, so the format must stay unambiguous:
//! object ids never contain `-`.

use crate::error::{Result, SyncError};
use crate::node::{Namespace, ObjectId, Pin};
use regex::Regex;
use std::sync::LazyLock;

static ASSET_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<ns>[A-Za-z]+)-(?P<id>[A-Za-z0-9]{1,64})(?:-scale(?P<scale>[0-9]+(?:\.[0-9]+)?))?\.(?P<ext>[a-z]+)$",
    )
    .expect("asset name regex must compile")
});

/// Resolution of a stored image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    Full,
    Scaled(f32),
}

impl Variant {
    /// The variant that counts as a node's primary asset.
    pub fn primary_for(namespace: Namespace, preview_scale: f32) -> Variant {
        match namespace {
            Namespace::Zone => Variant::Scaled(preview_scale),
            _ => Variant::Full,
        }
    }

    pub fn scale(&self) -> f32 {
        match self {
            Variant::Full => 1.0,
            Variant::Scaled(scale) => *scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Image,
    /// KMZ map overlay.
    Overlay,
}

impl AssetKind {
    pub fn extension(&self) -> &'static str {
        match self {
            AssetKind::Image => "jpg",
            AssetKind::Overlay => "kmz",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" => Some(AssetKind::Image),
            "kmz" => Some(AssetKind::Overlay),
            _ => None,
        }
    }
}

/// Parsed or constructed asset file name.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetName {
    pub pin: Pin,
    pub variant: Variant,
    pub kind: AssetKind,
}

impl AssetName {
    pub fn image(pin: &Pin, variant: Variant) -> Self {
        Self {
            pin: pin.clone(),
            variant,
            kind: AssetKind::Image,
        }
    }

    pub fn overlay(pin: &Pin) -> Self {
        Self {
            pin: pin.clone(),
            variant: Variant::Full,
            kind: AssetKind::Overlay,
        }
    }

    pub fn file_name(&self) -> String {
        match self.variant {
            Variant::Full => format!(
                "{}-{}.{}",
                self.pin.namespace(),
                self.pin.object_id(),
                self.kind.extension()
            ),
            Variant::Scaled(scale) => format!(
                "{}-{}-scale{}.{}",
                self.pin.namespace(),
                self.pin.object_id(),
                scale,
                self.kind.extension()
            ),
        }
    }

    /// Recover identity and variant from a file name.
    pub fn parse(file_name: &str) -> Result<Self> {
        let unknown = || SyncError::UnknownNamespace(file_name.to_string());
        let caps = ASSET_NAME_RE.captures(file_name).ok_or_else(unknown)?;

        let namespace: Namespace = caps["ns"].parse()?;
        let object_id = ObjectId::new(&caps["id"])?;
        let kind = AssetKind::from_extension(&caps["ext"]).ok_or_else(unknown)?;
        let variant = match caps.name("scale") {
            Some(m) => {
                let scale: f32 = m.as_str().parse().map_err(|_| unknown())?;
                if (scale - 1.0).abs() < f32::EPSILON {
                    Variant::Full
                } else {
                    Variant::Scaled(scale)
                }
            }
            None => Variant::Full,
        };

        Ok(Self {
            pin: Pin::new(namespace, object_id),
            variant,
            kind,
        })
    }
}

impl std::fmt::Display for AssetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pin(s: &str) -> Pin {
        s.parse().unwrap()
    }

    #[test]
    fn test_full_image_name() {
        let name = AssetName::image(&pin("Sector/PL5j43cBRP7F24ecXGOR"), Variant::Full);
        assert_eq!(name.file_name(), "Sector-PL5j43cBRP7F24ecXGOR.jpg");
    }

    #[test]
    fn test_scaled_image_name() {
        let name = AssetName::image(&pin("Zone/Z1"), Variant::Scaled(0.5));
        assert_eq!(name.file_name(), "Zone-Z1-scale0.5.jpg");
        let parsed = AssetName::parse("Zone-Z1-scale0.5.jpg").unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn test_overlay_name() {
        let name = AssetName::overlay(&pin("Zone/Z1"));
        assert_eq!(name.file_name(), "Zone-Z1.kmz");
        assert_eq!(AssetName::parse("Zone-Z1.kmz").unwrap().kind, AssetKind::Overlay);
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        for name in ["notes.txt", "Crag-X1.jpg", "Zone-.jpg", "Zone-Z1.png", "Zone-Z1-extra.jpg"] {
            let err = AssetName::parse(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnknownNamespace, "{}", name);
        }
    }

    #[test]
    fn test_primary_variant_per_namespace() {
        assert_eq!(Variant::primary_for(Namespace::Zone, 0.5), Variant::Scaled(0.5));
        assert_eq!(Variant::primary_for(Namespace::Sector, 0.5), Variant::Full);
    }
}
