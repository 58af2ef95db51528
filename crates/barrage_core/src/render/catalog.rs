//! # Visual Catalog
//!
//! Static mesh/collider metadata per render id, loaded once from TOML.
//!
//! ```toml
//! [[bullet]]
//! name = "orb"
//! z_order = 10
//! color = true
//! deletion_effect = "orb_pop"
//! mesh = { width = 16.0, height = 16.0 }
//! collider = { shape = "circle", radius = 6.0 }
//!
//! [[bullet]]
//! name = "orb_pop"
//! color = true
//!
//! [[laser]]
//! name = "beam"
//! mesh = { width = 8.0, height = 32.0 }
//! collider = { shape = "box", half_width = 3.0, half_height = 16.0 }
//! ```

use std::collections::HashSet;
use std::path::Path;

use barrage_shared::constants::{BASE_STRIDE, COLOR_FIELDS, CUSTOM_FIELDS};
use serde::{Deserialize, Serialize};

use super::{RenderId, RenderKind};
use crate::error::{KernelError, KernelResult};

/// Quad dimensions and atlas rectangle of a visual.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshInfo {
    /// Quad width in world units.
    pub width: f32,
    /// Quad height in world units.
    pub height: f32,
    /// Atlas rectangle: u, v, width, height.
    pub uv: [f32; 4],
}

impl Default for MeshInfo {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            uv: [0.0, 0.0, 1.0, 1.0],
        }
    }
}

/// Collision shape handed to the collision collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Collider {
    /// Purely cosmetic.
    #[default]
    None,
    /// Circle around the instance origin.
    Circle {
        /// Radius in local units.
        radius: f32,
    },
    /// Axis-aligned box in local space.
    Box {
        /// Half extent along local x.
        half_width: f32,
        /// Half extent along local y.
        half_height: f32,
    },
}

/// One catalog entry as written in the TOML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisualDef {
    /// Unique name within its kind.
    pub name: String,
    /// Quad and atlas data.
    #[serde(default)]
    pub mesh: MeshInfo,
    /// Collision shape.
    #[serde(default)]
    pub collider: Collider,
    /// Initial draw order; mutable at runtime.
    #[serde(default)]
    pub z_order: i32,
    /// Instance records carry a tint color.
    #[serde(default)]
    pub color: bool,
    /// Instance records carry the custom shader vector.
    #[serde(default)]
    pub custom: bool,
    /// Bullet visual used for the cosmetic deletion effect.
    #[serde(default)]
    pub deletion_effect: Option<String>,
}

impl VisualDef {
    /// A visual with default mesh, no collider and no optional fields.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mesh: MeshInfo::default(),
            collider: Collider::None,
            z_order: 0,
            color: false,
            custom: false,
            deletion_effect: None,
        }
    }
}

/// A validated catalog entry.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRecord {
    /// The entry as declared.
    pub def: VisualDef,
    /// Floats per instance record: 8, 12 or 16.
    pub stride: usize,
    /// Resolved deletion-effect visual (bullets only).
    pub deletion_effect: Option<RenderId>,
}

impl RenderRecord {
    fn new(def: VisualDef) -> Self {
        let stride = BASE_STRIDE
            + if def.color { COLOR_FIELDS } else { 0 }
            + if def.custom { CUSTOM_FIELDS } else { 0 };
        Self {
            def,
            stride,
            deletion_effect: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    bullet: Vec<VisualDef>,
    #[serde(default)]
    laser: Vec<VisualDef>,
}

/// All visual types known to the kernel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisualCatalog {
    bullets: Vec<RenderRecord>,
    lasers: Vec<RenderRecord>,
}

impl VisualCatalog {
    /// Builds and validates a catalog. Ids follow declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names within a kind or a deletion
    /// effect that names no bullet visual.
    pub fn new(bullets: Vec<VisualDef>, lasers: Vec<VisualDef>) -> KernelResult<Self> {
        for defs in [&bullets, &lasers] {
            let mut seen = HashSet::new();
            for def in defs {
                if !seen.insert(def.name.as_str()) {
                    return Err(KernelError::DuplicateVisual(def.name.clone()));
                }
            }
        }

        let mut bullets: Vec<RenderRecord> = bullets.into_iter().map(RenderRecord::new).collect();
        let lasers = lasers.into_iter().map(RenderRecord::new).collect();

        for index in 0..bullets.len() {
            let Some(effect) = bullets[index].def.deletion_effect.clone() else {
                continue;
            };
            let resolved = bullets.iter().position(|r| r.def.name == effect).ok_or_else(|| {
                KernelError::UnknownDeletionEffect {
                    visual: bullets[index].def.name.clone(),
                    effect: effect.clone(),
                }
            })?;
            bullets[index].deletion_effect = Some(Self::id_from_index(resolved));
        }

        Ok(Self { bullets, lasers })
    }

    /// Parses and validates a catalog from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not match the schema or fails
    /// validation.
    pub fn from_toml_str(text: &str) -> KernelResult<Self> {
        let file: CatalogFile = toml::from_str(text)?;
        Self::new(file.bullet, file.laser)
    }

    /// Reads, parses and validates a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| KernelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            bullets = catalog.bullets.len(),
            lasers = catalog.lasers.len(),
            "loaded visual catalog"
        );
        Ok(catalog)
    }

    fn id_from_index(index: usize) -> RenderId {
        #[allow(clippy::cast_possible_truncation)]
        RenderId::new(index as u32)
    }

    /// All records of one kind, indexed by render id.
    #[must_use]
    pub fn records(&self, kind: RenderKind) -> &[RenderRecord] {
        match kind {
            RenderKind::Bullet => &self.bullets,
            RenderKind::Laser => &self.lasers,
        }
    }

    /// One record, if the id exists.
    #[must_use]
    pub fn record(&self, kind: RenderKind, id: RenderId) -> Option<&RenderRecord> {
        self.records(kind).get(id.index())
    }

    /// Looks up a render id by visual name.
    #[must_use]
    pub fn id_of(&self, kind: RenderKind, name: &str) -> Option<RenderId> {
        self.records(kind)
            .iter()
            .position(|r| r.def.name == name)
            .map(Self::id_from_index)
    }
}
