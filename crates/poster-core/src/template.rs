//! Poster templates and their TOML registry.
//!
//! ```toml
//! [templates.im_participating]
//! base_image = "static/imparticipating.png"
//! circle_diameter = 780
//! placement_offset = [175, 875]
//! ```
//!
//! `base_image` is resolved relative to the directory of the TOML file.

use image::RgbaImage;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad template config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to load base image {}: {source}", .path.display())]
    BaseImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("template {0}: circle diameter must be > 0")]
    InvalidDiameter(String),
}

/// One `[templates.<name>]` entry as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub base_image: PathBuf,
    pub circle_diameter: u32,
    /// Top-left corner of the head crop on the base image.
    pub placement_offset: (u32, u32),
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: BTreeMap<String, TemplateSpec>,
}

/// Immutable poster template: base image plus head slot geometry.
#[derive(Debug)]
pub struct PosterTemplate {
    name: String,
    base: RgbaImage,
    circle_diameter: u32,
    placement_offset: (u32, u32),
}

impl PosterTemplate {
    pub fn new(
        name: impl Into<String>,
        base: RgbaImage,
        circle_diameter: u32,
        placement_offset: (u32, u32),
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        if circle_diameter == 0 {
            return Err(TemplateError::InvalidDiameter(name));
        }

        let template = Self {
            name,
            base,
            circle_diameter,
            placement_offset,
        };
        if !template.slot_fits() {
            tracing::warn!(
                template = %template.name,
                base = ?template.base.dimensions(),
                diameter = circle_diameter,
                offset = ?placement_offset,
                "head slot overflows the base image; the overflow is clipped"
            );
        }
        Ok(template)
    }

    /// Decode the base image named by `spec`, relative to `root`.
    pub fn open(name: &str, spec: &TemplateSpec, root: &Path) -> Result<Self, TemplateError> {
        let path = root.join(&spec.base_image);
        let base = image::open(&path)
            .map_err(|source| TemplateError::BaseImage {
                path: path.clone(),
                source,
            })?
            .to_rgba8();
        tracing::debug!(template = name, path = %path.display(), "template base loaded");
        Self::new(name, base, spec.circle_diameter, spec.placement_offset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    pub fn circle_diameter(&self) -> u32 {
        self.circle_diameter
    }

    pub fn placement_offset(&self) -> (u32, u32) {
        self.placement_offset
    }

    /// Whether the whole head slot lies on the base image.
    pub fn slot_fits(&self) -> bool {
        let (x, y) = self.placement_offset;
        u64::from(x) + u64::from(self.circle_diameter) <= u64::from(self.base.width())
            && u64::from(y) + u64::from(self.circle_diameter) <= u64::from(self.base.height())
    }
}

/// Named templates, loaded once and shared read-only.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<PosterTemplate>>,
}

impl TemplateRegistry {
    /// Load every template listed in the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let src = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        let registry = Self::from_toml(&src, root)?;
        tracing::info!(path = %path.display(), templates = registry.len(), "templates loaded");
        Ok(registry)
    }

    /// Parse templates from TOML text, resolving base images against `root`.
    pub fn from_toml(src: &str, root: &Path) -> Result<Self, TemplateError> {
        let file: TemplateFile = toml::from_str(src)?;
        let mut registry = Self::default();
        for (name, spec) in &file.templates {
            registry.insert(PosterTemplate::open(name, spec, root)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, template: PosterTemplate) -> Arc<PosterTemplate> {
        let template = Arc::new(template);
        self.templates
            .insert(template.name().to_string(), Arc::clone(&template));
        template
    }

    pub fn get(&self, name: &str) -> Option<Arc<PosterTemplate>> {
        self.templates.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PosterTemplate>> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_base(dir: &Path, name: &str, width: u32, height: u32) {
        RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_registry_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        write_base(dir.path(), "poster.png", 64, 48);
        write_base(dir.path(), "card.png", 32, 32);

        let src = r#"
            [templates.im_participating]
            base_image = "poster.png"
            circle_diameter = 20
            placement_offset = [4, 8]

            [templates.id_card]
            base_image = "card.png"
            circle_diameter = 16
            placement_offset = [8, 2]
        "#;
        let registry = TemplateRegistry::from_toml(src, dir.path()).unwrap();
        assert_eq!(registry.len(), 2);

        let poster = registry.get("im_participating").unwrap();
        assert_eq!(poster.base().dimensions(), (64, 48));
        assert_eq!(poster.circle_diameter(), 20);
        assert_eq!(poster.placement_offset(), (4, 8));
        assert!(poster.slot_fits());

        assert!(registry.get("missing").is_none());
        let names: Vec<&str> = registry.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["id_card", "im_participating"]);
    }

    #[test]
    fn test_registry_load_resolves_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        write_base(&dir.path().join("static"), "base.png", 40, 40);
        let config = dir.path().join("templates.toml");
        std::fs::write(
            &config,
            "[templates.card]\nbase_image = \"static/base.png\"\ncircle_diameter = 10\nplacement_offset = [0, 0]\n",
        )
        .unwrap();

        let registry = TemplateRegistry::load(&config).unwrap();
        assert_eq!(registry.get("card").unwrap().base().dimensions(), (40, 40));
    }

    #[test]
    fn test_empty_config_is_empty_registry() {
        let registry = TemplateRegistry::from_toml("", Path::new(".")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_zero_diameter_rejected() {
        let err = PosterTemplate::new("bad", RgbaImage::new(10, 10), 0, (0, 0)).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidDiameter(name) if name == "bad"));
    }

    #[test]
    fn test_overflowing_slot_is_accepted() {
        let template = PosterTemplate::new("wide", RgbaImage::new(100, 100), 80, (50, 0)).unwrap();
        assert!(!template.slot_fits());
    }

    #[test]
    fn test_missing_base_image() {
        let src = "[templates.x]\nbase_image = \"nope.png\"\ncircle_diameter = 5\nplacement_offset = [0, 0]\n";
        let err = TemplateRegistry::from_toml(src, Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, TemplateError::BaseImage { .. }));
    }

    #[test]
    fn test_malformed_toml() {
        let err = TemplateRegistry::from_toml("[templates.x]\ncircle_diameter = \"big\"", Path::new("."))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Parse(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = TemplateRegistry::load(Path::new("/nonexistent/templates.toml")).unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
    }
}
