use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poster_core::codec::{decode_photo, encode_png};
use poster_core::{
    shared_detector, should_regenerate, CompositionResult, FaceDetector, Failure, HeadLocator,
    PhotoFingerprint, PipelineError, PosterComposer, PosterRecord, TemplateRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "poster", about = "Compose hackathon posters and ID cards from profile photos")]
struct Cli {
    /// SCRFD model path (overrides POSTER_MODEL_PATH)
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Template config (overrides POSTER_TEMPLATES)
    #[arg(long, global = true)]
    templates: Option<PathBuf>,
    /// Output directory (overrides POSTER_OUTPUT_DIR)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a poster and print the generation record as JSON
    Compose {
        /// Template name from the template config
        #[arg(short, long)]
        template: String,
        /// Profile photo
        #[arg(short, long)]
        photo: PathBuf,
        /// Output file (default: <output dir>/<template>_<photo>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Photo the current poster was made from; skip when unchanged
        #[arg(long)]
        previous: Option<PathBuf>,
    },
    /// Cut the circular head crop only
    Crop {
        #[arg(short, long)]
        photo: PathBuf,
        /// Share of the photo width used as circle diameter
        #[arg(long, default_value_t = 0.5)]
        fraction: f32,
        /// Resize the crop to SIZE×SIZE
        #[arg(long)]
        size: Option<u32>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print detected face boxes as JSON
    Detect {
        #[arg(short, long)]
        photo: PathBuf,
    },
    /// List configured templates
    Templates,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(model) = cli.model {
        config.model_path = model;
    }
    if let Some(templates) = cli.templates {
        config.templates_path = templates;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }

    match cli.command {
        Commands::Compose {
            template,
            photo,
            output,
            previous,
        } => run_compose(&config, &template, &photo, output, previous.as_deref()),
        Commands::Crop {
            photo,
            fraction,
            size,
            output,
        } => run_crop(&config, &photo, fraction, size, &output),
        Commands::Detect { photo } => run_detect(&config, &photo),
        Commands::Templates => run_templates(&config),
    }
}

fn detector(config: &Config) -> Result<Arc<dyn FaceDetector>> {
    let detector: Arc<dyn FaceDetector> = shared_detector(&config.model_path)
        .with_context(|| format!("loading face detector from {}", config.model_path.display()))?;
    Ok(detector)
}

fn read_photo(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading photo {}", path.display()))
}

fn run_compose(
    config: &Config,
    template_name: &str,
    photo_path: &Path,
    output: Option<PathBuf>,
    previous: Option<&Path>,
) -> Result<()> {
    let photo = read_photo(photo_path)?;
    let fingerprint = PhotoFingerprint::of(&photo);

    if let Some(previous) = previous {
        let old = PhotoFingerprint::of(&read_photo(previous)?);
        if !should_regenerate(Some(&old), Some(&fingerprint)) {
            tracing::info!(photo = %fingerprint, "photo unchanged; poster not regenerated");
            println!("Photo unchanged, poster not regenerated");
            return Ok(());
        }
    }

    let result = compose_poster(config, template_name, &photo);

    let written = match result.image() {
        Some(poster) => {
            let path = output.unwrap_or_else(|| config.poster_path(template_name, photo_path));
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            std::fs::write(&path, encode_png(poster)?)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "poster written");
            Some(path)
        }
        None => None,
    };

    let record = PosterRecord::from_result(&result, Some(fingerprint), written);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Run one composition, turning an unreadable template config or detector
/// model into a failed result so `compose` always reports a record.
fn compose_poster(config: &Config, template_name: &str, photo: &[u8]) -> CompositionResult {
    let template = match TemplateRegistry::load(&config.templates_path) {
        Ok(registry) => registry.get(template_name),
        Err(err) => {
            tracing::warn!(error = %err, "template config unavailable");
            None
        }
    };
    let Some(template) = template else {
        tracing::warn!(template = template_name, "template not configured");
        return CompositionResult::Failed(Failure::from(&PipelineError::MissingInput("poster template")));
    };

    match detector(config) {
        Ok(detector) => PosterComposer::with_detector(detector).compose(Some(template.as_ref()), Some(photo)),
        Err(err) => {
            let remark = format!("{err:#}");
            tracing::error!(error = %remark, "face detector unavailable");
            CompositionResult::Failed(Failure::unexpected(remark))
        }
    }
}

fn run_crop(
    config: &Config,
    photo_path: &Path,
    fraction: f32,
    size: Option<u32>,
    output: &Path,
) -> Result<()> {
    let photo = decode_photo(&read_photo(photo_path)?)?;
    let locator = HeadLocator::new(detector(config)?);
    let head = locator.locate_and_crop(&photo, fraction, size)?;
    head.save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Head crop {}x{} written to {}", head.width(), head.height(), output.display());
    Ok(())
}

fn run_detect(config: &Config, photo_path: &Path) -> Result<()> {
    let photo = decode_photo(&read_photo(photo_path)?)?;
    let faces = detector(config)?.detect(&photo.to_luma8())?;
    tracing::debug!(faces = faces.len(), "detection finished");
    println!("{}", serde_json::to_string_pretty(&faces)?);
    Ok(())
}

fn run_templates(config: &Config) -> Result<()> {
    let registry = TemplateRegistry::load(&config.templates_path)?;
    if registry.is_empty() {
        println!("No templates configured in {}", config.templates_path.display());
        return Ok(());
    }
    for template in registry.iter() {
        let (width, height) = template.base().dimensions();
        let (x, y) = template.placement_offset();
        println!(
            "{}: base {width}x{height}, circle {} at ({x}, {y}){}",
            template.name(),
            template.circle_diameter(),
            if template.slot_fits() { "" } else { " [overflows base]" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use poster_core::{FailureKind, MISSING_INPUT_REMARK};

    fn config(dir: &Path) -> Config {
        Config {
            model_path: dir.join("missing.onnx"),
            templates_path: dir.join("templates.toml"),
            output_dir: dir.join("posters"),
        }
    }

    #[test]
    fn test_missing_template_config_is_failed_record() {
        let dir = tempfile::tempdir().unwrap();
        let failure = compose_poster(&config(dir.path()), "id_card", b"photo")
            .into_result()
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::MissingInput);
        assert_eq!(failure.remark, MISSING_INPUT_REMARK);
    }

    #[test]
    fn test_unknown_template_is_failed_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        image::RgbaImage::new(4, 4).save(dir.path().join("base.png")).unwrap();
        std::fs::write(
            &config.templates_path,
            "[templates.id_card]\nbase_image = \"base.png\"\ncircle_diameter = 2\nplacement_offset = [0, 0]\n",
        )
        .unwrap();

        let failure = compose_poster(&config, "im_participating", b"photo").into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::MissingInput);
    }

    #[test]
    fn test_unloadable_model_is_failed_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        image::RgbaImage::new(4, 4).save(dir.path().join("base.png")).unwrap();
        std::fs::write(
            &config.templates_path,
            "[templates.id_card]\nbase_image = \"base.png\"\ncircle_diameter = 2\nplacement_offset = [0, 0]\n",
        )
        .unwrap();

        let result = compose_poster(&config, "id_card", b"photo");
        let record = PosterRecord::from_result(&result, None, None);
        assert!(!record.is_generated);
        assert_eq!(record.failure, Some(FailureKind::Unexpected));
        assert!(record.remarks.unwrap().contains("loading face detector"));
    }
}
