use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// SCRFD ONNX model used for face detection.
    pub model_path: PathBuf,
    /// TOML file listing the poster templates.
    pub templates_path: PathBuf,
    /// Directory generated posters are written to.
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration from `POSTER_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("poster");

        Self {
            model_path: env_path("POSTER_MODEL_PATH")
                .unwrap_or_else(|| data_dir.join("models").join("det_10g.onnx")),
            templates_path: env_path("POSTER_TEMPLATES")
                .unwrap_or_else(|| PathBuf::from("templates.toml")),
            output_dir: env_path("POSTER_OUTPUT_DIR").unwrap_or_else(|| PathBuf::from("posters")),
        }
    }

    /// Default output path for a poster made from `photo` with `template`.
    pub fn poster_path(&self, template: &str, photo: &std::path::Path) -> PathBuf {
        let stem = photo
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_string());
        self.output_dir.join(format!("{template}_{stem}.png"))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
