//! Error types for module fetching.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("invalid module config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("npm install of {package} failed ({status})")]
    Npm { package: String, status: String },

    #[error("package metadata {}: {reason}", path.display())]
    Metadata { path: PathBuf, reason: String },

    #[error("module {module} has no build for platform {wanted:?} (available: {})", available.join(", "))]
    PlatformUnavailable {
        module: String,
        wanted: Option<String>,
        available: Vec<String>,
    },

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("failed to extract {entry} from {}: {source}", archive.display())]
    Archive {
        archive: PathBuf,
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ModuleError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ModuleError::Io { path, source }
    }
}
