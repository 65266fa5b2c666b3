use std::path::PathBuf;

use corral_cluster::ClusterError;
use corral_modules::ModuleError;
use corral_server::{ClientError, ServerError};

/// Everything a subcommand can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid config file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no running topology under {} (run `corral start` first)", .0.display())]
    NotRunning(PathBuf),

    #[error("a topology is already running under {} (run `corral stop` first)", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("failed to create runtime: {0}")]
    Runtime(std::io::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl CliError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| CliError::Io { path, source }
    }
}
