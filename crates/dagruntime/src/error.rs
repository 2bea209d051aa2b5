use dagcore::{DagError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Dag(e) => e.kind(),
            RuntimeError::Plugin(PluginError::MissingDependency { .. }) => {
                ErrorKind::MissingDependency
            }
            RuntimeError::Plugin(PluginError::EmptyId) => ErrorKind::InvalidParameter,
            RuntimeError::Plugin(_) => ErrorKind::Unknown,
            RuntimeError::Io(_) => ErrorKind::Allocation,
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin id must not be empty")]
    EmptyId,

    #[error("Plugin '{0}' is registered twice")]
    Duplicate(String),

    #[error("Plugin '{plugin}' depends on missing plugin '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' targets ABI {found}, runtime provides {expected}")]
    IncompatiblePlugin {
        plugin: String,
        found: u32,
        expected: u32,
    },

    #[error("Plugin dependency cycle involving '{0}'")]
    DependencyCycle(String),

    #[error("Plugin '{plugin}' failed to initialize: {source}")]
    Init {
        plugin: String,
        #[source]
        source: DagError,
    },
}
