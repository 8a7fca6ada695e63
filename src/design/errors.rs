use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DesignInputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate node id in dag: {id}")]
    DuplicateNode { id: String },

    #[error("node {id} depends on unknown node {dep}")]
    UnknownDependency { id: String, dep: String },

    #[error("dag contains a dependency cycle involving: {nodes:?}")]
    Cycle { nodes: Vec<String> },

    #[error("dag node {id} has no entry in the design context")]
    MissingDesignNode { id: String },
}

impl DesignInputError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}
