// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while installing a new render context.
///
/// None of these mutate the data store: a rejected payload leaves the previous
/// context in place.
#[derive(Debug, Error)]
pub enum DataError {
    /// The payload is not valid JSON.
    #[error("could not parse data: {0}")]
    Parse(#[from] serde_json::Error),
    /// The payload is valid JSON but not an object.
    #[error("data must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// The `@file` given as initial data could not be read.
    #[error("could not read data file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while establishing the file system watch.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create file watcher: {0}")]
    Create(#[source] notify::Error),
    #[error("failed to watch directory {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("watcher thread exited before it finished starting")]
    ThreadExited,
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failures during a single render pass. These never leave the renderer:
/// they are turned into an error document instead.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not read template directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse templates in {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
    #[error("could not execute template {path}")]
    Execute {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
}

impl RenderError {
    /// Short label shown as the error document's heading.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::ReadDir { .. } => "read error",
            RenderError::Parse { .. } => "parse error",
            RenderError::Execute { .. } => "execution error",
        }
    }

    /// The file or directory the failure is about.
    pub fn path(&self) -> &std::path::Path {
        match self {
            RenderError::ReadDir { path, .. }
            | RenderError::Parse { path, .. }
            | RenderError::Execute { path, .. } => path,
        }
    }

    /// Every message in the error's source chain, outermost first.
    pub fn causes(&self) -> Vec<String> {
        let mut causes = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            causes.push(err.to_string());
            source = err.source();
        }
        causes
    }
}
