use crate::surface::SurfaceError;
use pinbox_core::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// The module could not be compiled, linked or initialized. Fatal to
    /// the session.
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// Startup failure as reported by the worker.
    #[error("{0}")]
    Startup(String),

    #[error("module already initialized")]
    AlreadyInitialized,

    #[error("module does not export `{0}`")]
    MissingExport(&'static str),

    /// The guest trapped or was interrupted while running.
    #[error("{0}")]
    Guest(String),

    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    #[error("unsupported message type `{0}`")]
    UnsupportedMessage(String),

    #[error("callback {0} is not registered")]
    InvalidCallback(u32),

    #[error("function table index {0} does not name a callable function")]
    InvalidTableEntry(u32),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("engine setup failed: {0}")]
    Engine(String),

    #[error("execution worker is gone")]
    Disconnected,
}
