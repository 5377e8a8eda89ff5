use thiserror::Error;

use crate::config::ConfigError;
use crate::server::ServeError;

/// Crate-level convenience error.
///
/// A thin wrapper over the component errors; session-level failures stay
/// inside their connection threads and never surface here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Serve(#[from] ServeError),
}
