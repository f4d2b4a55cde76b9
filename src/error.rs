//! Top-level error type aggregating every layer's errors.

use thiserror::Error;

use crate::disc::BackendError;
use crate::disc::Iso9660Error;
use crate::psx::PsxError;

#[derive(Debug, Error)]
pub enum HashError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Iso9660(#[from] Iso9660Error),

    #[error(transparent)]
    Psx(#[from] PsxError),
}
