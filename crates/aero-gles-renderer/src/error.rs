use aero_gles_formats::FormatError;
use thiserror::Error;

use crate::device::DeviceError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RendererError {
    #[error("renderer is not initialized")]
    NotInitialized,
    #[error("device creation failed: {0}")]
    DeviceCreation(String),
    #[error("required device capability missing: {0}")]
    MissingCapability(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("device lost")]
    DeviceLost,
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("not implemented: {0}")]
    Unimplemented(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("device error: {0}")]
    Device(DeviceError),
}

impl From<DeviceError> for RendererError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::OutOfMemory(msg) => Self::OutOfMemory(msg),
            DeviceError::DeviceRemoved(_) => Self::DeviceLost,
            other => Self::Device(other),
        }
    }
}

impl RendererError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}
