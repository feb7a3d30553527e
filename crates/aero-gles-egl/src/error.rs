use aero_gles_renderer::{RendererError, SwapChainError};
use thiserror::Error;

use crate::consts::*;

/// The EGL error vocabulary. `EGL_SUCCESS` is `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum EglError {
    #[error("EGL_NOT_INITIALIZED")]
    NotInitialized,
    #[error("EGL_BAD_ACCESS")]
    BadAccess,
    #[error("EGL_BAD_ALLOC")]
    BadAlloc,
    #[error("EGL_BAD_ATTRIBUTE")]
    BadAttribute,
    #[error("EGL_BAD_CONFIG")]
    BadConfig,
    #[error("EGL_BAD_CONTEXT")]
    BadContext,
    #[error("EGL_BAD_MATCH")]
    BadMatch,
    #[error("EGL_BAD_NATIVE_WINDOW")]
    BadNativeWindow,
    #[error("EGL_BAD_PARAMETER")]
    BadParameter,
    #[error("EGL_BAD_SURFACE")]
    BadSurface,
    #[error("EGL_CONTEXT_LOST")]
    ContextLost,
}

impl EglError {
    /// The value `eglGetError` reports for this error.
    pub fn code(self) -> EGLint {
        match self {
            Self::NotInitialized => EGL_NOT_INITIALIZED,
            Self::BadAccess => EGL_BAD_ACCESS,
            Self::BadAlloc => EGL_BAD_ALLOC,
            Self::BadAttribute => EGL_BAD_ATTRIBUTE,
            Self::BadConfig => EGL_BAD_CONFIG,
            Self::BadContext => EGL_BAD_CONTEXT,
            Self::BadMatch => EGL_BAD_MATCH,
            Self::BadNativeWindow => EGL_BAD_NATIVE_WINDOW,
            Self::BadParameter => EGL_BAD_PARAMETER,
            Self::BadSurface => EGL_BAD_SURFACE,
            Self::ContextLost => EGL_CONTEXT_LOST,
        }
    }
}

impl From<SwapChainError> for EglError {
    fn from(err: SwapChainError) -> Self {
        match err {
            SwapChainError::BadParameter(_) => Self::BadParameter,
            SwapChainError::BadAlloc(_) => Self::BadAlloc,
            SwapChainError::ContextLost => Self::ContextLost,
        }
    }
}

impl From<RendererError> for EglError {
    fn from(err: RendererError) -> Self {
        match err {
            RendererError::DeviceLost => Self::ContextLost,
            RendererError::NotInitialized | RendererError::DeviceCreation(_) => Self::NotInitialized,
            RendererError::InvalidValue(_) => Self::BadParameter,
            RendererError::InvalidOperation(_) => Self::BadMatch,
            _ => Self::BadAlloc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_egl_numbering() {
        assert_eq!(EglError::NotInitialized.code(), 0x3001);
        assert_eq!(EglError::BadNativeWindow.code(), 0x300B);
        assert_eq!(EglError::ContextLost.code(), 0x300E);
    }

    #[test]
    fn lower_layer_failures_keep_their_meaning() {
        assert_eq!(EglError::from(RendererError::DeviceLost), EglError::ContextLost);
        assert_eq!(
            EglError::from(RendererError::OutOfMemory("staging".to_owned())),
            EglError::BadAlloc
        );
        assert_eq!(EglError::from(SwapChainError::ContextLost), EglError::ContextLost);
        assert_eq!(
            EglError::from(SwapChainError::BadParameter("interval".to_owned())),
            EglError::BadParameter
        );
    }
}
