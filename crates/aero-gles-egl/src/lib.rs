//! `aero-gles-egl` is the EGL 1.4 front end of the GLES translation layer.
//!
//! A [`Display`] owns the renderer, the [`ConfigSet`] it advertises and every live
//! [`Surface`] and client [`Context`]. Displays are found through a [`DisplayRegistry`]
//! keyed by native display handle. Errors use the EGL vocabulary ([`EglError`]); the numeric
//! tokens live in [`consts`].

pub mod attrib;
pub mod config;
pub mod consts;
pub mod context;
pub mod display;
pub mod registry;
pub mod surface;

mod error;

pub use attrib::attribute_pairs;
pub use config::{ApiMask, Config, ConfigMatches, ConfigSet, SortConfig, SurfaceType};
pub use consts::EGLint;
pub use context::Context;
pub use display::{ContextId, DeviceSelection, Display, DisplayAttributes, SurfaceId};
pub use error::EglError;
pub use registry::{lock_display, DisplayRegistry, NativeDisplayId, SharedDisplay, DEFAULT_DISPLAY};
pub use surface::{NativeWindow, Surface, TextureFormat, TextureTarget, WindowSurfaceOptions};
