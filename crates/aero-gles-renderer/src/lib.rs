//! `aero-gles-renderer` translates OpenGL ES 2.0 state and commands into calls on a
//! D3D11-shaped device.
//!
//! The crate provides:
//! - The device seam ([`device::GpuDevice`]) with a deterministic software implementation
//!   ([`device::soft::SoftwareDevice`]) and a wgpu-backed one ([`device::wgpu_device`]).
//! - The [`Renderer`]: capability negotiation, diffed state application, draws with emulated
//!   line loops and triangle fans, clears, copies, read-back and device-loss recovery.
//! - Resource wrappers: texture storages, render targets and swap chains.

pub mod caps;
pub mod config;
pub mod device;
pub mod framebuffer;
pub mod index_buffer;
pub mod render_target;
pub mod state;
pub mod state_cache;
pub mod stats;
pub mod swap_chain;
pub mod texture_storage;
pub mod topology;

mod error;
mod renderer;

pub use caps::{FeatureLevel, FeatureLevelLimits, FormatCaps};
pub use config::RendererConfig;
pub use error::RendererError;
pub use framebuffer::Framebuffer;
pub use render_target::RenderTarget;
pub use renderer::{
    ConfigDesc, PixelPack, Renderer, TextureRegion, VertexBuffer, CONFIG_DEPTH_STENCIL_FORMATS,
    CONFIG_RENDER_TARGET_FORMATS,
};
pub use state_cache::issue_serial;
pub use stats::{RendererStats, RendererStatsSnapshot};
pub use swap_chain::{lock_swap_chain, SharedSwapChain, SwapChain, SwapChainError};
pub use texture_storage::{TextureStorage, TextureStorage2D, TextureStorageCube};
pub use topology::{IndexData, PrimitiveMode};
