use std::fmt;

use aero_gles_renderer::Framebuffer;

/// A client API context as the display sees it.
///
/// The GL state machine lives behind this trait; the display only binds surfaces to it and
/// propagates device loss.
pub trait Context: Send + Sync + fmt::Debug {
    /// Whether the application asked for reset notifications (`GL_EXT_robustness`). Such
    /// contexts must be destroyed by the application before a lost device is recovered.
    fn is_reset_notification_enabled(&self) -> bool;

    /// Marks the context lost. Irreversible.
    fn mark_context_lost(&self);

    fn is_context_lost(&self) -> bool;

    /// Binds the default framebuffer of the draw surface, or unbinds it with `None`.
    fn make_current(&self, framebuffer: Option<Framebuffer>);
}
