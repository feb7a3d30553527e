use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the renderer (state diffing, clears, presentation, device loss).
///
/// Updated on the rendering thread; readable from anywhere.
#[derive(Debug, Default)]
pub struct RendererStats {
    presents: AtomicU64,
    present_failures: AtomicU64,
    device_losses: AtomicU64,
    device_resets: AtomicU64,
    masked_clears: AtomicU64,
    direct_clears: AtomicU64,
    quad_copies: AtomicU64,
    state_binds: AtomicU64,
    state_binds_skipped: AtomicU64,
    emulated_index_bytes: AtomicU64,
}

impl RendererStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_presents(&self) {
        self.presents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_present_failures(&self) {
        self.present_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_device_losses(&self) {
        self.device_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_device_resets(&self) {
        self.device_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_masked_clears(&self) {
        self.masked_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_direct_clears(&self) {
        self.direct_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_quad_copies(&self) {
        self.quad_copies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_state_binds(&self) {
        self.state_binds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_state_binds_skipped(&self) {
        self.state_binds_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_emulated_index_bytes(&self, bytes: u64) {
        self.emulated_index_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RendererStatsSnapshot {
        RendererStatsSnapshot {
            presents: self.presents.load(Ordering::Relaxed),
            present_failures: self.present_failures.load(Ordering::Relaxed),
            device_losses: self.device_losses.load(Ordering::Relaxed),
            device_resets: self.device_resets.load(Ordering::Relaxed),
            masked_clears: self.masked_clears.load(Ordering::Relaxed),
            direct_clears: self.direct_clears.load(Ordering::Relaxed),
            quad_copies: self.quad_copies.load(Ordering::Relaxed),
            state_binds: self.state_binds.load(Ordering::Relaxed),
            state_binds_skipped: self.state_binds_skipped.load(Ordering::Relaxed),
            emulated_index_bytes: self.emulated_index_bytes.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStatsSnapshot {
    pub presents: u64,
    pub present_failures: u64,
    pub device_losses: u64,
    pub device_resets: u64,
    pub masked_clears: u64,
    pub direct_clears: u64,
    pub quad_copies: u64,
    pub state_binds: u64,
    pub state_binds_skipped: u64,
    pub emulated_index_bytes: u64,
}

impl RendererStatsSnapshot {
    pub fn to_json(self) -> String {
        // Hand-built: no serializer on the render thread.
        format!(
            "{{\"presents\":{},\"present_failures\":{},\"device_losses\":{},\"device_resets\":{},\"clears\":{{\"masked\":{},\"direct\":{}}},\"quad_copies\":{},\"state_binds\":{},\"state_binds_skipped\":{},\"emulated_index_bytes\":{}}}",
            self.presents,
            self.present_failures,
            self.device_losses,
            self.device_resets,
            self.masked_clears,
            self.direct_clears,
            self.quad_copies,
            self.state_binds,
            self.state_binds_skipped,
            self.emulated_index_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_json_contains_counters() {
        let stats = RendererStats::new();
        stats.inc_presents();
        stats.inc_masked_clears();
        stats.inc_masked_clears();
        stats.add_emulated_index_bytes(12);
        let json = stats.to_json();
        assert!(json.contains("\"presents\":1"));
        assert!(json.contains("\"clears\":{\"masked\":2,\"direct\":0}"));
        assert!(json.contains("\"emulated_index_bytes\":12"));
        assert!(json.starts_with('{') && json.ends_with('}'));
    }
}
