//! `HostResolver` - determines which participant is host.
//!
//! Precedence, highest first:
//!
//! 1. An explicit `host-updated` signal. Always wins, stable thereafter
//!    until the next signal.
//! 2. Meeting metadata, consulted once when first available. Later
//!    metadata refetches are ignored so a slightly different response
//!    shape cannot make the host flap.
//! 3. A virtual placeholder host. Real participants are never promoted to
//!    fill a host slot they were not assigned.

use tracing::info;

/// Where the current host id came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    /// Set by an explicit `host-updated` signal.
    Signaled(String),
    /// Derived once from meeting metadata.
    Metadata(String),
    /// No host could be resolved; a non-interactive placeholder tile
    /// stands in. The placeholder never joins the mesh.
    Virtual,
}

/// Tracks host resolution for one session.
#[derive(Debug)]
pub struct HostResolver {
    resolution: HostResolution,
    metadata_consulted: bool,
}

impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resolution: HostResolution::Virtual,
            metadata_consulted: false,
        }
    }

    /// Feed the host id from meeting metadata. Only the first observation
    /// counts, and a signaled host is never displaced.
    pub fn observe_metadata(&mut self, host_id: Option<&str>) {
        if self.metadata_consulted {
            return;
        }
        self.metadata_consulted = true;

        if matches!(self.resolution, HostResolution::Signaled(_)) {
            return;
        }
        if let Some(host_id) = host_id {
            if !host_id.is_empty() {
                info!(target: "atrium.host", host_id = %host_id, "Host derived from metadata");
                self.resolution = HostResolution::Metadata(host_id.to_string());
            }
        }
    }

    /// Apply an explicit `host-updated` signal. Overwrites anything.
    pub fn observe_signal(&mut self, host_id: &str) {
        if host_id.is_empty() {
            return;
        }
        info!(target: "atrium.host", host_id = %host_id, "Host updated by signal");
        self.resolution = HostResolution::Signaled(host_id.to_string());
    }

    /// The resolved host participant id, if any.
    #[must_use]
    pub fn host_id(&self) -> Option<&str> {
        match &self.resolution {
            HostResolution::Signaled(id) | HostResolution::Metadata(id) => Some(id),
            HostResolution::Virtual => None,
        }
    }

    /// Whether the virtual placeholder is standing in.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self.resolution, HostResolution::Virtual)
    }

    /// The full resolution, including provenance.
    #[must_use]
    pub const fn resolution(&self) -> &HostResolution {
        &self.resolution
    }
}
