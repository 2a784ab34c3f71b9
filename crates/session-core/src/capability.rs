//! Capability negotiation for optional media features.
//!
//! Capabilities are determined once, at the media boundary, when a session
//! is constructed. Feature code consults the stored result instead of
//! re-probing the environment.

use crate::errors::SessionError;

/// Whether this endpoint can capture screen content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenShareCapability {
    Supported,
    Unsupported { reason: String },
}

impl ScreenShareCapability {
    /// Build the unsupported variant with a reason.
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        ScreenShareCapability::Unsupported {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_supported(&self) -> bool {
        matches!(self, ScreenShareCapability::Supported)
    }

    /// Fail with a typed error if screen sharing is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ScreenShareUnsupported`] with the probe's
    /// reason.
    pub fn require(&self) -> Result<(), SessionError> {
        match self {
            ScreenShareCapability::Supported => Ok(()),
            ScreenShareCapability::Unsupported { reason } => {
                Err(SessionError::ScreenShareUnsupported(reason.clone()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_passes_require() {
        assert!(ScreenShareCapability::Supported.require().is_ok());
        assert!(ScreenShareCapability::Supported.is_supported());
    }

    #[test]
    fn test_unsupported_carries_reason() {
        let capability = ScreenShareCapability::unsupported("no display media on this device");
        assert!(!capability.is_supported());
        let err = capability.require().unwrap_err();
        assert!(matches!(err, SessionError::ScreenShareUnsupported(reason)
            if reason.contains("display media")));
    }
}
