//! Topic constants for PUB/SUB routing.
//!
//! Topics follow the pattern `changewire.<domain>.<event>`.

/// Fired when a release has been translated and analysed.
pub const RELEASE_PUBLISHED: &str = "changewire.release.published";
