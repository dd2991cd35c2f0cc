//! Process-wide data mode.

use serde::{Deserialize, Serialize};

/// Whether bindings read from the live backend feed or from their fallback dataset.
///
/// Persisted as a single boolean fallback flag (`true` means [`DataMode::Fallback`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    Live,
    /// Cold-start default: never query live without a known-good entity shape.
    #[default]
    Fallback,
}

impl DataMode {
    #[must_use]
    pub fn from_fallback_flag(fallback: bool) -> Self {
        if fallback { Self::Fallback } else { Self::Live }
    }

    #[must_use]
    pub fn fallback_flag(self) -> bool {
        matches!(self, Self::Fallback)
    }

    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Fallback => "fallback",
        }
    }
}
