//! Lifecycle phase state machines.
//!
//! Phases project the controller's in-flight activity against the backing
//! provider. Two independent machines exist:
//!
//! ```text
//! Item lifecycle (libraries and items):
//!
//!   Creating ──▶ Created ──▶ Updating ◀──▶ Updated
//!      │            │           │            │
//!      └────────────┴─────┬─────┴────────────┘
//!                         ▼
//!                      Deleting ──▶ Deleted
//!
//!   any non-terminal ──▶ Unknown ──▶ re-derived phase
//!
//! Upload lifecycle:
//!
//!   Uploading ──▶ Uploaded
//! ```
//!
//! Transitions are validated at runtime because the current phase is loaded
//! from persisted status. A transition to the current phase is a no-op.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

mod private {
    pub trait Sealed {}
}

/// Behaviour shared by every phase enum.
pub trait LifecyclePhase:
    private::Sealed
    + Copy
    + Eq
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Every phase of the machine.
    const ALL: &'static [Self];

    /// Phase name as used on the wire.
    fn as_str(&self) -> &'static str;

    /// Whether the phase represents a settled, successful state.
    fn is_stable(&self) -> bool;

    /// Whether no further transition can leave this phase.
    fn is_terminal(&self) -> bool;

    /// Whether a resource with no phase yet may enter `self`.
    fn is_initial(&self) -> bool;

    /// Whether `self -> next` is a defined edge.
    fn can_transition_to(&self, next: Self) -> bool;

    /// Validate and perform a transition from an optional current phase.
    ///
    /// Returns `Ok(true)` if the phase changed, `Ok(false)` if `to` is the
    /// current phase already.
    fn advance(current: &mut Option<Self>, to: Self) -> ApiResult<bool> {
        match *current {
            Some(from) if from == to => Ok(false),
            Some(from) if from.can_transition_to(to) => {
                *current = Some(to);
                Ok(true)
            }
            Some(from) => Err(ApiError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            }),
            None if to.is_initial() => {
                *current = Some(to);
                Ok(true)
            }
            None => Err(ApiError::InvalidTransition {
                from: "none",
                to: to.as_str(),
            }),
        }
    }
}

/// Phase of a library or library item lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemPhase {
    /// The backing object is being created.
    Creating,
    /// The backing object exists.
    Created,
    /// The backing object is being re-synchronised.
    Updating,
    /// The backing object was re-synchronised.
    Updated,
    /// The backing object is being removed.
    Deleting,
    /// The backing object is gone.
    Deleted,
    /// The backing provider cannot be reached.
    Unknown,
}

impl ItemPhase {
    /// Phase on first observation of a resource.
    ///
    /// A resource that is already bound starts `Unknown` whether or not the
    /// provider is reachable; the next cycle re-derives its phase from a
    /// fresh observation.
    #[must_use]
    pub const fn initial(bound: bool) -> Self {
        if bound {
            Self::Unknown
        } else {
            Self::Creating
        }
    }
}

impl private::Sealed for ItemPhase {}

impl LifecyclePhase for ItemPhase {
    const ALL: &'static [Self] = &[
        Self::Creating,
        Self::Created,
        Self::Updating,
        Self::Updated,
        Self::Deleting,
        Self::Deleted,
        Self::Unknown,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Created => "Created",
            Self::Updating => "Updating",
            Self::Updated => "Updated",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
            Self::Unknown => "Unknown",
        }
    }

    fn is_stable(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    fn is_initial(&self) -> bool {
        matches!(self, Self::Creating | Self::Unknown)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use ItemPhase::{Created, Creating, Deleted, Deleting, Unknown, Updated, Updating};

        match (*self, next) {
            (Creating, Created)
            | (Created | Updated, Updating)
            | (Updating, Updated)
            | (Creating | Created | Updating | Updated, Deleting)
            | (Deleting, Deleted)
            | (Unknown, Creating | Created | Updating | Updated | Deleting) => true,
            (from, Unknown) => !from.is_terminal() && from != Unknown,
            _ => false,
        }
    }
}

impl fmt::Display for ItemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown item phase: {s}"))
    }
}

/// Phase of a content upload request.
///
/// There is no failure phase; failures surface through conditions while the
/// request stays `Uploading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadPhase {
    /// Content transfer in progress.
    Uploading,
    /// The provider confirmed the transferred content.
    Uploaded,
}

impl private::Sealed for UploadPhase {}

impl LifecyclePhase for UploadPhase {
    const ALL: &'static [Self] = &[Self::Uploading, Self::Uploaded];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "Uploading",
            Self::Uploaded => "Uploaded",
        }
    }

    fn is_stable(&self) -> bool {
        matches!(self, Self::Uploaded)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Uploaded)
    }

    fn is_initial(&self) -> bool {
        matches!(self, Self::Uploading)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!((self, next), (Self::Uploading, Self::Uploaded))
    }
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UploadPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown upload phase: {s}"))
    }
}
