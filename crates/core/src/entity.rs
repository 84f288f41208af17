//! Entity traits: identity + soft-delete lifecycle.

use chrono::{DateTime, Utc};

use crate::id::UserId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Soft-delete lifecycle shared by every catalog record.
///
/// A record is *active* while its deletion timestamp is unset. Deleted records stay
/// addressable by id but are ignored by duplicate detection and cascades.
pub trait SoftDelete {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn deleted_by(&self) -> Option<UserId>;

    fn is_active(&self) -> bool {
        self.deleted_at().is_none()
    }
}
