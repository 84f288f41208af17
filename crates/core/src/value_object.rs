//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. In the catalog, the
/// canonical name forms (display name, comparison key, code token) are value objects:
/// two brands are "the same" when their comparison keys are equal, regardless of ids.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct NameKey(String);
///
/// impl ValueObject for NameKey {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
