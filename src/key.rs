//! Dependency keys and resolution params
//!
//! A [`DependencyKey`] is the normalized identifier the registry is keyed by.
//! It is derived either from a literal string or from the identity of a type
//! (which includes fn items and closures, each of which has its own type).

use crate::{DiError, Result};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Marker trait for values that can be stored in a container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Normalized lookup key for a dependency.
///
/// Type keys compare by `TypeId` only; the stored name is for display.
///
/// # Examples
///
/// ```rust
/// use ambient_injector::{DependencyKey, IntoDependencyKey};
///
/// struct Database;
///
/// assert_eq!(DependencyKey::of::<Database>(), DependencyKey::of::<Database>());
/// assert_eq!("db".into_key().unwrap(), String::from("db").into_key().unwrap());
/// assert!("".into_key().is_err());
/// ```
#[derive(Clone)]
pub enum DependencyKey {
    /// Literal string key
    Name(Arc<str>),
    /// Key derived from a type
    Type { id: TypeId, name: &'static str },
}

impl DependencyKey {
    /// Key for a type.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key for the type of a value, typically a fn item or closure.
    ///
    /// Note that fn pointers (`fn(u32) -> u32`) share one type and therefore
    /// one key; pass the fn item itself to get a distinct key per function.
    #[inline]
    pub fn of_val<T: ?Sized + 'static>(_value: &T) -> Self {
        Self::of::<T>()
    }

    /// Key for a literal name, rejecting names with no stable identity.
    pub fn named(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.trim().is_empty() {
            return Err(DiError::InvalidDependencyKind(name.to_string()));
        }
        Ok(Self::name(name))
    }

    /// Unchecked literal key.
    #[inline]
    pub(crate) fn name(name: &str) -> Self {
        Self::Name(Arc::from(name))
    }

    /// Human-readable form of the key.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name(name) => &**name,
            Self::Type { name, .. } => *name,
        }
    }

    /// Whether the key was derived from a type.
    #[inline]
    pub fn is_type(&self) -> bool {
        matches!(self, Self::Type { .. })
    }
}

impl PartialEq for DependencyKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) => a == b,
            (Self::Type { id: a, .. }, Self::Type { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for DependencyKey {}

impl Hash for DependencyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Name(name) => {
                0u8.hash(state);
                name.hash(state);
            }
            Self::Type { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Type { name, .. } => f.debug_tuple("Type").field(name).finish(),
        }
    }
}

/// Conversion into a [`DependencyKey`].
pub trait IntoDependencyKey {
    /// Normalize into a key, failing with `InvalidDependencyKind` when the
    /// value has no stable identity.
    fn into_key(self) -> Result<DependencyKey>;
}

impl IntoDependencyKey for DependencyKey {
    #[inline]
    fn into_key(self) -> Result<DependencyKey> {
        Ok(self)
    }
}

impl IntoDependencyKey for &DependencyKey {
    #[inline]
    fn into_key(self) -> Result<DependencyKey> {
        Ok(self.clone())
    }
}

impl IntoDependencyKey for &str {
    #[inline]
    fn into_key(self) -> Result<DependencyKey> {
        DependencyKey::named(self)
    }
}

impl IntoDependencyKey for String {
    #[inline]
    fn into_key(self) -> Result<DependencyKey> {
        DependencyKey::named(self)
    }
}

impl IntoDependencyKey for &String {
    #[inline]
    fn into_key(self) -> Result<DependencyKey> {
        DependencyKey::named(self)
    }
}

/// Secondary value that tells apart several values under one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    /// Named param, e.g. a user or tenant name
    Name(Arc<str>),
    /// Positional or numeric param
    Index(i64),
}

impl Param {
    /// The param as a string slice, if it is a name.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(&**name),
            Self::Index(_) => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Name(Arc::from(value))
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Name(Arc::from(value))
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Self::Index(i64::from(value))
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Self::Index(i64::from(value))
    }
}

impl From<usize> for Param {
    fn from(value: usize) -> Self {
        Self::Index(value as i64)
    }
}
