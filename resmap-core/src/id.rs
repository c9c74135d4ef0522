use crate::{Epoch, Index};
use std::{
    cmp::Ordering,
    fmt::{self, Debug},
    hash::Hash,
    marker::PhantomData,
};

type IdType = u64;

/// The raw underlying representation of an identifier.
#[repr(transparent)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawId(IdType);

impl RawId {
    /// Zip together an identifier and return its raw underlying representation.
    pub fn zip(index: Index, epoch: Epoch) -> RawId {
        RawId(index as IdType | ((epoch as IdType) << 32))
    }

    /// Unzip a raw identifier into its components.
    pub fn unzip(self) -> (Index, Epoch) {
        (self.0 as Index, (self.0 >> 32) as Epoch)
    }
}

/// An identifier for an object stored in a device registry.
///
/// An `Id<T>` value contains an index into a `Storage` table, and an epoch
/// that tells whether the slot still holds the object the id was minted for.
/// Ids of destroyed objects are rejected, even if their index was reused.
#[repr(transparent)]
pub struct Id<T: Marker>(RawId, PhantomData<T>);

impl<T: Marker> Id<T> {
    /// Coerce the identifiers into its raw underlying representation.
    pub fn into_raw(self) -> RawId {
        self.0
    }

    #[inline]
    pub fn zip(index: Index, epoch: Epoch) -> Self {
        Id(RawId::zip(index, epoch), PhantomData)
    }

    #[inline]
    pub fn unzip(self) -> (Index, Epoch) {
        self.0.unzip()
    }
}

impl<T: Marker> Copy for Id<T> {}

impl<T: Marker> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Marker> Debug for Id<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let (index, epoch) = self.unzip();
        write!(formatter, "Id({index},{epoch})")?;
        Ok(())
    }
}

impl<T: Marker> Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T: Marker> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Marker> Eq for Id<T> {}

impl<T: Marker> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Marker> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(feature = "serde")]
impl<T: Marker> serde::Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, T: Marker> serde::Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer).map(|raw| Id(raw, PhantomData))
    }
}

/// Marker trait used to determine which types uniquely identify a resource.
///
/// For example, `ResourceId` has the same type as `Id<markers::Resource>`;
/// it's the `markers::Resource` type parameter that distinguishes it from
/// other id types.
pub trait Marker: 'static + Send + Sync {}

// This allows `()` to be used as a marker type for tests.
#[cfg(test)]
impl Marker for () {}

/// Define identifiers for each object kind stored in a device.
macro_rules! ids {
    ($(
        $(#[$meta:meta])*
        pub type $name:ident $marker:ident;
    )*) => {
        /// Marker types for each object kind.
        pub mod markers {
            $(
                #[derive(Debug)]
                pub enum $marker {}
                impl super::Marker for $marker {}
            )*
        }

        $(
            $(#[$meta])*
            pub type $name = Id<self::markers::$marker>;
        )*
    }
}

ids! {
    /// Identifies a buffer or a texture.
    pub type ResourceId Resource;
}

#[test]
fn test_id() {
    let indexes = [0, Index::MAX / 2 - 1, Index::MAX / 2 + 1, Index::MAX];
    let epochs = [1, Epoch::MAX / 2 - 1, Epoch::MAX / 2 + 1, Epoch::MAX];
    for &i in &indexes {
        for &e in &epochs {
            let id = Id::<()>::zip(i, e);
            let (index, epoch) = id.unzip();
            assert_eq!(index, i);
            assert_eq!(epoch, e);
        }
    }
}
