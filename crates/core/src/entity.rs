//! Entity trait: store-assigned identity plus an optimistic-lock version.

/// A persisted batch record.
///
/// Identity and version are owned by the repository: entities start without an
/// id at version 0, a store assigns the id and version 1 on save, and only a
/// store's update path bumps the version afterwards. This trait is read-only;
/// the mutators live on [`StoreRecord`].
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// `None` until the entity has been saved.
    fn id(&self) -> Option<Self::Id>;

    /// Version last confirmed by the store.
    fn version(&self) -> u64;

    fn is_saved(&self) -> bool {
        self.id().is_some()
    }
}

/// Store-side mutators of an [`Entity`].
///
/// Only store implementations import this. It is not re-exported from the
/// crate root.
#[doc(hidden)]
pub trait StoreRecord: Entity {
    /// Record the id assigned by a store on save.
    fn assign_id(&mut self, id: Self::Id);

    /// Record the version confirmed by a store.
    fn set_version(&mut self, version: u64);
}
