//! Slot registry for managing attached cameras.

use crate::camera::{CameraId, DepthCamera};
use crate::camera_slot::{CameraSlot, SlotSettings};
use crate::error::{FusionError, Result};

/// Registry of all attached camera slots.
///
/// Slots keep their attach order; the scheduler addresses them by index
/// while operators address them by [`CameraId`].
#[derive(Debug)]
pub struct SlotRegistry {
    slots: Vec<CameraSlot>,
    next_id: u32,
    capacity: usize,
}

impl SlotRegistry {
    /// Creates an empty registry accepting at most `capacity` cameras.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
            capacity,
        }
    }

    /// Attaches a camera and returns its id.
    ///
    /// Returns an error if the registry is full.
    pub fn attach(&mut self, device: Box<dyn DepthCamera>, settings: SlotSettings) -> Result<CameraId> {
        if self.slots.len() >= self.capacity {
            return Err(FusionError::CameraLimitReached(self.capacity));
        }
        let id = CameraId(self.next_id);
        self.next_id += 1;
        self.slots.push(CameraSlot::new(id, device, settings));
        Ok(id)
    }

    /// Removes a camera. The returned slot restores its emitter when dropped.
    pub fn remove(&mut self, id: CameraId) -> Option<CameraSlot> {
        let index = self.index_of(id)?;
        Some(self.slots.remove(index))
    }

    /// Gets a slot by id.
    pub fn get(&self, id: CameraId) -> Option<&CameraSlot> {
        self.slots.iter().find(|s| s.id() == id)
    }

    /// Gets a mutable slot by id.
    pub fn get_mut(&mut self, id: CameraId) -> Option<&mut CameraSlot> {
        self.slots.iter_mut().find(|s| s.id() == id)
    }

    /// Gets a slot by id, or a [`FusionError::CameraNotFound`].
    pub fn require(&self, id: CameraId) -> Result<&CameraSlot> {
        self.get(id).ok_or(FusionError::CameraNotFound(id))
    }

    /// Gets a mutable slot by id, or a [`FusionError::CameraNotFound`].
    pub fn require_mut(&mut self, id: CameraId) -> Result<&mut CameraSlot> {
        self.get_mut(id).ok_or(FusionError::CameraNotFound(id))
    }

    /// Gets a slot by attach index.
    pub fn by_index(&self, index: usize) -> Option<&CameraSlot> {
        self.slots.get(index)
    }

    /// Gets a mutable slot by attach index.
    pub fn by_index_mut(&mut self, index: usize) -> Option<&mut CameraSlot> {
        self.slots.get_mut(index)
    }

    /// Returns the attach index of a camera.
    pub fn index_of(&self, id: CameraId) -> Option<usize> {
        self.slots.iter().position(|s| s.id() == id)
    }

    /// Whether a camera with the given id is attached.
    pub fn contains(&self, id: CameraId) -> bool {
        self.index_of(id).is_some()
    }

    /// Per-slot use-in-reconstruction flags, in attach order.
    pub fn use_flags(&self) -> Vec<bool> {
        self.slots.iter().map(CameraSlot::use_in_reconstruction).collect()
    }

    /// Per-slot settings snapshot, in attach order.
    pub fn settings_snapshot(&self) -> Vec<(CameraId, SlotSettings)> {
        self.slots.iter().map(|s| (s.id(), *s.settings())).collect()
    }

    /// Returns an iterator over all slots.
    pub fn iter(&self) -> impl Iterator<Item = &CameraSlot> {
        self.slots.iter()
    }

    /// Returns a mutable iterator over all slots.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CameraSlot> {
        self.slots.iter_mut()
    }

    /// Returns the number of attached cameras.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no camera is attached.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the maximum number of cameras.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all slots.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_slot::tests::StubCamera;

    #[test]
    fn test_attach_assigns_ids_in_order() {
        let mut registry = SlotRegistry::new(3);
        let a = registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        let b = registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        assert_eq!(a, CameraId(0));
        assert_eq!(b, CameraId(1));
        assert_eq!(registry.index_of(b), Some(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut registry = SlotRegistry::new(1);
        registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        let err = registry
            .attach(StubCamera::boxed().0, SlotSettings::default())
            .unwrap_err();
        assert!(matches!(err, FusionError::CameraLimitReached(1)));
    }

    #[test]
    fn test_remove_shifts_indices_and_keeps_ids() {
        let mut registry = SlotRegistry::new(3);
        let a = registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        let b = registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        assert!(registry.remove(a).is_some());
        assert_eq!(registry.index_of(b), Some(0));
        assert!(!registry.contains(a));
        assert!(matches!(registry.require(a), Err(FusionError::CameraNotFound(_))));

        let c = registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        assert_eq!(c, CameraId(2));
    }

    #[test]
    fn test_use_flags() {
        let mut registry = SlotRegistry::new(3);
        registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        let b = registry.attach(StubCamera::boxed().0, SlotSettings::default()).unwrap();
        registry.require_mut(b).unwrap().set_use_in_reconstruction(false);
        assert_eq!(registry.use_flags(), vec![true, false]);
    }
}
