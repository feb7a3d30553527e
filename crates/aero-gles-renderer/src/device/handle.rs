//! Reference-counted device resource handles.
//!
//! A handle is a retained reference: cloning retains, dropping releases. When the last
//! reference goes away the resource id is queued on its device's [`ReleaseQueue`]; the device
//! frees the backing object the next time it drains the queue. Handles remember which device
//! created them so a handle that outlived a device reset is rejected instead of aliasing a
//! resource on the new device.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use hashbrown::HashMap;

use super::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    View,
    Buffer,
    SwapChain,
}

/// Ids whose last handle was dropped, waiting to be freed by the device.
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    released: Mutex<Vec<(ResourceKind, u32)>>,
}

impl ReleaseQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, kind: ResourceKind, id: u32) {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, id));
    }

    pub fn drain(&self) -> Vec<(ResourceKind, u32)> {
        std::mem::take(&mut *self.released.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct HandleInner {
    device_id: u64,
    kind: ResourceKind,
    id: u32,
    queue: Weak<ReleaseQueue>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.push(self.kind, self.id);
        }
    }
}

macro_rules! resource_handle {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Arc<HandleInner>);

        impl $name {
            pub fn new(device_id: u64, id: u32, queue: &Arc<ReleaseQueue>) -> Self {
                Self(Arc::new(HandleInner {
                    device_id,
                    kind: $kind,
                    id,
                    queue: Arc::downgrade(queue),
                }))
            }

            pub fn id(&self) -> u32 {
                self.0.id
            }

            pub fn device_id(&self) -> u64 {
                self.0.device_id
            }

            /// Number of live references, including this one.
            pub fn ref_count(&self) -> usize {
                Arc::strong_count(&self.0)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.device_id == other.0.device_id && self.0.id == other.0.id
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.device_id.hash(state);
                self.0.id.hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("device", &self.0.device_id)
                    .field("id", &self.0.id)
                    .finish()
            }
        }
    };
}

resource_handle!(
    /// A texture (2D, 2D array or cube), including staging textures.
    TextureHandle => ResourceKind::Texture
);
resource_handle!(
    /// A shader-resource, render-target or depth-stencil view of a texture.
    ViewHandle => ResourceKind::View
);
resource_handle!(BufferHandle => ResourceKind::Buffer);
resource_handle!(SwapChainHandle => ResourceKind::SwapChain);

/// Id-keyed storage for one kind of device object.
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    device_id: u64,
    next_id: u32,
    entries: HashMap<u32, T>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new(device_id: u64) -> Self {
        Self {
            device_id,
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.entries.insert(id, value);
        id
    }

    fn check(&self, device_id: u64, id: u32) -> Result<u32, DeviceError> {
        if device_id != self.device_id {
            return Err(DeviceError::InvalidResource(format!(
                "handle {id} belongs to device {device_id}, not {}",
                self.device_id
            )));
        }
        Ok(id)
    }

    pub(crate) fn get(&self, device_id: u64, id: u32) -> Result<&T, DeviceError> {
        let id = self.check(device_id, id)?;
        self.entries
            .get(&id)
            .ok_or_else(|| DeviceError::InvalidResource(format!("unknown handle {id}")))
    }

    pub(crate) fn get_mut(&mut self, device_id: u64, id: u32) -> Result<&mut T, DeviceError> {
        let id = self.check(device_id, id)?;
        self.entries
            .get_mut(&id)
            .ok_or_else(|| DeviceError::InvalidResource(format!("unknown handle {id}")))
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_release_queues_the_id_once() {
        let queue = ReleaseQueue::new();
        let a = TextureHandle::new(7, 3, &queue);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(a);
        assert!(queue.drain().is_empty());
        drop(b);
        assert_eq!(queue.drain(), vec![(ResourceKind::Texture, 3)]);
    }

    #[test]
    fn handles_outliving_their_queue_release_silently() {
        let queue = ReleaseQueue::new();
        let view = ViewHandle::new(1, 1, &queue);
        drop(queue);
        drop(view);
    }

    #[test]
    fn tables_reject_foreign_device_handles() {
        let mut table = HandleTable::new(1);
        let id = table.insert("texture");
        assert_eq!(table.get(1, id), Ok(&"texture"));
        assert!(matches!(
            table.get(2, id),
            Err(DeviceError::InvalidResource(_))
        ));
        table.remove(id);
        assert!(table.get(1, id).is_err());
    }
}
