//! Guid-keyed private data, following the `ID3D11DeviceChild` Get/SetPrivateData contract.
//!
//! The guest proxies keep one of these per wrapped object; it never crosses the gate. Host test
//! doubles reuse it for their own private-data slot, which is where the mirror is attached.

use std::sync::{Arc, Mutex, MutexGuard};

use aero_thunk_abi::{Guid, HResult};
use hashbrown::HashMap;
use tracing::trace;

use crate::host::Unknown;

/// Pointer width of the context that owns a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Guest32,
    Host64,
}

impl PointerWidth {
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Guest32 => 4,
            PointerWidth::Host64 => 8,
        }
    }
}

enum PrivateValue {
    Bytes(Vec<u8>),
    Interface(Arc<dyn Unknown>),
}

impl PrivateValue {
    fn size(&self, width: PointerWidth) -> usize {
        match self {
            PrivateValue::Bytes(bytes) => bytes.len(),
            PrivateValue::Interface(_) => width.bytes(),
        }
    }
}

pub struct PrivateStore {
    width: PointerWidth,
    entries: Mutex<HashMap<Guid, PrivateValue>>,
}

impl std::fmt::Debug for PrivateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateStore")
            .field("width", &self.width)
            .field("entries", &self.len())
            .finish()
    }
}

impl PrivateStore {
    pub fn new(width: PointerWidth) -> Self {
        Self {
            width,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.lock().contains_key(guid)
    }

    /// `GetPrivateData`.
    ///
    /// `size` is the caller's buffer size on input and the stored size on output. Interface values
    /// are returned as a pointer-width value and gain a reference the caller must release.
    pub fn get(&self, guid: &Guid, size: &mut u32, data: Option<&mut [u8]>) -> HResult {
        let entries = self.lock();
        let Some(value) = entries.get(guid) else {
            *size = 0;
            return HResult::DXGI_ERROR_NOT_FOUND;
        };
        let stored = value.size(self.width);
        let capacity = *size as usize;
        *size = stored as u32;
        let Some(data) = data else {
            return HResult::S_OK;
        };
        if capacity < stored || data.len() < stored {
            return HResult::DXGI_ERROR_MORE_DATA;
        }
        match value {
            PrivateValue::Bytes(bytes) => data[..stored].copy_from_slice(bytes),
            PrivateValue::Interface(iface) => {
                iface.add_ref();
                let ptr = iface.interface_ptr().to_le_bytes();
                data[..stored].copy_from_slice(&ptr[..stored]);
            }
        }
        HResult::S_OK
    }

    /// The interface stored under `guid`, with a reference the caller must release. `None` for
    /// missing keys and for byte entries.
    pub fn get_interface(&self, guid: &Guid) -> Option<Arc<dyn Unknown>> {
        let entries = self.lock();
        match entries.get(guid)? {
            PrivateValue::Interface(iface) => {
                iface.add_ref();
                Some(iface.clone())
            }
            PrivateValue::Bytes(_) => None,
        }
    }

    /// `SetPrivateData`. `None` removes the entry.
    pub fn set(&self, guid: &Guid, data: Option<&[u8]>) -> HResult {
        trace!(%guid, len = ?data.map(<[u8]>::len), "set private data");
        match data {
            None => match self.remove(guid) {
                Some(old) => {
                    release_value(old);
                    HResult::S_OK
                }
                None => HResult::S_FALSE,
            },
            Some(bytes) => {
                let old = self
                    .lock()
                    .insert(*guid, PrivateValue::Bytes(bytes.to_vec()));
                if let Some(old) = old {
                    release_value(old);
                }
                HResult::S_OK
            }
        }
    }

    /// `SetPrivateDataInterface`. The store takes a reference on `value` and drops the reference
    /// it held on any previous interface under `guid`. `None` removes the entry.
    pub fn set_interface(&self, guid: &Guid, value: Option<Arc<dyn Unknown>>) -> HResult {
        let Some(value) = value else {
            return self.set(guid, None);
        };
        value.add_ref();
        let old = self.lock().insert(*guid, PrivateValue::Interface(value));
        if let Some(old) = old {
            release_value(old);
        }
        HResult::S_OK
    }

    /// Drop every entry, releasing interface values.
    pub fn cleanup(&self) {
        let drained: Vec<PrivateValue> = {
            let mut entries = self.lock();
            entries.drain().map(|(_, v)| v).collect()
        };
        for value in drained {
            release_value(value);
        }
    }

    fn remove(&self, guid: &Guid) -> Option<PrivateValue> {
        self.lock().remove(guid)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Guid, PrivateValue>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// Called with the map lock released: releasing an interface may run arbitrary destructor code.
fn release_value(value: PrivateValue) {
    if let PrivateValue::Interface(iface) = value {
        iface.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const KEY: Guid = Guid::from_u128(0x11111111_2222_3333_4444_555555555555);

    #[derive(Default)]
    struct Counted(AtomicU32);

    impl Unknown for Counted {
        fn add_ref(&self) -> u32 {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }
        fn release(&self) -> u32 {
            self.0.fetch_sub(1, Ordering::SeqCst) - 1
        }
        fn interface_ptr(&self) -> u64 {
            0x1122_3344_5566_7788
        }
    }

    #[test]
    fn missing_key_reports_not_found_and_zero_size() {
        let store = PrivateStore::new(PointerWidth::Guest32);
        let mut size = 16;
        let mut buf = [0u8; 16];
        assert_eq!(
            store.get(&KEY, &mut size, Some(&mut buf)),
            HResult::DXGI_ERROR_NOT_FOUND
        );
        assert_eq!(size, 0);
    }

    #[test]
    fn size_query_and_short_buffer() {
        let store = PrivateStore::new(PointerWidth::Guest32);
        assert_eq!(store.set(&KEY, Some(&[1, 2, 3, 4, 5])), HResult::S_OK);

        let mut size = 0;
        assert_eq!(store.get(&KEY, &mut size, None), HResult::S_OK);
        assert_eq!(size, 5);

        let mut size = 4;
        let mut buf = [0xaa; 4];
        assert_eq!(
            store.get(&KEY, &mut size, Some(&mut buf)),
            HResult::DXGI_ERROR_MORE_DATA
        );
        assert_eq!(size, 5);
        assert_eq!(buf, [0xaa; 4]);

        let mut size = 8;
        let mut buf = [0u8; 8];
        assert_eq!(store.get(&KEY, &mut size, Some(&mut buf)), HResult::S_OK);
        assert_eq!(size, 5);
        assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn removing_absent_key_is_s_false() {
        let store = PrivateStore::new(PointerWidth::Guest32);
        assert_eq!(store.set(&KEY, None), HResult::S_FALSE);
        store.set(&KEY, Some(&[9]));
        assert_eq!(store.set(&KEY, None), HResult::S_OK);
        assert!(store.is_empty());
    }

    #[test]
    fn interface_values_are_counted() {
        let obj = Arc::new(Counted::default());
        let store = PrivateStore::new(PointerWidth::Host64);
        store.set_interface(&KEY, Some(obj.clone()));
        assert_eq!(obj.0.load(Ordering::SeqCst), 1);

        let mut size = 8;
        let mut buf = [0u8; 8];
        assert_eq!(store.get(&KEY, &mut size, Some(&mut buf)), HResult::S_OK);
        assert_eq!(u64::from_le_bytes(buf), 0x1122_3344_5566_7788);
        assert_eq!(obj.0.load(Ordering::SeqCst), 2);
        obj.release();

        // Overwriting with bytes releases the interface.
        store.set(&KEY, Some(&[0]));
        assert_eq!(obj.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn get_interface_hands_out_a_reference() {
        let obj = Arc::new(Counted::default());
        let store = PrivateStore::new(PointerWidth::Host64);
        assert!(store.get_interface(&KEY).is_none());
        store.set_interface(&KEY, Some(obj.clone()));

        let iface = store.get_interface(&KEY).unwrap();
        assert_eq!(iface.interface_ptr(), 0x1122_3344_5566_7788);
        assert_eq!(obj.0.load(Ordering::SeqCst), 2);
        iface.release();

        store.set(&KEY, Some(&[1, 2]));
        assert!(store.get_interface(&KEY).is_none());
        assert_eq!(obj.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn guest_width_truncates_interface_pointers() {
        let obj = Arc::new(Counted::default());
        let store = PrivateStore::new(PointerWidth::Guest32);
        store.set_interface(&KEY, Some(obj.clone()));
        let mut size = 4;
        let mut buf = [0u8; 4];
        assert_eq!(store.get(&KEY, &mut size, Some(&mut buf)), HResult::S_OK);
        assert_eq!(u32::from_le_bytes(buf), 0x5566_7788);
        obj.release();
        store.cleanup();
        assert_eq!(obj.0.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }
}
