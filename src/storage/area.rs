//! Storage areas of a client and the per-connection initialization gate.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};

bitflags! {
    /// Set of per-client storage areas.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StorageArea: u8 {
        /// Queued messages (`msgs/`)
        const MESSAGES = 0b0001;
        /// Subscriptions (`subs/`)
        const SUBSCRIPTIONS = 0b0010;
        /// Will message (`will/`)
        const WILL = 0b0100;
        /// Packet identifier locks (`pkgids/`)
        const PACKET_IDS = 0b1000;
        /// Session state, created together
        const SESSION = Self::SUBSCRIPTIONS.bits() | Self::WILL.bits() | Self::PACKET_IDS.bits();
        const ALL = Self::MESSAGES.bits() | Self::SESSION.bits();
    }
}

impl StorageArea {
    /// Directory name of a single area flag
    pub fn dir_name(self) -> Option<&'static str> {
        if self == Self::MESSAGES {
            Some("msgs")
        } else if self == Self::SUBSCRIPTIONS {
            Some("subs")
        } else if self == Self::WILL {
            Some("will")
        } else if self == Self::PACKET_IDS {
            Some("pkgids")
        } else {
            None
        }
    }

    /// Directory names of every area in this set, in creation order
    pub fn dir_names(self) -> impl Iterator<Item = &'static str> {
        self.iter().filter_map(StorageArea::dir_name)
    }
}

/// Tracks which areas have been initialized for one connection.
///
/// Reads are lock-free; the mutex is only taken around the
/// check-and-create sequence. Flags are tied to the storage root
/// generation they were created under, so a reconfigured root is
/// initialized again on next use.
#[derive(Debug, Default)]
pub struct AreaInit {
    bits: AtomicU8,
    generation: AtomicU64,
    lock: Mutex<()>,
}

impl AreaInit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Areas initialized so far under any root
    pub fn initialized(&self) -> StorageArea {
        StorageArea::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Whether every area in `areas` is initialized under root `generation`
    pub(crate) fn is_ready(&self, areas: StorageArea, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
            && self.initialized().contains(areas)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Record `areas` as created; caller holds `lock()`
    pub(crate) fn mark(&self, areas: StorageArea, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            self.bits.store(areas.bits(), Ordering::Release);
            self.generation.store(generation, Ordering::Release);
        } else {
            self.bits.fetch_or(areas.bits(), Ordering::AcqRel);
        }
    }
}
