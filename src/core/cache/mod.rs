//! 本地媒体缓存：清单与磁盘空间守卫

pub mod inventory;
pub mod space;

pub use inventory::{CacheEntry, CacheInventory, PlaylistProvider, StoredPlaylist};
pub use space::{DiskStats, FilesystemStats, RoomReport, SpaceBudget, SpaceGuard};
