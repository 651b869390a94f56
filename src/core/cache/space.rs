use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::error::{AcquireError, AcquireResult};
use super::inventory::{CacheInventory, PlaylistProvider};

/// 文件系统统计
pub trait FilesystemStats {
    fn free_bytes(&self, path: &Path) -> AcquireResult<u64>;
}

/// 实际磁盘：非特权用户可用的空间（statvfs 的 f_bavail * f_frsize）
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStats;

impl FilesystemStats for DiskStats {
    fn free_bytes(&self, path: &Path) -> AcquireResult<u64> {
        fs2::available_space(path).map_err(|e| AcquireError::file_system(path, e))
    }
}

/// 一次判断所用的空间数据，每次重新计算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceBudget {
    pub free_bytes: u64,
    pub cleanup_threshold_bytes: u64,
    pub extra_headroom_bytes: u64,
}

impl SpaceBudget {
    /// 存下 `for_bytes` 后仍保留阈值
    pub fn fits(&self, for_bytes: u64) -> bool {
        self.free_bytes >= self.required(for_bytes)
    }

    /// 清理的目标：在阈值之外再多留出余量，避免在阈值附近反复清理
    pub fn has_headroom(&self, for_bytes: u64) -> bool {
        self.free_bytes >= self.required(for_bytes).saturating_add(self.extra_headroom_bytes)
    }

    pub fn required(&self, for_bytes: u64) -> u64 {
        for_bytes.saturating_add(self.cleanup_threshold_bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomReport {
    pub budget: SpaceBudget,
    /// 按删除顺序
    pub evicted: Vec<PathBuf>,
}

/// 空间守卫：空间不够时按最久未访问顺序删除未引用的文件
pub struct SpaceGuard<P, F> {
    inventory: CacheInventory<P>,
    stats: F,
    cleanup_threshold_bytes: u64,
    extra_headroom_bytes: u64,
}

impl<P: PlaylistProvider, F: FilesystemStats> SpaceGuard<P, F> {
    pub fn new(
        inventory: CacheInventory<P>,
        stats: F,
        cleanup_threshold_bytes: u64,
        extra_headroom_bytes: u64,
    ) -> Self {
        Self { inventory, stats, cleanup_threshold_bytes, extra_headroom_bytes }
    }

    pub fn from_config(config: &Config, playlist: P, stats: F) -> Self {
        Self::new(
            CacheInventory::new(&config.media_dir, playlist),
            stats,
            config.cleanup_threshold_bytes(),
            config.cleanup_extra_space_bytes(),
        )
    }

    pub fn budget(&self) -> AcquireResult<SpaceBudget> {
        let free_bytes = self.stats.free_bytes(self.inventory.media_dir())?;
        Ok(SpaceBudget {
            free_bytes,
            cleanup_threshold_bytes: self.cleanup_threshold_bytes,
            extra_headroom_bytes: self.extra_headroom_bytes,
        })
    }

    /// 确保能存下 `for_bytes` 字节；清理后仍不够则返回 `InsufficientStorage`，调用方不得继续下载
    pub fn ensure_room(&self, for_bytes: u64) -> AcquireResult<RoomReport> {
        let mut budget = self.budget()?;
        log::debug!(
            "剩余空间 {} 字节，需要 {} 字节，清理阈值 {} 字节",
            budget.free_bytes,
            for_bytes,
            budget.cleanup_threshold_bytes
        );
        if budget.fits(for_bytes) {
            return Ok(RoomReport { budget, evicted: Vec::new() });
        }

        log::info!("空间不足，开始清理旧媒体");
        let mut evicted = Vec::new();
        for candidate in self.inventory.unreferenced_assets()? {
            if budget.has_headroom(for_bytes) {
                break;
            }
            log::warn!("删除旧媒体: {:?}", candidate.path);
            match std::fs::remove_file(&candidate.path) {
                Ok(()) => evicted.push(candidate.path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("文件已不存在: {:?}", candidate.path);
                }
                Err(e) => return Err(AcquireError::file_system(&candidate.path, e)),
            }
            budget = self.budget()?;
        }

        if !budget.fits(for_bytes) {
            log::error!(
                "无法腾出足够空间: 需要 {} 字节, 可用 {} 字节",
                budget.required(for_bytes),
                budget.free_bytes
            );
            return Err(AcquireError::InsufficientStorage {
                required: budget.required(for_bytes),
                available: budget.free_bytes,
            });
        }
        log::info!("清理完成，删除 {} 个文件，剩余空间 {} 字节", evicted.len(), budget.free_bytes);
        Ok(RoomReport { budget, evicted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::DirCapacityStats;
    use filetime::{set_file_atime, FileTime};
    use std::collections::HashSet;

    const MB: u64 = 1000 * 1000;

    fn sized(dir: &Path, name: &str, size: u64, atime: i64) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(size).unwrap();
        set_file_atime(&path, FileTime::from_unix_time(atime, 0)).unwrap();
        path
    }

    fn guard(
        dir: &Path,
        capacity: u64,
        referenced: HashSet<PathBuf>,
        headroom: u64,
    ) -> SpaceGuard<HashSet<PathBuf>, DirCapacityStats> {
        SpaceGuard::new(
            CacheInventory::new(dir, referenced),
            DirCapacityStats { capacity },
            MB,
            headroom,
        )
    }

    #[test]
    fn test_enough_space_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a = sized(dir.path(), "a", 5 * MB, 100);
        let space = guard(dir.path(), 100 * MB, HashSet::new(), 100 * MB);
        let report = space.ensure_room(50 * MB).unwrap();
        assert!(report.evicted.is_empty());
        assert!(a.exists());
        assert_eq!(report.budget.free_bytes, 95 * MB);
    }

    #[test]
    fn test_eviction_order_stops_when_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = sized(dir.path(), "t1", 10 * MB, 100);
        let t2 = sized(dir.path(), "t2", 10 * MB, 200);
        let t3 = sized(dir.path(), "t3", 10 * MB, 300);

        // 剩 10MB；目标 15MB + 阈值 1MB + 余量 5MB = 21MB，删两个后 30MB
        let space = guard(dir.path(), 40 * MB, HashSet::new(), 5 * MB);
        let report = space.ensure_room(15 * MB).unwrap();
        assert_eq!(report.evicted, vec![t1.clone(), t2.clone()]);
        assert!(!t1.exists() && !t2.exists());
        assert!(t3.exists());
    }

    #[test]
    fn test_referenced_asset_is_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = sized(dir.path(), "playing.mp4", 10 * MB, 1);
        let other = sized(dir.path(), "other.mp4", 10 * MB, 50);
        let referenced: HashSet<PathBuf> = [oldest.clone()].into_iter().collect();

        let err = guard(dir.path(), 25 * MB, referenced, 0).ensure_room(20 * MB).unwrap_err();
        assert!(matches!(err, AcquireError::InsufficientStorage { .. }));
        assert!(oldest.exists());
        assert!(!other.exists());
    }

    #[test]
    fn test_incomplete_file_is_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let partial = sized(dir.path(), "md5abc_x.mp4.incomplete", 10 * MB, 1);

        let err = guard(dir.path(), 15 * MB, HashSet::new(), 0).ensure_room(10 * MB).unwrap_err();
        assert!(matches!(err, AcquireError::InsufficientStorage { required, available }
            if required == 11 * MB && available == 5 * MB));
        assert!(partial.exists());
    }

    #[test]
    fn test_scenario_headroom_is_target_not_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let a = sized(dir.path(), "a", 20 * MB, 100);
        let b = sized(dir.path(), "b", 15 * MB, 200);
        let c = sized(dir.path(), "c", 10 * MB, 300);

        // 目标 181MB 达不到，全部删除后 95MB >= 81MB 仍可继续
        let space = guard(dir.path(), 95 * MB, HashSet::new(), 100 * MB);
        let report = space.ensure_room(80 * MB).unwrap();
        assert_eq!(report.evicted, vec![a, b, c]);
        assert_eq!(report.budget.free_bytes, 95 * MB);
    }

    #[test]
    fn test_scenario_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        sized(dir.path(), "a", 20 * MB, 100);
        sized(dir.path(), "b", 15 * MB, 200);
        sized(dir.path(), "c", 10 * MB, 300);

        let space = guard(dir.path(), 95 * MB, HashSet::new(), 100 * MB);
        let err = space.ensure_room(100 * MB).unwrap_err();
        match err {
            AcquireError::InsufficientStorage { required, available } => {
                assert_eq!(required, 101 * MB);
                assert_eq!(available, 95 * MB);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scenario_headroom_reduced() {
        let dir = tempfile::tempdir().unwrap();
        let a = sized(dir.path(), "a", 20 * MB, 100);
        let b = sized(dir.path(), "b", 15 * MB, 200);
        let c = sized(dir.path(), "c", 10 * MB, 300);

        let space = guard(dir.path(), 95 * MB, HashSet::new(), 10 * MB);
        let report = space.ensure_room(80 * MB).unwrap();
        assert_eq!(report.evicted, vec![a, b, c]);
        assert_eq!(report.budget.free_bytes, 95 * MB);
    }

    #[test]
    fn test_space_budget_arithmetic() {
        let budget = SpaceBudget {
            free_bytes: 91,
            cleanup_threshold_bytes: 1,
            extra_headroom_bytes: 10,
        };
        assert!(budget.fits(80));
        assert!(budget.has_headroom(80));
        assert!(!budget.has_headroom(81));
        assert!(!budget.fits(u64::MAX));
    }
}
