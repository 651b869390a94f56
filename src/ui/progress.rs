use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::core::asset::{Asset, TransferProgress};
use crate::core::task::TransferObserver;

const BAR_TEMPLATE: &str =
    "{msg} [{bar:30}] {bytes}/{total_bytes} | {bytes_per_sec} | ETA:{eta}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg} {bytes} | {bytes_per_sec}";

// 结构体：ProgressManager
// 每个资源一个进度条，按未完成文件路径区分；克隆后共享同一组进度条
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    progress_bars: Arc<Mutex<HashMap<PathBuf, ProgressBar>>>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// 不输出任何内容，用于非交互环境
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        ProgressManager {
            multi: MultiProgress::with_draw_target(target),
            progress_bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn new_bar(&self, asset: &Asset, total: Option<u64>) -> ProgressBar {
        let (bar, template) = match total {
            Some(total) => (ProgressBar::new(total), BAR_TEMPLATE),
            None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(display_name(asset));
        self.multi.add(bar)
    }

    #[cfg(test)]
    fn position(&self, asset: &Asset) -> Option<u64> {
        let bars = self.progress_bars.lock().ok()?;
        bars.get(&asset.incomplete_path).map(|bar| bar.position())
    }

    pub fn finish_all(&self) {
        if let Ok(mut bars) = self.progress_bars.lock() {
            for (_, bar) in bars.drain() {
                bar.finish_and_clear();
            }
        }
    }
}

impl TransferObserver for ProgressManager {
    fn on_progress(&self, asset: &Asset, progress: TransferProgress, total: Option<u64>) {
        let Ok(mut bars) = self.progress_bars.lock() else {
            return;
        };
        let bar = bars
            .entry(asset.incomplete_path.clone())
            .or_insert_with(|| self.new_bar(asset, total));
        if let Some(total) = total {
            bar.set_length(total);
        }
        bar.set_position(progress.bytes_written_so_far);
        if progress.attempt_count > 1 {
            bar.set_message(format!("{} (第 {} 次尝试)", display_name(asset), progress.attempt_count));
        }
    }
}

fn display_name(asset: &Asset) -> String {
    if asset.declared_filename.is_empty() {
        asset.remote_url.clone()
    } else {
        asset.declared_filename.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::AssetLocator;

    #[test]
    fn test_progress_tracks_bytes_per_asset() {
        let locator = AssetLocator::new("/tmp/media");
        let a = locator.locate("http://h/a", "a.mp4", "0123456789abcdef0123456789abcdef").unwrap();
        let b = locator.locate("http://h/b", "b.mp4", "fedcba9876543210fedcba9876543210").unwrap();

        let progress = ProgressManager::hidden();
        let observer: Box<dyn TransferObserver> = Box::new(progress.clone());
        let at = |bytes_written_so_far, attempt_count| TransferProgress {
            bytes_written_so_far,
            attempt_count,
        };
        observer.on_progress(&a, at(10, 1), Some(100));
        observer.on_progress(&a, at(40, 2), Some(100));
        observer.on_progress(&b, at(5, 1), None);

        assert_eq!(progress.position(&a), Some(40));
        assert_eq!(progress.position(&b), Some(5));

        progress.finish_all();
        assert_eq!(progress.position(&a), None);
        assert_eq!(progress.position(&b), None);
    }
}
