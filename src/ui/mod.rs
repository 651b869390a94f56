mod progress;

use std::fmt;
pub use progress::ProgressManager;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

pub struct AcquireSummary {
    pub total_assets: usize,
    pub total_size: u64,
    pub elapsed_time: std::time::Duration,
    pub success_count: usize,
    pub failed_count: usize,
}

impl AcquireSummary {
    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}

impl fmt::Display for AcquireSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n获取摘要:")?;
        writeln!(f, "资源数: {}", self.total_assets)?;
        writeln!(f, "总大小: {}", format_size(self.total_size))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
