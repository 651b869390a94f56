use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::core::source::parse_http_url;

/// 只接受 http/https
pub fn is_valid_url(url: &str) -> bool {
    parse_http_url(url).is_ok()
}

/// 媒体目录存在时必须是目录；不存在时会在第一次下载前创建
pub fn validate_media_dir(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        anyhow::bail!("媒体目录不能为空");
    }
    let path = Path::new(path);
    if path.exists() && !path.is_dir() {
        anyhow::bail!("媒体目录不是目录: {}", path.display());
    }
    Ok(())
}

/// 启动前的整体检查
pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;
    validate_media_dir(&config.media_dir)
}
