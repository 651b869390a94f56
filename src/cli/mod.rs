//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析
//! - 配置文件路径管理（平台默认路径、`-e` 用编辑器打开）
//! - URL 列表处理（命令行参数和文件）
//!
//! ## 支持的命令
//!
//! - 获取媒体：`mediafetch <url>`
//! - 批量获取：`mediafetch -f urls.txt`
//! - 编辑配置：`mediafetch -e`
//! - 指定配置：`mediafetch -c mediafetch.conf <url>`

use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::config::Config;
use crate::core::error::{AcquireError, AcquireResult};
use crate::utils::validator::is_valid_url;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/mediafetch/mediafetch.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/mediafetch/mediafetch.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/mediafetch/mediafetch.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// `--version` 的详细信息，构建信息由 build.rs 通过 vergen 提供
static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
    )
});

/// mediafetch 命令行参数
///
/// 示例用法：
///   mediafetch https://cms.example.com/api/media/42
///   mediafetch -e  # 编辑配置文件
///   mediafetch -f urls.txt --size-hint 80000000
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mediafetch",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION.as_str(),
    about = "标牌播放端的媒体获取工具",
    long_about = "按资源 URL 下载媒体到本地缓存：断点续传、MD5 校验，\
        磁盘空间不足时按访问时间清理未被播放列表引用的旧媒体。\n\n\
        示例：\n  mediafetch https://cms.example.com/api/media/42\n  mediafetch -e\n  \
        mediafetch -c /etc/mediafetch.conf -f urls.txt\n"
)]
pub struct Args {
    /// 要获取的URL列表（可同时指定多个）
    #[arg(required = false, help = "要获取的资源URL，可以同时指定多个。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    #[arg(long, short = 'd', help = "媒体目录，覆盖配置文件中的设置。")]
    pub media_dir: Option<String>,

    #[arg(long, short = 'p', help = "播放列表文件，其中引用的媒体不会被清理。")]
    pub playlist: Option<String>,

    #[arg(long, help = "预计大小（字节），用于下载前检查磁盘空间；默认使用服务器返回的长度。")]
    pub size_hint: Option<u64>,

    #[arg(long, help = "内容服务器地址，只对该主机发送设备凭据。")]
    pub server_url: Option<String>,

    #[arg(long, help = "设备标识。")]
    pub device_id: Option<String>,
}

impl Args {
    /// 加载或创建配置文件，合并命令行参数并校验
    pub fn load_config(&self) -> AcquireResult<Config> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        config.validate()?;
        Ok(config)
    }

    /// 命令行与URL文件中的全部URL
    pub fn get_urls(&self) -> AcquireResult<Vec<String>> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)
                .map_err(|e| AcquireError::file_system(Path::new(file_path), e))?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        if let Some(invalid) = urls.iter().find(|url| !is_valid_url(url)) {
            return Err(AcquireError::InvalidUrl(invalid.clone()));
        }
        if urls.is_empty() {
            return Err(AcquireError::InvalidUrl(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }

        Ok(urls)
    }
}
