//! mediafetch: 标牌播放端的媒体获取层
//!
//! 断点续传下载（`.incomplete` 文件即进度）、MD5 校验、按访问时间清理未使用的媒体。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;
