use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;
use crate::core::error::{AcquireError, AcquireResult};

/// 配置中的 MB 按十进制计算
pub const BYTES_PER_MB: u64 = 1000 * 1000;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 媒体目录，完整文件与 `.incomplete` 文件都在这里
    pub media_dir: String,
    /// 播放端保存的播放列表（JSON），其中的文件不会被清理
    pub playlist_file: String,
    /// 下载后至少保留的剩余空间（MB）
    pub cleanup_threshold_mb: u64,
    /// 清理时在阈值之外额外腾出的空间（MB）
    pub cleanup_extra_space_mb: u64,
    /// 内容服务器地址，只有发往该主机的请求才附带设备凭据
    pub server_url: String,
    /// 设备标识，为空时从 `device_id_file` 读取
    pub device_id: String,
    pub device_id_file: String,
    /// 每次落盘的字节数
    pub chunk_size: usize,
    /// 数据块看门狗（秒）
    pub chunk_timeout: u64,
    /// 等待响应头的超时（秒）
    pub response_timeout: u64,
    /// 建立连接的超时（秒）
    pub connect_timeout: u64,
    /// 重试延迟（秒）
    pub retry_delay: u64,
    /// 最大重试延迟（秒）
    pub retry_max_delay: u64,
    /// 重试延迟的倍数，1.0 为固定间隔
    pub retry_backoff: f64,
    /// 网络错误最多重试次数，0 表示不限
    pub max_retries: u32,
    pub max_redirects: usize,
    /// User-Agent
    pub user_agent: String,
    /// 日志文件，为空时输出到标准错误
    pub log_file: String,
    pub log_level: String,
    /// 日志文件超过该大小（字节）后轮转
    pub log_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media_dir: "./media".to_string(),
            playlist_file: "./playlist/playlist.json".to_string(),
            cleanup_threshold_mb: 1,
            cleanup_extra_space_mb: 100,
            server_url: String::new(),
            device_id: String::new(),
            device_id_file: "./client/device_id.devid".to_string(),
            chunk_size: 500_000,
            chunk_timeout: 120,
            response_timeout: 60,
            connect_timeout: 30,
            retry_delay: 10,
            retry_max_delay: 60,
            retry_backoff: 1.0,
            max_retries: 0,
            max_redirects: 10,
            user_agent: format!("mediafetch/{}", env!("CARGO_PKG_VERSION")),
            log_file: "logs/mediafetch.log".to_string(),
            log_level: "info".to_string(),
            log_max_size: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// 加载配置文件；不存在时写入默认配置，格式错误时提示并回退到默认配置
    pub fn load(path: &str) -> AcquireResult<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).map_err(|e| AcquireError::file_system(path, e))?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    config.save_with_tutorial(path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> AcquireResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(|e| AcquireError::file_system(parent, e))?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| AcquireError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content).map_err(|e| AcquireError::file_system(path, e))
    }

    /// 教程内容全部是注释，实际取值在文件末尾
    fn generate_tutorial_content() -> String {
        r#"# mediafetch 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 配置文件位置：
# - Windows: %APPDATA%/mediafetch/mediafetch.conf
# - macOS: ~/Library/Application Support/mediafetch/mediafetch.conf
# - Linux: ~/.config/mediafetch/mediafetch.conf
#
# 使用示例：
#   mediafetch https://cms.example.com/api/media/42
#   mediafetch -f urls.txt
#   mediafetch -d /srv/signage/media --size-hint 80000000 https://cms.example.com/api/media/42
#
# ==================== 存储 ====================
#
# media_dir               媒体目录。完整文件名为 md5{校验和}{文件名}，
#                         未完成的文件带 .incomplete 后缀，下次启动时从断点继续
# playlist_file           播放列表（JSON），其中引用的图片和视频不会被清理
# cleanup_threshold_mb    下载后至少保留的剩余空间（1 MB = 1000000 字节）
# cleanup_extra_space_mb  需要清理时，在阈值之外额外腾出的空间，避免频繁清理
#
# ==================== 服务器 ====================
#
# server_url              内容服务器地址，只有发往该主机的请求附带
#                         "Authorization: Device <device_id>"，重定向到 CDN 时不会带上
# device_id               设备标识，留空则从 device_id_file 读取
#
# ==================== 网络 ====================
#
# chunk_size              每次写入磁盘的字节数
# chunk_timeout           超过该秒数没有收到数据就断开，等待后从断点重试
# response_timeout        等待响应头的秒数
# connect_timeout         建立连接的秒数
# retry_delay             重试前等待的秒数
# retry_max_delay         重试等待的上限
# retry_backoff           每次重试等待时间的倍数，1.0 为固定间隔
# max_retries             网络错误的最大重试次数，0 表示一直重试；
#                         4xx、校验失败、磁盘空间不足不会重试
# max_redirects           最多跟随的重定向次数
#
# ==================== 日志 ====================
#
# log_file                日志文件，留空则输出到终端；RUST_LOG 可覆盖 log_level
# log_max_size            日志文件超过该字节数后轮转为 .backup
#
# ==================== 故障排除 ====================
#
# 问题：下载总是提示磁盘空间不足
# 解决：减小 cleanup_threshold_mb，或检查播放列表是否引用了大部分媒体
#
# 问题：网络不稳定时下载反复中断
# 解决：增大 chunk_timeout；已写入的数据不会丢失，重试会从断点继续
"#
        .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> AcquireResult<()> {
        if self.media_dir.trim().is_empty() {
            return Err(AcquireError::Config("媒体目录不能为空".into()));
        }
        if self.chunk_size == 0 {
            return Err(AcquireError::Config("分块大小必须大于0".into()));
        }
        if self.chunk_timeout == 0 || self.response_timeout == 0 || self.connect_timeout == 0 {
            return Err(AcquireError::Config("超时时间必须大于0".into()));
        }
        if self.retry_delay == 0 {
            return Err(AcquireError::Config("retry_delay 必须大于0".into()));
        }
        if !(self.retry_backoff >= 1.0) {
            return Err(AcquireError::Config("retry_backoff 不能小于 1.0".into()));
        }
        if !self.server_url.trim().is_empty() {
            let parsed = Url::parse(self.server_url.trim())
                .map_err(|e| AcquireError::Config(format!("server_url 无效: {}", e)))?;
            if parsed.host_str().is_none() {
                return Err(AcquireError::Config(format!("server_url 缺少主机: {}", self.server_url)));
            }
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(media_dir) = &args.media_dir {
            self.media_dir = media_dir.clone();
        }
        if let Some(playlist) = &args.playlist {
            self.playlist_file = playlist.clone();
        }
        if let Some(server_url) = &args.server_url {
            self.server_url = server_url.clone();
        }
        if let Some(device_id) = &args.device_id {
            self.device_id = device_id.clone();
        }
    }

    pub fn cleanup_threshold_bytes(&self) -> u64 {
        self.cleanup_threshold_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn cleanup_extra_space_bytes(&self) -> u64 {
        self.cleanup_extra_space_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn media_path(&self) -> PathBuf {
        PathBuf::from(&self.media_dir)
    }

    /// 设备标识：优先使用配置值，其次读取标识文件；都没有时返回空字符串（不发送凭据）
    pub fn resolve_device_id(&self) -> AcquireResult<String> {
        if !self.device_id.trim().is_empty() {
            return Ok(self.device_id.trim().to_string());
        }
        if self.device_id_file.is_empty() {
            return Ok(String::new());
        }
        match fs::read_to_string(&self.device_id_file) {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("设备标识文件不存在: {}", self.device_id_file);
                Ok(String::new())
            }
            Err(e) => Err(AcquireError::file_system(&self.device_id_file, e)),
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 媒体目录: {}\n\
            - 播放列表: {}\n\
            - 清理阈值: {} MB (额外腾出 {} MB)\n\
            - 服务器: {}\n\
            - 分块大小: {} 字节\n\
            - 数据块超时: {} 秒\n\
            - 重试: {}",
            self.media_dir,
            self.playlist_file,
            self.cleanup_threshold_mb,
            self.cleanup_extra_space_mb,
            if self.server_url.is_empty() { "未设置" } else { self.server_url.as_str() },
            self.chunk_size,
            self.chunk_timeout,
            if self.max_retries == 0 {
                format!("不限次数，间隔 {} 秒", self.retry_delay)
            } else {
                format!("最多 {} 次，间隔 {} 秒", self.max_retries, self.retry_delay)
            }
        )
    }
}
