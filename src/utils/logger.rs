use chrono::Local; // 用于获取本地时间
use log::LevelFilter; // 用于设置日志级别
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::Config;

/// 按大小轮转的日志文件，超过上限后当前文件改名为 `.backup`（只保留一份）
pub struct RotatingFileWriter {
    writer: BufWriter<File>,
    file_path: PathBuf,
    max_size: u64, // 最大文件大小 (bytes)
    current_size: u64,
}

impl RotatingFileWriter {
    /// 创建日志文件，追加写入
    pub fn new(file_path: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let file_path = file_path.into();
        // 确保日志目录存在
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            writer: BufWriter::new(file),
            file_path,
            max_size,
            current_size,
        })
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.file_path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> io::Result<()> {
        if self.current_size <= self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup_path = self.backup_path();
        if backup_path.exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(&self.file_path, &backup_path)?;

        let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        let written = self.writer.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

/// 初始化日志：级别取自配置，`RUST_LOG` 可覆盖；`log_file` 为空时写到标准错误
pub fn init_logging(config: &Config) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(parse_level(&config.log_level))
        .parse_env(env_logger::Env::default())
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        });

    if !config.log_file.trim().is_empty() {
        let writer = RotatingFileWriter::new(Path::new(&config.log_file), config.log_max_size)?;
        builder.target(env_logger::Target::Pipe(Box::new(writer)));
    }

    builder
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))
}
