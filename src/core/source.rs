//! 远程数据源：支持 Range 请求的字节流
//!
//! `RangeSource` 把 HTTP 细节挡在传输逻辑之外，生产环境用 [`HttpSource`]，
//! 测试用内存实现。

use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use awc::error::SendRequestError;
use awc::http::header::{self, HeaderMap};
use awc::{Client, Connector};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use regex::Regex;
use url::Url;

use crate::config::Config;
use crate::core::error::{AcquireError, AcquireResult, NetworkErrorKind};

/// 服务器提供 MD5 的响应头
pub const CHECKSUM_HEADER: &str = "content-md5";

pub type ByteStream = Pin<Box<dyn Stream<Item = AcquireResult<Bytes>>>>;

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)filename\s*=\s*"?([^";]+)"?"#).expect("filename regex"));

/// 从响应头中读出的资源信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    pub filename: Option<String>,
    pub checksum: Option<String>,
    pub content_length: Option<u64>,
    /// 206 响应中 Content-Range 的起点
    pub range_start: Option<u64>,
}

impl RemoteMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        Self {
            filename: text(header::CONTENT_DISPOSITION.as_str())
                .and_then(|v| parse_content_disposition(&v)),
            checksum: text(CHECKSUM_HEADER).map(|v| v.trim().to_string()),
            content_length: text(header::CONTENT_LENGTH.as_str())
                .and_then(|v| v.trim().parse().ok()),
            range_start: text(header::CONTENT_RANGE.as_str())
                .and_then(|v| parse_content_range_start(&v)),
        }
    }
}

pub struct RemoteResponse {
    pub status: u16,
    pub meta: RemoteMeta,
    pub body: ByteStream,
}

impl std::fmt::Debug for RemoteResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResponse")
            .field("status", &self.status)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// 能从指定字节偏移开始读取的远程数据源
#[async_trait(?Send)]
pub trait RangeSource {
    /// 发起 GET；`offset > 0` 时带 `Range: bytes=<offset>-`
    async fn open(&self, url: &str, offset: u64) -> AcquireResult<RemoteResponse>;

    /// 只读取响应头，丢弃响应体
    async fn probe(&self, url: &str) -> AcquireResult<RemoteMeta> {
        let response = self.open(url, 0).await?;
        check_status(url, response.status)?;
        Ok(response.meta)
    }
}

/// 按状态码分类：4xx 直接失败，5xx 视为可重试的网络错误
pub fn check_status(url: &str, status: u16) -> AcquireResult<()> {
    match status {
        200..=299 => Ok(()),
        400..=499 => Err(AcquireError::ClientRejected { url: url.to_string(), status }),
        _ => Err(AcquireError::network(
            NetworkErrorKind::ServerStatus(status),
            format!("{} 返回 HTTP {}", url, status),
        )),
    }
}

pub fn parse_content_disposition(value: &str) -> Option<String> {
    FILENAME_RE
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// `bytes 100-199/200` -> 100
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = rest.split_once('-')?;
    start.trim().parse().ok()
}

/// 只对配置的源站附加设备凭据，重定向到第三方主机（CDN）时不泄露
#[derive(Debug, Clone, Default)]
pub struct OriginAuth {
    origin: Option<(String, u16)>,
    header_value: Option<String>,
}

impl OriginAuth {
    pub fn new(server_url: &str, device_id: &str) -> AcquireResult<Self> {
        if server_url.trim().is_empty() || device_id.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed = Url::parse(server_url)
            .map_err(|e| AcquireError::InvalidUrl(format!("{}: {}", server_url, e)))?;
        Ok(Self {
            origin: net_loc(&parsed),
            header_value: Some(format!("Device {}", device_id.trim())),
        })
    }

    pub fn authorization_for(&self, url: &Url) -> Option<&str> {
        match (&self.origin, &self.header_value) {
            (Some(origin), Some(value)) if net_loc(url).as_ref() == Some(origin) => Some(value),
            _ => None,
        }
    }
}

fn net_loc(url: &Url) -> Option<(String, u16)> {
    let host = url.host_str()?.to_ascii_lowercase();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

/// 基于 awc 的 HTTP 数据源。重定向由这里逐跳处理，以便每一跳重新判断凭据
pub struct HttpSource {
    client: Client,
    auth: OriginAuth,
    response_timeout: Duration,
    max_redirects: usize,
}

impl HttpSource {
    pub fn new(config: &Config, auth: OriginAuth) -> Self {
        let connector = Connector::new().timeout(Duration::from_secs(config.connect_timeout));
        // 整体超时关闭：响应体由传输层的数据块看门狗负责
        let client = Client::builder()
            .connector(connector)
            .add_default_header((header::USER_AGENT, config.user_agent.clone()))
            .disable_redirects()
            .disable_timeout()
            .finish();
        Self {
            client,
            auth,
            response_timeout: Duration::from_secs(config.response_timeout),
            max_redirects: config.max_redirects,
        }
    }
}

#[async_trait(?Send)]
impl RangeSource for HttpSource {
    async fn open(&self, url: &str, offset: u64) -> AcquireResult<RemoteResponse> {
        let mut current = parse_http_url(url)?;

        for hop in 0..=self.max_redirects {
            let mut request = self.client.get(current.as_str());
            if let Some(value) = self.auth.authorization_for(&current) {
                request = request.insert_header((header::AUTHORIZATION, value.to_string()));
            }
            if offset > 0 {
                request = request.insert_header((header::RANGE, format!("bytes={}-", offset)));
            }
            log::debug!("GET {} (offset {}, hop {})", current, offset, hop);

            let response = tokio::time::timeout(self.response_timeout, request.send())
                .await
                .map_err(|_| {
                    AcquireError::network(
                        NetworkErrorKind::ResponseTimeout,
                        format!("{} 在 {:?} 内无响应", current, self.response_timeout),
                    )
                })?
                .map_err(|e| send_error(&current, e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| AcquireError::ClientRejected {
                        url: current.to_string(),
                        status: status.as_u16(),
                    })?;
                current = current
                    .join(location)
                    .map_err(|e| AcquireError::InvalidUrl(format!("{}: {}", location, e)))?;
                continue;
            }

            let meta = RemoteMeta::from_headers(response.headers());
            let body = response.map(|chunk| {
                chunk.map_err(|e| AcquireError::network(NetworkErrorKind::Stream, e.to_string()))
            });
            return Ok(RemoteResponse { status: status.as_u16(), meta, body: Box::pin(body) });
        }

        Err(AcquireError::network(
            NetworkErrorKind::Connect,
            format!("{} 重定向超过 {} 次", url, self.max_redirects),
        ))
    }
}

pub fn parse_http_url(url: &str) -> AcquireResult<Url> {
    let parsed = Url::parse(url).map_err(|e| AcquireError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(AcquireError::InvalidUrl(format!("不支持的协议 {}: {}", other, url))),
    }
}

fn send_error(url: &Url, error: SendRequestError) -> AcquireError {
    match error {
        SendRequestError::Url(e) => AcquireError::InvalidUrl(format!("{}: {}", url, e)),
        SendRequestError::Timeout => {
            AcquireError::network(NetworkErrorKind::ResponseTimeout, format!("{}: 请求超时", url))
        }
        SendRequestError::Connect(e) => {
            AcquireError::network(NetworkErrorKind::Connect, format!("{}: {}", url, e))
        }
        other => AcquireError::network(NetworkErrorKind::Stream, format!("{}: {}", url, other)),
    }
}
