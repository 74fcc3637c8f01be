//! JSON 请求描述层。
//!
//! 把 `[url, options?]` 形式的 JSON 参数解析为 `HttpRequest`，配置出 curl easy 句柄，
//! 并把完成的传输整理为 `{"status", "data"}` 形式的回复。

use crate::error::{FetchError, RequestError};
use crate::manager::TransferManager;
use crate::transport::CurlTransport;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use curl::easy::{Easy, List};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// 支持的 HTTP 方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }
}

impl FromStr for Method {
    type Err = RequestError;

    /// 方法名区分大小写，与 HTTP 的写法一致。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(RequestError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个 HTTP 请求的描述。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    /// 按名称排序，同名头部后写入的覆盖先写入的。
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// 回复中的响应体是否以 base64 编码。
    pub binary: bool,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        HttpRequest {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 从 `[url, options?]` 形式的 JSON 参数解析请求。
    ///
    /// 选项解析是宽松的：类型不符的字段被忽略，只有 URL 缺失和未知方法会报错。
    /// `json` 优先于 `data`，并预置 `Content-Type: application/json`，
    /// 可以被 `headers` 中的同名头部覆盖。
    pub fn from_json_args(args: &Value) -> Result<Self, RequestError> {
        let url = args
            .get(0)
            .and_then(Value::as_str)
            .ok_or(RequestError::MissingUrl)?;
        let mut request = HttpRequest::new(url);

        let Some(options) = args.get(1).and_then(Value::as_object) else {
            return Ok(request);
        };

        if let Some(method) = options.get("method").and_then(Value::as_str) {
            request.method = method.parse()?;
        }

        if let Some(json) = options.get("json") {
            request.body = Some(serde_json::to_vec(json)?);
            request
                .headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        } else if let Some(data) = options.get("data").and_then(Value::as_str) {
            request.body = Some(data.as_bytes().to_vec());
        }

        if let Some(binary) = options.get("binary").and_then(Value::as_bool) {
            request.binary = binary;
        }

        if let Some(headers) = options.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                match value.as_str() {
                    Some(value) => {
                        request.headers.insert(name.clone(), value.to_string());
                    }
                    None => warn!("(Request) 无法读取头部 '{}' 的值，跳过: {}", name, value),
                }
            }
        }

        if let Some(ms) = options.get("timeout").and_then(Value::as_u64) {
            request.timeout = Some(Duration::from_millis(ms));
        }

        Ok(request)
    }

    /// 解析 JSON 文本形式的参数数组。
    pub fn from_json_str(args: &str) -> Result<Self, RequestError> {
        let args: Value = serde_json::from_str(args)?;
        Self::from_json_args(&args)
    }

    /// 按请求描述配置一个 easy 句柄。
    pub fn build(&self) -> Result<Easy, RequestError> {
        let mut easy = Easy::new();
        easy.url(&self.url)?;

        match self.method {
            Method::Get => easy.get(true)?,
            Method::Post => easy.post(true)?,
            Method::Put | Method::Patch | Method::Delete => easy.custom_request(self.method.as_str())?,
            Method::Head => easy.nobody(true)?,
            Method::Options => {
                easy.custom_request(self.method.as_str())?;
                easy.nobody(true)?;
            }
        }

        if let Some(body) = &self.body {
            easy.post_fields_copy(body)?;
        }

        if !self.headers.is_empty() {
            let mut list = List::new();
            for (name, value) in &self.headers {
                list.append(&format!("{}: {}", name, value))?;
            }
            easy.http_headers(list)?;
        }

        if let Some(timeout) = self.timeout {
            easy.timeout(timeout)?;
        }
        Ok(easy)
    }
}

/// 一个成功完成的 HTTP 传输。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u32,
    pub data: Bytes,
}

#[derive(Serialize)]
struct Reply<'a> {
    status: u32,
    data: &'a str,
}

impl HttpResponse {
    /// 序列化为 `{"status": .., "data": ..}`。
    ///
    /// `binary` 为 true 时 `data` 为标准 base64；否则按 UTF-8 解码，非法序列被替换。
    pub fn to_json(&self, binary: bool) -> String {
        let data = if binary {
            STANDARD.encode(&self.data)
        } else {
            String::from_utf8_lossy(&self.data).into_owned()
        };
        let reply = Reply {
            status: self.status,
            data: &data,
        };
        // 只含一个整数和一个字符串，序列化不会失败
        serde_json::to_string(&reply).unwrap_or_default()
    }
}

impl TransferManager<CurlTransport> {
    /// 按请求描述发起一个传输并等待结果。
    pub async fn fetch_request(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let easy = request.build()?;
        let fetched = self.fetch(easy).await?;
        if let Err(e) = fetched.status {
            warn!("(Request) {} {} 失败: {}", request.method, request.url, e);
            return Err(FetchError::Transfer(e));
        }

        let status = fetched.summary.response_code;
        info!("(Request) {} {} {}", request.method, request.url, status);
        Ok(HttpResponse {
            status,
            data: fetched.body,
        })
    }
}
