//! 與 CA 及 DNS-over-HTTPS 解析器溝通的 HTTP 傳輸層。
//!
//! 所有網路請求都經過 [`TransportT`]，因此可以在不改動協定邏輯的情況下
//! 替換成其他 HTTP 實作或測試用的假 CA。

use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;

/// 傳輸層錯誤，代表請求未取得任何 HTTP 回應（連線失敗、逾時等）。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
}

type Result<T> = std::result::Result<T, TransportError>;

/// 支援的 HTTP 方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// 一個待送出的 HTTP 請求。
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    /// 建立帶有 `application/jose+json` 內容的 POST 請求。
    pub fn post_jose(url: impl Into<String>, body: String) -> Self {
        let mut request = Self::new(Method::Post, url);
        request.body = Some(body);
        request.header("Content-Type", "application/jose+json")
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// 建立帶有 `application/json` 內容的 POST 請求。
    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        let mut request = Self::new(Method::Post, url);
        request.body = Some(body);
        request.header("Content-Type", "application/json")
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// HTTP 回應。標頭名稱一律以小寫儲存，同名標頭可出現多次（例如 `Link`）。
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 取得第一個符合名稱的標頭值（不分大小寫）。
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 取得所有符合名稱的標頭值。
    pub fn headers_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(move |(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 解析 `Link` 標頭，回傳 `rel` 相符的所有目標 URL。
    pub fn links(&self, rel: &str) -> Vec<String> {
        self.headers_all("link")
            .flat_map(|value| value.split(','))
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let target = parts.next()?.trim();
                let target = target.strip_prefix('<')?.strip_suffix('>')?;
                let matches = parts.any(|param| {
                    let param = param.trim();
                    param == format!("rel=\"{}\"", rel) || param == format!("rel={}", rel)
                });
                matches.then(|| target.to_string())
            })
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 定義 HTTP 傳輸的能力。
pub trait TransportT: Send + Sync {
    /// 送出請求並取得回應。只要伺服器有回覆（不論狀態碼）就應回傳 `Ok`。
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// 以 reqwest 阻塞式 Client 實作的傳輸層。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 預設的單次請求逾時。
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// 建立新的傳輸層，`timeout` 為單次請求的上限。
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self { client })
    }
}

impl TransportT for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
