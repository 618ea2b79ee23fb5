//! ACME 目錄用戶端：實作單一網域 DNS-01 簽發所需的 RFC 8555 子集。
//!
//! 每個對 CA 的請求都經過同一個重試迴圈：連線錯誤、429 與 5xx 視為暫時性失敗，
//! 依 `Retry-After` 或指數退避重試；`badNonce` 以新的 nonce 立即重送；
//! 其餘 4xx 視為永久性失敗，直接帶著 CA 的問題文件回傳。

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    account::Account,
    certificate::decode_blocks,
    challenge::{Authorization, Challenge, ChallengeError, ChallengeStatus},
    clock::{CancelToken, ClockT, SystemClock},
    directory::Directory,
    jws::{Jws, JwsError},
    key_pair::KeyError,
    nonce::{NonceError, NoncePool, NonceT},
    order::{Order, OrderError, OrderStatus},
    payload::{
        ChallengeValidationPayload, FinalizeOrderPayload, NewAccountPayload, NewOrderPayload,
        PayloadError, PayloadT,
    },
    problem::Problem,
    protection::{Protection, ProtectionError},
    retry::{is_transient_status, parse_retry_after, Attempt, RetryError, RetryPolicy},
    transport::{HttpRequest, HttpResponse, ReqwestTransport, TransportError, TransportT},
};

/// 下載憑證時要求的內容類型。
const PEM_CHAIN_CONTENT_TYPE: &str = "application/pem-certificate-chain";

/// ACME 操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Network failure on {url} after {attempts} attempts: {last}")]
    TransientNetwork {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("CA rejected request to {url} (HTTP {status}): {problem}")]
    Problem {
        url: String,
        status: u16,
        problem: Problem,
    },
    #[error("Unexpected HTTP {status} from {url}: {body}")]
    UnexpectedStatus { url: String, status: u16, body: String },
    #[error("Missing {header} header in response from {url}")]
    MissingHeader { url: String, header: &'static str },
    #[error("Invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("Account is not registered")]
    NotRegistered,
    #[error("Validation of {url} timed out after {elapsed:?} ({attempts} polls)")]
    ValidationTimeout {
        url: String,
        elapsed: Duration,
        attempts: u32,
    },
    #[error("Validation of {url} rejected: {problem}")]
    ValidationRejected { url: String, problem: Problem },
    #[error("Order {url} became invalid: {problem}")]
    OrderInvalid { url: String, problem: Problem },
    #[error("Order {url} is {status}, expected {expected}")]
    InvalidState {
        url: String,
        status: OrderStatus,
        expected: OrderStatus,
    },
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("No dns-01 challenge offered for {0}")]
    NoDns01Challenge(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl AcmeError {
    /// CA 提供的問題文件（若有）。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Problem { problem, .. }
            | Self::ValidationRejected { problem, .. }
            | Self::OrderInvalid { problem, .. } => Some(problem),
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, AcmeError>;

/// 輪詢的總時間上限與間隔。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollSettings {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// 憑證下載結果：CA 回傳的 PEM 內容，以及經 `Link: rel="up"` 另外取得的簽發者憑證。
#[derive(Debug, Clone)]
pub struct DownloadedCertificate {
    pub pem: Vec<u8>,
    pub issuer: Option<Vec<u8>>,
}

/// 簽署請求時識別帳戶的方式。
enum SignWith<'a> {
    Jwk,
    Kid(&'a str),
}

/// 單次簽署請求的選項。
#[derive(Default)]
struct PostOptions<'a> {
    accept: Option<&'a str>,
    /// 除 2xx 以外也視為成功的狀態碼。
    also_ok: &'a [u16],
    /// 輪詢截止時間（以 `clock.now()` 計）；重試等待不會超過它。
    deadline: Option<Duration>,
}

/// ACME 目錄用戶端。
pub struct AcmeClient {
    transport: Arc<dyn TransportT>,
    clock: Arc<dyn ClockT>,
    cancel: CancelToken,
    retry: RetryPolicy,
    directory: Directory,
    nonce: NoncePool,
}

/// 建立 [`AcmeClient`] 的構造器。
pub struct AcmeClientBuilder {
    directory_url: String,
    transport: Option<Arc<dyn TransportT>>,
    clock: Option<Arc<dyn ClockT>>,
    cancel: CancelToken,
    retry: RetryPolicy,
}

impl AcmeClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn TransportT>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn ClockT>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 取得目錄並建立用戶端。
    ///
    /// 未指定傳輸層時使用逾時為 [`ReqwestTransport::DEFAULT_TIMEOUT`] 的 reqwest 實作。
    pub fn connect(self) -> Result<AcmeClient> {
        let transport: Arc<dyn TransportT> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(ReqwestTransport::DEFAULT_TIMEOUT)?),
        };
        let clock: Arc<dyn ClockT> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };

        let response = get_with_retry(
            &*transport,
            &*clock,
            &self.cancel,
            &self.retry,
            &self.directory_url,
        )?;
        let directory = Directory::from_slice(&response.body).map_err(|source| AcmeError::Json {
            url: self.directory_url.clone(),
            source,
        })?;
        debug!("Loaded ACME directory from {}", self.directory_url);

        let nonce = NoncePool::new(transport.clone(), &directory.new_nonce);
        Ok(AcmeClient {
            transport,
            clock,
            cancel: self.cancel,
            retry: self.retry,
            directory,
            nonce,
        })
    }
}

impl AcmeClient {
    pub fn builder(directory_url: impl Into<String>) -> AcmeClientBuilder {
        AcmeClientBuilder {
            directory_url: directory_url.into(),
            transport: None,
            clock: None,
            cancel: CancelToken::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// 註冊帳戶，或取回同一把金鑰既有的帳戶。
    ///
    /// `201 Created` 與 `200 OK` 皆視為成功；帶有 `Location` 的 `409 Conflict`
    /// 代表帳戶已存在，同樣視為成功。
    ///
    /// # 回傳
    ///
    /// 帶有註冊 URL 的新帳戶值。
    pub fn register(&self, account: Account) -> Result<Account> {
        let url = self.directory.new_account.clone();
        let payload = NewAccountPayload::new(&account.email);
        payload.validate()?;
        if let Some(tos) = self.directory.terms_of_service() {
            info!("Agreeing to terms of service at {}", tos);
        }

        let response = self.post_with(
            &account,
            SignWith::Jwk,
            &url,
            Some(&payload.to_json_string().map_err(json_error(&url))?),
            PostOptions {
                also_ok: &[409],
                ..Default::default()
            },
        )?;

        let location = required_header(&response, &url, "location")?;
        match response.status {
            201 => info!("Registered new ACME account {}", location),
            _ => info!("Reusing existing ACME account {}", location),
        }
        Ok(account.with_registration(location))
    }

    /// 為指定的域名建立新訂單。CA 拒絕域名時不重試。
    pub fn create_order(&self, account: &Account, domains: &[String]) -> Result<Order> {
        let url = self.directory.new_order.clone();
        let payload = NewOrderPayload::new(domains);
        payload.validate()?;

        let response = self.post(
            account,
            &url,
            Some(&payload.to_json_string().map_err(json_error(&url))?),
        )?;
        let location = required_header(&response, &url, "location")?;
        let mut order: Order = parse_json(&url, &response)?;
        order.url = location;

        info!(
            "Created order {} for {} ({} authorizations)",
            order.url,
            domains.join(", "),
            order.authorizations.len()
        );
        Ok(order)
    }

    /// 取得授權內容。
    pub fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        let response = self.post(account, url, None)?;
        let mut authorization: Authorization = parse_json(url, &response)?;
        authorization.url = url.to_string();
        Ok(authorization)
    }

    /// 通知 CA 挑戰已就緒，觸發 CA 端驗證。
    ///
    /// 已處於終結狀態的挑戰不可再次回應。
    pub fn respond_to_challenge(&self, account: &Account, challenge: &Challenge) -> Result<Challenge> {
        challenge.ensure_respondable()?;

        let payload = ChallengeValidationPayload::new();
        let body = payload.to_json_string().map_err(json_error(&challenge.url))?;
        let response = self.post(account, &challenge.url, Some(&body))?;
        let latest: Challenge = parse_json(&challenge.url, &response)?;

        let mut updated = challenge.clone();
        updated.refresh(latest)?;
        debug!("Challenge {} is now {}", updated.url, updated.status);
        Ok(updated)
    }

    /// 輪詢挑戰直到 `valid`、`invalid` 或逾時。
    ///
    /// # 回傳
    ///
    /// `valid` 時回傳挑戰；`invalid` 時回傳 `AcmeError::ValidationRejected`，
    /// 附帶 CA 提供的原因；逾時回傳 `AcmeError::ValidationTimeout`。
    pub fn poll_challenge(
        &self,
        account: &Account,
        challenge: &Challenge,
        poll: PollSettings,
    ) -> Result<Challenge> {
        let mut current = challenge.clone();
        let url = challenge.url.clone();

        self.poll_until(&url, poll, |deadline| {
            let response = self.post_until(account, &url, deadline)?;
            let latest: Challenge = parse_json(&url, &response)?;
            current.refresh(latest)?;
            debug!("Challenge {} status: {}", url, current.status);
            Ok(current.status.is_terminal())
        })?;

        match current.status {
            ChallengeStatus::Valid => Ok(current),
            _ => Err(AcmeError::ValidationRejected {
                url,
                problem: current.error.unwrap_or_default(),
            }),
        }
    }

    /// 等待訂單離開 `pending`（所有授權完成）後回傳。
    pub fn wait_order_ready(&self, account: &Account, order: &Order, poll: PollSettings) -> Result<Order> {
        self.poll_order_until(account, order, poll, |status| status != OrderStatus::Pending)
    }

    /// 輪詢訂單直到 `valid` 或逾時；`invalid` 時回傳 `AcmeError::OrderInvalid`。
    pub fn poll_order(&self, account: &Account, order: &Order, poll: PollSettings) -> Result<Order> {
        self.poll_order_until(account, order, poll, |status| status.is_terminal())
    }

    fn poll_order_until<F>(
        &self,
        account: &Account,
        order: &Order,
        poll: PollSettings,
        done: F,
    ) -> Result<Order>
    where
        F: Fn(OrderStatus) -> bool,
    {
        let mut current = order.clone();
        self.poll_until(&order.url, poll, |deadline| {
            let response = self.post_until(account, &order.url, deadline)?;
            let latest: Order = parse_json(&order.url, &response)?;
            current.refresh(latest)?;
            debug!("Order {} status: {}", current.url, current.status);
            Ok(done(current.status))
        })?;

        match current.status {
            OrderStatus::Invalid => Err(AcmeError::OrderInvalid {
                url: current.url.clone(),
                problem: current.error.clone().unwrap_or_default(),
            }),
            _ => Ok(current),
        }
    }

    /// 提交 CSR。訂單必須處於 `ready`。
    pub fn finalize_order(&self, account: &Account, order: &Order, csr_der: &[u8]) -> Result<Order> {
        if order.status != OrderStatus::Ready {
            return Err(AcmeError::InvalidState {
                url: order.url.clone(),
                status: order.status,
                expected: OrderStatus::Ready,
            });
        }

        let payload = FinalizeOrderPayload::new(csr_der);
        payload.validate()?;
        let body = payload.to_json_string().map_err(json_error(&order.finalize))?;
        let response = self.post(account, &order.finalize, Some(&body))?;
        let latest: Order = parse_json(&order.finalize, &response)?;

        let mut updated = order.clone();
        updated.refresh(latest)?;
        info!("Finalized order {} (status {})", updated.url, updated.status);
        Ok(updated)
    }

    /// 下載憑證。訂單必須處於 `valid` 且帶有憑證 URL。
    ///
    /// 若回傳內容只有一張憑證且帶有 `Link: rel="up"`，會另外取回簽發者憑證。
    pub fn download_certificate(&self, account: &Account, order: &Order) -> Result<DownloadedCertificate> {
        let url = match (&order.status, &order.certificate) {
            (OrderStatus::Valid, Some(url)) => url.clone(),
            _ => {
                return Err(AcmeError::InvalidState {
                    url: order.url.clone(),
                    status: order.status,
                    expected: OrderStatus::Valid,
                })
            }
        };

        let pem_accept = PostOptions {
            accept: Some(PEM_CHAIN_CONTENT_TYPE),
            ..Default::default()
        };
        let response = self.post_with(account, self.kid(account)?, &url, None, pem_accept)?;
        let block_count = decode_blocks(&response.body).map(|b| b.len()).unwrap_or(0);

        let issuer = match response.links("up").into_iter().next() {
            Some(up) if block_count == 1 => {
                debug!("Fetching issuer certificate from {}", up);
                let pem_accept = PostOptions {
                    accept: Some(PEM_CHAIN_CONTENT_TYPE),
                    ..Default::default()
                };
                Some(self.post_with(account, self.kid(account)?, &up, None, pem_accept)?.body)
            }
            _ => None,
        };

        info!("Downloaded certificate from {}", url);
        Ok(DownloadedCertificate {
            pem: response.body,
            issuer,
        })
    }

    fn kid<'a>(&self, account: &'a Account) -> Result<SignWith<'a>> {
        account.kid().map(SignWith::Kid).ok_or(AcmeError::NotRegistered)
    }

    /// 以帳戶 URL 簽署的 POST；`payload` 為 `None` 時為 POST-as-GET。
    fn post(&self, account: &Account, url: &str, payload: Option<&str>) -> Result<HttpResponse> {
        self.post_with(account, self.kid(account)?, url, payload, PostOptions::default())
    }

    /// 輪詢用的 POST-as-GET，重試不超過 `deadline`。
    fn post_until(&self, account: &Account, url: &str, deadline: Duration) -> Result<HttpResponse> {
        let options = PostOptions {
            deadline: Some(deadline),
            ..Default::default()
        };
        self.post_with(account, self.kid(account)?, url, None, options)
    }

    fn post_with(
        &self,
        account: &Account,
        sign_with: SignWith<'_>,
        url: &str,
        payload: Option<&str>,
        options: PostOptions<'_>,
    ) -> Result<HttpResponse> {
        let clock = &*self.clock;
        let result = self.retry.run_until(clock, &self.cancel, url, options.deadline, |attempt| {
            let body = match self.sign(account, &sign_with, url, payload) {
                Ok(body) => body,
                Err(AcmeError::Jws(JwsError::Protection(ProtectionError::Nonce(e)))) => {
                    return retry_on_nonce_error(e)
                }
                Err(e) => return Attempt::Fail(e),
            };

            let mut request = HttpRequest::post_jose(url, body);
            if let Some(accept) = options.accept {
                request = request.header("Accept", accept);
            }

            debug!("POST {} (attempt {})", url, attempt);
            let response = match self.transport.execute(request) {
                Ok(response) => response,
                Err(e) => {
                    return Attempt::Retry {
                        reason: e.to_string(),
                        after: None,
                    }
                }
            };
            if let Some(nonce) = response.header("replay-nonce") {
                self.nonce.store(nonce.to_string());
            }

            if response.is_success() || options.also_ok.contains(&response.status) {
                return Attempt::Done(response);
            }
            classify_failure(url, response)
        });

        result.map_err(|e| retry_error(url, e))
    }

    fn sign(
        &self,
        account: &Account,
        sign_with: &SignWith<'_>,
        url: &str,
        payload: Option<&str>,
    ) -> Result<String> {
        let protection = match sign_with {
            SignWith::Jwk => Protection::with_jwk(&self.nonce, &account.key_pair).map_err(JwsError::from)?,
            SignWith::Kid(kid) => Protection::with_kid(&self.nonce, &account.key_pair, *kid),
        };
        let header = protection.create_header(url).map_err(JwsError::from)?;
        Ok(Jws::sign(&header, payload, &account.key_pair)?.to_json()?)
    }

    /// 以固定間隔反覆執行 `step`，直到它回傳 `true`。
    ///
    /// 每次檢查後若仍未完成，休眠 `min(interval, 剩餘時間)`；休眠後經過時間達到
    /// `timeout` 即以 `AcmeError::ValidationTimeout` 結束，因此 60 秒、間隔 5 秒
    /// 的設定最多檢查 12 次。`step` 收到截止時間，單次檢查內的重試等待同樣受它限制。
    fn poll_until<F>(&self, url: &str, poll: PollSettings, mut step: F) -> Result<()>
    where
        F: FnMut(Duration) -> Result<bool>,
    {
        let start = self.clock.now();
        let deadline = start + poll.timeout;
        let mut attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(AcmeError::Cancelled);
            }
            attempts += 1;
            match step(deadline) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(AcmeError::ValidationTimeout { .. }) => {
                    return Err(self.poll_timeout(url, start, attempts))
                }
                Err(e) => return Err(e),
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed < poll.timeout {
                self.clock.sleep(poll.interval.min(poll.timeout - elapsed));
            }

            if self.clock.now() >= deadline {
                return Err(self.poll_timeout(url, start, attempts));
            }
        }
    }

    fn poll_timeout(&self, url: &str, start: Duration, attempts: u32) -> AcmeError {
        AcmeError::ValidationTimeout {
            url: url.to_string(),
            elapsed: self.clock.now().saturating_sub(start),
            attempts,
        }
    }
}

/// 不帶簽章的 GET，僅用於取得目錄。
fn get_with_retry(
    transport: &dyn TransportT,
    clock: &dyn ClockT,
    cancel: &CancelToken,
    retry: &RetryPolicy,
    url: &str,
) -> Result<HttpResponse> {
    retry
        .run(clock, cancel, url, |attempt| {
            debug!("GET {} (attempt {})", url, attempt);
            match transport.execute(HttpRequest::get(url)) {
                Ok(response) if response.is_success() => Attempt::Done(response),
                Ok(response) => classify_failure(url, response),
                Err(e) => Attempt::Retry {
                    reason: e.to_string(),
                    after: None,
                },
            }
        })
        .map_err(|e| retry_error(url, e))
}

/// 將非成功的回應分類為暫時性或永久性失敗。
fn classify_failure<T>(url: &str, response: HttpResponse) -> Attempt<T, AcmeError> {
    let problem = Problem::from_body(&response.body);

    if problem.as_ref().is_some_and(Problem::is_bad_nonce) {
        return Attempt::Retry {
            reason: "badNonce".to_string(),
            after: Some(Duration::ZERO),
        };
    }

    if is_transient_status(response.status) {
        let after = response
            .header("retry-after")
            .and_then(|value| parse_retry_after(value, Utc::now()));
        let reason = match &problem {
            Some(problem) => format!("HTTP {}: {}", response.status, problem),
            None => format!("HTTP {}", response.status),
        };
        return Attempt::Retry { reason, after };
    }

    Attempt::Fail(match problem {
        Some(problem) => AcmeError::Problem {
            url: url.to_string(),
            status: response.status,
            problem,
        },
        None => AcmeError::UnexpectedStatus {
            url: url.to_string(),
            status: response.status,
            body: response.text(),
        },
    })
}

fn retry_on_nonce_error<T>(e: NonceError) -> Attempt<T, AcmeError> {
    Attempt::Retry {
        reason: e.to_string(),
        after: None,
    }
}

fn retry_error(url: &str, e: RetryError<AcmeError>) -> AcmeError {
    match e {
        RetryError::Exhausted { attempts, last } => AcmeError::TransientNetwork {
            url: url.to_string(),
            attempts,
            last,
        },
        RetryError::DeadlineExceeded { attempts, last } => {
            warn!(
                "Gave up on {} at the poll deadline after {} attempts: {}",
                url, attempts, last
            );
            AcmeError::ValidationTimeout {
                url: url.to_string(),
                elapsed: Duration::ZERO,
                attempts,
            }
        }
        RetryError::Cancelled => AcmeError::Cancelled,
        RetryError::Fatal(e) => e,
    }
}

fn required_header(response: &HttpResponse, url: &str, header: &'static str) -> Result<String> {
    response
        .header(header)
        .map(ToString::to_string)
        .ok_or_else(|| AcmeError::MissingHeader {
            url: url.to_string(),
            header,
        })
}

fn parse_json<T: DeserializeOwned>(url: &str, response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(json_error(url))
}

fn json_error(url: &str) -> impl Fn(serde_json::Error) -> AcmeError + '_ {
    move |source| AcmeError::Json {
        url: url.to_string(),
        source,
    }
}
