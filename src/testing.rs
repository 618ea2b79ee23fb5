//! 測試用的替身：假 ACME CA、腳本化傳輸層、記憶體 DNS 與發佈目的地。

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::Duration,
};

use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    nid::Nid,
    pkey::{HasPublic, PKey, PKeyRef, Private, Public},
    rsa::Rsa,
    sign::Verifier,
    x509::{
        extension::{BasicConstraints, SubjectAlternativeName},
        X509Builder, X509NameBuilder, X509Ref, X509Req, X509,
    },
};
use serde_json::{json, Value};

use crate::{
    challenge::{AuthorizationStatus, ChallengeStatus},
    dns::{DnsError, DnsProviderT, Propagation, RecordHandle},
    encoding::b64url_decode,
    jws::Jws,
    order::OrderStatus,
    problem::{Problem, ACME_ERROR_PREFIX},
    publish::{self, CertificateStoreT, ObjectStoreT, PublishError},
    transport::{HttpRequest, HttpResponse, Method, TransportError, TransportT},
};

// ---------------------------------------------------------------------------
// PKI
// ---------------------------------------------------------------------------

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// 簽發一張憑證。`issuer` 為 `None` 時自簽。
fn sign_certificate<T: HasPublic>(
    common_name: &str,
    public: &PKeyRef<T>,
    issuer: Option<(&X509Ref, &PKeyRef<Private>)>,
    self_key: Option<&PKeyRef<Private>>,
    ca: bool,
    sans: &[&str],
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::ONE, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(public).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(90).unwrap())
        .unwrap();

    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
    }
    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            san.dns(entry);
        }
        let extension = san
            .build(&builder.x509v3_context(issuer.map(|(cert, _)| cert), None))
            .unwrap();
        builder.append_extension(extension).unwrap();
    }

    let signing_key = match (issuer, self_key) {
        (Some((_, key)), _) => key,
        (None, Some(key)) => key,
        (None, None) => panic!("self-signed certificate needs its own key"),
    };
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn to_pem(cert: &X509) -> String {
    String::from_utf8(cert.to_pem().unwrap()).unwrap()
}

/// 根憑證與中繼憑證。
pub struct TestPki {
    root: X509,
    intermediate: X509,
    intermediate_key: PKey<Private>,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = ec_key();
        let root = sign_certificate("Test Root", &root_key, None, Some(&*root_key), true, &[]);
        let intermediate_key = ec_key();
        let intermediate = sign_certificate(
            "Test Intermediate",
            &intermediate_key,
            Some((&*root, &*root_key)),
            None,
            true,
            &[],
        );
        Self {
            root,
            intermediate,
            intermediate_key,
        }
    }

    /// 以中繼憑證簽發葉憑證，第一個域名作為 CN。
    pub fn issue_leaf<T: HasPublic>(&self, public: &PKeyRef<T>, domains: &[&str]) -> X509 {
        sign_certificate(
            domains.first().copied().unwrap_or("leaf"),
            public,
            Some((&*self.intermediate, &*self.intermediate_key)),
            None,
            false,
            domains,
        )
    }

    pub fn intermediate_pem(&self) -> String {
        to_pem(&self.intermediate)
    }

    pub fn root_pem(&self) -> String {
        to_pem(&self.root)
    }
}

/// 產生 (葉, 中繼, 根) 三張 PEM 憑證。
pub fn issue_chain(domains: &[&str]) -> (String, String, String) {
    let pki = TestPki::new();
    let leaf = pki.issue_leaf(&ec_key(), domains);
    (to_pem(&leaf), pki.intermediate_pem(), pki.root_pem())
}

/// 產生一張與其他憑證無關的自簽憑證。
pub fn self_signed(common_name: &str) -> String {
    let key = ec_key();
    to_pem(&sign_certificate(common_name, &key, None, Some(&*key), true, &[]))
}

// ---------------------------------------------------------------------------
// 傳輸層替身
// ---------------------------------------------------------------------------

/// 依序回放預先準備的回應，並記錄收到的請求。
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl TransportT for ScriptedTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connection("script exhausted".into()))
    }
}

// ---------------------------------------------------------------------------
// 假 ACME CA
// ---------------------------------------------------------------------------

/// 假 CA 對 DNS-01 挑戰的反應。
#[derive(Debug, Clone)]
pub enum ChallengeBehaviour {
    /// 回應挑戰後第 n 次輪詢變為 `valid`。
    ValidAfter(u32),
    /// 挑戰永遠停在 `pending`。
    NeverLeavesPending,
    /// 回應挑戰後第一次輪詢即為 `invalid`，附帶指定原因。
    Invalid(String),
}

struct FakeOrder {
    domains: Vec<String>,
    authz_ids: Vec<usize>,
    status: OrderStatus,
    certificate: Option<(String, String)>,
    error: Option<Problem>,
}

struct FakeAuthz {
    domain: String,
    status: AuthorizationStatus,
    challenge: ChallengeStatus,
    responded: bool,
    polls: u32,
    error: Option<Problem>,
}

#[derive(Default)]
struct CaState {
    next_nonce: u64,
    nonces: HashSet<String>,
    bad_nonce_budget: u32,
    throttle_polls: Option<u64>,
    account_conflict: bool,
    issuer_link: bool,
    accounts: HashMap<String, Value>,
    rejected: HashSet<String>,
    preauthorized: HashSet<String>,
    orders: Vec<FakeOrder>,
    authzs: Vec<FakeAuthz>,
    log: Vec<String>,
    responds: usize,
}

/// 在記憶體中實作 RFC 8555 流程的假 CA。
///
/// 驗證每個請求的 nonce、URL 與 JWS 簽章，並以真正的 X.509 憑證回應 finalize。
pub struct FakeCa {
    behaviour: ChallengeBehaviour,
    pki: TestPki,
    state: Mutex<CaState>,
}

type Response = HttpResponse;

impl FakeCa {
    pub const BASE_URL: &'static str = "https://ca.test";
    pub const DIRECTORY_URL: &'static str = "https://ca.test/directory";
    pub const EXISTING_ACCOUNT_URL: &'static str = "https://ca.test/acct/existing";

    pub fn new(behaviour: ChallengeBehaviour) -> Self {
        Self {
            behaviour,
            pki: TestPki::new(),
            state: Mutex::new(CaState::default()),
        }
    }

    /// 新帳戶請求回應 `409 Conflict` 與既有帳戶 URL。
    pub fn set_account_conflict(&self, conflict: bool) {
        self.state.lock().unwrap().account_conflict = conflict;
    }

    /// 憑證下載只回傳葉憑證，並以 `Link: rel="up"` 指向簽發者。
    pub fn set_issuer_link(&self, enabled: bool) {
        self.state.lock().unwrap().issuer_link = enabled;
    }

    /// 對包含此域名的新訂單回應 `rejectedIdentifier`。
    pub fn reject_domain(&self, domain: &str) {
        self.state.lock().unwrap().rejected.insert(domain.to_string());
    }

    /// 此域名的授權一開始就是 `valid`。
    pub fn preauthorize(&self, domain: &str) {
        self.state
            .lock()
            .unwrap()
            .preauthorized
            .insert(domain.to_string());
    }

    /// 接下來 `count` 個簽署請求回應 `badNonce`。
    pub fn fail_next_with_bad_nonce(&self, count: u32) {
        self.state.lock().unwrap().bad_nonce_budget = count;
    }

    /// 挑戰輪詢一律回應 `503` 並帶上 `Retry-After: secs`。
    pub fn throttle_challenge_polls(&self, secs: u64) {
        self.state.lock().unwrap().throttle_polls = Some(secs);
    }

    /// 路徑等於或以 `path` 結尾的請求數量。
    pub fn requests_to(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|p| p.as_str() == path || p.ends_with(path))
            .count()
    }

    /// 回應挑戰（觸發驗證）的次數。
    pub fn responds(&self) -> usize {
        self.state.lock().unwrap().responds
    }

    fn url(path: &str) -> String {
        format!("{}{}", Self::BASE_URL, path)
    }

    fn problem(status: u16, kind: &str, detail: &str) -> Response {
        let body = json!({
            "type": format!("{}{}", ACME_ERROR_PREFIX, kind),
            "detail": detail,
            "status": status,
        });
        HttpResponse::new(status, body.to_string()).with_header("Content-Type", "application/problem+json")
    }

    fn json(status: u16, body: Value) -> Response {
        HttpResponse::new(status, body.to_string()).with_header("Content-Type", "application/json")
    }

    fn directory() -> Response {
        Self::json(
            200,
            json!({
                "newNonce": Self::url("/new-nonce"),
                "newAccount": Self::url("/new-acct"),
                "newOrder": Self::url("/new-order"),
                "revokeCert": Self::url("/revoke-cert"),
                "keyChange": Self::url("/key-change"),
                "meta": {"termsOfService": Self::url("/terms")}
            }),
        )
    }

    fn issue_nonce(state: &mut CaState) -> String {
        state.next_nonce += 1;
        let nonce = format!("nonce-{}", state.next_nonce);
        state.nonces.insert(nonce.clone());
        nonce
    }

    fn order_json(id: usize, order: &FakeOrder) -> Value {
        let mut body = json!({
            "status": order.status.as_str(),
            "expires": "2030-01-01T00:00:00Z",
            "identifiers": order.domains.iter().map(|d| json!({"type": "dns", "value": d})).collect::<Vec<_>>(),
            "authorizations": order.authz_ids.iter().map(|a| Self::url(&format!("/authz/{}", a))).collect::<Vec<_>>(),
            "finalize": Self::url(&format!("/order/{}/finalize", id)),
        });
        if order.status == OrderStatus::Valid {
            body["certificate"] = json!(Self::url(&format!("/cert/{}", id)));
        }
        if let Some(error) = &order.error {
            body["error"] = json!(error);
        }
        body
    }

    fn challenge_json(id: usize, authz: &FakeAuthz) -> Value {
        let mut body = json!({
            "type": "dns-01",
            "url": Self::url(&format!("/chall/{}", id)),
            "status": authz.challenge.as_str(),
            "token": format!("token-{}", id),
        });
        if authz.challenge == ChallengeStatus::Valid {
            body["validated"] = json!("2030-01-01T00:00:00Z");
        }
        if let Some(error) = &authz.error {
            body["error"] = json!(error);
        }
        body
    }

    fn authz_json(id: usize, authz: &FakeAuthz) -> Value {
        let (value, wildcard) = match authz.domain.strip_prefix("*.") {
            Some(base) => (base, true),
            None => (authz.domain.as_str(), false),
        };
        json!({
            "identifier": {"type": "dns", "value": value},
            "status": authz.status.as_str(),
            "expires": "2030-01-01T00:00:00Z",
            "wildcard": wildcard,
            "challenges": [
                {
                    "type": "http-01",
                    "url": Self::url(&format!("/chall/{}/http", id)),
                    "status": "pending",
                    "token": format!("http-token-{}", id),
                },
                Self::challenge_json(id, authz),
            ],
        })
    }

    /// 依授權狀態推進 `pending` 訂單。
    fn refresh_order(state: &mut CaState, id: usize) {
        let Some(order) = state.orders.get(id - 1) else {
            return;
        };
        if order.status != OrderStatus::Pending {
            return;
        }
        let authzs: Vec<&FakeAuthz> = order.authz_ids.iter().map(|a| &state.authzs[a - 1]).collect();
        let failed = authzs
            .iter()
            .find(|a| a.status == AuthorizationStatus::Invalid)
            .map(|a| a.error.clone().unwrap_or_default());
        let all_valid = authzs.iter().all(|a| a.status == AuthorizationStatus::Valid);

        let order = &mut state.orders[id - 1];
        if let Some(error) = failed {
            order.status = OrderStatus::Invalid;
            order.error = Some(error);
        } else if all_valid {
            order.status = OrderStatus::Ready;
        }
    }

    fn verify_signature(jws: &Jws, alg: &str, jwk: &Value) -> bool {
        let check = || -> Option<bool> {
            let signing_input = format!("{}.{}", jws.header, jws.payload);
            let signature = b64url_decode(&jws.signature).ok()?;
            let field = |name: &str| -> Option<BigNum> {
                BigNum::from_slice(&b64url_decode(jwk[name].as_str()?).ok()?).ok()
            };

            let (key, digest, der): (PKey<Public>, MessageDigest, Vec<u8>) = match alg {
                "ES256" | "ES384" => {
                    let (nid, digest, len) = match alg {
                        "ES256" => (Nid::X9_62_PRIME256V1, MessageDigest::sha256(), 32),
                        _ => (Nid::SECP384R1, MessageDigest::sha384(), 48),
                    };
                    let group = EcGroup::from_curve_name(nid).ok()?;
                    let (x, y) = (field("x")?, field("y")?);
                    let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y).ok()?;
                    if signature.len() != 2 * len {
                        return Some(false);
                    }
                    let r = BigNum::from_slice(&signature[..len]).ok()?;
                    let s = BigNum::from_slice(&signature[len..]).ok()?;
                    let der = EcdsaSig::from_private_components(r, s).ok()?.to_der().ok()?;
                    (PKey::from_ec_key(ec).ok()?, digest, der)
                }
                "RS256" => {
                    let rsa = Rsa::from_public_components(field("n")?, field("e")?).ok()?;
                    (PKey::from_rsa(rsa).ok()?, MessageDigest::sha256(), signature)
                }
                _ => return Some(false),
            };

            let mut verifier = Verifier::new(digest, &key).ok()?;
            verifier.update(signing_input.as_bytes()).ok()?;
            verifier.verify(&der).ok()
        };
        check().unwrap_or(false)
    }

    fn handle(&self, state: &mut CaState, request: HttpRequest, path: &str) -> Response {
        match (request.method, path) {
            (Method::Get, "/directory") => return Self::directory(),
            (Method::Head, "/new-nonce") => return HttpResponse::new(200, Vec::new()),
            (Method::Post, _) => {}
            _ => return Self::problem(405, "malformed", "method not allowed"),
        }

        let Some(jws) = request
            .body
            .as_deref()
            .and_then(|body| serde_json::from_str::<Jws>(body).ok())
        else {
            return Self::problem(400, "malformed", "body is not a flattened JWS");
        };
        let Some(protected) = b64url_decode(&jws.header)
            .ok()
            .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok())
        else {
            return Self::problem(400, "malformed", "protected header is not JSON");
        };

        if state.bad_nonce_budget > 0 {
            state.bad_nonce_budget -= 1;
            return Self::problem(400, "badNonce", "JWS has an invalid anti-replay nonce");
        }
        let nonce = protected["nonce"].as_str().unwrap_or_default();
        if !state.nonces.remove(nonce) {
            return Self::problem(400, "badNonce", "JWS has an invalid anti-replay nonce");
        }
        if protected["url"].as_str() != Some(request.url.as_str()) {
            return Self::problem(400, "unauthorized", "url in protected header does not match request");
        }
        let alg = protected["alg"].as_str().unwrap_or_default().to_string();

        let payload: Option<Value> = if jws.payload.is_empty() {
            None
        } else {
            match b64url_decode(&jws.payload)
                .ok()
                .and_then(|raw| serde_json::from_slice(&raw).ok())
            {
                Some(value) => Some(value),
                None => return Self::problem(400, "malformed", "payload is not JSON"),
            }
        };

        if path == "/new-acct" {
            let jwk = protected["jwk"].clone();
            if jwk.is_null() || !protected["kid"].is_null() {
                return Self::problem(400, "malformed", "newAccount must be signed with jwk");
            }
            if !Self::verify_signature(&jws, &alg, &jwk) {
                return Self::problem(400, "malformed", "JWS signature invalid");
            }
            return self.new_account(state, jwk, payload);
        }

        let kid = protected["kid"].as_str().unwrap_or_default();
        let Some(jwk) = state.accounts.get(kid).cloned() else {
            return Self::problem(400, "accountDoesNotExist", "unknown kid");
        };
        if !Self::verify_signature(&jws, &alg, &jwk) {
            return Self::problem(400, "malformed", "JWS signature invalid");
        }

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let id = |index: usize| segments.get(index).and_then(|s| s.parse::<usize>().ok());
        match (segments.as_slice(), id(1)) {
            (["new-order"], _) => self.new_order(state, payload),
            (["order", _], Some(id)) => self.get_order(state, id),
            (["order", _, "finalize"], Some(id)) => self.finalize(state, id, payload),
            (["authz", _], Some(id)) => self.get_authz(state, id),
            (["chall", _], Some(id)) => self.challenge(state, id, payload.is_some()),
            (["cert", _], Some(id)) => self.certificate(state, id),
            (["issuer", _], Some(_)) => HttpResponse::new(200, self.pki.intermediate_pem())
                .with_header("Content-Type", "application/pem-certificate-chain"),
            _ => Self::problem(404, "malformed", "not found"),
        }
    }

    fn new_account(&self, state: &mut CaState, jwk: Value, payload: Option<Value>) -> Response {
        let payload = payload.unwrap_or_default();
        if payload["termsOfServiceAgreed"] != json!(true) {
            return Self::problem(403, "userActionRequired", "terms of service not agreed");
        }
        let body = json!({"status": "valid", "contact": payload["contact"].clone()});

        if state.account_conflict {
            state.accounts.insert(Self::EXISTING_ACCOUNT_URL.to_string(), jwk);
            return Self::json(409, body).with_header("Location", Self::EXISTING_ACCOUNT_URL);
        }
        let url = Self::url(&format!("/acct/{}", state.accounts.len() + 1));
        state.accounts.insert(url.clone(), jwk);
        Self::json(201, body).with_header("Location", url)
    }

    fn new_order(&self, state: &mut CaState, payload: Option<Value>) -> Response {
        let domains: Vec<String> = payload
            .as_ref()
            .and_then(|p| p["identifiers"].as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|i| i["value"].as_str().map(str::to_string))
            .collect();
        if domains.is_empty() {
            return Self::problem(400, "malformed", "no identifiers");
        }
        if let Some(rejected) = domains.iter().find(|d| state.rejected.contains(*d)) {
            return Self::problem(
                400,
                "rejectedIdentifier",
                &format!("policy forbids issuing for {}", rejected),
            );
        }

        let mut authz_ids = Vec::new();
        for domain in &domains {
            let preauthorized = state.preauthorized.contains(domain);
            state.authzs.push(FakeAuthz {
                domain: domain.clone(),
                status: if preauthorized {
                    AuthorizationStatus::Valid
                } else {
                    AuthorizationStatus::Pending
                },
                challenge: if preauthorized {
                    ChallengeStatus::Valid
                } else {
                    ChallengeStatus::Pending
                },
                responded: false,
                polls: 0,
                error: None,
            });
            authz_ids.push(state.authzs.len());
        }
        state.orders.push(FakeOrder {
            domains,
            authz_ids,
            status: OrderStatus::Pending,
            certificate: None,
            error: None,
        });

        let id = state.orders.len();
        Self::refresh_order(state, id);
        Self::json(201, Self::order_json(id, &state.orders[id - 1]))
            .with_header("Location", Self::url(&format!("/order/{}", id)))
    }

    fn get_order(&self, state: &mut CaState, id: usize) -> Response {
        if id == 0 || id > state.orders.len() {
            return Self::problem(404, "malformed", "no such order");
        }
        Self::refresh_order(state, id);
        let order = &mut state.orders[id - 1];
        if order.status == OrderStatus::Processing {
            order.status = OrderStatus::Valid;
        }
        Self::json(200, Self::order_json(id, order))
    }

    fn finalize(&self, state: &mut CaState, id: usize, payload: Option<Value>) -> Response {
        if id == 0 || id > state.orders.len() {
            return Self::problem(404, "malformed", "no such order");
        }
        Self::refresh_order(state, id);
        if state.orders[id - 1].status != OrderStatus::Ready {
            return Self::problem(403, "orderNotReady", "order is not ready");
        }

        let request = payload
            .as_ref()
            .and_then(|p| p["csr"].as_str().map(str::to_string))
            .and_then(|csr| b64url_decode(csr).ok())
            .and_then(|der| X509Req::from_der(&der).ok());
        let Some(request) = request else {
            return Self::problem(400, "badCSR", "CSR could not be parsed");
        };
        let public = match request.public_key() {
            Ok(key) if request.verify(&key).unwrap_or(false) => key,
            _ => return Self::problem(400, "badCSR", "CSR signature invalid"),
        };

        let order = &mut state.orders[id - 1];
        let domains: Vec<&str> = order.domains.iter().map(String::as_str).collect();
        let leaf = self.pki.issue_leaf(&public, &domains);
        order.certificate = Some((to_pem(&leaf), self.pki.intermediate_pem()));
        order.status = OrderStatus::Processing;
        Self::json(200, Self::order_json(id, order))
    }

    fn get_authz(&self, state: &mut CaState, id: usize) -> Response {
        match state.authzs.get(id.wrapping_sub(1)) {
            Some(authz) => Self::json(200, Self::authz_json(id, authz)),
            None => Self::problem(404, "malformed", "no such authorization"),
        }
    }

    fn challenge(&self, state: &mut CaState, id: usize, respond: bool) -> Response {
        let behaviour = self.behaviour.clone();
        if let (false, Some(secs)) = (respond, state.throttle_polls) {
            return Self::problem(503, "serverInternal", "service busy")
                .with_header("Retry-After", secs.to_string());
        }
        let Some(authz) = state.authzs.get_mut(id.wrapping_sub(1)) else {
            return Self::problem(404, "malformed", "no such challenge");
        };

        if respond {
            if authz.challenge.is_terminal() {
                return Self::problem(400, "malformed", "challenge is not pending");
            }
            state.responds += 1;
            authz.responded = true;
            if !matches!(behaviour, ChallengeBehaviour::NeverLeavesPending) {
                authz.challenge = ChallengeStatus::Processing;
            }
        } else if authz.responded && !authz.challenge.is_terminal() {
            authz.polls += 1;
            match behaviour {
                ChallengeBehaviour::ValidAfter(n) if authz.polls >= n => {
                    authz.challenge = ChallengeStatus::Valid;
                    authz.status = AuthorizationStatus::Valid;
                }
                ChallengeBehaviour::Invalid(reason) => {
                    authz.challenge = ChallengeStatus::Invalid;
                    authz.status = AuthorizationStatus::Invalid;
                    authz.error = Some(Problem::new(format!("{}dns", ACME_ERROR_PREFIX), reason));
                }
                _ => {}
            }
        }

        Self::json(200, Self::challenge_json(id, authz)).with_header(
            "Link",
            format!("<{}>;rel=\"up\"", Self::url(&format!("/authz/{}", id))),
        )
    }

    fn certificate(&self, state: &mut CaState, id: usize) -> Response {
        let Some(order) = state.orders.get(id.wrapping_sub(1)) else {
            return Self::problem(404, "malformed", "no such certificate");
        };
        let Some((leaf, intermediate)) = order.certificate.clone() else {
            return Self::problem(404, "malformed", "certificate not issued");
        };
        if order.status != OrderStatus::Valid {
            return Self::problem(403, "orderNotReady", "certificate not yet available");
        }

        let response = if state.issuer_link {
            HttpResponse::new(200, leaf).with_header(
                "Link",
                format!("<{}>;rel=\"up\"", Self::url(&format!("/issuer/{}", id))),
            )
        } else {
            HttpResponse::new(200, format!("{}{}", leaf, intermediate))
        };
        response.with_header("Content-Type", "application/pem-certificate-chain")
    }
}

impl TransportT for FakeCa {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        let path = request
            .url
            .strip_prefix(Self::BASE_URL)
            .unwrap_or(&request.url)
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        state.log.push(path.clone());

        let response = self.handle(&mut state, request, &path);
        let nonce = Self::issue_nonce(&mut state);
        Ok(response.with_header("Replay-Nonce", nonce))
    }
}

// ---------------------------------------------------------------------------
// DNS 替身
// ---------------------------------------------------------------------------

/// [`MemoryDns`] 收到的呼叫。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsCall {
    Create { name: String, value: String },
    Delete { name: String },
    WaitForPropagation { name: String },
}

#[derive(Default)]
struct DnsState {
    records: HashMap<String, String>,
    calls: Vec<DnsCall>,
    fail_create: bool,
    fail_delete: bool,
    confirm_propagation: bool,
    next_id: usize,
}

/// 記憶體中的 DNS 供應商，可注入失敗並記錄所有呼叫。
#[derive(Default)]
pub struct MemoryDns {
    state: Mutex<DnsState>,
}

impl MemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn fail_delete(&self) {
        self.state.lock().unwrap().fail_delete = true;
    }

    /// 讓 `wait_for_propagation` 回報 `Confirmed`。
    pub fn confirm_propagation(&self) {
        self.state.lock().unwrap().confirm_propagation = true;
    }

    pub fn calls(&self) -> Vec<DnsCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DnsCall::Delete { .. }))
            .count()
    }

    pub fn record(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().records.get(name).cloned()
    }
}

impl DnsProviderT for MemoryDns {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_record(&self, name: &str, value: &str) -> Result<RecordHandle, DnsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DnsCall::Create {
            name: name.to_string(),
            value: value.to_string(),
        });
        if state.fail_create {
            return Err(DnsError::RecordCreation {
                record_name: name.to_string(),
                message: "injected failure".into(),
            });
        }
        state.records.insert(name.to_string(), value.to_string());
        state.next_id += 1;
        Ok(RecordHandle {
            name: name.to_string(),
            value: value.to_string(),
            provider_ref: format!("mem-{}", state.next_id),
        })
    }

    fn delete_record(&self, handle: &RecordHandle) -> Result<(), DnsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DnsCall::Delete {
            name: handle.name.clone(),
        });
        if state.fail_delete {
            return Err(DnsError::RecordDeletion {
                record_name: handle.name.clone(),
                message: "injected failure".into(),
            });
        }
        state.records.remove(&handle.name);
        Ok(())
    }

    fn wait_for_propagation(&self, handle: &RecordHandle, _timeout: Duration) -> Result<Propagation, DnsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DnsCall::WaitForPropagation {
            name: handle.name.clone(),
        });
        Ok(if state.confirm_propagation {
            Propagation::Confirmed
        } else {
            Propagation::Unsupported
        })
    }
}

// ---------------------------------------------------------------------------
// 發佈替身
// ---------------------------------------------------------------------------

/// 記憶體中的物件儲存，依寫入順序保存。
#[derive(Default)]
pub struct MemoryObjectStore {
    entries: Mutex<Vec<(String, Vec<u8>)>>,
    fail_on: Mutex<Option<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 寫入此 key 時回傳錯誤。
    pub fn fail_on(&self, key: &str) {
        *self.fail_on.lock().unwrap() = Some(key.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl ObjectStoreT for MemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn store(&self, key: &str, payload: &[u8]) -> publish::Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(key) {
            return Err(PublishError::ObjectStore {
                key: key.to_string(),
                message: "injected failure".into(),
            });
        }
        self.entries
            .lock()
            .unwrap()
            .push((key.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// [`MemoryCertificateStore`] 收到的一次匯入。
#[derive(Debug, Clone)]
pub struct ImportCall {
    pub certificate: Vec<u8>,
    pub chain: Vec<u8>,
    pub private_key: Vec<u8>,
    pub existing_arn: Option<String>,
}

#[derive(Default)]
pub struct MemoryCertificateStore {
    imports: Mutex<Vec<ImportCall>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn imports(&self) -> Vec<ImportCall> {
        self.imports.lock().unwrap().clone()
    }
}

impl CertificateStoreT for MemoryCertificateStore {
    fn import_certificate(
        &self,
        certificate: &[u8],
        chain: &[u8],
        private_key: &[u8],
        existing_arn: Option<&str>,
    ) -> publish::Result<String> {
        let mut imports = self.imports.lock().unwrap();
        imports.push(ImportCall {
            certificate: certificate.to_vec(),
            chain: chain.to_vec(),
            private_key: private_key.to_vec(),
            existing_arn: existing_arn.map(str::to_string),
        });
        Ok(existing_arn
            .map(str::to_string)
            .unwrap_or_else(|| format!("arn:aws:acm:test:certificate/{}", imports.len())))
    }
}
