//! JOSE 與 ACME 所需的 base64url 編碼輔助函式。

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    DecodeError, Engine,
};

/// 以 URL 安全、無填充的 base64 編碼任意位元組。
pub fn b64url<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// 解碼 URL 安全、無填充的 base64 字串。
pub fn b64url_decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD.decode(input)
}

/// 標準 base64（含填充）編碼，用於 PEM 內文。
pub fn b64_standard<T: AsRef<[u8]>>(input: T) -> String {
    STANDARD.encode(input)
}
