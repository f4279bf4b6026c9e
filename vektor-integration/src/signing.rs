//! HMAC-SHA256 request signing for Binance-compatible signed REST endpoints.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign a canonical query string with the account's API secret, returning the
/// lowercase hex digest to attach as the `signature` query parameter.
pub fn sign_query(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_and_hex() {
        let sig1 = sign_query("symbol=BTCUSDT&side=BUY&timestamp=1", "secret");
        let sig2 = sign_query("symbol=BTCUSDT&side=BUY&timestamp=1", "secret");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_differs_by_secret() {
        let sig1 = sign_query("a=1", "secret-one");
        let sig2 = sign_query("a=1", "secret-two");
        assert_ne!(sig1, sig2);
    }
}
