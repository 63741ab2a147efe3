//! Digest credentials for pushing to a protected server (RFC 2617 §3.2.2,
//! without `qop`, `opaque` or `cnonce`).
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:HA2)
//! ```

use md5::{Digest, Md5};

use crate::error::{Result, RtspError};

/// The `realm` and `nonce` of a `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// ```
    /// use rtsp::protocol::DigestChallenge;
    ///
    /// let c = DigestChallenge::parse(r#"Digest realm="Streaming Server", nonce="a1b2c3""#).unwrap();
    /// assert_eq!(c.realm, "Streaming Server");
    /// assert_eq!(c.nonce, "a1b2c3");
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("Digest") => rest,
            _ => {
                return Err(RtspError::Authentication(format!(
                    "unsupported challenge: {header}"
                )));
            }
        };

        let mut realm = None;
        let mut nonce = None;
        for (key, value) in split_params(params) {
            if key.eq_ignore_ascii_case("realm") {
                realm = Some(value);
            } else if key.eq_ignore_ascii_case("nonce") {
                nonce = Some(value);
            }
        }
        match (realm, nonce) {
            (Some(realm), Some(nonce)) => Ok(Self { realm, nonce }),
            _ => Err(RtspError::Authentication(format!(
                "challenge without realm or nonce: {header}"
            ))),
        }
    }

    /// The `response` value for `method` on `uri`.
    pub fn response(&self, username: &str, password: &str, method: &str, uri: &str) -> String {
        let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
    }

    /// A complete `Authorization` header value.
    pub fn authorization(&self, username: &str, password: &str, method: &str, uri: &str) -> String {
        format!(
            "Digest username=\"{username}\",realm=\"{}\",nonce=\"{}\",uri=\"{uri}\",response=\"{}\"",
            self.realm,
            self.nonce,
            self.response(username, password, method, uri)
        )
    }
}

/// Lowercase hex MD5 of `input`.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// `key="value", key=value` pairs; commas inside quotes are kept.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after = after.trim_start();
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, remainder)) => (value.to_string(), remainder),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.split_once(',') {
                Some((value, remainder)) => (value.trim().to_string(), remainder),
                None => (after.trim().to_string(), ""),
            }
        };
        pairs.push((key, value));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_known_vectors() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            md5_hex("The quick brown fox jumps over the lazy dog"),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn response_is_chained_md5() {
        let c = DigestChallenge {
            realm: "r".into(),
            nonce: "n".into(),
        };
        let ha1 = md5_hex("user:r:pass");
        let ha2 = md5_hex("ANNOUNCE:rtsp://h:554/live.sdp");
        let expected = md5_hex(&format!("{ha1}:n:{ha2}"));
        assert_eq!(
            c.response("user", "pass", "ANNOUNCE", "rtsp://h:554/live.sdp"),
            expected
        );
        assert_eq!(
            c.authorization("user", "pass", "ANNOUNCE", "rtsp://h:554/live.sdp"),
            format!(
                "Digest username=\"user\",realm=\"r\",nonce=\"n\",uri=\"rtsp://h:554/live.sdp\",response=\"{expected}\""
            )
        );
    }

    #[test]
    fn parses_unordered_and_extra_params() {
        let c = DigestChallenge::parse(
            r#"Digest nonce="xyz", algorithm=MD5, realm="a, b", stale=FALSE"#,
        )
        .unwrap();
        assert_eq!(c.realm, "a, b");
        assert_eq!(c.nonce, "xyz");
    }

    #[test]
    fn rejects_basic_and_incomplete_challenges() {
        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="x""#).is_err());
    }
}
