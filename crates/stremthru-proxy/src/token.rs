//! Proxy-link tokens.
//!
//! Two on-wire forms of the same record:
//!
//!   * `base64.<json>` — the raw record, no expiry, password carried inline
//!     and checked against server config on use. For machine clients.
//!   * a JWT signed with the user's password — payload holds the upstream
//!     URL (AES-encrypted or base64), tunnel mode, and the optional
//!     qBittorrent target. Used whenever the token must expire or hide the
//!     URL.
//!
//! Decoded records are memoized for thirty minutes so replayed playback
//! requests skip signature verification entirely.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use stremthru_config::{AuthConfig, TunnelType};
use stremthru_core::cache::Cache;
use stremthru_core::util::{base64_decode, base64_encode, basename, encode_path_segments};
use stremthru_core::{StoreError, StoreResult, crypto, jwt};

const ISSUER: &str = "stremthru";
const BASE64_PREFIX: &str = "base64.";
const DECODE_CACHE_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// qBittorrent pacing target carried by the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QbitTarget {
    pub hash: String,
    pub file_index: i32,
}

/// Everything a proxy request needs, decoded from the token.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyLinkInfo {
    pub user: String,
    pub link: String,
    pub headers: Option<HashMap<String, String>>,
    pub tunnel: TunnelType,
    pub qbit: Option<QbitTarget>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Base64TokenData {
    /// `user:password`.
    u: String,
    /// Upstream URL.
    v: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reqh: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "is_default_tunnel")]
    tunt: TunnelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qf: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JwtTokenData {
    enc_link: String,
    enc_format: String,
    #[serde(default, skip_serializing_if = "is_default_tunnel")]
    tunt: TunnelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qf: Option<i32>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_tunnel(tunnel: &TunnelType) -> bool {
    *tunnel == TunnelType::None
}

fn qbit_target(hash: Option<String>, file_index: Option<i32>) -> Option<QbitTarget> {
    hash.filter(|hash| !hash.is_empty()).map(|hash| QbitTarget {
        hash,
        file_index: file_index.unwrap_or(0),
    })
}

/// Create an encoded proxy link rooted at `base_url`.
///
/// The plain base64 form is used only when the token neither encrypts nor
/// expires; everything else goes through the signed JWT.
///
/// # Errors
///
/// Serialization or encryption failures.
#[allow(clippy::too_many_arguments)]
pub fn create_proxy_link(
    base_url: &str,
    link: &str,
    headers: Option<&HashMap<String, String>>,
    tunnel: TunnelType,
    expires_in: Duration,
    user: &str,
    password: &str,
    should_encrypt: bool,
    filename: &str,
    qbit: Option<&QbitTarget>,
) -> StoreResult<String> {
    let encoded_token = if !should_encrypt && expires_in.is_zero() {
        let data = Base64TokenData {
            u: format!("{user}:{password}"),
            v: link.to_string(),
            reqh: headers.cloned().filter(|headers| !headers.is_empty()),
            tunt: tunnel,
            qh: qbit.map(|target| target.hash.clone()),
            qf: qbit.map(|target| target.file_index),
        };
        let blob = serde_json::to_vec(&data)
            .map_err(|err| StoreError::internal("failed to encode token").with_cause(err))?;
        format!("{BASE64_PREFIX}{}", base64_encode(&String::from_utf8_lossy(&blob)))
    } else {
        let mut link_blob = link.to_string();
        if let Some(headers) = headers {
            for (key, value) in headers {
                link_blob.push('\n');
                link_blob.push_str(key);
                link_blob.push_str(": ");
                link_blob.push_str(value);
            }
        }

        let (enc_link, enc_format) = if should_encrypt {
            (
                crypto::encrypt(password, &link_blob)?,
                crypto::ENCRYPTION_FORMAT.to_string(),
            )
        } else {
            (base64_encode(&link_blob), "base64".to_string())
        };

        let claims = jwt::Claims {
            iss: ISSUER.to_string(),
            sub: user.to_string(),
            exp: if expires_in.is_zero() {
                None
            } else {
                Some(Utc::now().timestamp() + expires_in.as_secs() as i64)
            },
            data: JwtTokenData {
                enc_link,
                enc_format,
                tunt: tunnel,
                qh: qbit.map(|target| target.hash.clone()),
                qf: qbit.map(|target| target.file_index),
            },
        };
        jwt::create(password, &claims)?
    };

    let mut proxy_link = format!("{}/v0/proxy/{encoded_token}", base_url.trim_end_matches('/'));

    let filename = if filename.is_empty() {
        basename(link).split('?').next().unwrap_or_default().to_string()
    } else {
        filename.to_string()
    };
    if !filename.is_empty() {
        proxy_link.push('/');
        proxy_link.push_str(&encode_path_segments(&filename));
    }

    Ok(proxy_link)
}

/// Decoder with the short-lived memoization cache.
pub struct ProxyLinkCodec {
    cache: Cache<ProxyLinkInfo>,
}

impl ProxyLinkCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Cache::new("store:proxyLinkToken", DECODE_CACHE_LIFETIME),
        }
    }

    /// Decode and authenticate a token.
    ///
    /// # Errors
    ///
    /// `401` for password mismatches, unknown users, and invalid claims;
    /// `bad_request` for malformed tokens and unknown `enc_format`s.
    pub fn unwrap(&self, encoded_token: &str, auth: &AuthConfig) -> StoreResult<ProxyLinkInfo> {
        if let Some(info) = self.cache.get(encoded_token) {
            return Ok(info);
        }

        let info = if let Some(encoded) = encoded_token.strip_prefix(BASE64_PREFIX) {
            let blob = base64_decode(encoded)?;
            let data: Base64TokenData = serde_json::from_str(&blob)
                .map_err(|err| StoreError::bad_request("malformed token").with_cause(err))?;
            let (user, password) = data.u.split_once(':').unwrap_or((data.u.as_str(), ""));
            if auth.password_of(user).as_deref() != Some(password) {
                return Err(StoreError::unauthorized("unauthorized"));
            }
            ProxyLinkInfo {
                user: user.to_string(),
                link: data.v,
                headers: data.reqh,
                tunnel: data.tunt,
                qbit: qbit_target(data.qh, data.qf),
            }
        } else {
            let (claims, password) =
                jwt::parse::<JwtTokenData>(encoded_token, |user| auth.password_of(user))?;

            let link_blob = match claims.data.enc_format.as_str() {
                "base64" => base64_decode(&claims.data.enc_link)?,
                crypto::ENCRYPTION_FORMAT => crypto::decrypt(&password, &claims.data.enc_link)?,
                other => {
                    return Err(StoreError::bad_request(format!(
                        "unknown encryption format: {other}"
                    )));
                }
            };

            let mut lines = link_blob.lines();
            let link = lines.next().unwrap_or_default().to_string();
            let mut headers = HashMap::new();
            for line in lines {
                if let Some((key, value)) = line.split_once(": ") {
                    headers.insert(key.to_string(), value.to_string());
                }
            }

            ProxyLinkInfo {
                user: claims.sub,
                link,
                headers: if headers.is_empty() { None } else { Some(headers) },
                tunnel: claims.data.tunt,
                qbit: qbit_target(claims.data.qh, claims.data.qf),
            }
        };

        self.cache.put(encoded_token, info.clone());
        Ok(info)
    }
}

impl Default for ProxyLinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stremthru_core::ErrorCode;

    fn auth() -> AuthConfig {
        AuthConfig::parse("alice:pw1,bob:pw2")
    }

    fn token_of(link: &str) -> String {
        link.rsplit('/')
            .nth(1)
            .map(str::to_string)
            .unwrap_or_else(|| link.rsplit('/').next().unwrap_or_default().to_string())
    }

    #[test]
    fn base64_form_round_trips() {
        let link = create_proxy_link(
            "https://st.example.com",
            "https://files/movie.mkv",
            None,
            TunnelType::None,
            Duration::ZERO,
            "alice",
            "pw1",
            false,
            "",
            None,
        )
        .unwrap();
        assert!(link.contains("/v0/proxy/base64."));
        assert!(link.ends_with("/movie.mkv"));

        let codec = ProxyLinkCodec::new();
        let info = codec.unwrap(&token_of(&link), &auth()).unwrap();
        assert_eq!(info.user, "alice");
        assert_eq!(info.link, "https://files/movie.mkv");
        assert_eq!(info.tunnel, TunnelType::None);
        assert!(info.qbit.is_none());
    }

    #[test]
    fn encrypted_jwt_round_trips_with_headers_and_qbit() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://example.com".to_string());
        let qbit = QbitTarget {
            hash: "d160b8d8ea35a5b4e52837468fc8f03d55cef1f7".to_string(),
            file_index: 2,
        };
        let link = create_proxy_link(
            "https://st.example.com",
            "https://files/Show/e2.mkv",
            Some(&headers),
            TunnelType::Auto,
            Duration::from_secs(12 * 3600),
            "alice",
            "pw1",
            true,
            "e2.mkv",
            Some(&qbit),
        )
        .unwrap();

        let codec = ProxyLinkCodec::new();
        let info = codec.unwrap(&token_of(&link), &auth()).unwrap();
        assert_eq!(info.user, "alice");
        assert_eq!(info.link, "https://files/Show/e2.mkv");
        assert_eq!(
            info.headers.as_ref().unwrap().get("Referer").unwrap(),
            "https://example.com"
        );
        assert_eq!(info.tunnel, TunnelType::Auto);
        assert_eq!(info.qbit.as_ref().unwrap(), &qbit);
    }

    #[test]
    fn wrong_password_is_rejected_with_401() {
        let link = create_proxy_link(
            "https://st.example.com",
            "https://files/movie.mkv",
            None,
            TunnelType::None,
            Duration::from_secs(60),
            "alice",
            "not-her-password",
            true,
            "",
            None,
        )
        .unwrap();

        let codec = ProxyLinkCodec::new();
        let err = codec.unwrap(&token_of(&link), &auth()).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.status_code, 401);
    }

    #[test]
    fn base64_form_with_wrong_inline_password_is_rejected() {
        let link = create_proxy_link(
            "https://st.example.com",
            "https://files/movie.mkv",
            None,
            TunnelType::None,
            Duration::ZERO,
            "bob",
            "stale-password",
            false,
            "",
            None,
        )
        .unwrap();
        let codec = ProxyLinkCodec::new();
        let err = codec.unwrap(&token_of(&link), &auth()).unwrap_err();
        assert_eq!(err.status_code, 401);
    }

    #[test]
    fn decode_cache_returns_equal_record() {
        let link = create_proxy_link(
            "https://st.example.com",
            "https://files/movie.mkv",
            None,
            TunnelType::Forced,
            Duration::from_secs(3600),
            "alice",
            "pw1",
            true,
            "",
            None,
        )
        .unwrap();
        let token = token_of(&link);
        let codec = ProxyLinkCodec::new();
        let first = codec.unwrap(&token, &auth()).unwrap();
        let second = codec.unwrap(&token, &auth()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_encryption_format_is_rejected() {
        let claims = jwt::Claims {
            iss: ISSUER.to_string(),
            sub: "alice".to_string(),
            exp: None,
            data: JwtTokenData {
                enc_link: base64_encode("https://x"),
                enc_format: "rot13".to_string(),
                tunt: TunnelType::None,
                qh: None,
                qf: None,
            },
        };
        let token = jwt::create("pw1", &claims).unwrap();
        let codec = ProxyLinkCodec::new();
        let err = codec.unwrap(&token, &auth()).unwrap_err();
        assert!(err.message.contains("unknown encryption format"));
    }

    #[test]
    fn filename_falls_back_to_link_basename() {
        let link = create_proxy_link(
            "https://st.example.com",
            "https://files/dir/Movie%20(2024).mkv?token=x",
            None,
            TunnelType::None,
            Duration::ZERO,
            "alice",
            "pw1",
            false,
            "",
            None,
        )
        .unwrap();
        assert!(link.ends_with("/Movie%2520%282024%29.mkv"));
    }
}
