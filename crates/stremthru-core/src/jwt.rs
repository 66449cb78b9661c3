//! HS256 token helpers for proxy-link tokens.
//!
//! The signing secret is per-user (the user's configured password), so
//! verification first reads the unverified subject, resolves the secret for
//! that user, then validates the signature and expiry for real.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};

/// Registered claims plus a flattened data payload.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Claims<T> {
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub data: T,
}

/// Sign `claims` with `secret`.
///
/// # Errors
///
/// Returns an internal error when serialization fails.
pub fn create<T: Serialize>(secret: &str, claims: &Claims<T>) -> StoreResult<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| StoreError::internal(format!("failed to sign token: {err}")))
}

/// Verify and decode a token whose secret depends on its subject.
///
/// `secret_for` maps the (unverified) subject to the signing secret; a `None`
/// return rejects the token. The resolved subject and secret are returned
/// alongside the claims so callers can reuse the secret for payload
/// decryption.
///
/// # Errors
///
/// Returns `unauthorized` for unknown subjects, signature mismatches, and
/// expired or otherwise invalid claims; `bad_request` for malformed tokens.
pub fn parse<T: DeserializeOwned>(
    token: &str,
    secret_for: impl Fn(&str) -> Option<String>,
) -> StoreResult<(Claims<T>, String)> {
    let subject = unverified_subject(token)?;
    let secret = secret_for(&subject)
        .ok_or_else(|| StoreError::unauthorized("unknown token subject"))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();

    let data = decode::<Claims<T>>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature
        | ErrorKind::InvalidSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidSubject => {
            StoreError::unauthorized("invalid token claims").with_cause(err)
        }
        _ => StoreError::bad_request("malformed token").with_cause(err),
    })?;

    Ok((data.claims, secret))
}

fn unverified_subject(token: &str) -> StoreResult<String> {
    #[derive(serde::Deserialize)]
    struct SubjectOnly {
        sub: String,
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    let data = decode::<SubjectOnly>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|err| StoreError::bad_request("malformed token").with_cause(err))?;
    Ok(data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
    struct Payload {
        enc_link: String,
        enc_format: String,
    }

    fn claims(exp: Option<i64>) -> Claims<Payload> {
        Claims {
            iss: "stremthru".to_string(),
            sub: "alice".to_string(),
            exp,
            data: Payload {
                enc_link: "blob".to_string(),
                enc_format: "base64".to_string(),
            },
        }
    }

    #[test]
    fn round_trip_without_expiry() {
        let token = create("pw", &claims(None)).unwrap();
        let (decoded, secret) =
            parse::<Payload>(&token, |sub| (sub == "alice").then(|| "pw".to_string())).unwrap();
        assert_eq!(decoded.sub, "alice");
        assert_eq!(decoded.data.enc_link, "blob");
        assert_eq!(secret, "pw");
    }

    #[test]
    fn wrong_password_fails_unauthorized() {
        let token = create("pw", &claims(None)).unwrap();
        let err = parse::<Payload>(&token, |_| Some("other".to_string())).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[test]
    fn unknown_subject_fails_unauthorized() {
        let token = create("pw", &claims(None)).unwrap();
        let err = parse::<Payload>(&token, |_| None).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[test]
    fn expired_token_fails_unauthorized() {
        let token = create("pw", &claims(Some(chrono::Utc::now().timestamp() - 600))).unwrap();
        let err = parse::<Payload>(&token, |_| Some("pw".to_string())).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[test]
    fn future_expiry_is_accepted() {
        let token = create("pw", &claims(Some(chrono::Utc::now().timestamp() + 600))).unwrap();
        assert!(parse::<Payload>(&token, |_| Some("pw".to_string())).is_ok());
    }

    #[test]
    fn garbage_is_bad_request() {
        let err = parse::<Payload>("not.a.token", |_| Some("pw".to_string())).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }
}
