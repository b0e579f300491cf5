use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{ Hmac, Mac };
use serde::Deserialize;
use sha2::Sha256;

use super::{ AuthError, Claims, TokenVerifier };

type HmacSha256 = Hmac<Sha256>;

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// Verifies compact JWTs signed with HMAC-SHA256.
pub struct Hs256Verifier {
    secret: Vec<u8>,
    issuer: Option<String>,
}

impl Hs256Verifier {
    pub fn new(secret: impl Into<Vec<u8>>, issuer: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.filter(|i| !i.is_empty()),
        }
    }

    /// Issues a token for `claims`. Used by tooling and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = serde_json
            ::to_vec(claims)
            .map_err(|e| AuthError::InvalidToken(format!("claims not serializable: {}", e)))?;
        let signing_input = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(payload));
        let signature = self.mac(&signing_input)?.finalize().into_bytes();
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e|
            AuthError::InvalidToken(format!("bad key: {}", e))
        )?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|e|
        AuthError::InvalidToken(format!("{} is not base64url: {}", what, e))
    )
}

#[async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(AuthError::InvalidToken("expected three segments".into()));
        };

        let header: Header = serde_json
            ::from_slice(&decode_segment(header_b64, "header")?)
            .map_err(|e| AuthError::InvalidToken(format!("bad header: {}", e)))?;
        if header.alg != "HS256" {
            return Err(AuthError::InvalidToken(format!("unsupported alg {}", header.alg)));
        }

        let signature = decode_segment(signature_b64, "signature")?;
        self.mac(&format!("{}.{}", header_b64, payload_b64))?
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken("signature mismatch".into()))?;

        let claims: Claims = serde_json
            ::from_slice(&decode_segment(payload_b64, "payload")?)
            .map_err(|e| AuthError::InvalidToken(format!("bad claims: {}", e)))?;

        if let Some(exp) = claims.exp {
            if exp <= Utc::now().timestamp() {
                return Err(AuthError::InvalidToken("token expired".into()));
            }
        }
        if let Some(expected) = &self.issuer {
            if claims.iss.as_deref() != Some(expected.as_str()) {
                return Err(AuthError::InvalidToken("issuer mismatch".into()));
            }
        }
        Ok(claims)
    }
}
