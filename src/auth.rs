//! Credential gate: password login and signed bearer tokens.
//!
//! A single shared principal is configured with a SHA-256 password digest.
//! A successful login mints a bearer token — JSON claims plus an ed25519
//! signature over them, both hex-encoded and dot-separated. Expiry is the
//! only deauthorization mechanism; there is no revocation list.

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::now_s;

/// Tokens expire one hour after issue.
pub const TOKEN_TTL_S: u64 = 3600;

const DOMAIN_SESSION_TOKEN: &str = "warden:session-token:v1";

#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential supplied at all.
    #[error("no credential supplied")]
    Unauthenticated,
    /// A credential was supplied but rejected (malformed, bad signature,
    /// or expired).
    #[error("credential rejected")]
    Forbidden,
    /// Login with a wrong username or password.
    #[error("username or password incorrect")]
    InvalidCredentials,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub username: String,
    /// Hex-encoded SHA-256 digest of the shared password.
    pub password_sha256: String,
    /// Secret seed the token signing key is derived from.
    pub token_key_seed: String,
}

pub struct Gate {
    username: String,
    password_digest: [u8; 32],
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Gate {
    pub fn new(cfg: &GateConfig) -> Result<Self> {
        if cfg.username.trim().is_empty() {
            return Err(anyhow!("gate username is required"));
        }
        let digest_bytes = hex::decode(&cfg.password_sha256)
            .map_err(|e| anyhow!("invalid password digest hex: {}", e))?;
        if digest_bytes.len() != 32 {
            return Err(anyhow!(
                "password digest must be 32 bytes, got {}",
                digest_bytes.len()
            ));
        }
        let mut password_digest = [0u8; 32];
        password_digest.copy_from_slice(&digest_bytes);
        let signing_key = signing_key_from_seed(&cfg.token_key_seed)?;
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            username: cfg.username.clone(),
            password_digest,
            signing_key,
            verifying_key,
        })
    }

    /// Verifies a login and mints a bearer token. The only entry point
    /// that creates tokens.
    pub fn issue(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        let presented: [u8; 32] = hasher.finalize().into();

        // Both checks run unconditionally so a username miss costs the
        // same as a password miss.
        let name_ok = self.username == username;
        let password_ok = ct_eq(&presented, &self.password_digest);
        if !(name_ok && password_ok) {
            return Err(AuthError::InvalidCredentials);
        }

        let iat = now_s().map_err(|_| AuthError::InvalidCredentials)?;
        let claims = Claims {
            sub: self.username.clone(),
            iat,
            exp: iat + TOKEN_TTL_S,
        };
        self.mint(&claims).map_err(|_| AuthError::InvalidCredentials)
    }

    /// Verifies a presented bearer token and returns the embedded
    /// principal. No side effects beyond signature and expiry checks.
    pub fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let now = now_s().map_err(|_| AuthError::Forbidden)?;
        self.authenticate_at(token, now)
    }

    fn authenticate_at(&self, token: &str, now: u64) -> Result<Principal, AuthError> {
        let (claims_hex, sig_hex) = token.split_once('.').ok_or(AuthError::Forbidden)?;
        let claims_bytes = hex::decode(claims_hex).map_err(|_| AuthError::Forbidden)?;
        let sig_bytes = hex::decode(sig_hex).map_err(|_| AuthError::Forbidden)?;
        let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| AuthError::Forbidden)?;
        let signature = Signature::from_bytes(&sig_bytes);

        let message = token_message(&claims_bytes);
        self.verifying_key
            .verify(&message, &signature)
            .map_err(|_| AuthError::Forbidden)?;

        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| AuthError::Forbidden)?;
        if claims.exp <= now {
            return Err(AuthError::Forbidden);
        }
        Ok(Principal {
            username: claims.sub,
        })
    }

    fn mint(&self, claims: &Claims) -> Result<String> {
        let claims_bytes = serde_json::to_vec(claims)?;
        let signature = self.signing_key.sign(&token_message(&claims_bytes));
        Ok(format!(
            "{}.{}",
            hex::encode(&claims_bytes),
            hex::encode(signature.to_bytes())
        ))
    }
}

fn token_message(claims_bytes: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_SESSION_TOKEN.len() + claims_bytes.len());
    message.extend_from_slice(DOMAIN_SESSION_TOKEN.as_bytes());
    message.extend_from_slice(claims_bytes);
    message
}

pub fn signing_key_from_seed(seed: &str) -> Result<SigningKey> {
    let trimmed = seed.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("token_key_seed is required"));
    }
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    Ok(SigningKey::from_bytes(&digest))
}

fn ct_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_hex(password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn test_gate(seed: &str) -> Gate {
        Gate::new(&GateConfig {
            username: "alice".to_string(),
            password_sha256: password_hex("correct"),
            token_key_seed: seed.to_string(),
        })
        .expect("gate config should be valid")
    }

    #[test]
    fn login_with_wrong_password_is_rejected() {
        let gate = test_gate("seed:test");
        let err = gate.issue("alice", "wrong").unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn login_with_unknown_username_is_rejected() {
        let gate = test_gate("seed:test");
        let err = gate.issue("mallory", "correct").unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn issued_token_authenticates() {
        let gate = test_gate("seed:test");
        let token = gate.issue("alice", "correct").expect("login");
        let principal = gate.authenticate(&token).expect("token should verify");
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn token_from_other_key_is_forbidden() {
        let gate = test_gate("seed:test");
        let other = test_gate("seed:other");
        let token = other.issue("alice", "correct").expect("login");
        let err = gate.authenticate(&token).unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
    }

    #[test]
    fn expired_token_is_forbidden() {
        let gate = test_gate("seed:test");
        let now = now_s().expect("clock");
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now - 2 * TOKEN_TTL_S,
            exp: now - TOKEN_TTL_S,
        };
        let token = gate.mint(&claims).expect("mint");
        let err = gate.authenticate(&token).unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
    }

    #[test]
    fn malformed_tokens_are_forbidden() {
        let gate = test_gate("seed:test");
        for token in ["", "nodot", "deadbeef.cafe", "zz.zz"] {
            let err = gate.authenticate(token).unwrap_err();
            assert!(matches!(err, AuthError::Forbidden), "token {:?}", token);
        }
    }

    #[test]
    fn tampered_claims_are_forbidden() {
        let gate = test_gate("seed:test");
        let token = gate.issue("alice", "correct").expect("login");
        let (_claims_hex, sig_hex) = token.split_once('.').unwrap();
        let forged_claims = serde_json::to_vec(&Claims {
            sub: "root".to_string(),
            iat: 0,
            exp: u64::MAX,
        })
        .unwrap();
        let forged = format!("{}.{}", hex::encode(forged_claims), sig_hex);
        let err = gate.authenticate(&forged).unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
    }

    #[test]
    fn gate_rejects_bad_digest_config() {
        let cfg = GateConfig {
            username: "alice".to_string(),
            password_sha256: "abcd".to_string(),
            token_key_seed: "seed:test".to_string(),
        };
        assert!(Gate::new(&cfg).is_err());
    }
}
