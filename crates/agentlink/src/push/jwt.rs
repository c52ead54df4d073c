// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compact JWS parsing and registered-claim checks.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::push::verify::AuthFailure;
use crate::registry::normalize_url;

/// Signature algorithms accepted on push tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Rs256,
    Es256,
    EdDsa,
}

impl Algorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(Self::Rs256),
            "ES256" => Some(Self::Es256),
            "EdDSA" => Some(Self::EdDsa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
            Self::EdDsa => "EdDSA",
        }
    }

    /// JWK `kty` a key must have to verify this algorithm.
    pub fn key_type(&self) -> &'static str {
        match self {
            Self::Rs256 => "RSA",
            Self::Es256 => "EC",
            Self::EdDsa => "OKP",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoseHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|a| a == expected),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_sha256: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What a token's claims are checked against.
#[derive(Debug, Clone)]
pub struct ClaimRules<'a> {
    pub issuer: &'a str,
    pub audience: Option<&'a str>,
    pub max_age: Duration,
    pub leeway: Duration,
    /// Current time, seconds since the epoch.
    pub now: i64,
}

impl Claims {
    pub fn check(&self, rules: &ClaimRules<'_>) -> Result<(), AuthFailure> {
        // Claim values come from the token; all arithmetic saturates.
        let leeway = i64::try_from(rules.leeway.as_secs()).unwrap_or(i64::MAX);
        let max_age = i64::try_from(rules.max_age.as_secs()).unwrap_or(i64::MAX);
        let now = rules.now;
        let latest_issue = now.saturating_add(leeway);

        if self.exp.is_none() && self.iat.is_none() {
            return Err(AuthFailure::MalformedToken);
        }
        if let Some(exp) = self.exp {
            if now > exp.saturating_add(leeway) {
                return Err(AuthFailure::Expired);
            }
        }
        if let Some(nbf) = self.nbf {
            if latest_issue < nbf {
                return Err(AuthFailure::NotYetValid);
            }
        }
        if let Some(iat) = self.iat {
            if iat > latest_issue {
                return Err(AuthFailure::NotYetValid);
            }
            if now.saturating_sub(iat) > max_age.saturating_add(leeway) {
                return Err(AuthFailure::Expired);
            }
        }
        if let Some(ref iss) = self.iss {
            if normalize_url(iss) != normalize_url(rules.issuer) {
                return Err(AuthFailure::IssuerMismatch);
            }
        }
        if let Some(expected) = rules.audience {
            if !self.aud.as_ref().is_some_and(|aud| aud.contains(expected)) {
                return Err(AuthFailure::AudienceMismatch);
            }
        }
        Ok(())
    }
}

/// A decoded but not yet verified compact JWS.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub header: JoseHeader,
    pub claims: Claims,
    signing_input: String,
    signature: Vec<u8>,
}

impl SignedToken {
    pub fn parse(token: &str) -> Result<Self, AuthFailure> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthFailure::MalformedToken);
        };

        let header: JoseHeader = decode_segment(header_b64)?;
        let claims: Claims = decode_segment(claims_b64)?;
        let signature =
            URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthFailure::MalformedToken)?;
        if signature.is_empty() {
            return Err(AuthFailure::MalformedToken);
        }

        Ok(Self {
            header,
            claims,
            signing_input: format!("{header_b64}.{claims_b64}"),
            signature,
        })
    }

    /// The token's algorithm. `none` and anything unlisted are rejected.
    pub fn algorithm(&self) -> Result<Algorithm, AuthFailure> {
        Algorithm::from_name(&self.header.alg).ok_or(AuthFailure::MalformedToken)
    }

    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthFailure> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| AuthFailure::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthFailure::MalformedToken)
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
