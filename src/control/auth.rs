//! Stored authorization credentials and preemptive authentication.
//!
//! The executor consults the store before each request: when preemptive
//! auth is enabled and a stored entry covers the target URL, the first
//! request already carries credentials instead of waiting for a 401
//! round-trip. Basic credentials are sent unconditionally; Digest
//! credentials are only sent once challenge parameters from a previous 401
//! have been captured into the client handle's auth state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use url::Url;

/// Supported authorization mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Basic,
    Digest,
    /// Recognized but not implemented; requests log a warning and proceed
    /// unauthenticated until challenged.
    Kerberos,
}

/// One stored authorization covering a URL prefix.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// URL prefix this authorization applies to.
    pub url: String,
    pub username: String,
    pub password: String,
    /// Optional realm restriction; empty matches any realm.
    pub realm: String,
    pub mechanism: Mechanism,
}

impl Authorization {
    /// The value of a preemptive `Authorization` header for Basic
    /// credentials.
    pub fn basic_header(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

/// Challenge parameters captured from a `WWW-Authenticate: Digest` header,
/// kept in the client handle's auth state between requests so later
/// requests to the same target can authenticate preemptively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
}

impl DigestChallenge {
    /// Parse the parameter list of a `Digest` challenge header value.
    /// Returns `None` when the header is not a Digest challenge.
    pub fn parse(header: &str) -> Option<DigestChallenge> {
        let rest = header.trim().strip_prefix("Digest ")?;
        let mut challenge = DigestChallenge::default();
        for param in split_challenge_params(rest) {
            let mut parts = param.splitn(2, '=');
            let name = parts.next()?.trim();
            let value = parts.next().unwrap_or("").trim().trim_matches('"');
            match name.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value.to_string(),
                "nonce" => challenge.nonce = value.to_string(),
                "opaque" => challenge.opaque = Some(value.to_string()),
                "algorithm" => challenge.algorithm = Some(value.to_string()),
                "qop" => challenge.qop = Some(value.to_string()),
                _ => (),
            }
        }
        if challenge.nonce.is_empty() {
            None
        } else {
            Some(challenge)
        }
    }

    /// Compute the value of an `Authorization: Digest` header answering
    /// this challenge, per RFC 2617 (qop=auth or the legacy no-qop form).
    pub fn authorization_header(
        &self,
        authorization: &Authorization,
        method: &str,
        uri: &str,
    ) -> String {
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            authorization.username, self.realm, authorization.password
        ));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        // qop may list several tokens; we only speak "auth".
        let use_qop = self
            .qop
            .as_deref()
            .map(|q| q.split(',').any(|t| t.trim() == "auth"))
            .unwrap_or(false);

        let mut header;
        if use_qop {
            let cnonce = generate_cnonce();
            let nc = "00000001";
            let response = md5_hex(&format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, self.nonce, nc, cnonce, ha2
            ));
            header = format!(
                "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", qop=auth, nc={}, cnonce=\"{}\", response=\"{}\"",
                authorization.username, self.realm, self.nonce, uri, nc, cnonce, response
            );
        } else {
            let response = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2));
            header = format!(
                "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
                authorization.username, self.realm, self.nonce, uri, response
            );
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        header
    }
}

// Split a challenge parameter list on commas, respecting quoted values.
fn split_challenge_params(params: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut depth_quoted = false;
    let mut start = 0;
    for (index, character) in params.char_indices() {
        match character {
            '"' => depth_quoted = !depth_quoted,
            ',' if !depth_quoted => {
                result.push(params[start..index].trim());
                start = index + 1;
            }
            _ => (),
        }
    }
    result.push(params[start..].trim());
    result.retain(|p| !p.is_empty());
    result
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn generate_cnonce() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Stored authorizations for one logical user.
#[derive(Debug, Default)]
pub struct AuthStore {
    authorizations: Vec<Authorization>,
}

impl AuthStore {
    pub fn new() -> Self {
        AuthStore::default()
    }

    /// Register an authorization.
    pub fn add(&mut self, authorization: Authorization) {
        self.authorizations.push(authorization);
    }

    /// Find the authorization covering `url`: the longest configured URL
    /// prefix that matches wins.
    pub fn authorization_for(&self, url: &Url) -> Option<&Authorization> {
        let target = url.as_str();
        self.authorizations
            .iter()
            .filter(|a| target.starts_with(&a.url))
            .max_by_key(|a| a.url.len())
    }
}
