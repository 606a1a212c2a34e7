//! Bearer-token handshake and channel authorisation (`spec.md` §4.8).

use jsonwebtoken::{decode, DecodingKey, Validation};
use meridian_shared::MeridianError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    secret: Vec<u8>,
}

impl AuthConfig {
    pub fn enabled(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            enabled: true,
            secret: secret.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            secret: Vec::new(),
        }
    }

    /// Verifies signature and expiry; returns `None` when auth is disabled
    /// (the caller treats the connection as anonymous).
    pub fn verify(&self, token: &str) -> Result<Option<Claims>, MeridianError> {
        if !self.enabled {
            return Ok(None);
        }
        let key = DecodingKey::from_secret(&self.secret);
        let data = decode::<Claims>(token, &key, &Validation::default())
            .map_err(|e| MeridianError::validation(format!("invalid bearer token: {e}")))?;
        Ok(Some(data.claims))
    }
}

/// `workflow:*` needs `workflow:read`, `pool:*` needs `pool:read`, `worker:*`
/// needs `worker:read`; anything else (`global`, `symbiotic:ecosystem`) has
/// no dedicated permission. `admin` always passes.
pub fn authorize_channel(auth: &AuthConfig, claims: Option<&Claims>, channel: &str) -> bool {
    if !auth.enabled {
        return true;
    }
    let Some(claims) = claims else {
        return false;
    };
    if claims.permissions.iter().any(|p| p == "admin") {
        return true;
    }
    match required_permission(channel) {
        Some(perm) => claims.permissions.iter().any(|p| p == perm),
        None => true,
    }
}

fn required_permission(channel: &str) -> Option<&'static str> {
    if channel.starts_with("workflow:") {
        Some("workflow:read")
    } else if channel.starts_with("pool:") {
        Some("pool:read")
    } else if channel.starts_with("worker:") {
        Some("worker:read")
    } else {
        None
    }
}
