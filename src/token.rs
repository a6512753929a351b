//! Minimal JWT inspection. Tokens are never verified locally; the authority does that.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<f64>,
}

/// Return the expiration instant of `token` as carried by its `exp` claim.
pub(crate) fn expiration(token: &str) -> Result<SystemTime> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
        return Err(Error::InvalidToken("expected three segments".to_owned()));
    };

    // Some issuers keep the padding.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| Error::InvalidToken(err.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|err| Error::InvalidToken(err.to_string()))?;

    match claims.exp {
        Some(exp) if exp > 0.0 => Duration::try_from_secs_f64(exp)
            .ok()
            .and_then(|exp| UNIX_EPOCH.checked_add(exp))
            .ok_or_else(|| Error::InvalidToken(format!("exp {exp} is out of range"))),
        _ => Err(Error::NoExpiration),
    }
}
