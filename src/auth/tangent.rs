use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, Signature, Verifier, VerifyingKey};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::Error;
use crate::store::{ScopedPool, TangentCredentials};
use crate::types::RequestContext;

pub const SIGNATURE_HEADER: &str = "X-Tangent-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Tangent-Signature-Timestamp";
pub const TANGENT_ID_HEADER: &str = "X-TangentID";

/// Largest request body a signed request may carry.
const MAX_SIGNED_BODY: usize = 8 * 1024 * 1024;

/// State for [`tangent_auth`].
#[derive(Clone)]
pub struct TangentAuth {
    pool: ScopedPool,
    skew: Duration,
}

impl TangentAuth {
    #[must_use]
    pub fn new(pool: ScopedPool, config: &ServerConfig) -> Self {
        Self {
            pool,
            skew: config.signature_skew(),
        }
    }
}

/// Why a signed request was turned away. Only ever logged; the caller sees a
/// plain 401.
#[derive(Debug, Error)]
enum Rejection {
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("invalid tangent id format")]
    InvalidTangentId,
    #[error("unknown tangent")]
    UnknownTangent,
    #[error("tangent lookup failed: {0}")]
    Lookup(Error),
    #[error("invalid timestamp format")]
    InvalidTimestamp,
    #[error("signature timestamp outside the allowed window")]
    Skewed,
    #[error("unreadable request body")]
    Body,
    #[error("invalid signature encoding")]
    SignatureEncoding,
    #[error("invalid public key size")]
    KeySize,
    #[error("signature verification failed")]
    BadSignature,
}

/// The exact bytes a tangent signs.
#[must_use]
pub fn string_to_sign(method: &str, path: &str, query: &str, body: &[u8], timestamp: &str) -> Vec<u8> {
    let path = format!("/{}", path.trim_start_matches('/'));
    let mut out = Vec::with_capacity(method.len() + path.len() + query.len() + body.len() + timestamp.len() + 4);
    let parts = [method.as_bytes(), path.as_bytes(), query.as_bytes(), body, timestamp.as_bytes()];
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        out.extend_from_slice(part);
    }
    out
}

struct SignedHeaders {
    signature: String,
    timestamp: String,
    tangent_id: Uuid,
}

fn signed_headers(headers: &HeaderMap) -> Result<SignedHeaders, Rejection> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };
    let (Some(signature), Some(timestamp), Some(tangent_id)) =
        (get(SIGNATURE_HEADER), get(TIMESTAMP_HEADER), get(TANGENT_ID_HEADER))
    else {
        return Err(Rejection::MissingHeaders);
    };
    let tangent_id = Uuid::parse_str(&tangent_id).map_err(|_| Rejection::InvalidTangentId)?;
    Ok(SignedHeaders {
        signature,
        timestamp,
        tangent_id,
    })
}

fn check_timestamp(raw: &str, skew: Duration, now: DateTime<Utc>) -> Result<(), Rejection> {
    let at = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| Rejection::InvalidTimestamp)?
        .with_timezone(&Utc);
    let drift = (now - at).abs().to_std().map_err(|_| Rejection::Skewed)?;
    if drift > skew {
        return Err(Rejection::Skewed);
    }
    Ok(())
}

fn verify_signature(public_key: &[u8], message: &[u8], signature: &str) -> Result<(), Rejection> {
    let signature = STANDARD
        .decode(signature)
        .map_err(|_| Rejection::SignatureEncoding)?;
    let signature = Signature::from_slice(&signature).map_err(|_| Rejection::SignatureEncoding)?;

    let key: [u8; PUBLIC_KEY_LENGTH] = public_key.try_into().map_err(|_| Rejection::KeySize)?;
    let key = VerifyingKey::from_bytes(&key).map_err(|_| Rejection::KeySize)?;
    key.verify(message, &signature)
        .map_err(|_| Rejection::BadSignature)
}

async fn lookup(pool: ScopedPool, ctx: RequestContext, id: Uuid) -> Result<TangentCredentials, Rejection> {
    let found = tokio::task::spawn_blocking(move || {
        let conn = pool.conn(&ctx)?;
        let found = conn.metadata().tangent_credentials(id);
        conn.close();
        found
    })
    .await
    .map_err(|e| Rejection::Lookup(Error::Io(std::io::Error::other(e))))?;

    match found {
        Ok(Some(creds)) => Ok(creds),
        Ok(None) => Err(Rejection::UnknownTangent),
        Err(e) => Err(Rejection::Lookup(e)),
    }
}

async fn authenticate(
    auth: &TangentAuth,
    ctx: &RequestContext,
    req: Request,
) -> Result<(Request, TangentCredentials, Uuid), Rejection> {
    let headers = signed_headers(req.headers())?;
    let creds = lookup(auth.pool.clone(), ctx.clone(), headers.tangent_id).await?;
    check_timestamp(&headers.timestamp, auth.skew, Utc::now())?;

    let (parts, body) = req.into_parts();
    let body: Bytes = to_bytes(body, MAX_SIGNED_BODY)
        .await
        .map_err(|_| Rejection::Body)?;

    let message = string_to_sign(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().unwrap_or(""),
        &body,
        &headers.timestamp,
    );
    verify_signature(&creds.public_key, &message, &headers.signature)?;

    Ok((Request::from_parts(parts, Body::from(body)), creds, headers.tangent_id))
}

/// Authenticates a request signed by a registered tangent.
///
/// On success the tangent's tenant is bound into the request's [`RequestContext`]
/// extension (created when absent). Every failure is the same 401.
pub async fn tangent_auth(State(auth): State<TangentAuth>, req: Request, next: Next) -> Response {
    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    let path = req.uri().path().to_owned();

    match authenticate(&auth, &ctx, req).await {
        Ok((mut req, creds, tangent_id)) => {
            debug!(%tangent_id, tenant = %creds.tenant_id, "Tangent request authenticated");
            req.extensions_mut().insert(ctx.with_tenant(creds.tenant_id));
            next.run(req).await
        }
        Err(reason) => {
            warn!(path = %path, reason = %reason, "Tangent signature validation failed");
            Error::Unauthorized.into_response()
        }
    }
}
