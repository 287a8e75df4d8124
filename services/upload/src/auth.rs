use crate::config::AuthConfig;
use crate::error::PipelineError;
use crate::metadata_store::Video;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Turns a bearer credential into the caller's user id
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Uuid, PipelineError>;
}

/// Access token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT validator
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.jwt_issuer.as_str()]);

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Uuid, PipelineError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| PipelineError::Unauthorized("Couldn't validate JWT".to_string()))?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| PipelineError::Unauthorized("Couldn't validate JWT".to_string()))
    }
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, PipelineError> {
    let missing = || PipelineError::Unauthorized("Couldn't find JWT".to_string());

    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(missing)?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(missing()),
    }
}

/// A record whose owner has been verified against the caller.
///
/// Ownership is established once, here, before any upload work starts.
#[derive(Debug, Clone)]
pub struct AuthorizedVideo {
    video: Video,
    owner: Uuid,
}

impl AuthorizedVideo {
    pub fn id(&self) -> Uuid {
        self.video.id
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    #[cfg(test)]
    pub fn video(&self) -> &Video {
        &self.video
    }
}

pub fn authorize_owner(video: Video, user_id: Uuid) -> Result<AuthorizedVideo, PipelineError> {
    if video.user_id != user_id {
        return Err(PipelineError::Forbidden(
            "User is not owner of video".to_string(),
        ));
    }

    Ok(AuthorizedVideo {
        video,
        owner: user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "tubely-access".to_string(),
        }
    }

    fn token(secret: &str, issuer: &str, sub: &str, ttl_secs: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: issuer.to_string(),
            sub: sub.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn video_owned_by(user_id: Uuid) -> Video {
        Video {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            title: "t".to_string(),
            description: String::new(),
            thumbnail_url: None,
            video_url: None,
            user_id,
        }
    }

    #[test]
    fn test_valid_token() {
        let validator = JwtValidator::new(&auth_config());
        let user_id = Uuid::new_v4();
        let jwt = token("test-secret", "tubely-access", &user_id.to_string(), 3600);

        assert_eq!(validator.validate(&jwt).unwrap(), user_id);
    }

    #[test]
    fn test_rejected_tokens() {
        let validator = JwtValidator::new(&auth_config());
        let user_id = Uuid::new_v4().to_string();

        for jwt in [
            token("wrong-secret", "tubely-access", &user_id, 3600),
            token("test-secret", "someone-else", &user_id, 3600),
            token("test-secret", "tubely-access", &user_id, -3600),
            token("test-secret", "tubely-access", "not-a-uuid", 3600),
            "garbage".to_string(),
        ] {
            let err = validator.validate(&jwt).unwrap_err();
            assert!(matches!(err, PipelineError::Unauthorized(_)));
        }
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn test_authorize_owner() {
        let owner = Uuid::new_v4();
        let authorized = authorize_owner(video_owned_by(owner), owner).unwrap();
        assert_eq!(authorized.owner(), owner);
        assert_eq!(authorized.video().user_id, owner);

        let err = authorize_owner(video_owned_by(owner), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
    }
}
