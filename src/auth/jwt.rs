use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    /// Issues an access token. Production tokens come from the identity
    /// provider sharing `JWT_SECRET`; this is used by tooling and tests.
    pub fn generate_token(&self, user_id: Uuid, username: &str, role: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            username: username.to_owned(),
            role: role.to_owned(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(audience: &str) -> JwtService {
        JwtService {
            encoding: EncodingKey::from_secret(b"secret"),
            decoding: DecodingKey::from_secret(b"secret"),
            issuer: "memodesk".to_string(),
            audience: audience.to_string(),
            expiry: Duration::minutes(5),
        }
    }

    #[test]
    fn issued_tokens_verify() {
        let jwt = service("memodesk-clients");
        let user_id = Uuid::new_v4();
        let token = jwt.generate_token(user_id, "mrivera", "DIRECTOR").unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "DIRECTOR");
    }

    #[test]
    fn foreign_audience_is_rejected() {
        let token = service("other-clients")
            .generate_token(Uuid::new_v4(), "mrivera", "DIRECTOR")
            .unwrap();
        assert!(service("memodesk-clients").verify_token(&token).is_err());
    }
}
