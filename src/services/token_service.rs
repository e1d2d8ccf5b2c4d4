//! Access/refresh token issuing, verification and rotation.
//!
//! Tokens are HS256 JWTs over a closed claims struct. Every login mints a
//! token *family*: the access/refresh pair and every pair produced by
//! rotating the refresh token share one family id, so a detected compromise
//! can kill all of them at once.

use crate::config::SecurityConfig;
use crate::error::AppError;
use crate::models::{Claims, Role, TokenType, User};
use crate::stores::RevocationStore;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, warn};
use uuid::Uuid;

pub const JWT_ISSUER: &str = "gateway";

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    revocation: RevocationStore,
}

impl TokenService {
    pub fn new(config: &SecurityConfig, revocation: RevocationStore) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_lifetime: Duration::minutes(config.access_token_minutes),
            refresh_lifetime: Duration::days(config.refresh_token_days),
            revocation,
        }
    }

    /// Mint a fresh access/refresh pair for a newly authenticated user. Both
    /// tokens share a new family id; the returned family doubles as the
    /// session identifier for CSRF binding.
    pub fn issue_pair(&self, user: &User) -> Result<(String, String, String), AppError> {
        let family = Uuid::new_v4().to_string();
        let access = self.mint(user.id.to_string(), &user.username, &user.roles, TokenType::Access, &family)?;
        let refresh = self.mint(user.id.to_string(), &user.username, &user.roles, TokenType::Refresh, &family)?;
        Ok((access, refresh, family))
    }

    fn mint(
        &self,
        subject: String,
        username: &str,
        roles: &[Role],
        token_type: TokenType,
        family: &str,
    ) -> Result<String, AppError> {
        if roles.is_empty() {
            return Err(AppError::Internal(
                "Refusing to mint a token with no roles".to_string(),
            ));
        }

        let lifetime = match token_type {
            TokenType::Access => self.access_lifetime,
            TokenType::Refresh => self.refresh_lifetime,
        };

        let iat = Utc::now();
        let exp = iat
            .checked_add_signed(lifetime)
            .ok_or_else(|| AppError::Internal("Token expiry overflow".to_string()))?;

        let claims = Claims {
            sub: subject,
            username: username.to_string(),
            roles: roles.to_vec(),
            jti: Uuid::new_v4().to_string(),
            fam: family.to_string(),
            token_type,
            exp: exp.timestamp() as usize,
            iat: iat.timestamp() as usize,
            iss: JWT_ISSUER.to_string(),
        };

        debug!(
            "Minting {:?} token for {} (jti: {}, exp: {})",
            token_type, claims.username, claims.jti, exp
        );

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Decode and validate everything local to the token: signature (HS256
    /// pinned, anything else rejected), issuer, expiry, type, non-empty
    /// roles. Does not consult the revocation store.
    fn decode_and_validate(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[JWT_ISSUER]);

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
                    kind => AppError::TokenMalformed(format!("{:?}", kind)),
                }
            })?;

        let claims = token_data.claims;

        if claims.token_type != expected {
            return Err(AppError::TokenWrongType);
        }
        if claims.roles.is_empty() {
            return Err(AppError::TokenMalformed("token carries no roles".to_string()));
        }
        if claims.exp <= claims.iat {
            return Err(AppError::TokenMalformed("exp precedes iat".to_string()));
        }

        Ok(claims)
    }

    /// Full verification: structure, signature, expiry, type, then the
    /// revocation store. If the store cannot answer, the token is treated as
    /// revoked — an unverifiable token is never trusted.
    pub async fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let claims = self.decode_and_validate(token, expected)?;

        match self.revocation.is_revoked(&claims.jti, &claims.fam).await {
            Ok(false) => Ok(claims),
            Ok(true) => Err(AppError::TokenRevoked),
            Err(e) => {
                warn!(
                    "Revocation store unavailable ({}); failing closed for jti {}",
                    e, claims.jti
                );
                Err(AppError::TokenRevoked)
            }
        }
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair
    /// is minted in the same family.
    ///
    /// A refresh token whose jti is already revoked while its family is still
    /// live is a replay of a rotated token — presumptive theft. The whole
    /// family is revoked and the caller gets `TokenReused`; the returned old
    /// claims never leave this module in that case.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, String, Claims), AppError> {
        let claims = self.decode_and_validate(refresh_token, TokenType::Refresh)?;

        let refresh_exp = DateTime::from_timestamp(claims.exp as i64, 0)
            .ok_or_else(|| AppError::TokenMalformed("invalid exp timestamp".to_string()))?;

        // Family revoked (logout, prior replay) is ordinary revocation, not
        // replay. Store failures fail closed in both lookups.
        match self.revocation.is_family_revoked(&claims.fam).await {
            Ok(false) => {}
            Ok(true) => return Err(AppError::TokenRevoked),
            Err(_) => return Err(AppError::TokenRevoked),
        }

        match self.revocation.is_jti_revoked(&claims.jti).await {
            Ok(false) => {}
            Ok(true) => {
                // Replay of a rotated single-use token: kill the family. The
                // entry must outlive every member, including descendants
                // minted after the replayed token, so it gets a full refresh
                // lifetime rather than the presented token's own expiry.
                warn!(
                    "Refresh token replay detected for family {} (jti: {})",
                    claims.fam, claims.jti
                );
                let family_exp = Utc::now()
                    .checked_add_signed(self.refresh_lifetime)
                    .ok_or_else(|| AppError::Internal("Expiry overflow".to_string()))?;
                self.revocation
                    .revoke_family(&claims.fam, family_exp)
                    .await?;
                return Err(AppError::TokenReused);
            }
            Err(_) => return Err(AppError::TokenRevoked),
        }

        // Rotation: the presented token becomes single-use history.
        self.revocation.revoke_jti(&claims.jti, refresh_exp).await?;

        let access = self.mint(
            claims.sub.clone(),
            &claims.username,
            &claims.roles,
            TokenType::Access,
            &claims.fam,
        )?;
        let refresh = self.mint(
            claims.sub.clone(),
            &claims.username,
            &claims.roles,
            TokenType::Refresh,
            &claims.fam,
        )?;

        Ok((access, refresh, claims))
    }

    /// Insert a revocation entry for one token until its natural expiry.
    pub async fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        self.revocation.revoke_jti(jti, expires_at).await
    }

    /// Logout: revoke the presented access token and its whole family, which
    /// covers the paired refresh token without the client sending it. The
    /// family entry lives for a full refresh lifetime, the longest any member
    /// could still be valid.
    pub async fn revoke_session(&self, claims: &Claims) -> Result<(), AppError> {
        let access_exp = DateTime::from_timestamp(claims.exp as i64, 0)
            .ok_or_else(|| AppError::TokenMalformed("invalid exp timestamp".to_string()))?;
        self.revocation.revoke_jti(&claims.jti, access_exp).await?;

        let family_exp = Utc::now()
            .checked_add_signed(self.refresh_lifetime)
            .ok_or_else(|| AppError::Internal("Expiry overflow".to_string()))?;
        self.revocation.revoke_family(&claims.fam, family_exp).await
    }
}
