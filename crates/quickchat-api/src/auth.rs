use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use quickchat_db::{ChatError, ChatResult};
use quickchat_types::api::{
    Claims, Envelope, LoginRequest, LoginResponse, ProfileResponse, RegisterRequest,
    RegisterResponse,
};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, run_blocking};

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let full_name = req.full_name.trim().to_string();

    let name_len = username.chars().count();
    if !(3..=32).contains(&name_len) {
        return Err(ChatError::validation("Username must be 3 to 32 characters.").into());
    }
    if req.password.chars().count() < 8 {
        return Err(ChatError::validation("Password must be at least 8 characters.").into());
    }
    if full_name.is_empty() {
        return Err(ChatError::validation("Full name is required.").into());
    }

    let db = state.db.clone();
    let lookup = username.clone();
    let taken = run_blocking(move || Ok(db.get_user_by_username(&lookup)?.is_some())).await?;
    if taken {
        return Err(ApiError::Conflict("Username is already taken.".into()));
    }

    // Argon2id with a per-user salt
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let name = username.clone();
    let bio = req.bio;
    run_blocking(move || -> ChatResult<()> {
        db.create_user(&user_id.to_string(), &name, &password_hash, &full_name, &bio)?;
        Ok(())
    })
    .await?;

    info!("Registered user {} ({})", username, user_id);

    let token = create_token(&state.jwt_secret, user_id, &username)?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(RegisterResponse { user_id, token })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let username = req.username.trim().to_string();
    let user = run_blocking(move || Ok(db.get_user_by_username(&username)?))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash for {} is invalid: {}", user.id, e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;
    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(Envelope::ok(LoginResponse {
        user_id,
        username: user.username,
        token,
    })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let user = run_blocking(move || Ok(db.get_user_by_id(&id)?))
        .await?
        .ok_or(ChatError::NotFound("User"))?;

    Ok(Json(Envelope::ok(ProfileResponse {
        user: user.into_profile(),
    })))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a bearer token. Expired or tampered tokens yield `None`.
pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            warn!("Rejected token: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_with_the_same_secret() {
        let id = Uuid::new_v4();
        let token = create_token("secret-a", id, "alice").unwrap();

        let claims = decode_token("secret-a", &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.username, "alice");

        assert!(decode_token("secret-b", &token).is_none());
        assert!(decode_token("secret-a", "not-a-jwt").is_none());
    }
}
