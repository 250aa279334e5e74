use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tollgate_core::{AppError, AppResult};
use tollgate_domain::AccessTokenClaims;

pub(super) fn sign(claims: &AccessTokenClaims, key: &[u8]) -> AppResult<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(key),
    )
    .map_err(|error| AppError::Internal(format!("failed to sign access token: {error}")))
}

pub(super) fn verify(token: &str, key: &[u8]) -> AppResult<AccessTokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let claims = decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(key), &validation)
        .map(|data| data.claims)
        .map_err(|error| match error.kind() {
            ErrorKind::ExpiredSignature => AppError::TokenExpired,
            _ => AppError::Unauthorized(format!("invalid access token: {error}")),
        })?;

    if !claims.single_use {
        return Err(AppError::Unauthorized(
            "access token is not a single-use token".to_owned(),
        ));
    }

    Ok(claims)
}
