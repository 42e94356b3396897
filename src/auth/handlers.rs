use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ApiResponse, AuthData, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            RegisterRequest, ResetPasswordRequest, UpdateProfileRequest, UserData,
        },
        extractors::{authorize, AuthUser, RoleGuard},
        jwt::JwtKeys,
        services::AuthService,
    },
    error::AppError,
    extract::ValidJson,
    state::AppState,
};

const RESET_REQUESTED: &str =
    "Si el correo está registrado, recibirás instrucciones para restablecer tu contraseña";

/// A session token whose account no longer exists is treated as an invalid token.
fn account_gone(err: AppError) -> AppError {
    match err {
        AppError::NotFound(_) => {
            AppError::Unauthorized("Usuario no encontrado o token inválido".into())
        }
        other => other,
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/signup", post(register))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

/// Routes that need a valid session token of any role.
pub fn profile_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/profile", get(get_me).put(update_profile))
        .route("/auth/change-password", put(change_password))
        .route_layer(middleware::from_fn_with_state(
            RoleGuard::authenticated(state),
            authorize,
        ))
}

#[instrument(skip_all)]
pub async fn register(
    State(auth): State<AuthService>,
    State(keys): State<JwtKeys>,
    ValidJson(input): ValidJson<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthData>>), AppError> {
    let user = auth.register(input).await?;
    let token = keys.sign_session(&user)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "Usuario registrado correctamente",
            AuthData {
                user: user.into(),
                token,
            },
        )),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(auth): State<AuthService>,
    State(keys): State<JwtKeys>,
    ValidJson(body): ValidJson<LoginRequest>,
) -> Result<Json<ApiResponse<AuthData>>, AppError> {
    let user = auth.login(&body.email, &body.password).await?;
    let token = keys.sign_session(&user)?;

    Ok(Json(ApiResponse::with_message(
        "Inicio de sesión exitoso",
        AuthData {
            user: user.into(),
            token,
        },
    )))
}

/// Always answers with the same status and message, whether or not the account
/// exists and whether or not the notifier succeeds.
#[instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    State(auth): State<AuthService>,
    State(keys): State<JwtKeys>,
    ValidJson(body): ValidJson<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    if let Some(user) = auth.find_for_reset(&body.email).await? {
        let token = keys.sign_reset(&user)?;
        let link = format!(
            "{}/auth/reset-password?token={}",
            state.config.server.frontend_url, token
        );
        match state.notifier.send_password_reset(&user.email, &link).await {
            Ok(()) => info!(user_id = %user.id, "password reset issued"),
            Err(e) => error!(error = %e, user_id = %user.id, "reset notification failed"),
        }
    }

    Ok(Json(ApiResponse::message(RESET_REQUESTED)))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(auth): State<AuthService>,
    State(keys): State<JwtKeys>,
    ValidJson(body): ValidJson<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let claims = keys.verify_reset(&body.token).map_err(|e| {
        warn!(error = %e, "invalid reset token");
        AppError::Unauthorized("Token inválido o expirado".into())
    })?;
    auth.reset_password(&claims, &body.new_password).await?;

    Ok(Json(ApiResponse::message(
        "Contraseña restablecida correctamente",
    )))
}

#[instrument(skip_all, fields(user_id = %claims.id))]
pub async fn get_me(
    State(auth): State<AuthService>,
    AuthUser(claims): AuthUser,
) -> Result<Json<ApiResponse<UserData>>, AppError> {
    let user = auth
        .get_user_by_id(claims.id)
        .await
        .map_err(account_gone)?;
    Ok(Json(ApiResponse::data(UserData { user: user.into() })))
}

#[instrument(skip_all, fields(user_id = %claims.id))]
pub async fn update_profile(
    State(auth): State<AuthService>,
    AuthUser(claims): AuthUser,
    ValidJson(changes): ValidJson<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserData>>, AppError> {
    let user = auth
        .update_profile(claims.id, changes)
        .await
        .map_err(account_gone)?;
    Ok(Json(ApiResponse::with_message(
        "Perfil actualizado correctamente",
        UserData { user: user.into() },
    )))
}

#[instrument(skip_all, fields(user_id = %claims.id))]
pub async fn change_password(
    State(auth): State<AuthService>,
    AuthUser(claims): AuthUser,
    ValidJson(body): ValidJson<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    auth.change_password(claims.id, &body.current_password, &body.new_password)
        .await
        .map_err(account_gone)?;
    Ok(Json(ApiResponse::message(
        "Contraseña actualizada correctamente",
    )))
}
