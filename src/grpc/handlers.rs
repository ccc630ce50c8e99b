use regex::Regex;
use std::{
    sync::{Arc, LazyLock},
    time::Instant,
};
use tonic::{Code, Request, Response, Status};
use tracing::{error, info, warn};

use super::{
    methods,
    pb::{self, auth_service_server::AuthService as AuthServiceRpc},
};
use crate::auth::{
    authorizer::Authorizer, service::AuthService, service::TelegramProfile, token::IssuedToken,
    AuthError, AuthenticatedUser,
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

/// `AuthService` RPC handlers.
///
/// Each handler runs its request through [`Authorizer::authorize`] with its own entry from
/// [`methods`] before anything else. Methods missing from the public and bot lists are
/// classified as user calls, so a new RPC needs a bearer token unless it is listed.
#[derive(Clone)]
pub struct AuthApi {
    authorizer: Arc<Authorizer>,
    auth: Arc<AuthService>,
}

impl AuthApi {
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>, auth: Arc<AuthService>) -> Self {
        Self { authorizer, auth }
    }

    async fn register_call(
        &self,
        request: Request<pb::RegisterRequest>,
    ) -> Result<pb::AuthResponse, AuthError> {
        let request = self
            .authorizer
            .authorize(methods::REGISTER, request)
            .await?
            .into_inner();
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;

        let token = self.auth.register(&email, &request.password).await?;
        Ok(auth_response(token))
    }

    async fn login_call(
        &self,
        request: Request<pb::LoginRequest>,
    ) -> Result<pb::AuthResponse, AuthError> {
        let request = self
            .authorizer
            .authorize(methods::LOGIN, request)
            .await?
            .into_inner();
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;

        let token = self.auth.login(&email, &request.password).await?;
        Ok(auth_response(token))
    }

    async fn create_telegram_link_code_call(
        &self,
        request: Request<pb::CreateTelegramLinkCodeRequest>,
    ) -> Result<pb::CreateTelegramLinkCodeResponse, AuthError> {
        let request = self
            .authorizer
            .authorize(methods::CREATE_TELEGRAM_LINK_CODE, request)
            .await?;
        let user = request
            .extensions()
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or(AuthError::Unauthenticated("missing user context"))?;

        let link_code = self.auth.create_telegram_link_code(user.user_id()).await?;
        Ok(pb::CreateTelegramLinkCodeResponse {
            code: link_code.code,
            expires_in_sec: link_code.expires_in,
        })
    }

    async fn link_telegram_call(
        &self,
        request: Request<pb::LinkTelegramRequest>,
    ) -> Result<pb::LinkTelegramResponse, AuthError> {
        let request = self
            .authorizer
            .authorize(methods::LINK_TELEGRAM, request)
            .await?
            .into_inner();

        let code = request.code.trim();
        if code.is_empty() {
            return Err(AuthError::InvalidArgument("code is required".to_string()));
        }
        let profile = telegram_profile(
            request.telegram_user_id,
            request.chat_id,
            &request.username,
            &request.first_name,
            &request.last_name,
        )?;

        self.auth.link_telegram(code, &profile).await?;
        Ok(pb::LinkTelegramResponse { ok: true })
    }

    async fn telegram_auth_call(
        &self,
        request: Request<pb::TelegramLoginRequest>,
    ) -> Result<pb::AuthResponse, AuthError> {
        let request = self
            .authorizer
            .authorize(methods::TELEGRAM_AUTH, request)
            .await?
            .into_inner();
        let profile = telegram_profile(
            request.telegram_user_id,
            request.chat_id,
            &request.username,
            &request.first_name,
            &request.last_name,
        )?;

        let token = self.auth.telegram_auth(&profile).await?;
        Ok(auth_response(token))
    }
}

#[tonic::async_trait]
impl AuthServiceRpc for AuthApi {
    async fn register(
        &self,
        request: Request<pb::RegisterRequest>,
    ) -> Result<Response<pb::AuthResponse>, Status> {
        let started = Instant::now();
        respond(methods::REGISTER, started, self.register_call(request).await)
    }

    async fn login(
        &self,
        request: Request<pb::LoginRequest>,
    ) -> Result<Response<pb::AuthResponse>, Status> {
        let started = Instant::now();
        respond(methods::LOGIN, started, self.login_call(request).await)
    }

    async fn create_telegram_link_code(
        &self,
        request: Request<pb::CreateTelegramLinkCodeRequest>,
    ) -> Result<Response<pb::CreateTelegramLinkCodeResponse>, Status> {
        let started = Instant::now();
        respond(
            methods::CREATE_TELEGRAM_LINK_CODE,
            started,
            self.create_telegram_link_code_call(request).await,
        )
    }

    async fn link_telegram(
        &self,
        request: Request<pb::LinkTelegramRequest>,
    ) -> Result<Response<pb::LinkTelegramResponse>, Status> {
        let started = Instant::now();
        respond(
            methods::LINK_TELEGRAM,
            started,
            self.link_telegram_call(request).await,
        )
    }

    async fn telegram_auth(
        &self,
        request: Request<pb::TelegramLoginRequest>,
    ) -> Result<Response<pb::AuthResponse>, Status> {
        let started = Instant::now();
        respond(
            methods::TELEGRAM_AUTH,
            started,
            self.telegram_auth_call(request).await,
        )
    }
}

fn auth_response(token: IssuedToken) -> pb::AuthResponse {
    pb::AuthResponse {
        access_token: token.token,
        expires_in_sec: token.expires_in,
    }
}

/// Codes caused by the caller rather than by the service.
const fn is_client_code(code: Code) -> bool {
    matches!(
        code,
        Code::InvalidArgument
            | Code::NotFound
            | Code::Unauthenticated
            | Code::PermissionDenied
            | Code::AlreadyExists
            | Code::FailedPrecondition
    )
}

fn respond<T>(
    method: &'static str,
    started: Instant,
    result: Result<T, AuthError>,
) -> Result<Response<T>, Status> {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(message) => {
            info!(method, grpc_code = ?Code::Ok, elapsed_ms, "grpc request handled");
            Ok(Response::new(message))
        }
        Err(err) => {
            let code = err.code();
            if is_client_code(code) {
                warn!(method, grpc_code = ?code, elapsed_ms, error = %err, "grpc request handled");
            } else {
                error!(method, grpc_code = ?code, elapsed_ms, error = %err, "grpc request handled");
            }
            Err(err.into())
        }
    }
}

/// Trim and lowercase an email, rejecting anything that is not `local@domain.tld`.
///
/// # Errors
/// [`AuthError::InvalidArgument`] when the email is empty or malformed.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AuthError::InvalidArgument("email is required".to_string()));
    }

    let pattern = EMAIL_RE
        .as_ref()
        .map_err(|e| AuthError::Internal(format!("email pattern: {e}")))?;
    if !pattern.is_match(&email) {
        return Err(AuthError::InvalidArgument("email is invalid".to_string()));
    }
    Ok(email)
}

/// # Errors
/// [`AuthError::InvalidArgument`] when the password is outside 8..=128 characters.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidArgument(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AuthError::InvalidArgument("password too long".to_string()));
    }
    Ok(())
}

fn telegram_profile(
    telegram_user_id: i64,
    chat_id: i64,
    username: &str,
    first_name: &str,
    last_name: &str,
) -> Result<TelegramProfile, AuthError> {
    if telegram_user_id <= 0 {
        return Err(AuthError::InvalidArgument(
            "telegram_user_id must be positive".to_string(),
        ));
    }
    if chat_id <= 0 {
        return Err(AuthError::InvalidArgument(
            "chat_id must be positive".to_string(),
        ));
    }
    Ok(TelegramProfile::new(
        telegram_user_id,
        chat_id,
        username,
        first_name,
        last_name,
    ))
}
