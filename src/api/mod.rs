use actix_web::{web, HttpResponse, Responder, ResponseError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::{AuthService, AuthUser};
use crate::models::*;
use crate::store::{Store, StoreError};
use crate::workflow::{FollowOutcome, RelationshipWorkflow, WorkflowError};

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub workflow: Arc<RelationshipWorkflow>,
}

/// Error taxonomy for the HTTP surface. Every handler fails fast with one
/// of these; the body is always `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Database(e) => ApiError::Internal(format!("Database error: {}", e)),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::SelfReference => ApiError::Validation(e.to_string()),
            WorkflowError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            WorkflowError::Validation(msg) => ApiError::Validation(msg),
            WorkflowError::Store(StoreError::Conflict(msg)) => ApiError::Conflict(msg),
            WorkflowError::Store(e) => ApiError::Internal(format!("Store error: {}", e)),
        }
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(_: bcrypt::BcryptError) -> Self {
        ApiError::Internal("Failed to hash password".to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        ApiError::Internal("Failed to generate token".to_string())
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Auth Endpoints ====================

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

pub async fn signup(state: web::Data<AppState>, body: web::Json<SignupRequest>) -> ApiResult {
    if body.full_name.is_empty()
        || body.username.is_empty()
        || body.email.is_empty()
        || body.password.is_empty()
    {
        return Err(ApiError::Validation("All fields are required".to_string()));
    }
    if !is_valid_email(&body.email) {
        return Err(ApiError::Validation("Invalid email format".to_string()));
    }
    if body.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }
    if state.store.username_taken(&body.username)? {
        return Err(ApiError::Conflict(
            "Username exists, please choose another".to_string(),
        ));
    }
    if state.store.email_taken(&body.email)? {
        return Err(ApiError::Conflict(
            "Email exists, please log in".to_string(),
        ));
    }

    let password_hash = state.auth_service.hash_password(&body.password)?;

    let mut user = User {
        id: String::new(),
        username: body.username.clone(),
        email: body.email.clone(),
        password_hash,
        full_name: body.full_name.clone(),
        bio: String::new(),
        link: String::new(),
        profile_img: String::new(),
        cover_img: String::new(),
        followers: Vec::new(),
        following: Vec::new(),
        liked_posts: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.store.create_user(&mut user)?;

    let token = state.auth_service.generate_token(&user.id)?;
    Ok(HttpResponse::Created().json(AuthResponse { token, user }))
}

pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> ApiResult {
    let user = match state.store.get_user_by_username(&body.username) {
        Ok(u) => u,
        Err(StoreError::NotFound(_)) => {
            return Err(ApiError::Authentication("Wrong username".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let valid = state
        .auth_service
        .verify_password(&body.password, &user.password_hash)
        .unwrap_or(false);
    if !valid {
        return Err(ApiError::Authentication("Wrong password".to_string()));
    }

    let token = state.auth_service.generate_token(&user.id)?;
    Ok(HttpResponse::Ok().json(AuthResponse { token, user }))
}

/// Tokens are self-contained, so logout is an acknowledgement only.
pub async fn logout() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "message": "Logged out successfully." }))
}

pub async fn get_me(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let user = state.store.get_user(&auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(user))
}

// ==================== User Endpoints ====================

pub async fn get_user_profile(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let username = path.into_inner();
    let user = state
        .store
        .get_user_by_username(&username)
        .map_err(|e| match e {
            StoreError::NotFound(_) => {
                ApiError::NotFound("No user found with the specified username".to_string())
            }
            other => other.into(),
        })?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn get_suggested_users(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let users = state.store.suggested_users(&auth_user.user_id, 4)?;
    Ok(HttpResponse::Ok().json(users))
}

pub async fn follow_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let target_id = path.into_inner();
    let outcome = state
        .workflow
        .follow_or_unfollow(&auth_user.user_id, &target_id)?;

    let (message, following) = match outcome {
        FollowOutcome::Followed => ("User followed successfully", true),
        FollowOutcome::Unfollowed => ("User unfollowed successfully", false),
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": message,
        "following": following
    })))
}

pub async fn update_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<UpdateUserRequest>,
) -> ApiResult {
    let mut user = state.store.get_user(&auth_user.user_id)?;

    // Password change requires both fields
    match (&body.current_password, &body.new_password) {
        (Some(_), None) | (None, Some(_)) => {
            return Err(ApiError::Validation(
                "Both current and new passwords are required to change your password".to_string(),
            ));
        }
        (Some(current), Some(new)) => {
            let matches = state
                .auth_service
                .verify_password(current, &user.password_hash)
                .unwrap_or(false);
            if !matches {
                return Err(ApiError::Validation(
                    "The current password provided is incorrect".to_string(),
                ));
            }
            if new.len() < 6 {
                return Err(ApiError::Validation(
                    "New password must be at least 6 characters long".to_string(),
                ));
            }
            user.password_hash = state.auth_service.hash_password(new)?;
        }
        (None, None) => {}
    }

    if let Some(ref v) = body.full_name {
        user.full_name = v.clone();
    }
    if let Some(ref v) = body.email {
        user.email = v.clone();
    }
    if let Some(ref v) = body.username {
        user.username = v.clone();
    }
    if let Some(ref v) = body.bio {
        user.bio = v.clone();
    }
    if let Some(ref v) = body.link {
        user.link = v.clone();
    }
    // Image fields arrive as already-hosted URLs; storage is external
    if let Some(ref v) = body.profile_img {
        user.profile_img = v.clone();
    }
    if let Some(ref v) = body.cover_img {
        user.cover_img = v.clone();
    }

    state.store.update_user(&mut user)?;
    Ok(HttpResponse::Ok().json(user))
}

// ==================== Post Endpoints ====================

pub async fn create_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreatePostRequest>,
) -> ApiResult {
    let text = body.text.clone().unwrap_or_default();
    let img = body.img.clone().unwrap_or_default();
    if text.is_empty() && img.is_empty() {
        return Err(ApiError::Validation(
            "Text or image is required".to_string(),
        ));
    }

    let mut post = Post {
        id: String::new(),
        user_id: auth_user.user_id.clone(),
        text,
        img,
        created_at: Utc::now(),
    };
    state.store.create_post(&mut post)?;

    let view = state.store.hydrate_post(&post)?;
    Ok(HttpResponse::Created().json(view))
}

pub async fn delete_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let id = path.into_inner();
    let post = state.store.get_post(&id).map_err(|e| match e {
        StoreError::NotFound(_) => ApiError::NotFound("Post not found".to_string()),
        other => other.into(),
    })?;

    if post.user_id != auth_user.user_id {
        return Err(ApiError::Forbidden("Unauthorized action".to_string()));
    }

    state.store.delete_post(&id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Post deleted successfully" })))
}

pub async fn like_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let post_id = path.into_inner();
    let outcome = state
        .workflow
        .like_or_unlike(&auth_user.user_id, &post_id)?;

    let message = if outcome.liked {
        "Post liked successfully"
    } else {
        "Post unliked successfully"
    };
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": message,
        "liked": outcome.liked,
        "likes": outcome.likes
    })))
}

pub async fn comment_on_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<CommentRequest>,
) -> ApiResult {
    let post_id = path.into_inner();
    let view = state
        .workflow
        .add_comment(&auth_user.user_id, &post_id, &body.text)?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn get_all_posts(state: web::Data<AppState>, _auth_user: AuthUser) -> ApiResult {
    let posts = state.store.list_posts()?;
    let views = state.store.hydrate_posts(posts)?;
    Ok(HttpResponse::Ok().json(views))
}

pub async fn get_following_posts(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let posts = state.store.list_following_posts(&auth_user.user_id)?;
    let views = state.store.hydrate_posts(posts)?;
    Ok(HttpResponse::Ok().json(views))
}

pub async fn get_liked_posts(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let user_id = path.into_inner();
    // 404 when the user itself is unknown
    state.store.user_summary(&user_id).map_err(|e| match e {
        StoreError::NotFound(_) => ApiError::NotFound("User not found".to_string()),
        other => other.into(),
    })?;

    let posts = state.store.list_liked_posts(&user_id)?;
    let views = state.store.hydrate_posts(posts)?;
    Ok(HttpResponse::Ok().json(views))
}

pub async fn get_user_posts(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    let username = path.into_inner();
    let user = state
        .store
        .get_user_by_username(&username)
        .map_err(|e| match e {
            StoreError::NotFound(_) => ApiError::NotFound("User not found".to_string()),
            other => other.into(),
        })?;

    let posts = state.store.list_posts_by_user(&user.id)?;
    let views = state.store.hydrate_posts(posts)?;
    Ok(HttpResponse::Ok().json(views))
}

// ==================== Notification Endpoints ====================

pub async fn get_notifications(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let notifications = state.workflow.list_notifications(&auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(notifications))
}

pub async fn delete_notifications(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult {
    let deleted = state.workflow.clear_notifications(&auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("{} notification(s) deleted successfully", deleted),
        "deletedCount": deleted
    })))
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))
        // Auth routes
        .route("/api/auth/signup", web::post().to(signup))
        .route("/api/auth/login", web::post().to(login))
        .route("/api/auth/logout", web::post().to(logout))
        .route("/api/auth/me", web::get().to(get_me))
        // Users
        .route("/api/users/profile/{username}", web::get().to(get_user_profile))
        .route("/api/users/suggested", web::get().to(get_suggested_users))
        .route("/api/users/follow/{id}", web::post().to(follow_user))
        .route("/api/users/update", web::post().to(update_user))
        // Posts
        .route("/api/posts/all", web::get().to(get_all_posts))
        .route("/api/posts/following", web::get().to(get_following_posts))
        .route("/api/posts/likes/{id}", web::get().to(get_liked_posts))
        .route("/api/posts/user/{username}", web::get().to(get_user_posts))
        .route("/api/posts/create", web::post().to(create_post))
        .route("/api/posts/like/{id}", web::post().to(like_post))
        .route("/api/posts/comment/{id}", web::post().to(comment_on_post))
        .route("/api/posts/{id}", web::delete().to(delete_post))
        // Notifications
        .route("/api/notifications", web::get().to(get_notifications))
        .route("/api/notifications", web::delete().to(delete_notifications));
}
