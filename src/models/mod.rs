use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User account. The `followers`, `following` and `liked_posts` arrays are
/// not stored on the row - the store derives them from the `follows` and
/// `likes` relations when a user document is hydrated for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub bio: String,
    pub link: String,
    #[serde(rename = "profileImg")]
    pub profile_img: String,
    #[serde(rename = "coverImg")]
    pub cover_img: String,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(rename = "likedPosts", default)]
    pub liked_posts: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Compact public identity embedded in posts, comments and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(rename = "profileImg")]
    pub profile_img: String,
}

/// Post row as persisted. Hydrated into a [`PostView`] for the wire.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub img: String,
    pub created_at: DateTime<Utc>,
}

/// Post document with author, like set and comments populated.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: UserSummary,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    pub likes: Vec<String>,
    pub comments: Vec<CommentView>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Comment row. Append-only; no edit or delete.
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: UserSummary,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Follow,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Follow => "follow",
        }
    }
}

/// Notification row. Created only by the like and follow branches of the
/// workflow; marked read in bulk on retrieval, deleted in bulk by recipient.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub notification_type: NotificationType,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Notification with the sender identity joined in at read time.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    #[serde(rename = "_id")]
    pub id: String,
    pub from: UserSummary,
    pub to: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub read: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

// Request/Response types for the API

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "currentPassword")]
    pub current_password: Option<String>,
    #[serde(rename = "newPassword")]
    pub new_password: Option<String>,
    pub bio: Option<String>,
    pub link: Option<String>,
    #[serde(rename = "profileImg")]
    pub profile_img: Option<String>,
    #[serde(rename = "coverImg")]
    pub cover_img: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub img: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}
