use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store.
///
/// Follow and like relationships are stored as single authoritative rows
/// (`follows`, `likes`); the two-sided arrays on the wire documents are
/// derived by query, so the reciprocal-edge invariants cannot be violated by
/// a partial write. Mutations that span two tables (relation row plus
/// notification) run inside one transaction.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                full_name TEXT DEFAULT '',
                bio TEXT DEFAULT '',
                link TEXT DEFAULT '',
                profile_img TEXT DEFAULT '',
                cover_img TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                text TEXT DEFAULT '',
                img TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower_id TEXT NOT NULL,
                followee_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (follower_id, followee_id),
                FOREIGN KEY (follower_id) REFERENCES users(id),
                FOREIGN KEY (followee_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS likes (
                user_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, post_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (post_id) REFERENCES posts(id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                from_user_id TEXT NOT NULL,
                to_user_id TEXT NOT NULL,
                type TEXT NOT NULL,
                read INTEGER DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (from_user_id) REFERENCES users(id),
                FOREIGN KEY (to_user_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_posts_user_id ON posts(user_id);
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id);
            CREATE INDEX IF NOT EXISTS idx_likes_post_id ON likes(post_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_to ON notifications(to_user_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        conn.execute(
            r#"INSERT INTO users (id, username, email, password_hash, full_name, bio,
                link, profile_img, cover_img, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                &user.full_name,
                &user.bio,
                &user.link,
                &user.profile_img,
                &user.cover_img,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_unique_violation("username or email already in use"))?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let user = {
            let conn = self.conn.lock().unwrap();
            conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], |row| {
                row_to_user(row)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("User {}", id))
                }
                _ => StoreError::Database(e),
            })?
        };
        self.hydrate_user(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let user = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT * FROM users WHERE username = ?1",
                params![username],
                |row| row_to_user(row),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("User {}", username))
                }
                _ => StoreError::Database(e),
            })?
        };
        self.hydrate_user(user)
    }

    pub fn username_taken(&self, username: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn email_taken(&self, email: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn update_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        user.updated_at = Utc::now();

        let rows = conn
            .execute(
                r#"UPDATE users SET username = ?1, email = ?2, password_hash = ?3,
                   full_name = ?4, bio = ?5, link = ?6, profile_img = ?7, cover_img = ?8,
                   updated_at = ?9 WHERE id = ?10"#,
                params![
                    &user.username,
                    &user.email,
                    &user.password_hash,
                    &user.full_name,
                    &user.bio,
                    &user.link,
                    &user.profile_img,
                    &user.cover_img,
                    user.updated_at.to_rfc3339(),
                    &user.id,
                ],
            )
            .map_err(map_unique_violation("username or email already in use"))?;

        if rows == 0 {
            return Err(StoreError::NotFound(format!("User {}", user.id)));
        }
        Ok(())
    }

    /// Random sample of users the given user does not yet follow. The
    /// exclusion happens in the query, so the sample is never under-filled
    /// by in-process filtering.
    pub fn suggested_users(&self, user_id: &str, limit: i64) -> StoreResult<Vec<User>> {
        let users = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                r#"SELECT * FROM users
                   WHERE id != ?1
                     AND id NOT IN (SELECT followee_id FROM follows WHERE follower_id = ?1)
                   ORDER BY RANDOM() LIMIT ?2"#,
            )?;
            let rows = stmt.query_map(params![user_id, limit], |row| row_to_user(row))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        users
            .into_iter()
            .map(|u| self.hydrate_user(u))
            .collect()
    }

    /// Fill the derived relationship arrays on a user document.
    fn hydrate_user(&self, mut user: User) -> StoreResult<User> {
        user.followers = self.followers_of(&user.id)?;
        user.following = self.following_of(&user.id)?;
        user.liked_posts = self.liked_post_ids(&user.id)?;
        Ok(user)
    }

    pub fn user_summary(&self, id: &str) -> StoreResult<UserSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, username, full_name, profile_img FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    full_name: row.get(2)?,
                    profile_img: row.get(3)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", id)),
            _ => StoreError::Database(e),
        })
    }

    // ==================== Follow Operations ====================

    pub fn is_following(&self, follower_id: &str, followee_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert the follow edge and the `follow` notification atomically.
    pub fn follow(&self, follower_id: &str, followee_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
            params![follower_id, followee_id, Utc::now().to_rfc3339()],
        )
        .map_err(map_unique_violation("already following"))?;

        insert_notification(&tx, follower_id, followee_id, NotificationType::Follow)?;

        tx.commit()?;
        Ok(())
    }

    pub fn unfollow(&self, follower_id: &str, followee_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
        )?;
        Ok(())
    }

    pub fn followers_of(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY rowid ASC",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn following_of(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY rowid ASC",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ==================== Like Operations ====================

    pub fn has_liked(&self, user_id: &str, post_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert the like row and the `like` notification to the post author
    /// atomically.
    pub fn like(&self, user_id: &str, post_id: &str, author_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO likes (user_id, post_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, post_id, Utc::now().to_rfc3339()],
        )
        .map_err(map_unique_violation("already liked"))?;

        insert_notification(&tx, user_id, author_id, NotificationType::Like)?;

        tx.commit()?;
        Ok(())
    }

    pub fn unlike(&self, user_id: &str, post_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
        )?;
        Ok(())
    }

    pub fn likers_of(&self, post_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT user_id FROM likes WHERE post_id = ?1 ORDER BY rowid ASC")?;
        let ids = stmt
            .query_map(params![post_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn like_count(&self, post_id: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE post_id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn liked_post_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT post_id FROM likes WHERE user_id = ?1 ORDER BY rowid ASC")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ==================== Post Operations ====================

    pub fn create_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        post.id = Uuid::new_v4().to_string();
        post.created_at = Utc::now();

        conn.execute(
            "INSERT INTO posts (id, user_id, text, img, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &post.id,
                &post.user_id,
                &post.text,
                &post.img,
                post.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM posts WHERE id = ?1", params![id], |row| {
            row_to_post(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", id)),
            _ => StoreError::Database(e),
        })
    }

    /// Delete a post together with its comments and like rows.
    pub fn delete_post(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM comments WHERE post_id = ?1", params![id])?;
        tx.execute("DELETE FROM likes WHERE post_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;

        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", id)));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_posts(&self) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM posts ORDER BY created_at DESC, rowid DESC")?;
        let posts = stmt
            .query_map([], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    pub fn list_posts_by_user(&self, user_id: &str) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM posts WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let posts = stmt
            .query_map(params![user_id], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Posts the given user has liked, newest first.
    pub fn list_liked_posts(&self, user_id: &str) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT p.* FROM posts p
               JOIN likes l ON l.post_id = p.id
               WHERE l.user_id = ?1
               ORDER BY p.created_at DESC, p.rowid DESC"#,
        )?;
        let posts = stmt
            .query_map(params![user_id], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Posts authored by users the given user follows, newest first.
    pub fn list_following_posts(&self, user_id: &str) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT p.* FROM posts p
               JOIN follows f ON f.followee_id = p.user_id
               WHERE f.follower_id = ?1
               ORDER BY p.created_at DESC, p.rowid DESC"#,
        )?;
        let posts = stmt
            .query_map(params![user_id], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    // ==================== Comment Operations ====================

    pub fn add_comment(&self, comment: &mut Comment) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        comment.id = Uuid::new_v4().to_string();
        comment.created_at = Utc::now();

        conn.execute(
            r#"INSERT INTO comments (id, post_id, user_id, text, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                &comment.id,
                &comment.post_id,
                &comment.user_id,
                &comment.text,
                comment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Comments for a post in append order.
    pub fn comments_for_post(&self, post_id: &str) -> StoreResult<Vec<Comment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM comments WHERE post_id = ?1 ORDER BY rowid ASC")?;
        let comments = stmt
            .query_map(params![post_id], |row| {
                Ok(Comment {
                    id: row.get("id")?,
                    post_id: row.get("post_id")?,
                    user_id: row.get("user_id")?,
                    text: row.get("text")?,
                    created_at: parse_datetime(row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    // ==================== Notification Operations ====================

    /// Notifications addressed to a user, insertion order, read-only.
    pub fn notifications_to(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM notifications WHERE to_user_id = ?1 ORDER BY rowid ASC")?;
        let notifications = stmt
            .query_map(params![user_id], |row| row_to_notification(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Fetch all notifications addressed to a user and mark the unread ones
    /// read, in one transaction. The returned rows carry the read flags as
    /// they stood before the update.
    pub fn notifications_to_marking_read(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let notifications = {
            let mut stmt = tx
                .prepare("SELECT * FROM notifications WHERE to_user_id = ?1 ORDER BY rowid ASC")?;
            let rows = stmt
                .query_map(params![user_id], |row| row_to_notification(row))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.execute(
            "UPDATE notifications SET read = 1 WHERE to_user_id = ?1 AND read = 0",
            params![user_id],
        )?;

        tx.commit()?;
        Ok(notifications)
    }

    /// Delete every notification addressed to the user; returns the count.
    pub fn clear_notifications(&self, user_id: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM notifications WHERE to_user_id = ?1",
            params![user_id],
        )?;
        Ok(rows)
    }

    // ==================== Hydration ====================

    /// Populate author, like set and comments for a post document.
    pub fn hydrate_post(&self, post: &Post) -> StoreResult<PostView> {
        let user = self.user_summary(&post.user_id)?;
        let likes = self.likers_of(&post.id)?;
        let comments = self
            .comments_for_post(&post.id)?
            .into_iter()
            .map(|c| {
                let author = self.user_summary(&c.user_id)?;
                Ok(CommentView {
                    id: c.id,
                    user: author,
                    text: c.text,
                    created_at: c.created_at,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(PostView {
            id: post.id.clone(),
            user,
            text: post.text.clone(),
            img: if post.img.is_empty() {
                None
            } else {
                Some(post.img.clone())
            },
            likes,
            comments,
            created_at: post.created_at,
        })
    }

    pub fn hydrate_posts(&self, posts: Vec<Post>) -> StoreResult<Vec<PostView>> {
        posts.iter().map(|p| self.hydrate_post(p)).collect()
    }
}

fn insert_notification(
    tx: &Transaction,
    from_user_id: &str,
    to_user_id: &str,
    notification_type: NotificationType,
) -> StoreResult<()> {
    tx.execute(
        r#"INSERT INTO notifications (id, from_user_id, to_user_id, type, read, created_at)
           VALUES (?1, ?2, ?3, ?4, 0, ?5)"#,
        params![
            Uuid::new_v4().to_string(),
            from_user_id,
            to_user_id,
            notification_type.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        full_name: row.get("full_name")?,
        bio: row.get("bio")?,
        link: row.get("link")?,
        profile_img: row.get("profile_img")?,
        cover_img: row.get("cover_img")?,
        followers: Vec::new(),
        following: Vec::new(),
        liked_posts: Vec::new(),
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        text: row.get("text")?,
        img: row.get("img")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    let type_str: String = row.get("type")?;
    Ok(Notification {
        id: row.get("id")?,
        from_user_id: row.get("from_user_id")?,
        to_user_id: row.get("to_user_id")?,
        notification_type: match type_str.as_str() {
            "follow" => NotificationType::Follow,
            _ => NotificationType::Like,
        },
        read: row.get("read")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn map_unique_violation(msg: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(msg.to_string())
        }
        _ => StoreError::Database(e),
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(username: &str) -> User {
        User {
            id: String::new(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: "hash".to_string(),
            full_name: username.to_string(),
            bio: String::new(),
            link: String::new(),
            profile_img: String::new(),
            cover_img: String::new(),
            followers: Vec::new(),
            following: Vec::new(),
            liked_posts: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_and_get_user() {
        let store = Store::in_memory().unwrap();
        let mut user = test_user("alice");

        store.create_user(&mut user).unwrap();
        assert!(!user.id.is_empty());

        let retrieved = store.get_user(&user.id).unwrap();
        assert_eq!(retrieved.username, "alice");
        assert!(retrieved.followers.is_empty());
    }

    #[test]
    fn test_duplicate_username_is_conflict() {
        let store = Store::in_memory().unwrap();
        let mut user = test_user("alice");
        store.create_user(&mut user).unwrap();

        let mut dup = test_user("alice");
        dup.email = "other@example.com".to_string();
        match store.create_user(&mut dup) {
            Err(StoreError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_follow_derives_both_sides() {
        let store = Store::in_memory().unwrap();
        let mut alice = test_user("alice");
        let mut bob = test_user("bob");
        store.create_user(&mut alice).unwrap();
        store.create_user(&mut bob).unwrap();

        store.follow(&alice.id, &bob.id).unwrap();

        assert_eq!(store.following_of(&alice.id).unwrap(), vec![bob.id.clone()]);
        assert_eq!(store.followers_of(&bob.id).unwrap(), vec![alice.id.clone()]);

        // edge and notification landed in the same transaction
        let notifs = store.notifications_to(&bob.id).unwrap();
        assert_eq!(notifs.len(), 1);
        assert_eq!(notifs[0].notification_type, NotificationType::Follow);

        store.unfollow(&alice.id, &bob.id).unwrap();
        assert!(store.following_of(&alice.id).unwrap().is_empty());
        assert!(store.followers_of(&bob.id).unwrap().is_empty());
    }

    #[test]
    fn test_like_derives_both_sides() {
        let store = Store::in_memory().unwrap();
        let mut alice = test_user("alice");
        let mut bob = test_user("bob");
        store.create_user(&mut alice).unwrap();
        store.create_user(&mut bob).unwrap();

        let mut post = Post {
            id: String::new(),
            user_id: bob.id.clone(),
            text: "hello".to_string(),
            img: String::new(),
            created_at: Utc::now(),
        };
        store.create_post(&mut post).unwrap();

        store.like(&alice.id, &post.id, &bob.id).unwrap();
        assert_eq!(store.likers_of(&post.id).unwrap(), vec![alice.id.clone()]);
        assert_eq!(store.liked_post_ids(&alice.id).unwrap(), vec![post.id.clone()]);
        assert_eq!(store.like_count(&post.id).unwrap(), 1);

        store.unlike(&alice.id, &post.id).unwrap();
        assert!(store.likers_of(&post.id).unwrap().is_empty());
        assert!(store.liked_post_ids(&alice.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_post_cleans_relations() {
        let store = Store::in_memory().unwrap();
        let mut alice = test_user("alice");
        store.create_user(&mut alice).unwrap();

        let mut post = Post {
            id: String::new(),
            user_id: alice.id.clone(),
            text: "bye".to_string(),
            img: String::new(),
            created_at: Utc::now(),
        };
        store.create_post(&mut post).unwrap();
        store.like(&alice.id, &post.id, &alice.id).unwrap();

        let mut comment = Comment {
            id: String::new(),
            post_id: post.id.clone(),
            user_id: alice.id.clone(),
            text: "first".to_string(),
            created_at: Utc::now(),
        };
        store.add_comment(&mut comment).unwrap();

        store.delete_post(&post.id).unwrap();
        assert!(matches!(
            store.get_post(&post.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.liked_post_ids(&alice.id).unwrap().is_empty());
        assert!(store.comments_for_post(&post.id).unwrap().is_empty());
    }

    #[test]
    fn test_notifications_mark_read_scoped_to_recipient() {
        let store = Store::in_memory().unwrap();
        let mut alice = test_user("alice");
        let mut bob = test_user("bob");
        let mut carol = test_user("carol");
        store.create_user(&mut alice).unwrap();
        store.create_user(&mut bob).unwrap();
        store.create_user(&mut carol).unwrap();

        store.follow(&alice.id, &bob.id).unwrap();
        store.follow(&alice.id, &carol.id).unwrap();

        // first fetch sees unread, second sees read
        let first = store.notifications_to_marking_read(&bob.id).unwrap();
        assert_eq!(first.len(), 1);
        assert!(!first[0].read);

        let second = store.notifications_to_marking_read(&bob.id).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].read);

        // carol's notification untouched
        let carols = store.notifications_to(&carol.id).unwrap();
        assert_eq!(carols.len(), 1);
        assert!(!carols[0].read);
    }

    #[test]
    fn test_clear_notifications_counts_and_scopes() {
        let store = Store::in_memory().unwrap();
        let mut alice = test_user("alice");
        let mut bob = test_user("bob");
        let mut carol = test_user("carol");
        store.create_user(&mut alice).unwrap();
        store.create_user(&mut bob).unwrap();
        store.create_user(&mut carol).unwrap();

        store.follow(&alice.id, &bob.id).unwrap();
        store.follow(&carol.id, &bob.id).unwrap();
        store.follow(&alice.id, &carol.id).unwrap();

        let deleted = store.clear_notifications(&bob.id).unwrap();
        assert_eq!(deleted, 2);
        assert!(store.notifications_to(&bob.id).unwrap().is_empty());
        assert_eq!(store.notifications_to(&carol.id).unwrap().len(), 1);
    }

    #[test]
    fn test_suggested_users_excludes_followed_in_query() {
        let store = Store::in_memory().unwrap();
        let mut me = test_user("me");
        store.create_user(&mut me).unwrap();

        let mut others = Vec::new();
        for i in 0..6 {
            let mut u = test_user(&format!("user{}", i));
            store.create_user(&mut u).unwrap();
            others.push(u);
        }
        // follow the first two
        store.follow(&me.id, &others[0].id).unwrap();
        store.follow(&me.id, &others[1].id).unwrap();

        let suggested = store.suggested_users(&me.id, 4).unwrap();
        assert_eq!(suggested.len(), 4);
        for s in &suggested {
            assert_ne!(s.id, me.id);
            assert_ne!(s.id, others[0].id);
            assert_ne!(s.id, others[1].id);
        }
    }
}
