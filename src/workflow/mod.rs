//! Relationship workflow
//!
//! Orchestrates the multi-record mutations that must stay consistent:
//! follow graph edges, like sets, comment appends and the notifications
//! those actions emit. The workflow holds no state of its own; it reads and
//! writes through the store, which keeps each relationship as a single
//! authoritative row and pairs relation writes with notification writes in
//! one transaction. A crash therefore leaves either both writes or neither,
//! and the reciprocal-edge invariants hold by derivation.

use std::sync::Arc;
use thiserror::Error;

use crate::models::*;
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("You cannot follow/unfollow yourself")]
    SelfReference,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => WorkflowError::NotFound(what),
            other => WorkflowError::Store(other),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Outcome of a follow toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    Unfollowed,
}

/// Outcome of a like toggle, with the post's resulting like count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes: i64,
}

pub struct RelationshipWorkflow {
    store: Arc<Store>,
}

impl RelationshipWorkflow {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Toggle the follow edge from `actor_id` to `target_id`.
    ///
    /// The follow branch emits a `follow` notification to the target in the
    /// same transaction as the edge insert; the unfollow branch emits none.
    pub fn follow_or_unfollow(
        &self,
        actor_id: &str,
        target_id: &str,
    ) -> WorkflowResult<FollowOutcome> {
        if actor_id == target_id {
            return Err(WorkflowError::SelfReference);
        }

        // Both ids must resolve before any write happens
        self.store.user_summary(actor_id)?;
        self.store.user_summary(target_id)?;

        if self.store.is_following(actor_id, target_id)? {
            self.store.unfollow(actor_id, target_id)?;
            Ok(FollowOutcome::Unfollowed)
        } else {
            self.store.follow(actor_id, target_id)?;
            Ok(FollowOutcome::Followed)
        }
    }

    /// Toggle the actor's like on a post.
    ///
    /// The like branch notifies the post author in the same transaction as
    /// the like insert. Self-likes are permitted and still notify.
    pub fn like_or_unlike(&self, actor_id: &str, post_id: &str) -> WorkflowResult<LikeOutcome> {
        let post = self.store.get_post(post_id)?;

        let liked = if self.store.has_liked(actor_id, post_id)? {
            self.store.unlike(actor_id, post_id)?;
            false
        } else {
            self.store.like(actor_id, post_id, &post.user_id)?;
            true
        };

        Ok(LikeOutcome {
            liked,
            likes: self.store.like_count(post_id)?,
        })
    }

    /// Append a comment to a post; returns the hydrated post document.
    pub fn add_comment(
        &self,
        actor_id: &str,
        post_id: &str,
        text: &str,
    ) -> WorkflowResult<PostView> {
        if text.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "Comment text is required".to_string(),
            ));
        }

        let post = self.store.get_post(post_id)?;

        let mut comment = Comment {
            id: String::new(),
            post_id: post.id.clone(),
            user_id: actor_id.to_string(),
            text: text.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.store.add_comment(&mut comment)?;

        Ok(self.store.hydrate_post(&post)?)
    }

    /// All notifications addressed to the actor, in insertion order, each
    /// carrying the sender's public identity. Marks the unread ones read as
    /// part of the same call.
    pub fn list_notifications(&self, actor_id: &str) -> WorkflowResult<Vec<NotificationView>> {
        let notifications = self.store.notifications_to_marking_read(actor_id)?;

        notifications
            .into_iter()
            .map(|n| {
                let from = self.store.user_summary(&n.from_user_id)?;
                Ok(NotificationView {
                    id: n.id,
                    from,
                    to: n.to_user_id,
                    notification_type: n.notification_type,
                    read: n.read,
                    created_at: n.created_at,
                })
            })
            .collect()
    }

    /// Delete all notifications addressed to the actor; returns the count.
    pub fn clear_notifications(&self, actor_id: &str) -> WorkflowResult<usize> {
        Ok(self.store.clear_notifications(actor_id)?)
    }
}
