//! Comment threads.
//!
//! Comments carry no vote mechanics. Replies point at their parent by id.

use std::sync::Arc;

use domains::{
    Clock, Comment, CommentId, CommentRepository, DomainError, PostId, PostRepository, UserId,
    UserRepository,
};
use tracing::{info, instrument};

pub struct CommentService {
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    comments: Arc<dyn CommentRepository>,
    clock: Arc<dyn Clock>,
}

impl CommentService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        comments: Arc<dyn CommentRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { users, posts, comments, clock }
    }

    #[instrument(skip(self, content), fields(author = %author_id, post = %post_id))]
    pub async fn create_comment(
        &self,
        author_id: UserId,
        post_id: PostId,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> Result<Comment, DomainError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(DomainError::Validation("comment must not be empty".into()));
        }
        if self.posts.find_by_id(post_id).await?.is_none() {
            return Err(DomainError::not_found("post", post_id));
        }
        if self.users.find_by_id(author_id).await?.is_none() {
            return Err(DomainError::not_found("user", author_id));
        }
        if let Some(parent_id) = parent_id {
            let parent = self
                .comments
                .find_by_id(parent_id)
                .await?
                .ok_or_else(|| DomainError::not_found("comment", parent_id))?;
            if parent.post_id != post_id {
                return Err(DomainError::Validation("parent comment belongs to another post".into()));
            }
        }

        let comment = self
            .comments
            .create(Comment {
                id: CommentId::new(),
                author_id,
                post_id,
                parent_id,
                content: content.to_string(),
                score: 0,
                created_at: self.clock.now(),
            })
            .await?;
        info!(comment_id = %comment.id, "comment created");
        Ok(comment)
    }

    pub async fn comments_for_post(&self, post_id: PostId) -> Result<Vec<Comment>, DomainError> {
        self.comments.list_by_post(post_id).await
    }

    pub async fn replies(&self, comment_id: CommentId) -> Result<Vec<Comment>, DomainError> {
        self.comments.list_replies(comment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::{MockClock, MockCommentRepository, MockPostRepository, MockUserRepository, Post, User};

    fn post(id: PostId) -> Post {
        Post {
            id,
            author_id: UserId::new(),
            title: "t".into(),
            content: "c".into(),
            score: 0,
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(comments: MockCommentRepository, post_id: PostId) -> CommentService {
        let mut posts = MockPostRepository::new();
        posts.expect_find_by_id().returning(move |id| Ok((id == post_id).then(|| post(id))));
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|id| {
            let mut u = User::new("lin".into(), "lin@example.com".into(), String::new(), Utc::now());
            u.id = id;
            Ok(Some(u))
        });
        let mut clock = MockClock::new();
        clock.expect_now().returning(Utc::now);
        CommentService::new(Arc::new(users), Arc::new(posts), Arc::new(comments), Arc::new(clock))
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let svc = service(MockCommentRepository::new(), PostId::new());
        let err = svc.create_comment(UserId::new(), PostId::new(), "hi", None).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "post", .. }));
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_found() {
        let post_id = PostId::new();
        let mut comments = MockCommentRepository::new();
        comments.expect_find_by_id().returning(|_| Ok(None));
        comments.expect_create().never();
        let svc = service(comments, post_id);

        let err = svc
            .create_comment(UserId::new(), post_id, "hi", Some(CommentId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "comment", .. }));
    }

    #[tokio::test]
    async fn test_parent_on_other_post_is_rejected() {
        let post_id = PostId::new();
        let mut comments = MockCommentRepository::new();
        comments.expect_find_by_id().returning(|id| {
            Ok(Some(Comment {
                id,
                author_id: UserId::new(),
                post_id: PostId::new(),
                parent_id: None,
                content: "elsewhere".into(),
                score: 0,
                created_at: Utc::now(),
            }))
        });
        let svc = service(comments, post_id);

        let err = svc
            .create_comment(UserId::new(), post_id, "hi", Some(CommentId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reply_is_stored_with_parent() {
        let post_id = PostId::new();
        let parent_id = CommentId::new();
        let mut comments = MockCommentRepository::new();
        comments.expect_find_by_id().returning(move |id| {
            Ok(Some(Comment {
                id,
                author_id: UserId::new(),
                post_id,
                parent_id: None,
                content: "root".into(),
                score: 0,
                created_at: Utc::now(),
            }))
        });
        comments.expect_create().times(1).returning(Ok);
        let svc = service(comments, post_id);

        let reply = svc.create_comment(UserId::new(), post_id, "  agreed  ", Some(parent_id)).await.unwrap();
        assert_eq!(reply.parent_id, Some(parent_id));
        assert_eq!(reply.content, "agreed");
    }
}
