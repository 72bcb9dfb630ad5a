//! # PostgreSQL Content Store
//!
//! Maps the relational schema in `migrations/` onto the domain models.
//! Counters are changed with single `UPDATE ... SET x = x + $n` statements,
//! so concurrent writers never lose an increment; rank publication is a
//! single statement over the whole assignment.
//!
//! Vote application and post creation touch several rows and each run in one
//! transaction. Post creation locks the author's row first, which makes the
//! once-per-day check hold across every process sharing the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Achievement, AchievementRepository, Comment, CommentId, CommentRepository, Direction,
    DomainError, Post, PostId, PostRepository, Result, User, UserId, UserRepository, Vote,
    VoteChange, VoteRepository, ALREADY_POSTED_TODAY,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn db_err(err: sqlx::Error) -> DomainError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DomainError::Conflict(db.message().to_string()),
        _ => DomainError::Storage(err.to_string()),
    }
}

fn user_from_row(row: &PgRow) -> std::result::Result<User, sqlx::Error> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        avatar: row.try_get("avatar")?,
        total_score: row.try_get("total_score")?,
        rank: row.try_get::<i32, _>("rank")?.max(0) as u32,
        posts_count: row.try_get::<i32, _>("posts_count")?.max(0) as u32,
        joined_at: row.try_get("joined_at")?,
    })
}

fn post_from_row(row: &PgRow) -> std::result::Result<Post, sqlx::Error> {
    Ok(Post {
        id: PostId(row.try_get("id")?),
        author_id: UserId(row.try_get("author_id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        score: row.try_get("score")?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn vote_from_row(row: &PgRow) -> Result<Vote> {
    let direction: String = row.try_get("direction").map_err(db_err)?;
    Ok(Vote {
        id: domains::VoteId(row.try_get("id").map_err(db_err)?),
        voter_id: UserId(row.try_get("voter_id").map_err(db_err)?),
        post_id: PostId(row.try_get("post_id").map_err(db_err)?),
        direction: direction.parse()?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn comment_from_row(row: &PgRow) -> std::result::Result<Comment, sqlx::Error> {
    Ok(Comment {
        id: CommentId(row.try_get("id")?),
        author_id: UserId(row.try_get("author_id")?),
        post_id: PostId(row.try_get("post_id")?),
        parent_id: row.try_get::<Option<Uuid>, _>("parent_id")?.map(CommentId),
        content: row.try_get("content")?,
        score: row.try_get("score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn achievement_from_row(row: &PgRow) -> std::result::Result<Achievement, sqlx::Error> {
    Ok(Achievement {
        id: domains::AchievementId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
        unlocked_at: row.try_get("unlocked_at")?,
    })
}

fn map_rows<T>(
    rows: Vec<PgRow>,
    f: impl Fn(&PgRow) -> std::result::Result<T, sqlx::Error>,
) -> Result<Vec<T>> {
    rows.iter().map(|row| f(row).map_err(db_err)).collect()
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, avatar, total_score, rank, posts_count, joined_at";
const POST_COLUMNS: &str = "id, author_id, title, content, score, tags, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, author_id, post_id, parent_id, content, score, created_at";

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(user_from_row).transpose().map_err(db_err)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE lower(username) = lower($1)"))
            .bind(username.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(user_from_row).transpose().map_err(db_err)
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE lower(username) = lower($1))")
            .bind(username.trim())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE lower(email) = lower($1))")
            .bind(email.trim())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create(&self, user: User) -> Result<User> {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, avatar, total_score, rank, posts_count, joined_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8)",
        )
        .bind(user.id.0)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.avatar)
        .bind(user.total_score)
        .bind(user.posts_count as i32)
        .bind(user.joined_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(User { rank: 0, ..user })
    }

    async fn adjust_score(&self, id: UserId, delta: i64) -> Result<User> {
        let row = sqlx::query(&format!(
            "UPDATE users SET total_score = total_score + $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id.0)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| DomainError::not_found("user", id))?;
        user_from_row(&row).map_err(db_err)
    }

    async fn list_all(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY joined_at ASC, id ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        map_rows(rows, user_from_row)
    }

    async fn list_by_score_desc(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY total_score DESC, joined_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(rows, user_from_row)
    }

    /// One statement inside one transaction: readers see all new ranks or none.
    async fn publish_ranks(&self, ranks: &[(UserId, u32)]) -> Result<()> {
        let ids: Vec<Uuid> = ranks.iter().map(|(id, _)| id.0).collect();
        let positions: Vec<i32> = ranks.iter().map(|(_, rank)| *rank as i32).collect();

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let updated = sqlx::query(
            "UPDATE users SET rank = staged.rank \
             FROM UNNEST($1::uuid[], $2::int4[]) AS staged(id, rank) \
             WHERE users.id = staged.id AND users.rank <> staged.rank",
        )
        .bind(&ids)
        .bind(&positions)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        debug!(users = ranks.len(), changed = updated.rows_affected(), "ranks published");
        Ok(())
    }
}

#[async_trait]
impl PostRepository for PgStore {
    async fn find_by_id(&self, id: PostId) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(post_from_row).transpose().map_err(db_err)
    }

    async fn create_first_of_day(
        &self,
        post: Post,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<Post> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Concurrent attempts by the same author queue on this row lock.
        let author: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(post.author_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if author.is_none() {
            return Err(DomainError::not_found("user", post.author_id));
        }

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM posts WHERE author_id = $1 AND created_at >= $2 AND created_at < $3)",
        )
        .bind(post.author_id.0)
        .bind(day_start)
        .bind(day_end)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if taken {
            return Err(DomainError::Conflict(ALREADY_POSTED_TODAY.to_string()));
        }

        sqlx::query(
            "INSERT INTO posts (id, author_id, title, content, score, tags, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(post.id.0)
        .bind(post.author_id.0)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.score)
        .bind(&post.tags)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query("UPDATE users SET posts_count = posts_count + 1 WHERE id = $1")
            .bind(post.author_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(post)
    }

    async fn reset_all_scores(&self) -> Result<u64> {
        let done = sqlx::query("UPDATE posts SET score = 0 WHERE score <> 0")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(done.rows_affected())
    }

    async fn list_by_score_desc(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts ORDER BY score DESC, created_at DESC"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        map_rows(rows, post_from_row)
    }

    async fn list_by_author(&self, author_id: UserId) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = $1 ORDER BY created_at DESC"
        ))
        .bind(author_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(rows, post_from_row)
    }

    async fn list_by_author_between(
        &self,
        author_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = $1 AND created_at >= $2 AND created_at < $3"
        ))
        .bind(author_id.0)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(rows, post_from_row)
    }
}

#[async_trait]
impl VoteRepository for PgStore {
    async fn find(&self, voter_id: UserId, post_id: PostId) -> Result<Option<Vote>> {
        let row = sqlx::query(
            "SELECT id, voter_id, post_id, direction, created_at FROM votes WHERE voter_id = $1 AND post_id = $2",
        )
        .bind(voter_id.0)
        .bind(post_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(vote_from_row).transpose()
    }

    /// Dropping `tx` on any early return rolls the whole change back. Two
    /// first votes racing on one pair both see no row; the loser trips the
    /// `(voter_id, post_id)` unique key and surfaces as `Conflict`.
    async fn apply(&self, change: &VoteChange) -> Result<Post> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT direction FROM votes WHERE voter_id = $1 AND post_id = $2 FOR UPDATE")
                .bind(change.voter_id.0)
                .bind(change.post_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        let stored = stored.map(|d| d.parse::<Direction>()).transpose()?;
        if stored != change.from {
            return Err(DomainError::Conflict(format!(
                "vote changed concurrently: expected {:?}, found {:?}",
                change.from, stored
            )));
        }

        let vote_write = match (change.from, change.to) {
            (None, Some(direction)) => Some(
                sqlx::query(
                    "INSERT INTO votes (id, voter_id, post_id, direction, created_at) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(change.vote_id.0)
                .bind(change.voter_id.0)
                .bind(change.post_id.0)
                .bind(direction.as_str())
                .bind(change.at),
            ),
            (Some(_), Some(direction)) => Some(
                sqlx::query("UPDATE votes SET direction = $3 WHERE voter_id = $1 AND post_id = $2")
                    .bind(change.voter_id.0)
                    .bind(change.post_id.0)
                    .bind(direction.as_str()),
            ),
            (Some(_), None) => Some(
                sqlx::query("DELETE FROM votes WHERE voter_id = $1 AND post_id = $2")
                    .bind(change.voter_id.0)
                    .bind(change.post_id.0),
            ),
            (None, None) => None,
        };
        if let Some(query) = vote_write {
            query.execute(&mut *tx).await.map_err(db_err)?;
        }

        let row = sqlx::query(&format!(
            "UPDATE posts SET score = score + $2, updated_at = now() WHERE id = $1 RETURNING {POST_COLUMNS}"
        ))
        .bind(change.post_id.0)
        .bind(change.post_delta)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| DomainError::not_found("post", change.post_id))?;
        let post = post_from_row(&row).map_err(db_err)?;

        let credited = sqlx::query("UPDATE users SET total_score = total_score + $2 WHERE id = $1")
            .bind(post.author_id.0)
            .bind(change.author_delta)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if credited.rows_affected() == 0 {
            return Err(DomainError::not_found("user", post.author_id));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(post)
    }
}

#[async_trait]
impl CommentRepository for PgStore {
    async fn find_by_id(&self, id: CommentId) -> Result<Option<Comment>> {
        let row = sqlx::query(&format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(comment_from_row).transpose().map_err(db_err)
    }

    async fn create(&self, comment: Comment) -> Result<Comment> {
        sqlx::query(
            "INSERT INTO comments (id, author_id, post_id, parent_id, content, score, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(comment.id.0)
        .bind(comment.author_id.0)
        .bind(comment.post_id.0)
        .bind(comment.parent_id.map(|p| p.0))
        .bind(&comment.content)
        .bind(comment.score)
        .bind(comment.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(comment)
    }

    async fn list_by_post(&self, post_id: PostId) -> Result<Vec<Comment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(post_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(rows, comment_from_row)
    }

    async fn list_replies(&self, parent_id: CommentId) -> Result<Vec<Comment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE parent_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(parent_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(rows, comment_from_row)
    }
}

#[async_trait]
impl AchievementRepository for PgStore {
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Achievement>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, description, icon, unlocked_at FROM achievements \
             WHERE user_id = $1 ORDER BY unlocked_at DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(rows, achievement_from_row)
    }

    /// The (user_id, name) unique key turns a duplicate grant into `Conflict`.
    async fn create(&self, achievement: Achievement) -> Result<Achievement> {
        sqlx::query(
            "INSERT INTO achievements (id, user_id, name, description, icon, unlocked_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(achievement.id.0)
        .bind(achievement.user_id.0)
        .bind(&achievement.name)
        .bind(&achievement.description)
        .bind(&achievement.icon)
        .bind(achievement.unlocked_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(achievement)
    }
}
