use anyhow::{Result, bail};
use chrono::Utc;
use rusqlite::{Connection, Row};

use brabas_types::api::PostQuery;
use brabas_types::models::{Comment, PollData, Post, REMOVED_CONTENT, REMOVED_TITLE};

use super::OptionalExt;
use crate::Database;
use crate::models::{CommentRow, PostRow, format_ts};

const POST_COLUMNS: &str = "id, content, title, category_id, community_id, author_id, \
     media_data, poll_data, is_pinned, likes_count, comments_count, created_at";

const MAX_LIMIT: u32 = 200;
const DEFAULT_LIMIT: u32 = 50;

fn post_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        content: row.get(1)?,
        title: row.get(2)?,
        category_id: row.get(3)?,
        community_id: row.get(4)?,
        author_id: row.get(5)?,
        media_data: row.get(6)?,
        poll_data: row.get(7)?,
        is_pinned: row.get(8)?,
        likes_count: row.get(9)?,
        comments_count: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Result of toggling a like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes_count: u32,
}

impl Database {
    pub fn insert_post(&self, post: &Post) -> Result<()> {
        let media = serde_json::to_string(&post.media_data)?;
        let poll = post.poll_data.as_ref().map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, content, title, category_id, community_id, author_id,
                                    media_data, poll_data, is_pinned, likes_count, comments_count,
                                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, ?10)",
                rusqlite::params![
                    post.id.to_string(),
                    post.content,
                    post.title,
                    post.category_id.map(|id| id.to_string()),
                    post.community_id.map(|id| id.to_string()),
                    post.author_id.to_string(),
                    media,
                    poll,
                    post.is_pinned,
                    format_ts(post.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, id))?
            .map(PostRow::into_post)
            .transpose()
    }

    /// Feed query: pinned first, then newest. No match is an empty feed.
    pub fn list_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let community = query.community_id.map(|id| id.to_string());
        let category = query.category_id.map(|id| id.to_string());
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM posts
                 WHERE (?1 IS NULL OR community_id = ?1)
                   AND (?2 IS NULL OR category_id = ?2)
                 ORDER BY is_pinned DESC, created_at DESC
                 LIMIT ?3",
                POST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![community, category, limit], post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(PostRow::into_post).collect()
    }

    /// Physical delete. Likes, comments and votes go with it.
    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Moderator removal: the row stays so comment and like references stay
    /// valid, but its text is replaced by the removal placeholder.
    pub fn soft_delete_post(&self, id: &str) -> Result<Option<Post>> {
        let n = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE posts SET content = ?2, title = ?3, media_data = '[]' WHERE id = ?1",
                rusqlite::params![id, REMOVED_CONTENT, REMOVED_TITLE],
            )?)
        })?;
        if n == 0 {
            return Ok(None);
        }
        self.get_post(id)
    }

    pub fn toggle_pin(&self, id: &str) -> Result<Option<Post>> {
        let n = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE posts SET is_pinned = NOT is_pinned WHERE id = ?1",
                [id],
            )?)
        })?;
        if n == 0 {
            return Ok(None);
        }
        self.get_post(id)
    }

    /// Like if not liked, unlike otherwise. `None` when the post is gone.
    pub fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<Option<LikeOutcome>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM posts WHERE id = ?1", [post_id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let removed = tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                [post_id, user_id],
            )?;
            let liked = removed == 0;
            if liked {
                tx.execute(
                    "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                    (post_id, user_id, format_ts(Utc::now())),
                )?;
            }

            let likes_count: u32 = tx.query_row(
                "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE posts SET likes_count = ?2 WHERE id = ?1",
                rusqlite::params![post_id, likes_count],
            )?;

            tx.commit()?;
            Ok(Some(LikeOutcome { liked, likes_count }))
        })
    }

    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO comments (id, post_id, author_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    comment.id.to_string(),
                    comment.post_id.to_string(),
                    comment.author_id.to_string(),
                    comment.content,
                    format_ts(comment.created_at),
                ],
            )?;
            tx.execute(
                "UPDATE posts SET comments_count =
                    (SELECT COUNT(*) FROM comments WHERE post_id = ?1)
                 WHERE id = ?1",
                [comment.post_id.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn list_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, author_id, content, created_at FROM comments
                 WHERE post_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([post_id], |row| {
                    Ok(CommentRow {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        author_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(CommentRow::into_comment).collect()
    }

    /// Record (or move) a member's poll vote and recompute the tallies
    /// stored in `poll_data`. `None` when the post is gone.
    pub fn vote_poll(&self, post_id: &str, user_id: &str, option: usize) -> Result<Option<PollData>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let raw: Option<Option<String>> = tx
                .query_row("SELECT poll_data FROM posts WHERE id = ?1", [post_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(raw) = raw else {
                return Ok(None);
            };
            let Some(raw) = raw else {
                bail!("post {} has no poll", post_id);
            };
            let mut poll: PollData = serde_json::from_str(&raw)?;
            if option >= poll.options.len() {
                bail!("poll option {} out of range", option);
            }

            tx.execute(
                "INSERT INTO poll_votes (post_id, user_id, option_index) VALUES (?1, ?2, ?3)
                 ON CONFLICT(post_id, user_id) DO UPDATE SET option_index = excluded.option_index",
                rusqlite::params![post_id, user_id, option as i64],
            )?;

            let mut counts = vec![0u32; poll.options.len()];
            {
                let mut stmt = tx.prepare(
                    "SELECT option_index, COUNT(*) FROM poll_votes WHERE post_id = ?1
                     GROUP BY option_index",
                )?;
                let tallies = stmt
                    .query_map([post_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                for (idx, n) in tallies {
                    if let Some(slot) = usize::try_from(idx).ok().and_then(|i| counts.get_mut(i)) {
                        *slot = n;
                    }
                }
            }
            for (opt, n) in poll.options.iter_mut().zip(counts) {
                opt.votes = n;
            }

            tx.execute(
                "UPDATE posts SET poll_data = ?2 WHERE id = ?1",
                rusqlite::params![post_id, serde_json::to_string(&poll)?],
            )?;
            tx.commit()?;
            Ok(Some(poll))
        })
    }
}

fn query_post(conn: &Connection, id: &str) -> Result<Option<PostRow>> {
    let sql = format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([id], post_row).optional()
}
