use anyhow::Result;

use brabas_types::models::Notification;

use crate::Database;
use crate::models::{NotificationRow, format_ts};

impl Database {
    pub fn insert_notification(&self, n: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, actor_id, kind, post_id, body, is_read,
                                            created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    n.id.to_string(),
                    n.user_id.to_string(),
                    n.actor_id.to_string(),
                    n.kind.as_str(),
                    n.post_id.map(|id| id.to_string()),
                    n.body,
                    n.is_read,
                    format_ts(n.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, user_id: &str, limit: u32) -> Result<Vec<Notification>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, actor_id, kind, post_id, body, is_read, created_at
                 FROM notifications WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        actor_id: row.get(2)?,
                        kind: row.get(3)?,
                        post_id: row.get(4)?,
                        body: row.get(5)?,
                        is_read: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(NotificationRow::into_notification).collect()
    }

    pub fn mark_notifications_read(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id],
            )?;
            Ok(n as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use brabas_types::models::NotificationKind;

    use super::*;

    #[test]
    fn notifications_list_newest_first_and_mark_read() {
        let db = Database::open_in_memory().unwrap();
        let me = Uuid::new_v4();
        for (i, kind) in [NotificationKind::Like, NotificationKind::Mention].into_iter().enumerate() {
            db.insert_notification(&Notification {
                id: Uuid::new_v4(),
                user_id: me,
                actor_id: Uuid::new_v4(),
                kind,
                post_id: None,
                body: format!("n{i}"),
                is_read: false,
                created_at: Utc::now() - Duration::minutes(10 - i as i64),
            })
            .unwrap();
        }

        let list = db.list_notifications(&me.to_string(), 10).unwrap();
        assert_eq!(list[0].kind, NotificationKind::Mention);
        assert_eq!(db.mark_notifications_read(&me.to_string()).unwrap(), 2);
        assert!(
            db.list_notifications(&me.to_string(), 10)
                .unwrap()
                .iter()
                .all(|n| n.is_read)
        );
    }
}
