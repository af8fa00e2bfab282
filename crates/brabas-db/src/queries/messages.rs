use anyhow::Result;
use rusqlite::Row;

use brabas_types::models::{Contact, Message};

use super::profiles::{PROFILE_COLUMNS, PROFILE_COLUMN_COUNT, profile_row};
use crate::Database;
use crate::models::{ContactRow, MessageRow, format_ts};

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        created_at: row.get(4)?,
        is_read: row.get(5)?,
    })
}

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, content, sender_id, receiver_id, created_at, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id.to_string(),
                    message.content,
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    format_ts(message.created_at),
                    message.is_read,
                ],
            )?;
            Ok(())
        })
    }

    /// Every message between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, sender_id, receiver_id, created_at, is_read
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([a, b], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Flip `is_read` on every unread message `sender` sent to `receiver`.
    pub fn mark_conversation_read(&self, sender: &str, receiver: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                [sender, receiver],
            )?;
            Ok(n as u64)
        })
    }

    /// Every other active member, annotated with the unread count and the
    /// latest message exchanged with `me`. Most recent conversations first.
    pub fn get_contacts(&self, me: &str) -> Result<Vec<Contact>> {
        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {cols},
                    (SELECT COUNT(*) FROM messages m
                      WHERE m.sender_id = p.id AND m.receiver_id = ?1 AND m.is_read = 0),
                    (SELECT m.content FROM messages m
                      WHERE (m.sender_id = p.id AND m.receiver_id = ?1)
                         OR (m.sender_id = ?1 AND m.receiver_id = p.id)
                      ORDER BY m.created_at DESC LIMIT 1),
                    (SELECT MAX(m.created_at) FROM messages m
                      WHERE (m.sender_id = p.id AND m.receiver_id = ?1)
                         OR (m.sender_id = ?1 AND m.receiver_id = p.id)) AS last_at
                 FROM profiles p
                 WHERE p.id != ?1 AND p.active = 1
                 ORDER BY last_at IS NULL, last_at DESC,
                          COALESCE(p.full_name, p.username, p.email)",
                cols = PROFILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([me], |row| {
                    Ok(ContactRow {
                        profile: profile_row(row)?,
                        unread_count: row.get(PROFILE_COLUMN_COUNT)?,
                        last_message: row.get(PROFILE_COLUMN_COUNT + 1)?,
                        last_message_at: row.get(PROFILE_COLUMN_COUNT + 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(ContactRow::into_contact).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use brabas_types::models::Profile;

    use super::*;

    fn msg(from: Uuid, to: Uuid, content: &str, secs_ago: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            content: content.into(),
            sender_id: from,
            receiver_id: to,
            created_at: Utc::now() - Duration::seconds(secs_ago),
            is_read: false,
        }
    }

    #[test]
    fn conversation_is_ascending_and_scoped_to_pair() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        db.insert_message(&msg(a, b, "segunda", 10)).unwrap();
        db.insert_message(&msg(b, a, "primeira", 20)).unwrap();
        db.insert_message(&msg(a, c, "outra conversa", 5)).unwrap();

        let conv = db
            .get_conversation(&a.to_string(), &b.to_string())
            .unwrap();
        let contents: Vec<&str> = conv.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["primeira", "segunda"]);
    }

    #[test]
    fn contacts_carry_unread_counts_and_clear_after_read() {
        let db = Database::open_in_memory().unwrap();
        let me = Uuid::new_v4();
        let ana = Uuid::new_v4();
        let bia = Uuid::new_v4();
        db.upsert_profile(&Profile::default_for(me, "me@x.com")).unwrap();
        db.upsert_profile(&Profile::default_for(ana, "ana@x.com")).unwrap();
        db.upsert_profile(&Profile::default_for(bia, "bia@x.com")).unwrap();

        db.insert_message(&msg(ana, me, "oi", 30)).unwrap();
        db.insert_message(&msg(ana, me, "tudo bem?", 20)).unwrap();
        db.insert_message(&msg(me, ana, "tudo!", 10)).unwrap();

        let contacts = db.get_contacts(&me.to_string()).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].id(), ana);
        assert_eq!(contacts[0].unread_count, 2);
        assert_eq!(contacts[0].last_message.as_deref(), Some("tudo!"));
        assert_eq!(contacts[1].id(), bia);
        assert_eq!(contacts[1].unread_count, 0);

        let updated = db
            .mark_conversation_read(&ana.to_string(), &me.to_string())
            .unwrap();
        assert_eq!(updated, 2);
        let contacts = db.get_contacts(&me.to_string()).unwrap();
        assert_eq!(contacts[0].unread_count, 0);
        assert!(
            db.get_conversation(&me.to_string(), &ana.to_string())
                .unwrap()
                .iter()
                .filter(|m| m.sender_id == ana)
                .all(|m| m.is_read)
        );
    }
}
