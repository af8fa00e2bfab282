use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};

use brabas_types::models::{Profile, ProfilePatch};

use super::{OptionalExt, placeholders};
use crate::Database;
use crate::models::{ProfileRow, format_ts};

pub(crate) const PROFILE_COLUMNS: &str = "p.id, p.email, p.full_name, p.avatar_url, p.bio, \
     p.username, p.headline, p.location, p.language, p.timezone, p.phone, p.active, \
     p.is_admin, p.updated_at";

/// Number of columns in `PROFILE_COLUMNS`.
pub(crate) const PROFILE_COLUMN_COUNT: usize = 14;

pub(crate) fn profile_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
        username: row.get(5)?,
        headline: row.get(6)?,
        location: row.get(7)?,
        language: row.get(8)?,
        timezone: row.get(9)?,
        phone: row.get(10)?,
        active: row.get(11)?,
        is_admin: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Identity fields for a profile provisioned outside of sign-up.
pub struct NewMember<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub full_name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub username: &'a str,
}

impl Database {
    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.with_conn(|conn| query_profile(conn, "p.id", id))?
            .map(ProfileRow::into_profile)
            .transpose()
    }

    pub fn get_profile_row_by_email(&self, email: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "p.email", email))
    }

    /// Update only the fields present in `patch`. Returns `None` when no row
    /// has this id.
    pub fn update_profile(&self, id: &str, patch: &ProfilePatch) -> Result<Option<Profile>> {
        let fields: Vec<(&str, &String)> = [
            ("full_name", &patch.full_name),
            ("avatar_url", &patch.avatar_url),
            ("bio", &patch.bio),
            ("username", &patch.username),
            ("headline", &patch.headline),
            ("location", &patch.location),
            ("language", &patch.language),
            ("timezone", &patch.timezone),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| (name, v)))
        .collect();

        let updated = self.with_conn(|conn| {
            let mut assignments: Vec<String> = fields
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{} = ?{}", name, i + 1))
                .collect();
            assignments.push(format!("updated_at = ?{}", fields.len() + 1));

            let sql = format!(
                "UPDATE profiles SET {} WHERE id = ?{}",
                assignments.join(", "),
                fields.len() + 2
            );

            let now = format_ts(Utc::now());
            let mut params: Vec<&dyn rusqlite::types::ToSql> = fields
                .iter()
                .map(|(_, v)| *v as &dyn rusqlite::types::ToSql)
                .collect();
            params.push(&now);
            params.push(&id);

            Ok(conn.execute(&sql, params.as_slice())?)
        })?;

        if updated == 0 {
            return Ok(None);
        }
        self.get_profile(id)
    }

    /// Insert or overwrite the member-editable columns of a profile.
    /// `active`, `is_admin` and an already-set `email` are never touched.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<Profile> {
        let id = profile.id.to_string();
        self.with_conn(|conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "INSERT INTO profiles (id, email, full_name, avatar_url, bio, username, headline,
                                       location, language, timezone, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    email      = COALESCE(profiles.email, excluded.email),
                    full_name  = excluded.full_name,
                    avatar_url = excluded.avatar_url,
                    bio        = excluded.bio,
                    username   = excluded.username,
                    headline   = excluded.headline,
                    location   = excluded.location,
                    language   = excluded.language,
                    timezone   = excluded.timezone,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    id,
                    profile.email,
                    profile.full_name,
                    profile.avatar_url,
                    profile.bio,
                    profile.username,
                    profile.headline,
                    profile.location,
                    profile.language,
                    profile.timezone,
                    now,
                ],
            )?;
            Ok(())
        })?;

        self.get_profile(&id)?
            .ok_or_else(|| anyhow::anyhow!("profile {} vanished after upsert", id))
    }

    pub fn create_member_profile(&self, member: &NewMember<'_>) -> Result<()> {
        self.with_conn(|conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "INSERT INTO profiles (id, email, full_name, username, phone, language, timezone,
                                       active, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pt-BR', 'America/Sao_Paulo', 1, ?6, ?6)",
                rusqlite::params![
                    member.id,
                    member.email,
                    member.full_name,
                    member.username,
                    member.phone,
                    now
                ],
            )?;
            Ok(())
        })
    }

    /// Reactivate a profile, filling in buyer details that are still missing.
    pub fn reactivate_profile(
        &self,
        id: &str,
        full_name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE profiles SET active = 1,
                        full_name = COALESCE(full_name, ?2),
                        phone = COALESCE(phone, ?3),
                        updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, full_name, phone, format_ts(Utc::now())],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_profile_active(&self, id: &str, active: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE profiles SET active = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, active, format_ts(Utc::now())],
            )?;
            Ok(n > 0)
        })
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM profiles p ORDER BY COALESCE(p.full_name, p.username, p.email)",
                PROFILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], profile_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(ProfileRow::into_profile).collect()
    }

    /// Resolve `@username` mentions to profile ids.
    pub fn profile_ids_by_usernames(&self, usernames: &[String]) -> Result<Vec<String>> {
        if usernames.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id FROM profiles WHERE active = 1 AND lower(username) IN ({})",
                placeholders(1, usernames.len())
            );
            let lowered: Vec<String> = usernames.iter().map(|u| u.to_lowercase()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(rusqlite::params_from_iter(lowered.iter()), |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    // -- Roles --

    pub fn is_admin_flag(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let flag: Option<bool> = conn
                .query_row("SELECT is_admin FROM profiles WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(flag.unwrap_or(false))
        })
    }

    pub fn set_admin_flag(&self, id: &str, is_admin: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE profiles SET is_admin = ?2 WHERE id = ?1",
                rusqlite::params![id, is_admin],
            )?;
            Ok(n > 0)
        })
    }

    pub fn get_roles(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
            let roles = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(roles)
        })
    }

    pub fn grant_role(&self, user_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role, created_at) VALUES (?1, ?2, ?3)",
                (user_id, role, format_ts(Utc::now())),
            )?;
            Ok(())
        })
    }
}

fn query_profile(conn: &Connection, column: &str, value: &str) -> Result<Option<ProfileRow>> {
    let sql = format!(
        "SELECT {} FROM profiles p WHERE {} = ?1",
        PROFILE_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], profile_row).optional()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn update_reports_missing_row() {
        let db = Database::open_in_memory().unwrap();
        let patch = ProfilePatch {
            bio: Some("oi".into()),
            ..Default::default()
        };
        assert!(db.update_profile(&Uuid::new_v4().to_string(), &patch).unwrap().is_none());
    }

    #[test]
    fn update_touches_only_supplied_fields() {
        let db = Database::open_in_memory().unwrap();
        let mut profile = Profile::default_for(Uuid::new_v4(), "ana@x.com");
        profile.bio = Some("original".into());
        db.upsert_profile(&profile).unwrap();

        let patch = ProfilePatch {
            headline: Some("Fundadora".into()),
            ..Default::default()
        };
        let updated = db
            .update_profile(&profile.id.to_string(), &patch)
            .unwrap()
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("original"));
        assert_eq!(updated.headline.as_deref(), Some("Fundadora"));
    }

    #[test]
    fn upsert_never_reactivates_or_changes_email() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_member_profile(&NewMember {
            id: &id.to_string(),
            email: "bia@x.com",
            full_name: Some("Bia"),
            phone: None,
            username: "bia",
        })
        .unwrap();
        db.set_profile_active(&id.to_string(), false).unwrap();

        let mut edited = Profile::default_for(id, "outra@x.com");
        edited.active = true;
        let stored = db.upsert_profile(&edited).unwrap();
        assert!(!stored.active);
        assert_eq!(stored.email.as_deref(), Some("bia@x.com"));
    }

    #[test]
    fn mentions_resolve_case_insensitively() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.upsert_profile(&Profile::default_for(id, "carla@x.com")).unwrap();
        let ids = db
            .profile_ids_by_usernames(&["Carla".to_string(), "ninguem".to_string()])
            .unwrap();
        assert_eq!(ids, vec![id.to_string()]);
    }
}
