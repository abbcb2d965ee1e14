use rusqlite::{Connection, OptionalExtension};

use crate::config::MigrationConfig;
use crate::runlog::RunLog;

/// Identity-history entry type carrying the legacy participant/sample id.
pub const PARTICIPANT_ID: &str = "participant_id";
/// Identity-history entry type for study-scoped participant ids appended
/// during participation migration.
pub const STUDY_PARTICIPANT_ID: &str = "study_participant_id";

/// Resolve a contact through the identity-history table. An empty value, an
/// absent identity table (migration not yet configured on this workspace) and
/// a plain miss all yield `None`.
pub fn contact_id_by_identifier(
    conn: &Connection,
    entry_type: &str,
    value: &str,
) -> anyhow::Result<Option<i64>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if !table_exists(conn, "contact_id_history")? {
        return Ok(None);
    }
    let id = conn
        .query_row(
            "SELECT contact_id FROM contact_id_history
             WHERE entry_type = ? AND entry_value = ?",
            (entry_type, value),
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id)
}

pub fn study_id_by_number(conn: &Connection, study_number: &str) -> anyhow::Result<Option<i64>> {
    let study_number = study_number.trim();
    if study_number.is_empty() {
        return Ok(None);
    }
    if !table_exists(conn, "study")? {
        return Ok(None);
    }
    let id = conn
        .query_row(
            "SELECT id FROM study WHERE study_number = ?",
            [study_number],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id)
}

/// Organization contact (centre/panel/site) by sub-type tag and exact name.
pub fn organization_id_by_name(
    conn: &Connection,
    sub_type: &str,
    name: &str,
) -> anyhow::Result<Option<i64>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let id = conn
        .query_row(
            "SELECT id FROM contact
             WHERE contact_sub_type = ? AND organization_name = ? AND is_deleted = 0",
            (sub_type, name),
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id)
}

/// A contact is assumed to have at most one recruitment case; no warning is
/// raised when more exist.
pub fn recruitment_case_id(
    conn: &Connection,
    config: &MigrationConfig,
    contact_id: i64,
) -> anyhow::Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT c.id FROM cases c
             JOIN case_contact cc ON cc.case_id = c.id
             WHERE cc.contact_id = ? AND c.case_type_id = ? AND c.is_deleted = 0
             LIMIT 1",
            (contact_id, config.recruitment_case_type_id),
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(id)
}

/// Participation case for (contact, study). When duplicates exist the most
/// recently created case (highest id) wins and a warning is logged.
pub fn participation_case_id(
    conn: &Connection,
    config: &MigrationConfig,
    study_id: i64,
    contact_id: i64,
    log: &mut RunLog,
) -> anyhow::Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM cases c
         JOIN case_contact cc ON cc.case_id = c.id
         JOIN case_participation_data pd ON pd.case_id = c.id
         WHERE cc.contact_id = ? AND c.case_type_id = ? AND pd.study_id = ?
           AND c.is_deleted = 0
         ORDER BY c.id DESC",
    )?;
    let ids = stmt
        .query_map(
            (contact_id, config.participation_case_type_id, study_id),
            |row| row.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    if ids.len() > 1 {
        log.warning(format!(
            "More than one participation case for contact_id: {} and study_id: {}, used most recent",
            contact_id, study_id
        ));
    }
    Ok(ids.first().copied())
}

pub fn is_already_on_study(
    conn: &Connection,
    config: &MigrationConfig,
    contact_id: i64,
    study_id: i64,
) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cases c
         JOIN case_contact cc ON cc.case_id = c.id
         JOIN case_participation_data pd ON pd.case_id = c.id
         WHERE cc.contact_id = ? AND c.case_type_id = ? AND pd.study_id = ?
           AND c.is_deleted = 0",
        (contact_id, config.participation_case_type_id, study_id),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Fuzzy match of a collector name against the fixed collector group. The raw
/// match is a LIKE on display name; the single candidate is accepted only when
/// its normalized "first [middle] last" equals the lowercased, trimmed source
/// text. More than one raw match is treated as no match.
pub fn collected_by_contact_id(
    conn: &Connection,
    config: &MigrationConfig,
    source_name: &str,
) -> anyhow::Result<Option<i64>> {
    let wanted = source_name.trim().to_lowercase();
    if wanted.is_empty() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT c.id, c.first_name, c.middle_name, c.last_name
         FROM group_contact gc
         JOIN contact c ON gc.contact_id = c.id
         JOIN groups g ON gc.group_id = g.id
         WHERE g.title = ? AND gc.status = 'Added' AND c.display_name LIKE ?",
    )?;
    let pattern = format!("%{}%", source_name.trim());
    let candidates = stmt
        .query_map((&config.collector_group_title, &pattern), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if candidates.len() != 1 {
        return Ok(None);
    }
    let (id, first, middle, last) = &candidates[0];
    let mut parts: Vec<String> = Vec::new();
    for field in [first, middle, last] {
        if let Some(v) = field {
            let v = v.trim().to_lowercase();
            if !v.is_empty() {
                parts.push(v);
            }
        }
    }
    if !parts.is_empty() && parts.join(" ") == wanted {
        Ok(Some(*id))
    } else {
        Ok(None)
    }
}

fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use std::path::PathBuf;

    fn temp_workspace(tag: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "nbrmigrated-lookup-{}-{}",
            tag,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn insert_contact(conn: &Connection, display: &str) -> i64 {
        conn.execute(
            "INSERT INTO contact(contact_type, display_name) VALUES('Individual', ?)",
            [display],
        )
        .expect("insert contact");
        conn.last_insert_rowid()
    }

    fn insert_participation_case(
        conn: &Connection,
        config: &MigrationConfig,
        contact_id: i64,
        study_id: i64,
    ) -> i64 {
        conn.execute(
            "INSERT INTO cases(case_type_id, is_deleted) VALUES(?, 0)",
            [config.participation_case_type_id],
        )
        .expect("insert case");
        let case_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO case_contact(case_id, contact_id) VALUES(?, ?)",
            (case_id, contact_id),
        )
        .expect("insert case_contact");
        conn.execute(
            "INSERT INTO case_participation_data(case_id, study_id) VALUES(?, ?)",
            (case_id, study_id),
        )
        .expect("insert participation data");
        case_id
    }

    #[test]
    fn identifier_lookup_tolerates_empty_value_and_miss() {
        let ws = temp_workspace("ids");
        let conn = crate::db::open_db(&ws).expect("open db");
        assert_eq!(
            contact_id_by_identifier(&conn, PARTICIPANT_ID, "  ").expect("lookup"),
            None
        );
        assert_eq!(
            contact_id_by_identifier(&conn, PARTICIPANT_ID, "P404").expect("lookup"),
            None
        );

        let contact = insert_contact(&conn, "Jane Doe");
        conn.execute(
            "INSERT INTO contact_id_history(contact_id, entry_type, entry_value) VALUES(?, ?, ?)",
            (contact, PARTICIPANT_ID, "P100"),
        )
        .expect("insert identity");
        assert_eq!(
            contact_id_by_identifier(&conn, PARTICIPANT_ID, "P100").expect("lookup"),
            Some(contact)
        );
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn participation_case_tie_break_prefers_highest_id() {
        let ws = temp_workspace("tiebreak");
        let conn = crate::db::open_db(&ws).expect("open db");
        let config = MigrationConfig::load(&conn).expect("load config");
        let mut log = RunLog::new(&ws, "test").expect("run log");

        let contact = insert_contact(&conn, "Jane Doe");
        conn.execute(
            "INSERT INTO study(study_number) VALUES('S1')",
            [],
        )
        .expect("insert study");
        let study = conn.last_insert_rowid();

        let older = insert_participation_case(&conn, &config, contact, study);
        let newer = insert_participation_case(&conn, &config, contact, study);
        assert!(newer > older);

        let found = participation_case_id(&conn, &config, study, contact, &mut log)
            .expect("locate case");
        assert_eq!(found, Some(newer));
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn collected_by_requires_exact_normalized_name() {
        let ws = temp_workspace("collector");
        let conn = crate::db::open_db(&ws).expect("open db");
        let config = MigrationConfig::load(&conn).expect("load config");

        conn.execute(
            "INSERT INTO contact(contact_type, first_name, last_name, display_name)
             VALUES('Individual', 'Sam', 'Carter', 'Sam Carter')",
            [],
        )
        .expect("insert collector");
        let collector = conn.last_insert_rowid();
        let group_id: i64 = conn
            .query_row(
                "SELECT id FROM groups WHERE title = 'BioResourcers'",
                [],
                |row| row.get(0),
            )
            .expect("collector group");
        conn.execute(
            "INSERT INTO group_contact(group_id, contact_id, status) VALUES(?, ?, 'Added')",
            (group_id, collector),
        )
        .expect("insert membership");

        assert_eq!(
            collected_by_contact_id(&conn, &config, " sam carter ").expect("match"),
            Some(collector)
        );
        // LIKE hit but normalized names differ.
        assert_eq!(
            collected_by_contact_id(&conn, &config, "Carter").expect("match"),
            None
        );
        let _ = std::fs::remove_dir_all(&ws);
    }
}
