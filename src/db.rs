use rusqlite::Connection;
use std::path::Path;

use crate::options::machine_name;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("nbrmigration.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    create_staging_tables(&conn)?;
    create_crm_tables(&conn)?;
    seed_reference_data(&conn)?;

    Ok(conn)
}

fn create_staging_tables(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS communication_import(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            participant_id TEXT,
            communication_type INTEGER,
            study_number TEXT,
            template_type TEXT,
            template_name TEXT,
            communication_direction TEXT,
            status TEXT,
            communication_date TEXT,
            communication_time TEXT,
            contact_detail TEXT,
            communication_category TEXT,
            communication_notes TEXT,
            processed INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_communication_import_processed
         ON communication_import(processed)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS participation_import(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sample_id TEXT,
            study_number TEXT,
            status TEXT,
            anon_study_participant_id TEXT,
            date_invited TEXT,
            recall_group TEXT,
            date_sent_to_researcher TEXT,
            date_answered TEXT,
            notes TEXT,
            processed INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_participation_import_processed
         ON participation_import(processed)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visit_import(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sample_id TEXT,
            study_number TEXT,
            visit_date TEXT,
            visit_time TEXT,
            status TEXT,
            location TEXT,
            attempts TEXT,
            incident_form_completed TEXT,
            mileage TEXT,
            parking TEXT,
            other_expenses TEXT,
            claim_received_date TEXT,
            claim_submitted_date TEXT,
            expenses_notes TEXT,
            to_lab_date TEXT,
            lab_received_date TEXT,
            collected_by TEXT,
            sample_site TEXT,
            difficulties_with_the_bleed TEXT,
            study_payment TEXT,
            stage2_consent_version TEXT,
            stage2_questionnaire_version TEXT,
            notes TEXT,
            processed INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visit_import_processed
         ON visit_import(processed)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS consent_link_import(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            participant_id TEXT,
            pack_id TEXT,
            pack_id_type TEXT,
            consent_version TEXT,
            consent_date TEXT,
            centre TEXT,
            panel TEXT,
            site TEXT,
            processed INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_consent_link_import_processed
         ON consent_link_import(processed)",
        [],
    )?;

    Ok(())
}

fn create_crm_tables(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contact(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_type TEXT NOT NULL,
            contact_sub_type TEXT,
            first_name TEXT,
            middle_name TEXT,
            last_name TEXT,
            organization_name TEXT,
            display_name TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // Identity history: externally assigned identifiers per contact, tagged by type.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contact_id_history(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_id INTEGER NOT NULL,
            entry_type TEXT NOT NULL,
            entry_value TEXT NOT NULL,
            used_from TEXT,
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contact_id_history_lookup
         ON contact_id_history(entry_type, entry_value)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            study_number TEXT NOT NULL UNIQUE,
            title TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cases(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_type_id INTEGER NOT NULL,
            start_date TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS case_contact(
            case_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            FOREIGN KEY(case_id) REFERENCES cases(id),
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_case_contact_contact ON case_contact(contact_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS case_participation_data(
            case_id INTEGER PRIMARY KEY,
            study_id INTEGER,
            study_participant_id TEXT,
            participation_status TEXT,
            date_invited TEXT,
            recall_group TEXT,
            FOREIGN KEY(case_id) REFERENCES cases(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_case_participation_study
         ON case_participation_data(study_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            activity_type_id INTEGER NOT NULL,
            status_id INTEGER,
            medium_id INTEGER,
            priority_id INTEGER,
            case_id INTEGER,
            subject TEXT,
            location TEXT,
            details TEXT,
            activity_date_time TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_contact(
            activity_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            record_type_id INTEGER NOT NULL,
            FOREIGN KEY(activity_id) REFERENCES activity(id),
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_contact_contact
         ON activity_contact(contact_id, record_type_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_visit_data(
            activity_id INTEGER PRIMARY KEY,
            attempts TEXT,
            incident_form TEXT,
            mileage TEXT,
            parking_fee TEXT,
            other_expenses TEXT,
            claim_received_date TEXT,
            claim_submitted_date TEXT,
            expenses_notes TEXT,
            to_lab_date TEXT,
            collected_by_id INTEGER,
            sample_site TEXT,
            bleed_difficulties TEXT,
            study_payment TEXT,
            FOREIGN KEY(activity_id) REFERENCES activity(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_consent_data(
            activity_id INTEGER PRIMARY KEY,
            consent_version TEXT,
            questionnaire_version TEXT,
            FOREIGN KEY(activity_id) REFERENCES activity(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contact_panel_data(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_id INTEGER NOT NULL,
            centre_id INTEGER,
            panel_id INTEGER,
            site_id INTEGER,
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contact_panel_data_contact
         ON contact_panel_data(contact_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_contact(
            group_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS option_group(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            title TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS option_value(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            option_group_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            label TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_reserved INTEGER NOT NULL DEFAULT 0,
            weight INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(option_group_id) REFERENCES option_group(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_option_value_group ON option_value(option_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pack_link(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            activity_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            pack_id TEXT NOT NULL,
            pack_id_type TEXT,
            created_from TEXT,
            FOREIGN KEY(activity_id) REFERENCES activity(id),
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS panel_link(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            activity_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            panel_data_id INTEGER NOT NULL,
            created_from TEXT,
            FOREIGN KEY(activity_id) REFERENCES activity(id),
            FOREIGN KEY(contact_id) REFERENCES contact(id)
        )",
        [],
    )?;

    Ok(())
}

/// Option groups the migration expects to find in the target store. A live
/// CRM workspace already has these; seeding keeps a fresh workspace usable
/// and is a no-op when the groups exist.
fn seed_reference_data(conn: &Connection) -> anyhow::Result<()> {
    // Id-like groups: the value is a numeric id referenced from
    // activity/case columns.
    seed_numeric_group(
        conn,
        "activity_type",
        &[
            "Email",
            "Incoming communication",
            "Letter",
            "Meeting",
            "Phone call",
            "SMS",
            "Visit stage 1",
            "Visit stage 2",
            "Sample received",
            "Consent stage 2",
            "Sent to researcher",
            "Study status change",
            "Note",
        ],
    )?;
    seed_numeric_group(
        conn,
        "activity_status",
        &["Scheduled", "Completed", "Cancelled", "Return to sender"],
    )?;
    seed_numeric_group(
        conn,
        "encounter_medium",
        &["Email", "In person", "Letter", "Phone", "SMS"],
    )?;
    seed_numeric_group(conn, "priority", &["Urgent", "Normal", "Low"])?;
    seed_numeric_group(conn, "case_type", &["Recruitment", "Participation"])?;

    // Value-like groups: the value is a machine name stored in custom-data
    // columns as text.
    seed_named_group(
        conn,
        "participation_status",
        &[
            "Accepted",
            "Excluded",
            "Invitation pending",
            "Invited",
            "No response",
            "Not participated",
            "Participated",
            "Refused",
            "Reneged",
            "Return to sender",
            "Selected",
            "Withdrawn",
        ],
    )?;
    seed_named_group(
        conn,
        "sample_site",
        &["Clinic", "Home", "GP surgery", "Other"],
    )?;
    seed_named_group(
        conn,
        "bleed_difficulties",
        &["None", "Fainted", "Poor vein access", "Other"],
    )?;
    seed_named_group(
        conn,
        "study_payment",
        &["Voucher", "Bank transfer", "Cheque"],
    )?;
    // Open-ended groups grow during migration.
    seed_named_group(conn, "consent_version", &[])?;
    seed_named_group(conn, "questionnaire_version", &[])?;

    conn.execute(
        "INSERT OR IGNORE INTO groups(title) VALUES('BioResourcers')",
        [],
    )?;

    Ok(())
}

fn ensure_group(conn: &Connection, name: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO option_group(name, title) VALUES(?, ?)",
        (name, name),
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM option_group WHERE name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn seed_numeric_group(conn: &Connection, name: &str, labels: &[&str]) -> anyhow::Result<()> {
    let group_id = ensure_group(conn, name)?;
    for label in labels {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM option_value WHERE option_group_id = ? AND label = ?",
            (group_id, label),
            |row| row.get(0),
        )?;
        if exists > 0 {
            continue;
        }
        let next: i64 = conn.query_row(
            "SELECT COALESCE(MAX(CAST(value AS INTEGER)), 0) + 1
             FROM option_value WHERE option_group_id = ?",
            [group_id],
            |row| row.get(0),
        )?;
        let weight: i64 = conn.query_row(
            "SELECT COALESCE(MAX(weight), 0) + 1 FROM option_value WHERE option_group_id = ?",
            [group_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO option_value(option_group_id, name, value, label, is_active, is_reserved, weight)
             VALUES(?, ?, ?, ?, 1, 0, ?)",
            (group_id, machine_name(label), next.to_string(), label, weight),
        )?;
    }
    Ok(())
}

fn seed_named_group(conn: &Connection, name: &str, labels: &[&str]) -> anyhow::Result<()> {
    let group_id = ensure_group(conn, name)?;
    for label in labels {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM option_value WHERE option_group_id = ? AND label = ?",
            (group_id, label),
            |row| row.get(0),
        )?;
        if exists > 0 {
            continue;
        }
        let weight: i64 = conn.query_row(
            "SELECT COALESCE(MAX(weight), 0) + 1 FROM option_value WHERE option_group_id = ?",
            [group_id],
            |row| row.get(0),
        )?;
        let machine = machine_name(label);
        conn.execute(
            "INSERT INTO option_value(option_group_id, name, value, label, is_active, is_reserved, weight)
             VALUES(?, ?, ?, ?, 1, 0, ?)",
            (group_id, &machine, &machine, label, weight),
        )?;
    }
    Ok(())
}
