use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::config::MigrationConfig;

/// Write payload for a case; participation custom fields ride along and are
/// only stored when present.
pub struct CasePayload {
    pub contact_id: i64,
    pub case_type_id: i64,
    pub start_date: Option<NaiveDate>,
    pub study_id: Option<i64>,
    pub study_participant_id: Option<String>,
    pub participation_status: Option<String>,
    pub date_invited: Option<NaiveDate>,
    pub recall_group: Option<String>,
}

/// Write payload for an activity and its optional custom-data rows.
pub struct ActivityPayload {
    pub activity_type_id: i64,
    pub status_id: Option<i64>,
    pub medium_id: Option<i64>,
    pub priority_id: Option<i64>,
    pub case_id: Option<i64>,
    pub target_contact_id: i64,
    pub subject: String,
    pub location: Option<String>,
    pub details: Option<String>,
    pub activity_date_time: NaiveDateTime,
    pub visit_data: Option<VisitData>,
    pub consent_data: Option<ConsentData>,
}

#[derive(Default)]
pub struct VisitData {
    pub attempts: Option<String>,
    pub incident_form: Option<String>,
    pub mileage: Option<String>,
    pub parking_fee: Option<String>,
    pub other_expenses: Option<String>,
    pub claim_received_date: Option<String>,
    pub claim_submitted_date: Option<String>,
    pub expenses_notes: Option<String>,
    pub to_lab_date: Option<String>,
    pub collected_by_id: Option<i64>,
    pub sample_site: Option<String>,
    pub bleed_difficulties: Option<String>,
    pub study_payment: Option<String>,
}

#[derive(Default)]
pub struct ConsentData {
    pub consent_version: Option<String>,
    pub questionnaire_version: Option<String>,
}

/// The case, its contact link and its custom data land together or not at
/// all; a half-created case would be invisible to the locators but block the
/// duplicate guard.
pub fn create_case(conn: &Connection, payload: &CasePayload) -> anyhow::Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO cases(case_type_id, start_date, is_deleted) VALUES(?, ?, 0)",
        (
            payload.case_type_id,
            payload.start_date.map(|d| d.format("%Y-%m-%d").to_string()),
        ),
    )?;
    let case_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO case_contact(case_id, contact_id) VALUES(?, ?)",
        (case_id, payload.contact_id),
    )?;
    if payload.study_id.is_some() || payload.participation_status.is_some() {
        tx.execute(
            "INSERT INTO case_participation_data(
                case_id, study_id, study_participant_id, participation_status,
                date_invited, recall_group)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                case_id,
                payload.study_id,
                payload.study_participant_id.as_deref(),
                payload.participation_status.as_deref(),
                payload
                    .date_invited
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                payload.recall_group.as_deref(),
            ),
        )?;
    }
    tx.commit()?;
    Ok(case_id)
}

pub fn create_activity(
    conn: &Connection,
    config: &MigrationConfig,
    payload: &ActivityPayload,
) -> anyhow::Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO activity(
            activity_type_id, status_id, medium_id, priority_id, case_id,
            subject, location, details, activity_date_time, is_deleted)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (
            payload.activity_type_id,
            payload.status_id,
            payload.medium_id,
            payload.priority_id,
            payload.case_id,
            &payload.subject,
            payload.location.as_deref(),
            payload.details.as_deref(),
            payload
                .activity_date_time
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
    )?;
    let activity_id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO activity_contact(activity_id, contact_id, record_type_id) VALUES(?, ?, ?)",
        (
            activity_id,
            payload.target_contact_id,
            config.target_record_type_id,
        ),
    )?;

    if let Some(visit) = &payload.visit_data {
        tx.execute(
            "INSERT INTO activity_visit_data(
                activity_id, attempts, incident_form, mileage, parking_fee,
                other_expenses, claim_received_date, claim_submitted_date,
                expenses_notes, to_lab_date, collected_by_id, sample_site,
                bleed_difficulties, study_payment)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                activity_id,
                visit.attempts.as_deref(),
                visit.incident_form.as_deref(),
                visit.mileage.as_deref(),
                visit.parking_fee.as_deref(),
                visit.other_expenses.as_deref(),
                visit.claim_received_date.as_deref(),
                visit.claim_submitted_date.as_deref(),
                visit.expenses_notes.as_deref(),
                visit.to_lab_date.as_deref(),
                visit.collected_by_id,
                visit.sample_site.as_deref(),
                visit.bleed_difficulties.as_deref(),
                visit.study_payment.as_deref(),
            ),
        )?;
    }

    if let Some(consent) = &payload.consent_data {
        tx.execute(
            "INSERT INTO activity_consent_data(activity_id, consent_version, questionnaire_version)
             VALUES(?, ?, ?)",
            (
                activity_id,
                consent.consent_version.as_deref(),
                consent.questionnaire_version.as_deref(),
            ),
        )?;
    }

    tx.commit()?;
    Ok(activity_id)
}

pub fn identifier_exists(
    conn: &Connection,
    contact_id: i64,
    entry_type: &str,
    value: &str,
) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM contact_id_history
         WHERE contact_id = ? AND entry_type = ? AND entry_value = ?",
        (contact_id, entry_type, value),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn append_identifier(
    conn: &Connection,
    contact_id: i64,
    entry_type: &str,
    value: &str,
    used_from: NaiveDate,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO contact_id_history(contact_id, entry_type, entry_value, used_from)
         VALUES(?, ?, ?, ?)",
        (
            contact_id,
            entry_type,
            value,
            used_from.format("%Y-%m-%d").to_string(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Empty pack id or missing ids mean "no link" without touching the store.
pub fn pack_link_exists(
    conn: &Connection,
    pack_id: &str,
    activity_id: i64,
    contact_id: i64,
) -> anyhow::Result<bool> {
    if pack_id.trim().is_empty() || activity_id <= 0 || contact_id <= 0 {
        return Ok(false);
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pack_link
         WHERE activity_id = ? AND contact_id = ? AND pack_id = ?",
        (activity_id, contact_id, pack_id.trim()),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_pack_link(
    conn: &Connection,
    activity_id: i64,
    contact_id: i64,
    pack_id: &str,
    pack_id_type: Option<&str>,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO pack_link(activity_id, contact_id, pack_id, pack_id_type, created_from)
         VALUES(?, ?, ?, ?, 'migration')",
        (activity_id, contact_id, pack_id.trim(), pack_id_type),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn panel_link_exists(
    conn: &Connection,
    panel_data_id: i64,
    activity_id: i64,
    contact_id: i64,
) -> anyhow::Result<bool> {
    if panel_data_id <= 0 || activity_id <= 0 || contact_id <= 0 {
        return Ok(false);
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM panel_link
         WHERE panel_data_id = ? AND activity_id = ? AND contact_id = ?",
        (panel_data_id, activity_id, contact_id),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_panel_link(
    conn: &Connection,
    activity_id: i64,
    contact_id: i64,
    panel_data_id: i64,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO panel_link(activity_id, contact_id, panel_data_id, created_from)
         VALUES(?, ?, ?, 'migration')",
        (activity_id, contact_id, panel_data_id),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn max_option_weight(conn: &Connection, option_group_id: i64) -> anyhow::Result<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(weight), 0) FROM option_value WHERE option_group_id = ?",
        [option_group_id],
        |row| row.get(0),
    )?;
    Ok(max)
}

pub fn create_option_value(
    conn: &Connection,
    option_group_id: i64,
    name: &str,
    value: &str,
    label: &str,
    reserved: bool,
    weight: i64,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO option_value(option_group_id, name, value, label, is_active, is_reserved, weight)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        (
            option_group_id,
            name,
            value,
            label,
            if reserved { 1 } else { 0 },
            weight,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}
