use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::lookup;
use crate::migrate::{parse_source_date_time, Outcome};
use crate::runlog::RunLog;
use crate::store::{self, ActivityPayload};

/// One staging row from communication_import, with named, typed fields.
pub struct CommunicationRow {
    pub id: i64,
    pub participant_id: Option<String>,
    pub communication_type: Option<i64>,
    pub study_number: Option<String>,
    pub template_type: Option<String>,
    pub template_name: Option<String>,
    pub communication_direction: Option<String>,
    pub status: Option<String>,
    pub communication_date: Option<String>,
    pub communication_time: Option<String>,
    pub contact_detail: Option<String>,
    pub communication_category: Option<String>,
    pub communication_notes: Option<String>,
}

impl CommunicationRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(CommunicationRow {
            id: row.get("id")?,
            participant_id: row.get("participant_id")?,
            communication_type: row.get("communication_type")?,
            study_number: row.get("study_number")?,
            template_type: row.get("template_type")?,
            template_name: row.get("template_name")?,
            communication_direction: row.get("communication_direction")?,
            status: row.get("status")?,
            communication_date: row.get("communication_date")?,
            communication_time: row.get("communication_time")?,
            contact_detail: row.get("contact_detail")?,
            communication_category: row.get("communication_category")?,
            communication_notes: row.get("communication_notes")?,
        })
    }
}

pub fn migrate_row(
    conn: &Connection,
    config: &MigrationConfig,
    log: &mut RunLog,
    row: &CommunicationRow,
) -> Outcome {
    let participant_id = match &row.participant_id {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            let msg = format!(
                "Empty participant_id or no participant_id in source data with id: {}",
                row.id
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    let contact_id = match lookup::contact_id_by_identifier(conn, lookup::PARTICIPANT_ID, &participant_id)
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            let msg = format!("No contact found with participant_id: {}", participant_id);
            log.error(&msg);
            return Outcome::Failed(msg);
        }
        Err(e) => {
            let msg = format!(
                "Contact lookup failed for participant_id {}: {}",
                participant_id, e
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    // Case routing: 1 = recruitment case, 2 = participation case keyed by
    // study number, anything else = stand-alone activity.
    let case_id = match row.communication_type {
        Some(1) => {
            match lookup::recruitment_case_id(conn, config, contact_id) {
                Ok(Some(id)) => Some(id),
                Ok(None) => {
                    let msg = format!(
                        "No recruitment case for contact_id: {}, communication not migrated.",
                        contact_id
                    );
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
                Err(e) => {
                    let msg = format!("Recruitment case lookup failed for contact_id {}: {}", contact_id, e);
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
            }
        }
        Some(2) => {
            let study_number = row.study_number.as_deref().unwrap_or("");
            let study_id = match lookup::study_id_by_number(conn, study_number) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    let msg = format!("No study found with study_number: {}", study_number);
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
                Err(e) => {
                    let msg = format!("Study lookup failed for study_number {}: {}", study_number, e);
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
            };
            match lookup::participation_case_id(conn, config, study_id, contact_id, log) {
                Ok(Some(id)) => Some(id),
                Ok(None) => {
                    let msg = format!(
                        "No participation case for contact_id: {} and study_id: {}, communication not migrated.",
                        contact_id, study_id
                    );
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
                Err(e) => {
                    let msg = format!(
                        "Participation case lookup failed for contact_id {} and study_id {}: {}",
                        contact_id, study_id, e
                    );
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
            }
        }
        _ => None,
    };

    let when = match parse_source_date_time(
        row.communication_date.as_deref().unwrap_or(""),
        row.communication_time.as_deref().unwrap_or(""),
    ) {
        Some(v) => v,
        None => {
            let msg = format!(
                "Could not parse communication date for source data with id: {}",
                row.id
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    let payload = activity_payload(config, contact_id, case_id, row, when);
    if let Err(e) = store::create_activity(conn, config, &payload) {
        let msg = format!(
            "Could not create communication activity for source data with id {}: {}",
            row.id, e
        );
        log.error(&msg);
        return Outcome::Failed(msg);
    }
    Outcome::Migrated
}

fn activity_payload(
    config: &MigrationConfig,
    contact_id: i64,
    case_id: Option<i64>,
    row: &CommunicationRow,
    when: chrono::NaiveDateTime,
) -> ActivityPayload {
    ActivityPayload {
        activity_type_id: determine_activity_type(config, row),
        status_id: Some(determine_status(config, row.status.as_deref())),
        medium_id: determine_medium(config, row.template_type.as_deref()),
        priority_id: Some(config.normal_priority_id),
        case_id,
        target_contact_id: contact_id,
        subject: subject(row.template_name.as_deref()),
        location: row
            .contact_detail
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        details: details(
            row.communication_category.as_deref(),
            row.communication_notes.as_deref(),
        ),
        activity_date_time: when,
        visit_data: None,
        consent_data: None,
    }
}

fn subject(template_name: Option<&str>) -> String {
    match template_name.map(str::trim) {
        Some(name) if !name.is_empty() => format!("{} (migration)", name),
        _ => "Communication activity added during migration of data from Starfish".to_string(),
    }
}

fn details(category: Option<&str>, notes: Option<&str>) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    if let Some(v) = category.map(str::trim).filter(|v| !v.is_empty()) {
        lines.push(format!("Communication category: {}", v));
    }
    if let Some(v) = notes.map(str::trim).filter(|v| !v.is_empty()) {
        lines.push(format!("Communication note: {}", v));
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn determine_medium(config: &MigrationConfig, template_type: Option<&str>) -> Option<i64> {
    match template_type.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("email") => Some(config.email_medium_id),
        Some("in person") => Some(config.in_person_medium_id),
        Some("letter") => Some(config.letter_medium_id),
        Some("phone") => Some(config.phone_medium_id),
        Some("text") => Some(config.sms_medium_id),
        _ => None,
    }
}

fn determine_activity_type(config: &MigrationConfig, row: &CommunicationRow) -> i64 {
    // Inbound communications always map to the incoming type, whatever the
    // template says.
    if row
        .communication_direction
        .as_deref()
        .map(str::trim)
        .map(|v| v.eq_ignore_ascii_case("incoming"))
        .unwrap_or(false)
    {
        return config.incoming_activity_type_id;
    }
    match row.template_type.as_deref().map(str::trim) {
        Some("Email") => config.email_activity_type_id,
        Some("Letter") => config.letter_activity_type_id,
        Some("Phone") => config.phone_activity_type_id,
        Some("Text") => config.sms_activity_type_id,
        _ => config.meeting_activity_type_id,
    }
}

fn determine_status(config: &MigrationConfig, status: Option<&str>) -> i64 {
    match status.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("return to sender") => config.return_to_sender_status_id,
        Some("scheduled") => config.scheduled_status_id,
        _ => config.completed_status_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(template_type: Option<&str>, direction: Option<&str>) -> CommunicationRow {
        CommunicationRow {
            id: 1,
            participant_id: Some("P100".into()),
            communication_type: Some(2),
            study_number: Some("S1".into()),
            template_type: template_type.map(str::to_string),
            template_name: Some("Invite letter".into()),
            communication_direction: direction.map(str::to_string),
            status: Some("Completed".into()),
            communication_date: Some("2021-01-05".into()),
            communication_time: Some("09:00".into()),
            contact_detail: None,
            communication_category: None,
            communication_notes: None,
        }
    }

    #[test]
    fn medium_follows_template_type() {
        let config = MigrationConfig::fixture();
        assert_eq!(
            determine_medium(&config, Some("Email")),
            Some(config.email_medium_id)
        );
        assert_eq!(
            determine_medium(&config, Some("text")),
            Some(config.sms_medium_id)
        );
        assert_eq!(determine_medium(&config, Some("Carrier pigeon")), None);
        assert_eq!(determine_medium(&config, None), None);
    }

    #[test]
    fn incoming_direction_overrides_template_type() {
        let config = MigrationConfig::fixture();
        assert_eq!(
            determine_activity_type(&config, &row(Some("Email"), Some("Incoming"))),
            config.incoming_activity_type_id
        );
        assert_eq!(
            determine_activity_type(&config, &row(Some("Email"), Some("Outgoing"))),
            config.email_activity_type_id
        );
        assert_eq!(
            determine_activity_type(&config, &row(None, None)),
            config.meeting_activity_type_id
        );
    }

    #[test]
    fn unknown_status_defaults_to_completed() {
        let config = MigrationConfig::fixture();
        assert_eq!(
            determine_status(&config, Some("Return to sender")),
            config.return_to_sender_status_id
        );
        assert_eq!(
            determine_status(&config, Some("scheduled")),
            config.scheduled_status_id
        );
        assert_eq!(
            determine_status(&config, Some("something else")),
            config.completed_status_id
        );
        assert_eq!(determine_status(&config, None), config.completed_status_id);
    }

    #[test]
    fn subject_appends_migration_marker() {
        assert_eq!(subject(Some("Invite letter")), "Invite letter (migration)");
        assert_eq!(
            subject(Some("  ")),
            "Communication activity added during migration of data from Starfish"
        );
    }

    #[test]
    fn details_join_category_and_note_lines() {
        assert_eq!(details(None, None), None);
        assert_eq!(
            details(Some("Newsletter"), Some("left voicemail")).as_deref(),
            Some("Communication category: Newsletter\nCommunication note: left voicemail")
        );
    }
}
