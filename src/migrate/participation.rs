use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::lookup;
use crate::migrate::{now, parse_source_date, Outcome};
use crate::runlog::RunLog;
use crate::store::{self, ActivityPayload, CasePayload};

pub struct ParticipationRow {
    pub id: i64,
    pub sample_id: Option<String>,
    pub study_number: Option<String>,
    pub status: Option<String>,
    pub anon_study_participant_id: Option<String>,
    pub date_invited: Option<String>,
    pub recall_group: Option<String>,
    pub date_sent_to_researcher: Option<String>,
    pub date_answered: Option<String>,
    pub notes: Option<String>,
}

impl ParticipationRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(ParticipationRow {
            id: row.get("id")?,
            sample_id: row.get("sample_id")?,
            study_number: row.get("study_number")?,
            status: row.get("status")?,
            anon_study_participant_id: row.get("anon_study_participant_id")?,
            date_invited: row.get("date_invited")?,
            recall_group: row.get("recall_group")?,
            date_sent_to_researcher: row.get("date_sent_to_researcher")?,
            date_answered: row.get("date_answered")?,
            notes: row.get("notes")?,
        })
    }
}

pub fn migrate_row(
    conn: &Connection,
    config: &MigrationConfig,
    log: &mut RunLog,
    row: &ParticipationRow,
) -> Outcome {
    if !is_row_valid(log, row) {
        return Outcome::Failed(format!("Invalid source data with id: {}", row.id));
    }
    let sample_id = row.sample_id.as_deref().unwrap_or("").trim().to_string();
    let study_number = row.study_number.as_deref().unwrap_or("").trim().to_string();

    let contact_id = match lookup::contact_id_by_identifier(conn, lookup::PARTICIPANT_ID, &sample_id) {
        Ok(Some(id)) => id,
        Ok(None) => {
            let msg = format!("No contact found with sample_id: {}", sample_id);
            log.error(&msg);
            return Outcome::Failed(msg);
        }
        Err(e) => {
            let msg = format!("Contact lookup failed for sample_id {}: {}", sample_id, e);
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    let study_id = match lookup::study_id_by_number(conn, &study_number) {
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

    // A second participation case for the same (contact, study) pair would be
    // a duplicate; skip the row rather than create one.
    match lookup::is_already_on_study(conn, config, contact_id, study_id) {
        Ok(true) => {
            let msg = format!(
                "Contact {} already has a participation case for study {}, row skipped",
                contact_id, study_id
            );
            log.info(&msg);
            return Outcome::Skipped(msg);
        }
        Ok(false) => {}
        Err(e) => {
            let msg = format!(
                "Duplicate-case check failed for contact_id {} and study_id {}: {}",
                contact_id, study_id, e
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    }

    let date_invited = match row.date_invited.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => {
            let parsed = parse_source_date(v);
            if parsed.is_none() {
                log.warning(format!(
                    "Could not parse date_invited for source data with id {}, field left empty",
                    row.id
                ));
            }
            parsed
        }
        _ => None,
    };

    let payload = CasePayload {
        contact_id,
        case_type_id: config.participation_case_type_id,
        start_date: date_invited,
        study_id: Some(study_id),
        study_participant_id: row
            .anon_study_participant_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        participation_status: Some(transform_status(config, log, row.status.as_deref())),
        date_invited,
        recall_group: row
            .recall_group
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    };

    let case_id = match store::create_case(conn, &payload) {
        Ok(id) => id,
        Err(e) => {
            let msg = format!(
                "Error when trying to create participation case for source data with id {}: {}",
                row.id, e
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    // Dependent records; each one is independent and a failure never reverts
    // the case created above.
    create_dependent_activities(conn, config, log, row, contact_id, case_id);
    append_study_participant_id(conn, log, row, contact_id, date_invited);

    Outcome::Migrated
}

fn create_dependent_activities(
    conn: &Connection,
    config: &MigrationConfig,
    log: &mut RunLog,
    row: &ParticipationRow,
    contact_id: i64,
    case_id: i64,
) {
    if let Some(raw) = row
        .date_sent_to_researcher
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        let when = dependent_date(log, row.id, raw, "date_sent_to_researcher");
        let payload = dependent_activity(
            config,
            contact_id,
            case_id,
            config.sent_to_researcher_activity_type_id,
            format!(
                "Sent to researcher on {} (Starfish migration)",
                when.format("%d-%m-%Y")
            ),
            None,
            when,
        );
        if let Err(e) = store::create_activity(conn, config, &payload) {
            log.error(format!(
                "Could not create sent-to-researcher activity for source data with id {}: {}",
                row.id, e
            ));
        }
    }

    if let Some(raw) = row
        .date_answered
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        let when = dependent_date(log, row.id, raw, "date_answered");
        let payload = dependent_activity(
            config,
            contact_id,
            case_id,
            config.status_change_activity_type_id,
            format!(
                "Study status changed to Answered on {} (Starfish migration)",
                when.format("%d-%m-%Y")
            ),
            None,
            when,
        );
        if let Err(e) = store::create_activity(conn, config, &payload) {
            log.error(format!(
                "Could not create status-change activity for source data with id {}: {}",
                row.id, e
            ));
        }
    }

    if let Some(notes) = row
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        let when = row
            .date_invited
            .as_deref()
            .and_then(parse_source_date)
            .map(|d| d.and_time(chrono::NaiveTime::MIN))
            .unwrap_or_else(now);
        let payload = dependent_activity(
            config,
            contact_id,
            case_id,
            config.note_activity_type_id,
            "Note (Starfish migration)".to_string(),
            Some(notes.to_string()),
            when,
        );
        if let Err(e) = store::create_activity(conn, config, &payload) {
            log.error(format!(
                "Could not create note activity for source data with id {}: {}",
                row.id, e
            ));
        }
    }
}

fn append_study_participant_id(
    conn: &Connection,
    log: &mut RunLog,
    row: &ParticipationRow,
    contact_id: i64,
    date_invited: Option<chrono::NaiveDate>,
) {
    let Some(value) = row
        .anon_study_participant_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return;
    };
    match store::identifier_exists(conn, contact_id, lookup::STUDY_PARTICIPANT_ID, value) {
        Ok(true) => {
            log.info(format!(
                "Study participant id {} already recorded for contact {}, not appended again",
                value, contact_id
            ));
        }
        Ok(false) => {
            let used_from = date_invited.unwrap_or_else(|| now().date());
            if let Err(e) = store::append_identifier(
                conn,
                contact_id,
                lookup::STUDY_PARTICIPANT_ID,
                value,
                used_from,
            ) {
                log.error(format!(
                    "Could not append study participant id for contact {}: {}",
                    contact_id, e
                ));
            }
        }
        Err(e) => {
            log.error(format!(
                "Identifier check failed for contact {}: {}",
                contact_id, e
            ));
        }
    }
}

fn dependent_activity(
    config: &MigrationConfig,
    contact_id: i64,
    case_id: i64,
    activity_type_id: i64,
    subject: String,
    details: Option<String>,
    when: chrono::NaiveDateTime,
) -> ActivityPayload {
    ActivityPayload {
        activity_type_id,
        status_id: Some(config.completed_status_id),
        medium_id: None,
        priority_id: Some(config.normal_priority_id),
        case_id: Some(case_id),
        target_contact_id: contact_id,
        subject,
        location: None,
        details,
        activity_date_time: when,
        visit_data: None,
        consent_data: None,
    }
}

/// Dates on dependent activities are non-critical: an unparseable value is
/// logged and replaced with the migration time.
fn dependent_date(
    log: &mut RunLog,
    row_id: i64,
    raw: &str,
    field: &str,
) -> chrono::NaiveDateTime {
    match parse_source_date(raw) {
        Some(d) => d.and_time(chrono::NaiveTime::MIN),
        None => {
            log.warning(format!(
                "Could not parse {} for source data with id {}, used today",
                field, row_id
            ));
            now()
        }
    }
}

/// Map a source participation status onto a target status value. The source
/// evolved inconsistently: "declined" and "refused" both arrive in extracts
/// and both map to the Refused value here (product decision pending).
fn transform_status(config: &MigrationConfig, log: &mut RunLog, status: Option<&str>) -> String {
    let normalized = status.map(|v| v.trim().to_lowercase()).unwrap_or_default();
    match normalized.as_str() {
        "accepted" => config.accepted_participation_status.clone(),
        "excluded" => config.excluded_participation_status.clone(),
        "invitation pending" => config.invitation_pending_participation_status.clone(),
        "invited" => config.invited_participation_status.clone(),
        "no response" => config.no_response_participation_status.clone(),
        "not participated" => config.not_participated_participation_status.clone(),
        "participated" => config.participated_participation_status.clone(),
        "declined" | "refused" => config.refused_participation_status.clone(),
        "reneged" => config.reneged_participation_status.clone(),
        "return to sender" => config.return_to_sender_participation_status.clone(),
        "selected" => config.selected_participation_status.clone(),
        "withdrawn" => config.withdrawn_participation_status.clone(),
        other => {
            log.warning(format!(
                "Unknown participation status '{}', defaulted to Selected",
                other
            ));
            config.selected_participation_status.clone()
        }
    }
}

fn is_row_valid(log: &mut RunLog, row: &ParticipationRow) -> bool {
    let mut valid = true;
    if row
        .sample_id
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        log.error(format!(
            "Empty sample_id or no sample_id in source data with id: {}",
            row.id
        ));
        valid = false;
    }
    if row
        .study_number
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        log.error(format!(
            "Empty study_number or no study_number in source data with id: {}",
            row.id
        ));
        valid = false;
    }
    let status = row.status.as_deref().map(str::trim).unwrap_or("");
    if status.is_empty() {
        log.error(format!(
            "Empty status or no status in source data with id: {}",
            row.id
        ));
        valid = false;
    } else if !status.eq_ignore_ascii_case("selected")
        && row
            .anon_study_participant_id
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
    {
        log.error(format!(
            "Empty anon_study_participant_id whilst status is not selected in source data with id: {}",
            row.id
        ));
        valid = false;
    }
    valid
}
