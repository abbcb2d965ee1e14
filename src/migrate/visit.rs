use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::lookup;
use crate::migrate::{now, parse_source_date, parse_source_date_time, Outcome};
use crate::options::OptionCache;
use crate::runlog::RunLog;
use crate::store::{self, ActivityPayload, ConsentData, VisitData};

pub struct VisitRow {
    pub id: i64,
    pub sample_id: Option<String>,
    pub study_number: Option<String>,
    pub visit_date: Option<String>,
    pub visit_time: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub attempts: Option<String>,
    pub incident_form_completed: Option<String>,
    pub mileage: Option<String>,
    pub parking: Option<String>,
    pub other_expenses: Option<String>,
    pub claim_received_date: Option<String>,
    pub claim_submitted_date: Option<String>,
    pub expenses_notes: Option<String>,
    pub to_lab_date: Option<String>,
    pub lab_received_date: Option<String>,
    pub collected_by: Option<String>,
    pub sample_site: Option<String>,
    pub difficulties_with_the_bleed: Option<String>,
    pub study_payment: Option<String>,
    pub stage2_consent_version: Option<String>,
    pub stage2_questionnaire_version: Option<String>,
    pub notes: Option<String>,
}

impl VisitRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(VisitRow {
            id: row.get("id")?,
            sample_id: row.get("sample_id")?,
            study_number: row.get("study_number")?,
            visit_date: row.get("visit_date")?,
            visit_time: row.get("visit_time")?,
            status: row.get("status")?,
            location: row.get("location")?,
            attempts: row.get("attempts")?,
            incident_form_completed: row.get("incident_form_completed")?,
            mileage: row.get("mileage")?,
            parking: row.get("parking")?,
            other_expenses: row.get("other_expenses")?,
            claim_received_date: row.get("claim_received_date")?,
            claim_submitted_date: row.get("claim_submitted_date")?,
            expenses_notes: row.get("expenses_notes")?,
            to_lab_date: row.get("to_lab_date")?,
            lab_received_date: row.get("lab_received_date")?,
            collected_by: row.get("collected_by")?,
            sample_site: row.get("sample_site")?,
            difficulties_with_the_bleed: row.get("difficulties_with_the_bleed")?,
            study_payment: row.get("study_payment")?,
            stage2_consent_version: row.get("stage2_consent_version")?,
            stage2_questionnaire_version: row.get("stage2_questionnaire_version")?,
            notes: row.get("notes")?,
        })
    }
}

pub fn migrate_row(
    conn: &Connection,
    config: &MigrationConfig,
    cache: &mut OptionCache,
    log: &mut RunLog,
    row: &VisitRow,
) -> Outcome {
    let sample_id = match row.sample_id.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            let msg = format!(
                "Empty sample_id or no sample_id in source data with id: {}",
                row.id
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

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

    // A study number makes this a participation visit; without one it belongs
    // on the recruitment case.
    let study_number = row.study_number.as_deref().map(str::trim).unwrap_or("");
    let case_id = if study_number.is_empty() {
        match lookup::recruitment_case_id(conn, config, contact_id) {
            Ok(Some(id)) => id,
            Ok(None) => {
                let msg = format!(
                    "No recruitment case for contact_id: {}, visit not migrated.",
                    contact_id
                );
                log.error(&msg);
                return Outcome::Failed(msg);
            }
            Err(e) => {
                let msg = format!(
                    "Recruitment case lookup failed for contact_id {}: {}",
                    contact_id, e
                );
                log.error(&msg);
                return Outcome::Failed(msg);
            }
        }
    } else {
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
            Ok(Some(id)) => id,
            Ok(None) => {
                let msg = format!(
                    "No participation case for contact_id: {} and study_id: {}, visit not migrated.",
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
    };

    let when = match parse_source_date_time(
        row.visit_date.as_deref().unwrap_or(""),
        row.visit_time.as_deref().unwrap_or(""),
    ) {
        Some(v) => v,
        None => {
            log.warning(format!(
                "Could not create valid time for migration record with id {}, used today",
                row.id
            ));
            now()
        }
    };

    let mut detail_lines: Vec<String> = Vec::new();

    let collected_by_id = match row.collected_by.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            match lookup::collected_by_contact_id(conn, config, name) {
                Ok(Some(id)) => Some(id),
                Ok(None) => {
                    detail_lines.push(format!("Collected by: {}", name));
                    None
                }
                Err(e) => {
                    log.error(format!(
                        "Collected-by lookup failed for source data with id {}: {}",
                        row.id, e
                    ));
                    detail_lines.push(format!("Collected by: {}", name));
                    None
                }
            }
        }
        _ => None,
    };

    let visit_data = visit_data(config, cache, log, row, collected_by_id);
    if let Some(notes) = row.notes.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        detail_lines.push(format!("Notes: {}", notes));
    }

    let status_id = row
        .status
        .as_deref()
        .and_then(|s| cache.activity_status_id(s))
        .unwrap_or(config.completed_status_id);

    let payload = ActivityPayload {
        activity_type_id: if study_number.is_empty() {
            config.visit_stage1_activity_type_id
        } else {
            config.visit_stage2_activity_type_id
        },
        status_id: Some(status_id),
        medium_id: None,
        priority_id: Some(config.normal_priority_id),
        case_id: Some(case_id),
        target_contact_id: contact_id,
        subject: subject(study_number, when),
        location: row
            .location
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        details: if detail_lines.is_empty() {
            None
        } else {
            Some(detail_lines.join("\n"))
        },
        activity_date_time: when,
        visit_data: Some(visit_data),
        consent_data: None,
    };

    if let Err(e) = store::create_activity(conn, config, &payload) {
        let msg = format!(
            "Could not create visit activity for source data with id {}: {}",
            row.id, e
        );
        log.error(&msg);
        return Outcome::Failed(msg);
    }

    create_sample_received(conn, config, log, row, contact_id, case_id);
    create_stage2_consent(conn, config, cache, log, row, contact_id, case_id, when);

    Outcome::Migrated
}

/// Custom-field values for the primary visit activity. Empty values and the
/// "0.00" placeholder the extract uses for unclaimed expenses are skipped.
fn visit_data(
    config: &MigrationConfig,
    cache: &OptionCache,
    log: &mut RunLog,
    row: &VisitRow,
    collected_by_id: Option<i64>,
) -> VisitData {
    let mut data = VisitData {
        attempts: custom_value(row.attempts.as_deref()),
        incident_form: custom_value(row.incident_form_completed.as_deref()),
        mileage: custom_value(row.mileage.as_deref()),
        parking_fee: custom_value(row.parking.as_deref()),
        other_expenses: custom_value(row.other_expenses.as_deref()),
        claim_received_date: custom_value(row.claim_received_date.as_deref()),
        claim_submitted_date: custom_value(row.claim_submitted_date.as_deref()),
        expenses_notes: custom_value(row.expenses_notes.as_deref()),
        to_lab_date: custom_value(row.to_lab_date.as_deref()),
        collected_by_id,
        sample_site: None,
        bleed_difficulties: None,
        study_payment: None,
    };

    if let Some(site) = row
        .sample_site
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        data.sample_site = Some(
            cache
                .sample_site(site)
                .map(str::to_string)
                .unwrap_or_else(|| config.other_sample_site_value.clone()),
        );
    }
    if let Some(difficulties) = row
        .difficulties_with_the_bleed
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        data.bleed_difficulties = Some(
            cache
                .bleed_difficulty(difficulties)
                .map(str::to_string)
                .unwrap_or_else(|| config.other_bleed_difficulties_value.clone()),
        );
    }
    if let Some(payment) = row
        .study_payment
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        match cache.study_payment(payment) {
            Some(value) => data.study_payment = Some(value.to_string()),
            None => {
                log.warning(format!(
                    "Study payment from source data: {} not found in option group, study payment ignored.",
                    payment
                ));
            }
        }
    }

    data
}

fn custom_value(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && *v != "0.00")
        .map(str::to_string)
}

fn subject(study_number: &str, when: NaiveDateTime) -> String {
    if study_number.is_empty() {
        format!(
            "Visit on {} on recruitment case (Starfish migration)",
            when.format("%d-%m-%Y")
        )
    } else {
        format!(
            "Visit on {} on {} (Starfish migration)",
            when.format("%d-%m-%Y"),
            study_number
        )
    }
}

fn create_sample_received(
    conn: &Connection,
    config: &MigrationConfig,
    log: &mut RunLog,
    row: &VisitRow,
    contact_id: i64,
    case_id: i64,
) {
    let Some(raw) = row
        .lab_received_date
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return;
    };
    // The received date is what this activity records; without a parseable
    // one there is nothing to migrate.
    let Some(received) = parse_source_date(raw) else {
        log.warning(format!(
            "Could not parse lab_received_date for source data with id {}, sample received activity skipped",
            row.id
        ));
        return;
    };
    let when = received.and_time(chrono::NaiveTime::MIN);
    let payload = ActivityPayload {
        activity_type_id: config.sample_received_activity_type_id,
        status_id: Some(config.completed_status_id),
        medium_id: None,
        priority_id: Some(config.normal_priority_id),
        case_id: Some(case_id),
        target_contact_id: contact_id,
        subject: format!(
            "Sample received on {} (Starfish migration)",
            when.format("%d-%m-%Y")
        ),
        location: None,
        details: None,
        activity_date_time: when,
        visit_data: None,
        consent_data: None,
    };
    if let Err(e) = store::create_activity(conn, config, &payload) {
        log.error(format!(
            "Could not create sample received activity for source data with id {}: {}",
            row.id, e
        ));
    }
}

fn create_stage2_consent(
    conn: &Connection,
    config: &MigrationConfig,
    cache: &mut OptionCache,
    log: &mut RunLog,
    row: &VisitRow,
    contact_id: i64,
    case_id: i64,
    when: NaiveDateTime,
) {
    let consent_version = stage2_value(row.stage2_consent_version.as_deref());
    let questionnaire_version = stage2_value(row.stage2_questionnaire_version.as_deref());
    if consent_version.is_none() && questionnaire_version.is_none() {
        return;
    }

    let mut consent_data = ConsentData::default();
    if let Some(label) = consent_version {
        match cache.consent_version_or_create(conn, config, label) {
            Ok(value) => consent_data.consent_version = Some(value),
            Err(e) => log.error(format!(
                "Could not resolve consent version '{}' for source data with id {}: {}",
                label, row.id, e
            )),
        }
    }
    if let Some(label) = questionnaire_version {
        match cache.questionnaire_version_or_create(conn, config, label) {
            Ok(value) => consent_data.questionnaire_version = Some(value),
            Err(e) => log.error(format!(
                "Could not resolve questionnaire version '{}' for source data with id {}: {}",
                label, row.id, e
            )),
        }
    }

    let payload = ActivityPayload {
        activity_type_id: config.consent_stage2_activity_type_id,
        status_id: Some(config.completed_status_id),
        medium_id: None,
        priority_id: Some(config.normal_priority_id),
        case_id: Some(case_id),
        target_contact_id: contact_id,
        subject: format!(
            "Consent stage2 on {} (Starfish migration)",
            when.format("%d-%m-%Y")
        ),
        location: None,
        details: None,
        activity_date_time: when,
        visit_data: None,
        consent_data: Some(consent_data),
    };
    if let Err(e) = store::create_activity(conn, config, &payload) {
        log.error(format!(
            "Could not create consent stage2 activity for source data with id {}: {}",
            row.id, e
        ));
    }
}

/// Stage-2 version fields use "n/a" as an explicit non-value.
fn stage2_value(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("n/a"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn subject_names_the_case_or_study() {
        let when = NaiveDate::from_ymd_opt(2021, 3, 2)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(
            subject("", when),
            "Visit on 02-03-2021 on recruitment case (Starfish migration)"
        );
        assert_eq!(
            subject("S1", when),
            "Visit on 02-03-2021 on S1 (Starfish migration)"
        );
    }

    #[test]
    fn custom_values_skip_empty_and_zero_placeholder() {
        assert_eq!(custom_value(Some("3")), Some("3".to_string()));
        assert_eq!(custom_value(Some("0.00")), None);
        assert_eq!(custom_value(Some("  ")), None);
        assert_eq!(custom_value(None), None);
    }

    #[test]
    fn stage2_versions_ignore_not_applicable() {
        assert_eq!(stage2_value(Some("v2")), Some("v2"));
        assert_eq!(stage2_value(Some("N/A")), None);
        assert_eq!(stage2_value(Some("n/a")), None);
        assert_eq!(stage2_value(Some("")), None);
        assert_eq!(stage2_value(None), None);
    }
}
