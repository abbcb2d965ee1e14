use rusqlite::{Connection, OptionalExtension};

/// Every id and enumeration value the migrations need, resolved once per run
/// against the target store's option tables and passed explicitly to the
/// components that use it.
pub struct MigrationConfig {
    pub email_activity_type_id: i64,
    pub incoming_activity_type_id: i64,
    pub letter_activity_type_id: i64,
    pub meeting_activity_type_id: i64,
    pub phone_activity_type_id: i64,
    pub sms_activity_type_id: i64,
    pub visit_stage1_activity_type_id: i64,
    pub visit_stage2_activity_type_id: i64,
    pub sample_received_activity_type_id: i64,
    pub consent_stage2_activity_type_id: i64,
    pub sent_to_researcher_activity_type_id: i64,
    pub status_change_activity_type_id: i64,
    pub note_activity_type_id: i64,

    pub scheduled_status_id: i64,
    pub completed_status_id: i64,
    pub return_to_sender_status_id: i64,

    pub email_medium_id: i64,
    pub in_person_medium_id: i64,
    pub letter_medium_id: i64,
    pub phone_medium_id: i64,
    pub sms_medium_id: i64,

    pub normal_priority_id: i64,

    pub recruitment_case_type_id: i64,
    pub participation_case_type_id: i64,

    pub accepted_participation_status: String,
    pub excluded_participation_status: String,
    pub invitation_pending_participation_status: String,
    pub invited_participation_status: String,
    pub no_response_participation_status: String,
    pub not_participated_participation_status: String,
    pub participated_participation_status: String,
    pub refused_participation_status: String,
    pub reneged_participation_status: String,
    pub return_to_sender_participation_status: String,
    pub selected_participation_status: String,
    pub withdrawn_participation_status: String,

    pub sample_site_group_id: i64,
    pub bleed_difficulties_group_id: i64,
    pub consent_version_group_id: i64,
    pub questionnaire_version_group_id: i64,
    pub study_payment_group_id: i64,

    pub other_sample_site_value: String,
    pub other_bleed_difficulties_value: String,

    /// Record type of the "target" role on activity_contact rows.
    pub target_record_type_id: i64,
    /// Title of the group the collected-by match is restricted to.
    pub collector_group_title: String,
}

impl MigrationConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(MigrationConfig {
            email_activity_type_id: numeric_value(conn, "activity_type", "Email")?,
            incoming_activity_type_id: numeric_value(
                conn,
                "activity_type",
                "Incoming communication",
            )?,
            letter_activity_type_id: numeric_value(conn, "activity_type", "Letter")?,
            meeting_activity_type_id: numeric_value(conn, "activity_type", "Meeting")?,
            phone_activity_type_id: numeric_value(conn, "activity_type", "Phone call")?,
            sms_activity_type_id: numeric_value(conn, "activity_type", "SMS")?,
            visit_stage1_activity_type_id: numeric_value(conn, "activity_type", "Visit stage 1")?,
            visit_stage2_activity_type_id: numeric_value(conn, "activity_type", "Visit stage 2")?,
            sample_received_activity_type_id: numeric_value(
                conn,
                "activity_type",
                "Sample received",
            )?,
            consent_stage2_activity_type_id: numeric_value(
                conn,
                "activity_type",
                "Consent stage 2",
            )?,
            sent_to_researcher_activity_type_id: numeric_value(
                conn,
                "activity_type",
                "Sent to researcher",
            )?,
            status_change_activity_type_id: numeric_value(
                conn,
                "activity_type",
                "Study status change",
            )?,
            note_activity_type_id: numeric_value(conn, "activity_type", "Note")?,

            scheduled_status_id: numeric_value(conn, "activity_status", "Scheduled")?,
            completed_status_id: numeric_value(conn, "activity_status", "Completed")?,
            return_to_sender_status_id: numeric_value(conn, "activity_status", "Return to sender")?,

            email_medium_id: numeric_value(conn, "encounter_medium", "Email")?,
            in_person_medium_id: numeric_value(conn, "encounter_medium", "In person")?,
            letter_medium_id: numeric_value(conn, "encounter_medium", "Letter")?,
            phone_medium_id: numeric_value(conn, "encounter_medium", "Phone")?,
            sms_medium_id: numeric_value(conn, "encounter_medium", "SMS")?,

            normal_priority_id: numeric_value(conn, "priority", "Normal")?,

            recruitment_case_type_id: numeric_value(conn, "case_type", "Recruitment")?,
            participation_case_type_id: numeric_value(conn, "case_type", "Participation")?,

            accepted_participation_status: text_value(conn, "participation_status", "Accepted")?,
            excluded_participation_status: text_value(conn, "participation_status", "Excluded")?,
            invitation_pending_participation_status: text_value(
                conn,
                "participation_status",
                "Invitation pending",
            )?,
            invited_participation_status: text_value(conn, "participation_status", "Invited")?,
            no_response_participation_status: text_value(
                conn,
                "participation_status",
                "No response",
            )?,
            not_participated_participation_status: text_value(
                conn,
                "participation_status",
                "Not participated",
            )?,
            participated_participation_status: text_value(
                conn,
                "participation_status",
                "Participated",
            )?,
            refused_participation_status: text_value(conn, "participation_status", "Refused")?,
            reneged_participation_status: text_value(conn, "participation_status", "Reneged")?,
            return_to_sender_participation_status: text_value(
                conn,
                "participation_status",
                "Return to sender",
            )?,
            selected_participation_status: text_value(conn, "participation_status", "Selected")?,
            withdrawn_participation_status: text_value(conn, "participation_status", "Withdrawn")?,

            sample_site_group_id: group_id(conn, "sample_site")?,
            bleed_difficulties_group_id: group_id(conn, "bleed_difficulties")?,
            consent_version_group_id: group_id(conn, "consent_version")?,
            questionnaire_version_group_id: group_id(conn, "questionnaire_version")?,
            study_payment_group_id: group_id(conn, "study_payment")?,

            other_sample_site_value: text_value(conn, "sample_site", "Other")?,
            other_bleed_difficulties_value: text_value(conn, "bleed_difficulties", "Other")?,

            target_record_type_id: 3,
            collector_group_title: "BioResourcers".to_string(),
        })
    }
}

fn group_id(conn: &Connection, group: &str) -> anyhow::Result<i64> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM option_group WHERE name = ?",
            [group],
            |row| row.get(0),
        )
        .optional()?;
    id.ok_or_else(|| anyhow::anyhow!("option group {} not found", group))
}

fn text_value(conn: &Connection, group: &str, label: &str) -> anyhow::Result<String> {
    let value: Option<String> = conn
        .query_row(
            "SELECT v.value FROM option_value v
             JOIN option_group g ON g.id = v.option_group_id
             WHERE g.name = ? AND v.label = ?",
            (group, label),
            |row| row.get(0),
        )
        .optional()?;
    value.ok_or_else(|| anyhow::anyhow!("option value {} not found in group {}", label, group))
}

fn numeric_value(conn: &Connection, group: &str, label: &str) -> anyhow::Result<i64> {
    let raw = text_value(conn, group, label)?;
    raw.parse::<i64>()
        .map_err(|_| anyhow::anyhow!("option value {} in group {} is not numeric: {}", label, group, raw))
}

#[cfg(test)]
impl MigrationConfig {
    /// Fixed ids for unit tests of the pure mapping and assembly functions.
    pub fn fixture() -> Self {
        MigrationConfig {
            email_activity_type_id: 1,
            incoming_activity_type_id: 2,
            letter_activity_type_id: 3,
            meeting_activity_type_id: 4,
            phone_activity_type_id: 5,
            sms_activity_type_id: 6,
            visit_stage1_activity_type_id: 7,
            visit_stage2_activity_type_id: 8,
            sample_received_activity_type_id: 9,
            consent_stage2_activity_type_id: 10,
            sent_to_researcher_activity_type_id: 11,
            status_change_activity_type_id: 12,
            note_activity_type_id: 13,
            scheduled_status_id: 1,
            completed_status_id: 2,
            return_to_sender_status_id: 4,
            email_medium_id: 1,
            in_person_medium_id: 2,
            letter_medium_id: 3,
            phone_medium_id: 4,
            sms_medium_id: 5,
            normal_priority_id: 2,
            recruitment_case_type_id: 1,
            participation_case_type_id: 2,
            accepted_participation_status: "accepted".into(),
            excluded_participation_status: "excluded".into(),
            invitation_pending_participation_status: "invitation_pending".into(),
            invited_participation_status: "invited".into(),
            no_response_participation_status: "no_response".into(),
            not_participated_participation_status: "not_participated".into(),
            participated_participation_status: "participated".into(),
            refused_participation_status: "refused".into(),
            reneged_participation_status: "reneged".into(),
            return_to_sender_participation_status: "return_to_sender".into(),
            selected_participation_status: "selected".into(),
            withdrawn_participation_status: "withdrawn".into(),
            sample_site_group_id: 1,
            bleed_difficulties_group_id: 2,
            consent_version_group_id: 3,
            questionnaire_version_group_id: 4,
            study_payment_group_id: 5,
            other_sample_site_value: "other".into(),
            other_bleed_difficulties_value: "other".into(),
            target_record_type_id: 3,
            collector_group_title: "BioResourcers".into(),
        }
    }
}
