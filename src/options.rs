use std::collections::HashMap;

use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::store;

/// Lowercased label -> value maps for the option groups the migrations
/// translate source text against. Loaded once per run; the two open-ended
/// groups (consent version, questionnaire version) grow in place when an
/// unseen label arrives.
pub struct OptionCache {
    activity_statuses: HashMap<String, String>,
    sample_sites: HashMap<String, String>,
    bleed_difficulties: HashMap<String, String>,
    study_payments: HashMap<String, String>,
    consent_versions: HashMap<String, String>,
    questionnaire_versions: HashMap<String, String>,
}

impl OptionCache {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut cache = OptionCache {
            activity_statuses: HashMap::new(),
            sample_sites: HashMap::new(),
            bleed_difficulties: HashMap::new(),
            study_payments: HashMap::new(),
            consent_versions: HashMap::new(),
            questionnaire_versions: HashMap::new(),
        };

        let mut stmt = conn.prepare(
            "SELECT g.name, v.label, v.value
             FROM option_value v
             JOIN option_group g ON g.id = v.option_group_id
             WHERE v.is_active = 1
               AND g.name IN ('activity_status', 'sample_site', 'bleed_difficulties',
                              'study_payment', 'consent_version', 'questionnaire_version')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (group, label, value) = row?;
            let key = label.to_lowercase();
            match group.as_str() {
                "activity_status" => cache.activity_statuses.insert(key, value),
                "sample_site" => cache.sample_sites.insert(key, value),
                "bleed_difficulties" => cache.bleed_difficulties.insert(key, value),
                "study_payment" => cache.study_payments.insert(key, value),
                "consent_version" => cache.consent_versions.insert(key, value),
                "questionnaire_version" => cache.questionnaire_versions.insert(key, value),
                _ => None,
            };
        }

        Ok(cache)
    }

    pub fn activity_status_id(&self, label: &str) -> Option<i64> {
        self.activity_statuses
            .get(&label.trim().to_lowercase())
            .and_then(|v| v.parse::<i64>().ok())
    }

    pub fn sample_site(&self, label: &str) -> Option<&str> {
        self.sample_sites
            .get(&label.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn bleed_difficulty(&self, label: &str) -> Option<&str> {
        self.bleed_difficulties
            .get(&label.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn study_payment(&self, label: &str) -> Option<&str> {
        self.study_payments
            .get(&label.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Consent versions are open-ended: an unseen label is materialized as a
    /// new reserved option value (weight = current max + 1) and cached, so a
    /// second lookup of the same label returns it without inserting again.
    pub fn consent_version_or_create(
        &mut self,
        conn: &Connection,
        config: &MigrationConfig,
        label: &str,
    ) -> anyhow::Result<String> {
        create_on_miss(
            conn,
            config.consent_version_group_id,
            &mut self.consent_versions,
            label,
        )
    }

    pub fn questionnaire_version_or_create(
        &mut self,
        conn: &Connection,
        config: &MigrationConfig,
        label: &str,
    ) -> anyhow::Result<String> {
        create_on_miss(
            conn,
            config.questionnaire_version_group_id,
            &mut self.questionnaire_versions,
            label,
        )
    }
}

fn create_on_miss(
    conn: &Connection,
    group_id: i64,
    map: &mut HashMap<String, String>,
    label: &str,
) -> anyhow::Result<String> {
    let label = label.trim();
    let key = label.to_lowercase();
    if let Some(value) = map.get(&key) {
        return Ok(value.clone());
    }
    let machine = machine_name(label);
    let weight = store::max_option_weight(conn, group_id)? + 1;
    store::create_option_value(conn, group_id, &machine, &machine, label, true, weight)?;
    map.insert(key, machine.clone());
    Ok(machine)
}

/// Machine-safe name derived from a free-text label: lowercased, with runs of
/// anything non-alphanumeric collapsed to a single underscore.
pub fn machine_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_underscore = false;
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore && !out.is_empty() {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
