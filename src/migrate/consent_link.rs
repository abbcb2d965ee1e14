use rusqlite::{Connection, OptionalExtension};

use crate::config::MigrationConfig;
use crate::lookup;
use crate::migrate::{parse_source_date, Outcome};
use crate::runlog::RunLog;
use crate::store;

pub struct ConsentLinkRow {
    pub id: i64,
    pub participant_id: Option<String>,
    pub pack_id: Option<String>,
    pub pack_id_type: Option<String>,
    pub consent_version: Option<String>,
    pub consent_date: Option<String>,
    pub centre: Option<String>,
    pub panel: Option<String>,
    pub site: Option<String>,
}

impl ConsentLinkRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(ConsentLinkRow {
            id: row.get("id")?,
            participant_id: row.get("participant_id")?,
            pack_id: row.get("pack_id")?,
            pack_id_type: row.get("pack_id_type")?,
            consent_version: row.get("consent_version")?,
            consent_date: row.get("consent_date")?,
            centre: row.get("centre")?,
            panel: row.get("panel")?,
            site: row.get("site")?,
        })
    }
}

pub fn migrate_row(
    conn: &Connection,
    config: &MigrationConfig,
    log: &mut RunLog,
    row: &ConsentLinkRow,
) -> Outcome {
    let participant_id = row.participant_id.as_deref().map(str::trim).unwrap_or("");

    let contact_id = match lookup::contact_id_by_identifier(conn, lookup::PARTICIPANT_ID, participant_id)
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            let msg = format!("No contact found for participant {}", participant_id);
            log.error(&msg);
            return Outcome::Failed(msg);
        }
        Err(e) => {
            let msg = format!(
                "Contact lookup failed for participant {}: {}",
                participant_id, e
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    let consent_activity_id = match find_consent_activity_id(
        conn,
        config,
        row.consent_version.as_deref().unwrap_or(""),
        row.consent_date.as_deref().unwrap_or(""),
        contact_id,
        log,
    ) {
        Ok(Some(id)) => id,
        Ok(None) => {
            let msg = format!("No consent activity found for participant {}", participant_id);
            log.error(&msg);
            return Outcome::Failed(msg);
        }
        Err(e) => {
            let msg = format!(
                "Consent activity lookup failed for participant {}: {}",
                participant_id, e
            );
            log.error(&msg);
            return Outcome::Failed(msg);
        }
    };

    // Pack link, at most once per (activity, contact, pack) triple.
    let pack_id = row.pack_id.as_deref().map(str::trim).unwrap_or("");
    if !pack_id.is_empty() {
        match store::pack_link_exists(conn, pack_id, consent_activity_id, contact_id) {
            Ok(true) => {
                log.info(format!(
                    "Pack link already exists for participant {} and pack {}, not created again",
                    participant_id, pack_id
                ));
            }
            Ok(false) => {
                if let Err(e) = store::create_pack_link(
                    conn,
                    consent_activity_id,
                    contact_id,
                    pack_id,
                    row.pack_id_type.as_deref().map(str::trim).filter(|v| !v.is_empty()),
                ) {
                    let msg = format!(
                        "Could not create pack link for participant {}: {}",
                        participant_id, e
                    );
                    log.error(&msg);
                    return Outcome::Failed(msg);
                }
            }
            Err(e) => {
                let msg = format!(
                    "Pack link check failed for participant {}: {}",
                    participant_id, e
                );
                log.error(&msg);
                return Outcome::Failed(msg);
            }
        }
    }

    // Panel link; an unresolved centre/panel/site leaves the row in a
    // non-migrated state but never undoes the pack link above.
    let panel_data_id = match find_panel_data_id(conn, log, contact_id, row) {
        Ok(v) => v,
        Err(e) => {
            log.error(format!(
                "Centre/panel/site lookup failed for participant {}: {}",
                participant_id, e
            ));
            None
        }
    };
    let Some(panel_data_id) = panel_data_id else {
        let msg = format!("No centre/panel/site found for participant {}", participant_id);
        log.info(&msg);
        return Outcome::Skipped(msg);
    };

    match store::panel_link_exists(conn, panel_data_id, consent_activity_id, contact_id) {
        Ok(true) => {
            log.info(format!(
                "Panel link already exists for participant {}, not created again",
                participant_id
            ));
        }
        Ok(false) => {
            if let Err(e) =
                store::create_panel_link(conn, consent_activity_id, contact_id, panel_data_id)
            {
                log.error(format!(
                    "Could not create panel link for participant {}: {}",
                    participant_id, e
                ));
            }
        }
        Err(e) => {
            log.error(format!(
                "Panel link check failed for participant {}: {}",
                participant_id, e
            ));
        }
    }

    Outcome::Migrated
}

/// The consent activity carrying the given version, dated on the same day as
/// the source consent date, with the contact in the target role. When several
/// qualify the most recently created one (highest id) wins.
fn find_consent_activity_id(
    conn: &Connection,
    config: &MigrationConfig,
    consent_version: &str,
    consent_date: &str,
    contact_id: i64,
    log: &mut RunLog,
) -> anyhow::Result<Option<i64>> {
    let consent_version = consent_version.trim();
    let consent_date = consent_date.trim();
    if consent_version.is_empty() || consent_date.is_empty() {
        return Ok(None);
    }
    let Some(date) = parse_source_date(consent_date) else {
        log.warning(format!(
            "Could not parse date {}, no consent activity found.",
            consent_date
        ));
        return Ok(None);
    };
    let day_start = format!("{} 00:00:00", date.format("%Y-%m-%d"));
    let day_end = format!("{} 23:59:59", date.format("%Y-%m-%d"));

    let mut stmt = conn.prepare(
        "SELECT a.id FROM activity a
         JOIN activity_contact b ON a.id = b.activity_id
         JOIN activity_consent_data c ON a.id = c.activity_id
         WHERE b.contact_id = ? AND b.record_type_id = ?
           AND a.activity_date_time BETWEEN ? AND ?
           AND c.consent_version = ? AND a.is_deleted = 0
         ORDER BY a.id DESC LIMIT 1",
    )?;
    let id = stmt
        .query_row(
            rusqlite::params![
                contact_id,
                config.target_record_type_id,
                day_start,
                day_end,
                consent_version
            ],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    if id.is_none() {
        log.info(format!(
            "Could not find a consent activity id for contact ID {} and consent version {} on consent date {}",
            contact_id, consent_version, consent_date
        ));
    }
    Ok(id)
}

/// Resolve the centre/panel/site names to the single matching panel
/// custom-data row for the contact. Every supplied name must resolve to an
/// organization contact; columns without a supplied name must be NULL. Zero
/// matches and more than one match both leave the id unresolved.
fn find_panel_data_id(
    conn: &Connection,
    log: &mut RunLog,
    contact_id: i64,
    row: &ConsentLinkRow,
) -> anyhow::Result<Option<i64>> {
    let names = [
        ("nbr_centre", row.centre.as_deref()),
        ("nbr_panel", row.panel.as_deref()),
        ("nbr_site", row.site.as_deref()),
    ];
    if names
        .iter()
        .all(|(_, name)| name.map(str::trim).unwrap_or("").is_empty())
    {
        return Ok(None);
    }

    let mut resolved: [Option<i64>; 3] = [None, None, None];
    for (slot, (sub_type, name)) in names.iter().enumerate() {
        let name = name.map(str::trim).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        match lookup::organization_id_by_name(conn, sub_type, name)? {
            Some(id) => resolved[slot] = Some(id),
            None => return Ok(None),
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id FROM contact_panel_data
         WHERE contact_id = ?1
           AND ((?2 IS NULL AND centre_id IS NULL) OR centre_id = ?2)
           AND ((?3 IS NULL AND panel_id IS NULL) OR panel_id = ?3)
           AND ((?4 IS NULL AND site_id IS NULL) OR site_id = ?4)",
    )?;
    let ids = stmt
        .query_map(
            rusqlite::params![contact_id, resolved[0], resolved[1], resolved[2]],
            |r| r.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    match ids.len() {
        1 => Ok(Some(ids[0])),
        0 => Ok(None),
        _ => {
            log.warning(format!(
                "More than one centre-panel-site record found for contact ID {}, link not resolved",
                contact_id
            ));
            Ok(None)
        }
    }
}
