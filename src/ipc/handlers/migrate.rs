use crate::config::MigrationConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::migrate::{communication, consent_link, participation, visit};
use crate::options::OptionCache;
use crate::runlog::RunLog;
use serde_json::json;

/// Rows per invocation. Batches are bounded so a long migration is run as
/// repeated short invocations from an external scheduler.
const BATCH_LIMIT: i64 = 5000;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "communication.migrate" => Some(handle_communication(state, req)),
        "participation.migrate" => Some(handle_participation(state, req)),
        "visit.migrate" => Some(handle_visit(state, req)),
        "consentLink.migrate" => Some(handle_consent_link(state, req)),
        "migration.status" => Some(handle_status(state, req)),
        _ => None,
    }
}

fn handle_communication(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut log = match RunLog::new(workspace, "communication") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "log_open_failed", e.to_string(), None),
    };
    let config = match MigrationConfig::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "config_load_failed", e.to_string(), None),
    };

    let rows = {
        let mut stmt = match conn.prepare(
            "SELECT * FROM communication_import WHERE processed = 0 ORDER BY id LIMIT ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([BATCH_LIMIT], |r| communication::CommunicationRow::from_row(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    if rows.is_empty() {
        return ok(
            &req.id,
            json!({
                "processed": 0,
                "migrated": 0,
                "outcomes": [],
                "summary": "All communication records in table migrated"
            }),
        );
    }

    let mut outcomes: Vec<String> = Vec::with_capacity(rows.len());
    let mut migrated = 0usize;
    for row in &rows {
        // The row is consumed whatever its outcome; failures are in the log.
        if let Err(e) = conn.execute(
            "UPDATE communication_import SET processed = 1 WHERE id = ?",
            [row.id],
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        let outcome = communication::migrate_row(conn, &config, &mut log, row);
        if outcome.is_migrated() {
            migrated += 1;
        }
        outcomes.push(outcome.into_message());
    }

    ok(
        &req.id,
        json!({
            "processed": rows.len(),
            "migrated": migrated,
            "outcomes": outcomes,
            "summary": format!(
                "{} communication activities migrated, more runs required.",
                rows.len()
            ),
            "logFile": log.path().to_string_lossy()
        }),
    )
}

fn handle_participation(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut log = match RunLog::new(workspace, "participation") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "log_open_failed", e.to_string(), None),
    };
    let config = match MigrationConfig::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "config_load_failed", e.to_string(), None),
    };

    let rows = {
        let mut stmt = match conn.prepare(
            "SELECT * FROM participation_import WHERE processed = 0 ORDER BY id LIMIT ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([BATCH_LIMIT], |r| participation::ParticipationRow::from_row(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    if rows.is_empty() {
        return ok(
            &req.id,
            json!({
                "processed": 0,
                "migrated": 0,
                "outcomes": [],
                "summary": "All participation records in table migrated"
            }),
        );
    }

    let mut outcomes: Vec<String> = Vec::with_capacity(rows.len());
    let mut migrated = 0usize;
    for row in &rows {
        if let Err(e) = conn.execute(
            "UPDATE participation_import SET processed = 1 WHERE id = ?",
            [row.id],
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        let outcome = participation::migrate_row(conn, &config, &mut log, row);
        if outcome.is_migrated() {
            migrated += 1;
        }
        outcomes.push(outcome.into_message());
    }

    ok(
        &req.id,
        json!({
            "processed": rows.len(),
            "migrated": migrated,
            "outcomes": outcomes,
            "summary": format!(
                "{} participation cases migrated, more runs required.",
                rows.len()
            ),
            "logFile": log.path().to_string_lossy()
        }),
    )
}

fn handle_visit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut log = match RunLog::new(workspace, "visit") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "log_open_failed", e.to_string(), None),
    };
    let config = match MigrationConfig::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "config_load_failed", e.to_string(), None),
    };
    let mut cache = match OptionCache::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "config_load_failed", e.to_string(), None),
    };

    let rows = {
        let mut stmt = match conn
            .prepare("SELECT * FROM visit_import WHERE processed = 0 ORDER BY id LIMIT ?")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([BATCH_LIMIT], |r| visit::VisitRow::from_row(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    if rows.is_empty() {
        return ok(
            &req.id,
            json!({
                "processed": 0,
                "migrated": 0,
                "outcomes": [],
                "summary": "All visit records in table migrated"
            }),
        );
    }

    let mut outcomes: Vec<String> = Vec::with_capacity(rows.len());
    let mut migrated = 0usize;
    for row in &rows {
        if let Err(e) = conn.execute("UPDATE visit_import SET processed = 1 WHERE id = ?", [row.id])
        {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        let outcome = visit::migrate_row(conn, &config, &mut cache, &mut log, row);
        if outcome.is_migrated() {
            migrated += 1;
        }
        outcomes.push(outcome.into_message());
    }

    ok(
        &req.id,
        json!({
            "processed": rows.len(),
            "migrated": migrated,
            "outcomes": outcomes,
            "summary": format!("{} visit activities migrated, more runs required.", rows.len()),
            "logFile": log.path().to_string_lossy()
        }),
    )
}

fn handle_consent_link(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut log = match RunLog::new(workspace, "consent_link") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "log_open_failed", e.to_string(), None),
    };
    let config = match MigrationConfig::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "config_load_failed", e.to_string(), None),
    };

    let rows = {
        let mut stmt = match conn.prepare(
            "SELECT * FROM consent_link_import WHERE processed = 0 ORDER BY id LIMIT ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([BATCH_LIMIT], |r| consent_link::ConsentLinkRow::from_row(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    if rows.is_empty() {
        return ok(
            &req.id,
            json!({
                "processed": 0,
                "migrated": 0,
                "outcomes": [],
                "summary": "All consent link records in table migrated"
            }),
        );
    }

    let mut outcomes: Vec<String> = Vec::with_capacity(rows.len());
    let mut migrated = 0usize;
    for row in &rows {
        if let Err(e) = conn.execute(
            "UPDATE consent_link_import SET processed = 1 WHERE id = ?",
            [row.id],
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        let outcome = consent_link::migrate_row(conn, &config, &mut log, row);
        if outcome.is_migrated() {
            migrated += 1;
        }
        outcomes.push(outcome.into_message());
    }

    ok(
        &req.id,
        json!({
            "processed": rows.len(),
            "migrated": migrated,
            "outcomes": outcomes,
            "summary": format!("{} consent links migrated, more runs required.", rows.len()),
            "logFile": log.path().to_string_lossy()
        }),
    )
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut counts = serde_json::Map::new();
    for table in [
        "communication_import",
        "participation_import",
        "visit_import",
        "consent_link_import",
    ] {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE processed = 0", table);
        let count: Result<i64, _> = conn.query_row(&sql, [], |row| row.get(0));
        match count {
            Ok(n) => {
                counts.insert(table.to_string(), json!(n));
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(&req.id, json!({ "unprocessed": counts }))
}
