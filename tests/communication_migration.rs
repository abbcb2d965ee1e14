use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_nbrmigrated");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn nbrmigrated");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "request {} failed: {}",
        method,
        line.trim()
    );
    value.get("result").cloned().expect("result")
}

fn open_workspace_db(workspace: &std::path::Path) -> Connection {
    Connection::open(workspace.join("nbrmigration.sqlite3")).expect("open workspace db")
}

fn numeric_option(conn: &Connection, group: &str, label: &str) -> i64 {
    let raw: String = conn
        .query_row(
            "SELECT v.value FROM option_value v
             JOIN option_group g ON g.id = v.option_group_id
             WHERE g.name = ? AND v.label = ?",
            (group, label),
            |r| r.get(0),
        )
        .expect("option value");
    raw.parse().expect("numeric option value")
}

fn seed_contact_with_participant_id(conn: &Connection, participant_id: &str) -> i64 {
    conn.execute(
        "INSERT INTO contact(contact_type, display_name) VALUES('Individual', ?)",
        [participant_id],
    )
    .expect("insert contact");
    let contact_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO contact_id_history(contact_id, entry_type, entry_value)
         VALUES(?, 'participant_id', ?)",
        (contact_id, participant_id),
    )
    .expect("insert identity");
    contact_id
}

fn seed_participation_case(conn: &Connection, contact_id: i64, study_id: i64) -> i64 {
    let case_type = numeric_option(conn, "case_type", "Participation");
    conn.execute(
        "INSERT INTO cases(case_type_id, is_deleted) VALUES(?, 0)",
        [case_type],
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
fn participation_communication_becomes_case_activity() {
    let workspace = temp_dir("nbrmigrated-communication");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    let contact_id = seed_contact_with_participant_id(&conn, "P100");
    conn.execute("INSERT INTO study(study_number) VALUES('S1')", [])
        .expect("insert study");
    let study_id = conn.last_insert_rowid();
    let case_id = seed_participation_case(&conn, contact_id, study_id);

    conn.execute(
        "INSERT INTO communication_import(
            participant_id, communication_type, study_number, template_type,
            template_name, status, communication_date, communication_time)
         VALUES('P100', 2, 'S1', 'Email', 'Monthly newsletter', 'Completed',
                '2021-01-05', '09:00')",
        [],
    )
    .expect("insert staging row");

    let result = request(
        &mut stdin,
        &mut reader,
        "2",
        "communication.migrate",
        json!({}),
    );
    assert_eq!(result.get("processed").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(result.get("migrated").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        result
            .get("outcomes")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(1)
    );

    let (type_id, status_id, medium_id, activity_case_id, subject, when): (
        i64,
        i64,
        i64,
        i64,
        String,
        String,
    ) = conn
        .query_row(
            "SELECT activity_type_id, status_id, medium_id, case_id, subject, activity_date_time
             FROM activity",
            [],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .expect("one activity created");
    assert_eq!(type_id, numeric_option(&conn, "activity_type", "Email"));
    assert_eq!(status_id, numeric_option(&conn, "activity_status", "Completed"));
    assert_eq!(medium_id, numeric_option(&conn, "encounter_medium", "Email"));
    assert_eq!(activity_case_id, case_id);
    assert_eq!(subject, "Monthly newsletter (migration)");
    assert_eq!(when, "2021-01-05 09:00:00");

    // The activity targets the resolved contact.
    let target: i64 = conn
        .query_row(
            "SELECT contact_id FROM activity_contact WHERE record_type_id = 3",
            [],
            |r| r.get(0),
        )
        .expect("target row");
    assert_eq!(target, contact_id);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unresolved_contact_writes_nothing() {
    let workspace = temp_dir("nbrmigrated-communication-nocontact");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    conn.execute(
        "INSERT INTO communication_import(
            participant_id, communication_type, template_type, template_name,
            status, communication_date, communication_time)
         VALUES('P404', 3, 'Phone', 'Follow-up call', 'Completed', '2021-02-01', '')",
        [],
    )
    .expect("insert staging row");

    let result = request(
        &mut stdin,
        &mut reader,
        "2",
        "communication.migrate",
        json!({}),
    );
    assert_eq!(result.get("migrated").and_then(|v| v.as_i64()), Some(0));
    let outcomes = result
        .get("outcomes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert!(outcomes[0]
        .as_str()
        .unwrap_or("")
        .contains("No contact found"));

    let activity_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM activity", [], |r| r.get(0))
        .expect("count activities");
    assert_eq!(activity_count, 0);

    // The failed row is still consumed by the driver.
    let unprocessed: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM communication_import WHERE processed = 0",
            [],
            |r| r.get(0),
        )
        .expect("count unprocessed");
    assert_eq!(unprocessed, 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stand_alone_communication_has_no_case_and_incoming_type_wins() {
    let workspace = temp_dir("nbrmigrated-communication-standalone");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    seed_contact_with_participant_id(&conn, "P200");
    conn.execute(
        "INSERT INTO communication_import(
            participant_id, communication_type, template_type, template_name,
            communication_direction, status, communication_date)
         VALUES('P200', 9, 'Email', 'Query about appointment', 'Incoming',
                'Completed', '2021-04-10')",
        [],
    )
    .expect("insert staging row");

    let result = request(
        &mut stdin,
        &mut reader,
        "2",
        "communication.migrate",
        json!({}),
    );
    assert_eq!(result.get("migrated").and_then(|v| v.as_i64()), Some(1));

    let (type_id, case_id): (i64, Option<i64>) = conn
        .query_row(
            "SELECT activity_type_id, case_id FROM activity",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("activity created");
    assert_eq!(
        type_id,
        numeric_option(&conn, "activity_type", "Incoming communication")
    );
    assert_eq!(case_id, None);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
