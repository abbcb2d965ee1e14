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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(true));
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

fn seed_contact(conn: &Connection, participant_id: &str) -> i64 {
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

fn seed_recruitment_case(conn: &Connection, contact_id: i64) -> i64 {
    let case_type = numeric_option(conn, "case_type", "Recruitment");
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
    case_id
}

#[test]
fn recruitment_visit_attaches_stage1_activity_and_dependents() {
    let workspace = temp_dir("nbrmigrated-visit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    let contact_id = seed_contact(&conn, "P100");
    let case_id = seed_recruitment_case(&conn, contact_id);

    conn.execute(
        "INSERT INTO visit_import(
            sample_id, study_number, visit_date, visit_time, status, location,
            attempts, mileage, parking, sample_site, difficulties_with_the_bleed,
            study_payment, lab_received_date, stage2_consent_version,
            stage2_questionnaire_version, notes)
         VALUES('P100', '', '2021-03-02', '10:30', 'Completed', 'Mobile unit',
                '2', '14.5', '0.00', 'Clinic', 'left at reception desk',
                'Postage stamps', '2021-03-04', 'Version 2.1', 'n/a',
                'second attempt after reschedule')",
        [],
    )
    .expect("insert staging row");

    let result = request(&mut stdin, &mut reader, "2", "visit.migrate", json!({}));
    assert_eq!(result.get("migrated").and_then(|v| v.as_i64()), Some(1));

    // Primary visit activity on the recruitment case, stage-1 type.
    let (type_id, activity_case_id, subject): (i64, i64, String) = conn
        .query_row(
            "SELECT activity_type_id, case_id, subject FROM activity
             WHERE subject LIKE 'Visit on%'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("visit activity");
    assert_eq!(type_id, numeric_option(&conn, "activity_type", "Visit stage 1"));
    assert_eq!(activity_case_id, case_id);
    assert!(subject.contains("on recruitment case"));

    // Custom fields: "0.00" parking skipped, unknown bleed text falls back
    // to Other, unknown payment is dropped, known site keeps its value.
    let (attempts, mileage, parking, site, bleed, payment): (
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    ) = conn
        .query_row(
            "SELECT attempts, mileage, parking_fee, sample_site,
                    bleed_difficulties, study_payment
             FROM activity_visit_data",
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
        .expect("visit custom data");
    assert_eq!(attempts.as_deref(), Some("2"));
    assert_eq!(mileage.as_deref(), Some("14.5"));
    assert_eq!(parking, None);
    assert_eq!(site.as_deref(), Some("clinic"));
    assert_eq!(bleed.as_deref(), Some("other"));
    assert_eq!(payment, None);

    // Dependents: sample received plus a stage-2 consent carrying the
    // on-the-fly consent version; "n/a" questionnaire version is ignored.
    let sample_subject: String = conn
        .query_row(
            "SELECT subject FROM activity WHERE subject LIKE 'Sample received%'",
            [],
            |r| r.get(0),
        )
        .expect("sample received activity");
    assert!(sample_subject.contains("04-03-2021"));

    let (consent_version, questionnaire_version): (Option<String>, Option<String>) = conn
        .query_row(
            "SELECT consent_version, questionnaire_version FROM activity_consent_data",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("consent custom data");
    assert_eq!(consent_version.as_deref(), Some("version_2_1"));
    assert_eq!(questionnaire_version, None);

    // The created option value is active, reserved, and sits at the top of
    // the group's weight order.
    let (label, weight, reserved, max_weight): (String, i64, i64, i64) = conn
        .query_row(
            "SELECT v.label, v.weight, v.is_reserved,
                    (SELECT MAX(weight) FROM option_value WHERE option_group_id = v.option_group_id)
             FROM option_value v
             JOIN option_group g ON g.id = v.option_group_id
             WHERE g.name = 'consent_version'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .expect("created consent version");
    assert_eq!(label, "Version 2.1");
    assert_eq!(reserved, 1);
    assert_eq!(weight, max_weight);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeated_consent_version_label_is_created_only_once() {
    let workspace = temp_dir("nbrmigrated-visit-consent-version");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    let contact_id = seed_contact(&conn, "P100");
    seed_recruitment_case(&conn, contact_id);

    for _ in 0..2 {
        conn.execute(
            "INSERT INTO visit_import(sample_id, study_number, visit_date, stage2_consent_version)
             VALUES('P100', '', '2021-03-02', 'v9')",
            [],
        )
        .expect("insert staging row");
    }

    let result = request(&mut stdin, &mut reader, "2", "visit.migrate", json!({}));
    assert_eq!(result.get("migrated").and_then(|v| v.as_i64()), Some(2));

    let created: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM option_value v
             JOIN option_group g ON g.id = v.option_group_id
             WHERE g.name = 'consent_version' AND v.label = 'v9'",
            [],
            |r| r.get(0),
        )
        .expect("count created versions");
    assert_eq!(created, 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn collected_by_only_matches_exact_group_member_name() {
    let workspace = temp_dir("nbrmigrated-visit-collector");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let conn = open_workspace_db(&workspace);
    let contact_id = seed_contact(&conn, "P100");
    seed_recruitment_case(&conn, contact_id);

    conn.execute(
        "INSERT INTO contact(contact_type, first_name, last_name, display_name)
         VALUES('Individual', 'Sam', 'Carter', 'Sam Carter')",
        [],
    )
    .expect("insert collector");
    let collector_id = conn.last_insert_rowid();
    let group_id: i64 = conn
        .query_row(
            "SELECT id FROM groups WHERE title = 'BioResourcers'",
            [],
            |r| r.get(0),
        )
        .expect("collector group");
    conn.execute(
        "INSERT INTO group_contact(group_id, contact_id, status) VALUES(?, ?, 'Added')",
        (group_id, collector_id),
    )
    .expect("insert membership");

    conn.execute(
        "INSERT INTO visit_import(sample_id, study_number, visit_date, collected_by)
         VALUES('P100', '', '2021-03-02', 'Sam Carter')",
        [],
    )
    .expect("insert matching row");
    conn.execute(
        "INSERT INTO visit_import(sample_id, study_number, visit_date, collected_by)
         VALUES('P100', '', '2021-03-03', 'Carter')",
        [],
    )
    .expect("insert partial-name row");

    let result = request(&mut stdin, &mut reader, "2", "visit.migrate", json!({}));
    assert_eq!(result.get("migrated").and_then(|v| v.as_i64()), Some(2));

    let rows: Vec<(Option<i64>, Option<String>)> = {
        let mut stmt = conn
            .prepare(
                "SELECT d.collected_by_id, a.details
                 FROM activity_visit_data d
                 JOIN activity a ON a.id = d.activity_id
                 ORDER BY d.activity_id",
            )
            .expect("prepare");
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect")
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, Some(collector_id));
    assert_eq!(rows[1].0, None);
    assert!(rows[1]
        .1
        .as_deref()
        .unwrap_or("")
        .contains("Collected by: Carter"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
