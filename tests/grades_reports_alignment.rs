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
    let exe = env!("CARGO_BIN_EXE_colegiod");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn colegiod");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn report_models_align_with_recorded_data() {
    let workspace = temp_dir("colegio-reports");
    let csv_out = workspace.join("class-export.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "firstName": "Marta", "lastName": "García", "specialty": "Matemática" }),
    )
    .get("teacherId")
    .and_then(|v| v.as_str())
    .expect("teacherId")
    .to_string();

    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({
            "name": "Matemática 3°A",
            "teacherId": teacher_id,
            "schedule": "Lunes 8:00-9:30"
        }),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();

    let ana = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "firstName": "Ana", "lastName": "Pérez", "grade": "3°", "section": "A" }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    let luis = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "firstName": "Luis", "lastName": "Rojas", "grade": "3°", "section": "A" }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollment.set",
        json!({ "classId": class_id, "studentIds": [ana, luis] }),
    );

    // Ana: 80 and 90 => average 85. Luis: no grades => null average.
    for (i, score) in [80.0, 90.0].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("7-{i}"),
            "grades.record",
            json!({ "classId": class_id, "studentId": ana, "term": 1, "score": score }),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.setStatus",
        json!({ "classId": class_id, "studentId": ana, "date": "2026-03-02", "status": "presente" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.setStatus",
        json!({ "classId": class_id, "studentId": ana, "date": "2026-03-09", "status": "ausente" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "messages.send",
        json!({
            "senderRole": "teacher",
            "senderId": teacher_id,
            "recipientRole": "student",
            "recipientId": ana,
            "studentId": ana,
            "body": "Revisa la corrección."
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "reports.classList",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        report.get("className").and_then(|v| v.as_str()),
        Some("Matemática 3°A")
    );
    assert_eq!(
        report.get("scheduleDisplay").and_then(|v| v.as_str()),
        Some("Lunes 8:00-9:30")
    );
    let rows = report.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 2);
    let ana_row = rows
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(ana.as_str()))
        .expect("ana row");
    assert_eq!(
        ana_row.get("gradeAverage").and_then(|v| v.as_f64()),
        Some(85.0)
    );
    assert_eq!(
        ana_row
            .get("attendance")
            .and_then(|a| a.get("presente"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        ana_row
            .get("attendance")
            .and_then(|a| a.get("ausente"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );
    let luis_row = rows
        .iter()
        .find(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(luis.as_str()))
        .expect("luis row");
    assert!(luis_row
        .get("gradeAverage")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "reports.studentSummary",
        json!({ "studentId": ana }),
    );
    assert_eq!(
        summary.get("displayName").and_then(|v| v.as_str()),
        Some("Pérez, Ana")
    );
    assert_eq!(
        summary.get("unreadMessages").and_then(|v| v.as_i64()),
        Some(1)
    );
    let classes = summary
        .get("classes")
        .and_then(|v| v.as_array())
        .expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(
        classes[0].get("gradeAverage").and_then(|v| v.as_f64()),
        Some(85.0)
    );

    // The CSV export carries the same numbers.
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "exchange.exportClassCsv",
        json!({ "classId": class_id, "outPath": csv_out.to_string_lossy() }),
    );
    assert_eq!(exported.get("rowCount").and_then(|v| v.as_u64()), Some(2));
    let csv = std::fs::read_to_string(&csv_out).expect("read csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("studentId,lastName,firstName,grade,section,gradeAverage,presentes,ausentes")
    );
    let ana_line = csv
        .lines()
        .find(|l| l.starts_with(ana.as_str()))
        .expect("ana csv row");
    assert!(ana_line.ends_with(",85.0,1,1"), "unexpected row: {}", ana_line);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
