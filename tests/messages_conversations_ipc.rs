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

fn create_teacher(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    first: &str,
    last: &str,
    specialty: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        id,
        "teachers.create",
        json!({ "firstName": first, "lastName": last, "specialty": specialty }),
    )
    .get("teacherId")
    .and_then(|v| v.as_str())
    .expect("teacherId")
    .to_string()
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    first: &str,
    last: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "firstName": first, "lastName": last, "grade": "3°", "section": "A" }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string()
}

fn send(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    sender_role: &str,
    sender_id: &str,
    recipient_role: &str,
    recipient_id: &str,
    student_id: &str,
    body: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "messages.send",
        json!({
            "senderRole": sender_role,
            "senderId": sender_id,
            "recipientRole": recipient_role,
            "recipientId": recipient_id,
            "studentId": student_id,
            "category": "academico",
            "subject": "Aviso",
            "body": body
        }),
    );
}

#[test]
fn student_conversations_group_count_and_sort() {
    let workspace = temp_dir("colegio-conversations");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let t1 = create_teacher(&mut stdin, &mut reader, "2", "Marta", "García", "Matemática");
    let t2 = create_teacher(&mut stdin, &mut reader, "3", "Jorge", "Soto", "Historia");
    let s1 = create_student(&mut stdin, &mut reader, "4", "Ana", "Pérez");

    // Two unread from t1, one reply from the student, then one from t2.
    send(&mut stdin, &mut reader, "5", "teacher", &t1, "student", &s1, &s1, "primera");
    send(&mut stdin, &mut reader, "6", "teacher", &t1, "student", &s1, &s1, "segunda");
    send(&mut stdin, &mut reader, "7", "student", &s1, "teacher", &t1, &s1, "respuesta");
    send(&mut stdin, &mut reader, "8", "teacher", &t2, "student", &s1, &s1, "de historia");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "conversations.forStudent",
        json!({ "studentId": s1 }),
    );
    let convs = result
        .get("conversations")
        .and_then(|v| v.as_array())
        .expect("conversations");
    assert_eq!(convs.len(), 2, "one summary per teacher, never merged");

    // Sorted by last message descending: t2 wrote last.
    assert_eq!(
        convs[0].get("counterpartyId").and_then(|v| v.as_str()),
        Some(t2.as_str())
    );
    assert_eq!(
        convs[0].get("counterpartyName").and_then(|v| v.as_str()),
        Some("Soto, Jorge")
    );
    assert_eq!(
        convs[0].get("counterpartyMeta").and_then(|v| v.as_str()),
        Some("Historia")
    );
    assert_eq!(convs[0].get("unreadCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(convs[0].get("totalCount").and_then(|v| v.as_i64()), Some(1));

    let t1_conv = &convs[1];
    assert_eq!(
        t1_conv.get("counterpartyId").and_then(|v| v.as_str()),
        Some(t1.as_str())
    );
    // Outgoing replies never count as unread for the student.
    assert_eq!(t1_conv.get("unreadCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(t1_conv.get("totalCount").and_then(|v| v.as_i64()), Some(3));
    // Rows are loaded newest-first, so the snapshot is the latest message.
    assert_eq!(
        t1_conv.get("lastMessageText").and_then(|v| v.as_str()),
        Some("respuesta")
    );

    // Reading the t1 thread clears its unread count only.
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "messages.markRead",
        json!({ "readerRole": "student", "readerId": s1, "counterpartyId": t1 }),
    );
    assert_eq!(marked.get("updatedCount").and_then(|v| v.as_i64()), Some(2));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "conversations.forStudent",
        json!({ "studentId": s1 }),
    );
    let convs = result
        .get("conversations")
        .and_then(|v| v.as_array())
        .expect("conversations");
    let t1_conv = convs
        .iter()
        .find(|c| c.get("counterpartyId").and_then(|v| v.as_str()) == Some(t1.as_str()))
        .expect("t1 conversation");
    assert_eq!(t1_conv.get("unreadCount").and_then(|v| v.as_i64()), Some(0));
    let t2_conv = convs
        .iter()
        .find(|c| c.get("counterpartyId").and_then(|v| v.as_str()) == Some(t2.as_str()))
        .expect("t2 conversation");
    assert_eq!(t2_conv.get("unreadCount").and_then(|v| v.as_i64()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_conversations_group_by_subject_student() {
    let workspace = temp_dir("colegio-teacher-convs");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let t1 = create_teacher(&mut stdin, &mut reader, "2", "Marta", "García", "Matemática");
    let s1 = create_student(&mut stdin, &mut reader, "3", "Ana", "Pérez");
    let s2 = create_student(&mut stdin, &mut reader, "4", "Luis", "Rojas");

    send(&mut stdin, &mut reader, "5", "teacher", &t1, "student", &s1, &s1, "para Ana");
    send(&mut stdin, &mut reader, "6", "teacher", &t1, "student", &s1, &s1, "seguimiento");
    send(&mut stdin, &mut reader, "7", "teacher", &t1, "student", &s2, &s2, "para Luis");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "conversations.forTeacher",
        json!({ "teacherId": t1 }),
    );
    let convs = result
        .get("conversations")
        .and_then(|v| v.as_array())
        .expect("conversations");
    assert_eq!(convs.len(), 2);

    // Newest activity first: the s2 thread.
    assert_eq!(
        convs[0].get("counterpartyId").and_then(|v| v.as_str()),
        Some(s2.as_str())
    );
    assert_eq!(
        convs[0].get("counterpartyMeta").and_then(|v| v.as_str()),
        Some("3° A")
    );

    // In the sent-messages direction every unread row counts.
    let s1_conv = &convs[1];
    assert_eq!(s1_conv.get("unreadCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(s1_conv.get("totalCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        s1_conv.get("lastMessageText").and_then(|v| v.as_str()),
        Some("seguimiento")
    );

    // Once the student reads them, the teacher's view reflects it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "messages.markRead",
        json!({ "readerRole": "student", "readerId": s1, "counterpartyId": t1 }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "conversations.forTeacher",
        json!({ "teacherId": t1 }),
    );
    let convs = result
        .get("conversations")
        .and_then(|v| v.as_array())
        .expect("conversations");
    let s1_conv = convs
        .iter()
        .find(|c| c.get("counterpartyId").and_then(|v| v.as_str()) == Some(s1.as_str()))
        .expect("s1 conversation");
    assert_eq!(s1_conv.get("unreadCount").and_then(|v| v.as_i64()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
