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
fn export_then_import_restores_workspace_data() {
    let workspace = temp_dir("colegio-backup");
    let bundle_out = temp_dir("colegio-backup-out").join("workspace.colegio.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Biología 1°C", "schedule": "Viernes 10:00-11:30" }),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("colegio-workspace-v1")
    );
    let sha = exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("dbSha256");
    assert_eq!(sha.len(), 64);
    assert!(bundle_out.is_file());

    // Wipe the class, then restore from the bundle.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    assert_eq!(
        listed.get("classes").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );
    assert_eq!(
        imported.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("colegio-workspace-v1")
    );

    let listed = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    let classes = listed.get("classes").and_then(|v| v.as_array()).expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(
        classes[0].get("name").and_then(|v| v.as_str()),
        Some("Biología 1°C")
    );
    assert_eq!(
        classes[0].get("scheduleDisplay").and_then(|v| v.as_str()),
        Some("Viernes 10:00-11:30")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    if let Some(parent) = bundle_out.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}
