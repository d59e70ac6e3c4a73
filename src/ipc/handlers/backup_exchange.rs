use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use log::info;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => match state.workspace.as_ref() {
            Some(p) => p.clone(),
            None => return err(&req.id, "bad_params", "missing workspacePath", None),
        },
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    match backup::export_workspace_bundle(&workspace_path, &out_path) {
        Ok(summary) => {
            info!(
                "exported workspace bundle to {}",
                out_path.to_string_lossy()
            );
            ok(
                &req.id,
                json!({
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "dbSha256": summary.db_sha256,
                    "outPath": out_path.to_string_lossy()
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => match state.workspace.as_ref() {
            Some(p) => p.clone(),
            None => return err(&req.id, "bad_params", "missing workspacePath", None),
        },
    };
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing inPath", None),
    };

    // The import replaces the database file underneath any open handle;
    // drop ours first and reopen afterwards if this is the live workspace.
    let is_live = state.workspace.as_deref() == Some(workspace_path.as_path());
    if is_live {
        state.db = None;
    }

    match backup::import_workspace_bundle(&in_path, &workspace_path) {
        Ok(summary) => {
            if is_live {
                match db::open_db(&workspace_path) {
                    Ok(conn) => state.db = Some(conn),
                    Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
                }
            }
            info!(
                "imported workspace bundle from {}",
                in_path.to_string_lossy()
            );
            ok(
                &req.id,
                json!({ "bundleFormatDetected": summary.bundle_format_detected }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn handle_exchange_export_class_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    let class_name: Option<String> = match conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_name) = class_name else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.grade, s.section,
                (SELECT AVG(g.score) FROM grades g
                 WHERE g.class_id = e.class_id AND g.student_id = s.id) AS avg_score,
                (SELECT COUNT(*) FROM attendance a
                 WHERE a.class_id = e.class_id AND a.student_id = s.id
                   AND a.status = 'presente') AS presentes,
                (SELECT COUNT(*) FROM attendance a
                 WHERE a.class_id = e.class_id AND a.student_id = s.id
                   AND a.status = 'ausente') AS ausentes
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, i64>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = String::new();
    out.push_str("studentId,lastName,firstName,grade,section,gradeAverage,presentes,ausentes\n");
    for (id, last, first, grade, section, avg, presentes, ausentes) in &rows {
        let avg_text = avg.map(|v| format!("{:.1}", v)).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            csv_field(id),
            csv_field(last),
            csv_field(first),
            csv_field(grade),
            csv_field(section),
            avg_text,
            presentes,
            ausentes
        ));
    }

    let write_result = (|| -> std::io::Result<()> {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::File::create(&out_path)?;
        f.write_all(out.as_bytes())?;
        f.flush()
    })();
    if let Err(e) = write_result {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "className": class_name,
            "rowCount": rows.len(),
            "outPath": out_path.to_string_lossy()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import(state, req)),
        "exchange.exportClassCsv" => Some(handle_exchange_export_class_csv(state, req)),
        _ => None,
    }
}
