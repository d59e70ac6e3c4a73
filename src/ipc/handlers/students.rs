use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, first_name, last_name, grade, section, active
         FROM students
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let first: String = row.get(1)?;
            let last: String = row.get(2)?;
            let grade: String = row.get(3)?;
            let section: String = row.get(4)?;
            let active: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "firstName": first,
                "lastName": last,
                "displayName": format!("{}, {}", last, first),
                "grade": grade,
                "section": section,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing lastName", None),
    };
    if first.is_empty() || last.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let grade = req
        .params
        .get("grade")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let section = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, grade, section, active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (&student_id, &first, &last, &grade, &section),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        sets.push("first_name = ?");
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        sets.push("last_name = ?");
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("grade").and_then(|v| v.as_str()) {
        sets.push("grade = ?");
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("section").and_then(|v| v.as_str()) {
        sets.push("section = ?");
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        sets.push("active = ?");
        values.push((v as i64).into());
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    values.push(student_id.clone().into());
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (table, sql) in [
        ("attendance", "DELETE FROM attendance WHERE student_id = ?"),
        ("grades", "DELETE FROM grades WHERE student_id = ?"),
        ("enrollments", "DELETE FROM enrollments WHERE student_id = ?"),
        ("messages", "DELETE FROM messages WHERE student_id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollment_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.first_name, s.last_name, s.grade, s.section, s.active
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let first: String = row.get(1)?;
            let last: String = row.get(2)?;
            let grade: String = row.get(3)?;
            let section: String = row.get(4)?;
            let active: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "grade": grade,
                "section": section,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollment_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let Some(student_ids_json) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };
    let student_ids: Vec<String> = student_ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM enrollments WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    let mut enrolled = 0usize;
    for student_id in &student_ids {
        let exists = match tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        if !exists {
            continue;
        }
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO enrollments(class_id, student_id) VALUES(?, ?)",
            (&class_id, student_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            );
        }
        enrolled += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "enrolledCount": enrolled }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "enrollment.list" => Some(handle_enrollment_list(state, req)),
        "enrollment.set" => Some(handle_enrollment_set(state, req)),
        _ => None,
    }
}
