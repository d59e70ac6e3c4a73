use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.first_name,
           t.last_name,
           t.specialty,
           t.active,
           (SELECT COUNT(*) FROM classes c WHERE c.teacher_id = t.id) AS class_count
         FROM teachers t
         ORDER BY t.last_name, t.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let first: String = row.get(1)?;
            let last: String = row.get(2)?;
            let specialty: String = row.get(3)?;
            let active: i64 = row.get(4)?;
            let class_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "firstName": first,
                "lastName": last,
                "displayName": format!("{}, {}", last, first),
                "specialty": specialty,
                "active": active != 0,
                "classCount": class_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let specialty = req
        .params
        .get("specialty")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, first_name, last_name, specialty, active)
         VALUES(?, ?, ?, ?, 1)",
        (&teacher_id, &first, &last, &specialty),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
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
    if let Some(v) = patch.get("specialty").and_then(|v| v.as_str()) {
        sets.push("specialty = ?");
        values.push(v.trim().to_string().into());
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        sets.push("active = ?");
        values.push((v as i64).into());
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE teachers SET {} WHERE id = ?", sets.join(", "));
    values.push(teacher_id.clone().into());
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let class_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM classes WHERE teacher_id = ?",
        [&teacher_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_count > 0 {
        return err(
            &req.id,
            "bad_params",
            "teacher still has classes assigned",
            Some(json!({ "classCount": class_count })),
        );
    }

    let affected = match conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "teachers" })),
            )
        }
    };
    if affected == 0 {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
