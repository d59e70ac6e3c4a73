use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::Datelike;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include counts and the display form of the schedule so the UI can
    // render a dashboard without extra round trips.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.teacher_id,
           c.schedule,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrolled_count,
           (SELECT t.last_name || ', ' || t.first_name FROM teachers t WHERE t.id = c.teacher_id) AS teacher_name
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let teacher_id: Option<String> = row.get(2)?;
            let raw_schedule: Option<String> = row.get(3)?;
            let enrolled_count: i64 = row.get(4)?;
            let teacher_name: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "schedule": raw_schedule,
                "scheduleDisplay": schedule::format_for_display(raw_schedule.as_deref()),
                "enrolledCount": enrolled_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if let Some(tid) = &teacher_id {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "teacher not found", None);
        }
    }

    // The raw schedule string is stored as typed; unparseable segments are
    // a display concern, not a rejection.
    let raw_schedule = req
        .params
        .get("schedule")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, teacher_id, schedule) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &teacher_id, &raw_schedule),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let patch = req.params.get("patch").cloned().unwrap_or(json!({}));
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        let name = v.trim().to_string();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        sets.push("name = ?");
        values.push(name.into());
    }
    if let Some(v) = patch.get("teacherId") {
        if v.is_null() {
            sets.push("teacher_id = ?");
            values.push(rusqlite::types::Value::Null);
        } else if let Some(tid) = v.as_str() {
            let exists: Option<i64> = match conn
                .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if exists.is_none() {
                return err(&req.id, "not_found", "teacher not found", None);
            }
            sets.push("teacher_id = ?");
            values.push(tid.to_string().into());
        }
    }
    if let Some(v) = patch.get("schedule") {
        if v.is_null() {
            sets.push("schedule = ?");
            values.push(rusqlite::types::Value::Null);
        } else if let Some(s) = v.as_str() {
            sets.push("schedule = ?");
            values.push(s.to_string().into());
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE classes SET {} WHERE id = ?", sets.join(", "));
    values.push(class_id.clone().into());
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (table, sql) in [
        ("attendance", "DELETE FROM attendance WHERE class_id = ?"),
        ("grades", "DELETE FROM grades WHERE class_id = ?"),
        ("enrollments", "DELETE FROM enrollments WHERE class_id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let raw: Option<String> = match conn
        .query_row(
            "SELECT schedule FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let entries = schedule::parse_schedule(raw.as_deref());
    let entries_json: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            json!({
                "day": e.day,
                "start": e.start,
                "end": e.end,
                "weekday": e.weekday()
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "schedule": raw,
            "scheduleDisplay": schedule::format_for_display(raw.as_deref()),
            "entries": entries_json
        }),
    )
}

fn handle_classes_today(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Tests (and UIs rendering a day other than today) pass the weekday
    // explicitly; without it the local clock decides.
    let weekday = match req.params.get("weekday").and_then(|v| v.as_u64()) {
        Some(v) if v <= 6 => v as u32,
        Some(_) => return err(&req.id, "bad_params", "weekday must be 0..=6", None),
        None => chrono::Local::now().weekday().num_days_from_sunday(),
    };

    let mut stmt = match conn.prepare("SELECT id, name, schedule FROM classes ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let raw: Option<String> = row.get(2)?;
            Ok((id, name, raw))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let classes: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, _, raw)| schedule::occurs_on_weekday(raw.as_deref(), weekday))
        .map(|(id, name, raw)| {
            json!({
                "id": id,
                "name": name,
                "scheduleDisplay": schedule::format_for_display(raw.as_deref())
            })
        })
        .collect();

    ok(&req.id, json!({ "weekday": weekday, "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.schedule" => Some(handle_classes_schedule(state, req)),
        "classes.today" => Some(handle_classes_today(state, req)),
        _ => None,
    }
}
