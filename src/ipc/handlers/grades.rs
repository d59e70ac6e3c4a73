use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let student_id = req
        .params
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let base = "SELECT g.id, g.student_id, g.term, g.score, g.comment, g.created_at,
                       s.last_name || ', ' || s.first_name AS display_name
                FROM grades g
                JOIN students s ON s.id = g.student_id";
    let (sql, params): (String, Vec<String>) = match &student_id {
        Some(sid) => (
            format!(
                "{} WHERE g.class_id = ? AND g.student_id = ? ORDER BY g.term, g.created_at",
                base
            ),
            vec![class_id.clone(), sid.clone()],
        ),
        None => (
            format!("{} WHERE g.class_id = ? ORDER BY g.term, display_name", base),
            vec![class_id.clone()],
        ),
    };

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let term: i64 = row.get(2)?;
            let score: f64 = row.get(3)?;
            let comment: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            let display_name: String = row.get(6)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": display_name,
                "term": term,
                "score": score,
                "comment": comment,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let term = match req.params.get("term").and_then(|v| v.as_i64()) {
        Some(v) if v >= 1 => v,
        Some(_) => return err(&req.id, "bad_params", "term must be positive", None),
        None => return err(&req.id, "bad_params", "missing term", None),
    };
    let score = match req.params.get("score").and_then(|v| v.as_f64()) {
        Some(v) if (0.0..=100.0).contains(&v) => v,
        Some(_) => return err(&req.id, "bad_params", "score must be 0..=100", None),
        None => return err(&req.id, "bad_params", "missing score", None),
    };
    let comment = req
        .params
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let enrolled: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?",
            (&class_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled.is_none() {
        return err(&req.id, "not_found", "student not enrolled in class", None);
    }

    let grade_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, class_id, student_id, term, score, comment, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &class_id,
            &student_id,
            term,
            score,
            &comment,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    ok(&req.id, json!({ "gradeId": grade_id }))
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let grade_id = match req.params.get("gradeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing gradeId", None),
    };

    let affected = match conn.execute("DELETE FROM grades WHERE id = ?", [&grade_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            )
        }
    };
    if affected == 0 {
        return err(&req.id, "not_found", "grade not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.record" => Some(handle_grades_record(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        _ => None,
    }
}
