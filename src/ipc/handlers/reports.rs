use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn attendance_tally(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> rusqlite::Result<serde_json::Value> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM attendance
         WHERE class_id = ? AND student_id = ?
         GROUP BY status",
    )?;
    let rows = stmt
        .query_map((class_id, student_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut presente = 0i64;
    let mut ausente = 0i64;
    let mut tarde = 0i64;
    let mut justificado = 0i64;
    for (status, count) in rows {
        match status.as_str() {
            "presente" => presente = count,
            "ausente" => ausente = count,
            "tarde" => tarde = count,
            "justificado" => justificado = count,
            _ => {}
        }
    }
    Ok(json!({
        "presente": presente,
        "ausente": ausente,
        "tarde": tarde,
        "justificado": justificado
    }))
}

fn grade_average(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> rusqlite::Result<Option<f64>> {
    conn.query_row(
        "SELECT AVG(score) FROM grades WHERE class_id = ? AND student_id = ?",
        (class_id, student_id),
        |r| r.get(0),
    )
}

fn handle_reports_class_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let class_row: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT name, schedule FROM classes WHERE id = ?",
            [&class_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_name, raw_schedule)) = class_row else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.grade, s.section, s.active
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let roster = stmt
        .query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, i64>(5)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let roster = match roster {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows_json: Vec<serde_json::Value> = Vec::with_capacity(roster.len());
    for (student_id, last, first, grade, section, active) in roster {
        let average = match grade_average(conn, &class_id, &student_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let attendance = match attendance_tally(conn, &class_id, &student_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        rows_json.push(json!({
            "studentId": student_id,
            "displayName": format!("{}, {}", last, first),
            "grade": grade,
            "section": section,
            "active": active,
            "gradeAverage": average,
            "attendance": attendance
        }));
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "className": class_name,
            "scheduleDisplay": schedule::format_for_display(raw_schedule.as_deref()),
            "rows": rows_json
        }),
    )
}

fn handle_reports_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let student_row: Option<(String, String, String, String)> = match conn
        .query_row(
            "SELECT first_name, last_name, grade, section FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((first, last, grade, section)) = student_row else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, c.schedule
         FROM enrollments e
         JOIN classes c ON c.id = e.class_id
         WHERE e.student_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let classes = stmt
        .query_map([&student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let classes = match classes {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut classes_json: Vec<serde_json::Value> = Vec::with_capacity(classes.len());
    for (class_id, class_name, raw_schedule) in classes {
        let average = match grade_average(conn, &class_id, &student_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let attendance = match attendance_tally(conn, &class_id, &student_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        classes_json.push(json!({
            "classId": class_id,
            "className": class_name,
            "scheduleDisplay": schedule::format_for_display(raw_schedule.as_deref()),
            "gradeAverage": average,
            "attendance": attendance
        }));
    }

    let unread: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE recipient_role = 'student' AND recipient_id = ? AND read = 0",
        [&student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "displayName": format!("{}, {}", last, first),
            "grade": grade,
            "section": section,
            "classes": classes_json,
            "unreadMessages": unread
        }),
    )
}

fn handle_reports_teacher_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let weekday = match req.params.get("weekday").and_then(|v| v.as_u64()) {
        Some(v) if v <= 6 => v as u32,
        Some(_) => return err(&req.id, "bad_params", "weekday must be 0..=6", None),
        None => chrono::Local::now().weekday().num_days_from_sunday(),
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

    let mut stmt = match conn.prepare(
        "SELECT id, name, schedule FROM classes WHERE teacher_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let classes = stmt
        .query_map([&teacher_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let classes = match classes {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let classes_json: Vec<serde_json::Value> = classes
        .into_iter()
        .map(|(class_id, name, raw)| {
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
            json!({
                "classId": class_id,
                "name": name,
                "scheduleDisplay": schedule::format_for_display(raw.as_deref()),
                "entries": entries_json,
                "occursOnWeekday": schedule::occurs_on_weekday(raw.as_deref(), weekday)
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "weekday": weekday,
            "classes": classes_json
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classList" => Some(handle_reports_class_list(state, req)),
        "reports.studentSummary" => Some(handle_reports_student_summary(state, req)),
        "reports.teacherSchedule" => Some(handle_reports_teacher_schedule(state, req)),
        _ => None,
    }
}
