use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const VALID_STATUSES: [&str; 4] = ["presente", "ausente", "tarde", "justificado"];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: None,
    })
}

fn parse_optional_status(v: Option<&serde_json::Value>) -> Result<Option<String>, HandlerErr> {
    let Some(v) = v else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be string or null".to_string(),
            details: None,
        });
    };
    let t = s.trim().to_lowercase();
    if t.is_empty() {
        return Ok(None);
    }
    if !VALID_STATUSES.contains(&t.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("status must be one of {}", VALID_STATUSES.join("|")),
            details: None,
        });
    }
    Ok(Some(t))
}

fn class_schedule(conn: &Connection, class_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT schedule FROM classes WHERE id = ?",
        [class_id],
        |r| r.get::<_, Option<String>>(0),
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "class not found".to_string(),
        details: None,
    })
}

fn student_enrolled(conn: &Connection, class_id: &str, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?",
        (class_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date_key = get_required_str(params, "date")?;
    let date = parse_date(&date_key)?;
    let weekday = date.weekday().num_days_from_sunday();

    let raw_schedule = class_schedule(conn, &class_id)?;
    let scheduled = schedule::occurs_on_weekday(raw_schedule.as_deref(), weekday);

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.active
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let roster = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let active: i64 = r.get(3)?;
            Ok((id, format!("{}, {}", last, first), active != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let mut by_student: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT student_id, status FROM attendance WHERE class_id = ? AND date = ?")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map((&class_id, &date_key), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    for (student_id, status) in rows {
        by_student.insert(student_id, status);
    }

    let rows_json: Vec<serde_json::Value> = roster
        .iter()
        .map(|(id, display_name, active)| {
            json!({
                "studentId": id,
                "displayName": display_name,
                "active": active,
                "status": by_student.get(id)
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "date": date_key,
        "weekday": weekday,
        "scheduledOnDate": scheduled,
        "scheduleDisplay": schedule::format_for_display(raw_schedule.as_deref()),
        "rows": rows_json
    }))
}

fn attendance_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let date_key = get_required_str(params, "date")?;
    parse_date(&date_key)?;
    let status = parse_optional_status(params.get("status"))?;

    class_schedule(conn, &class_id)?;
    if !student_enrolled(conn, &class_id, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not enrolled in class".to_string(),
            details: None,
        });
    }

    match status {
        Some(status) => {
            conn.execute(
                "INSERT INTO attendance(class_id, student_id, date, status)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(class_id, student_id, date) DO UPDATE SET
                   status = excluded.status",
                (&class_id, &student_id, &date_key, &status),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance" })),
            })?;
        }
        None => {
            conn.execute(
                "DELETE FROM attendance WHERE class_id = ? AND student_id = ? AND date = ?",
                (&class_id, &student_id, &date_key),
            )
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance" })),
            })?;
        }
    }

    Ok(json!({ "ok": true }))
}

fn attendance_bulk_stamp(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date_key = get_required_str(params, "date")?;
    parse_date(&date_key)?;
    let status = parse_optional_status(params.get("status"))?;
    let Some(student_ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing studentIds".to_string(),
            details: None,
        });
    };
    let student_ids: Vec<String> = student_ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    class_schedule(conn, &class_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut stamped = 0usize;
    for student_id in student_ids {
        let enrolled = tx
            .query_row(
                "SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?",
                (&class_id, &student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?
            .is_some();
        if !enrolled {
            continue;
        }
        match &status {
            Some(status) => {
                tx.execute(
                    "INSERT INTO attendance(class_id, student_id, date, status)
                     VALUES(?, ?, ?, ?)
                     ON CONFLICT(class_id, student_id, date) DO UPDATE SET
                       status = excluded.status",
                    (&class_id, &student_id, &date_key, status),
                )
                .map_err(|e| HandlerErr {
                    code: "db_update_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "attendance" })),
                })?;
            }
            None => {
                tx.execute(
                    "DELETE FROM attendance WHERE class_id = ? AND student_id = ? AND date = ?",
                    (&class_id, &student_id, &date_key),
                )
                .map_err(|e| HandlerErr {
                    code: "db_delete_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "attendance" })),
                })?;
            }
        }
        stamped += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "stampedCount": stamped }))
}

fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_db(state, req, attendance_day_open)),
        "attendance.setStatus" => Some(with_db(state, req, attendance_set_status)),
        "attendance.bulkStamp" => Some(with_db(state, req, attendance_bulk_stamp)),
        _ => None,
    }
}
