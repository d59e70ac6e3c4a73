use crate::conversations::{self, Counterparty, MessageRecord, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

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

fn get_required_role(params: &serde_json::Value, key: &str) -> Result<Role, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Role::parse(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("{} must be a known role", key),
        details: Some(json!({ "value": raw })),
    })
}

fn message_to_json(msg: &MessageRecord) -> serde_json::Value {
    json!({
        "id": msg.id,
        "senderRole": msg.sender_role.as_str(),
        "senderId": msg.sender_id,
        "recipientRole": msg.recipient_role.as_str(),
        "recipientId": msg.recipient_id,
        "studentId": msg.student_id,
        "category": msg.category,
        "subject": msg.subject,
        "body": msg.body,
        "read": msg.read,
        "createdAt": msg.created_at.to_rfc3339()
    })
}

/// Materialize message rows, newest first. Rows with an unknown role tag
/// or an unparseable timestamp are dropped rather than failing the query.
fn load_messages(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<MessageRecord>, HandlerErr> {
    let sql = format!(
        "SELECT id, sender_role, sender_id, recipient_role, recipient_id,
                student_id, category, subject, body, read, created_at
         FROM messages
         WHERE {}
         ORDER BY created_at DESC",
        where_clause
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let rows = stmt
        .query_map(params, |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, String>(8)?,
                r.get::<_, i64>(9)?,
                r.get::<_, String>(10)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    Ok(rows
        .into_iter()
        .filter_map(
            |(id, s_role, s_id, r_role, r_id, student, category, subject, body, read, created)| {
                let sender_role = Role::parse(&s_role)?;
                let recipient_role = Role::parse(&r_role)?;
                let created_at = DateTime::parse_from_rfc3339(&created)
                    .ok()?
                    .with_timezone(&Utc);
                Some(MessageRecord {
                    id,
                    sender_role,
                    sender_id: s_id,
                    recipient_role,
                    recipient_id: r_id,
                    student_id: student,
                    category,
                    subject,
                    body,
                    read: read != 0,
                    created_at,
                })
            },
        )
        .collect())
}

fn teacher_directory(conn: &Connection) -> Result<HashMap<String, Counterparty>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, first_name, last_name, specialty FROM teachers")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([], |r| {
        let id: String = r.get(0)?;
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        let specialty: String = r.get(3)?;
        Ok((
            id,
            Counterparty {
                display_name: format!("{}, {}", last, first),
                meta: specialty,
            },
        ))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn student_directory(conn: &Connection) -> Result<HashMap<String, Counterparty>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, first_name, last_name, grade, section FROM students")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([], |r| {
        let id: String = r.get(0)?;
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        let grade: String = r.get(3)?;
        let section: String = r.get(4)?;
        Ok((
            id,
            Counterparty {
                display_name: format!("{}, {}", last, first),
                meta: format!("{} {}", grade, section).trim().to_string(),
            },
        ))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn messages_send(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let sender_role = get_required_role(params, "senderRole")?;
    let sender_id = get_required_str(params, "senderId")?;
    let recipient_role = get_required_role(params, "recipientRole")?;
    let recipient_id = get_required_str(params, "recipientId")?;
    let student_id = get_required_str(params, "studentId")?;
    let body = get_required_str(params, "body")?;
    let subject = params
        .get("subject")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let category = params
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("general")
        .to_string();

    if student_id.trim().is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "studentId must not be empty".to_string(),
            details: None,
        });
    }

    let message_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages(id, sender_role, sender_id, recipient_role, recipient_id,
                              student_id, category, subject, body, read, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &message_id,
            sender_role.as_str(),
            &sender_id,
            recipient_role.as_str(),
            &recipient_id,
            &student_id,
            &category,
            &subject,
            &body,
            &created_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "messages" })),
    })?;

    Ok(json!({ "messageId": message_id, "createdAt": created_at }))
}

fn messages_mark_read(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reader_role = get_required_role(params, "readerRole")?;
    let reader_id = get_required_str(params, "readerId")?;
    let counterparty_id = get_required_str(params, "counterpartyId")?;

    let updated = conn
        .execute(
            "UPDATE messages SET read = 1
             WHERE recipient_role = ? AND recipient_id = ? AND sender_id = ? AND read = 0",
            (reader_role.as_str(), &reader_id, &counterparty_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "messages" })),
        })?;

    Ok(json!({ "updatedCount": updated }))
}

fn messages_list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let messages = load_messages(conn, "student_id = ?", &[&student_id])?;
    let out: Vec<serde_json::Value> = messages.iter().map(message_to_json).collect();
    Ok(json!({ "messages": out }))
}

fn messages_list_from_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let messages = load_messages(
        conn,
        "sender_role = 'teacher' AND sender_id = ?",
        &[&teacher_id],
    )?;
    let out: Vec<serde_json::Value> = messages.iter().map(message_to_json).collect();
    Ok(json!({ "messages": out }))
}

fn conversations_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    // Rows arrive newest-first so the grouper's first-seen snapshot is the
    // latest message of each conversation.
    let messages = load_messages(conn, "student_id = ?", &[&student_id])?;
    let teachers = teacher_directory(conn)?;
    let summaries = conversations::group_for_student(&messages, &student_id, &teachers);
    let summaries_json = serde_json::to_value(&summaries).unwrap_or_else(|_| json!([]));
    Ok(json!({ "conversations": summaries_json }))
}

fn conversations_for_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let messages = load_messages(
        conn,
        "sender_role = 'teacher' AND sender_id = ?",
        &[&teacher_id],
    )?;
    let students = student_directory(conn)?;
    let summaries = conversations::group_for_teacher(&messages, &teacher_id, &students);
    let summaries_json = serde_json::to_value(&summaries).unwrap_or_else(|_| json!([]));
    Ok(json!({ "conversations": summaries_json }))
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
        "messages.send" => Some(with_db(state, req, messages_send)),
        "messages.markRead" => Some(with_db(state, req, messages_mark_read)),
        "messages.listForStudent" => Some(with_db(state, req, messages_list_for_student)),
        "messages.listFromTeacher" => Some(with_db(state, req, messages_list_from_teacher)),
        "conversations.forStudent" => Some(with_db(state, req, conversations_for_student)),
        "conversations.forTeacher" => Some(with_db(state, req, conversations_for_teacher)),
        _ => None,
    }
}
