//! Folds flat message rows into per-counterparty conversation summaries.
//!
//! The grouper does not re-sort messages within a group: the snapshot
//! fields (`last_message_*`) come from the first message seen per
//! counterparty in input order, and later messages only bump the counters.
//! Callers are responsible for passing rows ordered newest-first so the
//! snapshot really is the latest message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
    Psychologist,
    Director,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Psychologist => "psychologist",
            Role::Director => "director",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "psychologist" => Some(Role::Psychologist),
            "director" => Some(Role::Director),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// One persisted message row, already materialized from storage.
/// `student_id` is the student the message concerns, regardless of which
/// side sent it.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub sender_role: Role,
    pub sender_id: String,
    pub recipient_role: Role,
    pub recipient_id: String,
    pub student_id: String,
    pub category: String,
    pub subject: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Directory entry used to resolve a counterparty id into display fields.
/// `meta` is grade/section for students, specialty for teachers.
#[derive(Debug, Clone)]
pub struct Counterparty {
    pub display_name: String,
    pub meta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub counterparty_id: String,
    pub counterparty_name: String,
    pub counterparty_meta: String,
    pub last_message_text: String,
    pub last_message_at: DateTime<Utc>,
    pub last_message_category: String,
    pub unread_count: i64,
    pub total_count: i64,
}

/// Conversations as seen by one student: one summary per teacher.
///
/// The counterparty is whichever side of the message is a teacher; rows
/// with no identifiable teacher (e.g. system broadcasts) or whose teacher
/// id is missing from `teachers` are skipped. Unread counts only messages
/// addressed to the student that the student has not read.
pub fn group_for_student(
    messages: &[MessageRecord],
    self_student_id: &str,
    teachers: &HashMap<String, Counterparty>,
) -> Vec<ConversationSummary> {
    fold_conversations(messages, teachers, |msg| {
        let counterparty_id = if msg.sender_role == Role::Teacher {
            &msg.sender_id
        } else if msg.recipient_role == Role::Teacher {
            &msg.recipient_id
        } else {
            return None;
        };
        let unread = msg.recipient_role == Role::Student
            && msg.recipient_id == self_student_id
            && !msg.read;
        Some((counterparty_id.clone(), unread))
    })
}

/// Conversations as seen by one teacher: one summary per student.
///
/// Input rows must already be restricted to messages sent by
/// `self_teacher_id`; the counterparty is the message's subject student.
/// Unread here surfaces how many of the teacher's own sent messages the
/// recipient has not read yet.
pub fn group_for_teacher(
    messages: &[MessageRecord],
    self_teacher_id: &str,
    students: &HashMap<String, Counterparty>,
) -> Vec<ConversationSummary> {
    debug_assert!(
        messages.iter().all(|m| m.sender_id == self_teacher_id),
        "caller must restrict rows to sender = self_teacher_id"
    );
    fold_conversations(messages, students, |msg| {
        Some((msg.student_id.clone(), !msg.read))
    })
}

fn fold_conversations<F>(
    messages: &[MessageRecord],
    directory: &HashMap<String, Counterparty>,
    classify: F,
) -> Vec<ConversationSummary>
where
    F: Fn(&MessageRecord) -> Option<(String, bool)>,
{
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, ConversationSummary> = HashMap::new();

    for msg in messages {
        let Some((counterparty_id, unread)) = classify(msg) else {
            continue;
        };
        let Some(info) = directory.get(&counterparty_id) else {
            continue;
        };
        match groups.get_mut(&counterparty_id) {
            Some(summary) => {
                summary.total_count += 1;
                if unread {
                    summary.unread_count += 1;
                }
            }
            None => {
                order.push(counterparty_id.clone());
                groups.insert(
                    counterparty_id.clone(),
                    ConversationSummary {
                        counterparty_id,
                        counterparty_name: info.display_name.clone(),
                        counterparty_meta: info.meta.clone(),
                        last_message_text: msg.body.clone(),
                        last_message_at: msg.created_at,
                        last_message_category: msg.category.clone(),
                        unread_count: if unread { 1 } else { 0 },
                        total_count: 1,
                    },
                );
            }
        }
    }

    let mut out: Vec<ConversationSummary> = order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .collect();
    out.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    out
}
