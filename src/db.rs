use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("colegio.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            specialty TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            grade TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teacher_id TEXT,
            schedule TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    // Early workspaces predate the free-text schedule column.
    ensure_classes_schedule(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(class_id, student_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender_role TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            recipient_role TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            subject TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_messages_category(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_student ON messages(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_role, sender_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_role, recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(class_id, student_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            score REAL NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_class ON grades(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_classes_schedule(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "schedule")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN schedule TEXT", [])?;
    Ok(())
}

fn ensure_messages_category(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "messages", "category")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE messages ADD COLUMN category TEXT NOT NULL DEFAULT 'general'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
