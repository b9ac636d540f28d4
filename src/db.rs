use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS exercises (
            id          INTEGER PRIMARY KEY,
            student_url TEXT UNIQUE NOT NULL CHECK(length(student_url) <= 50),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- exercise_id stays nullable: sentences are not shared between exercises,
        -- but the column never required a parent.
        CREATE TABLE IF NOT EXISTS sentences (
            id          INTEGER PRIMARY KEY,
            exercise_id INTEGER REFERENCES exercises(id),
            position    INTEGER NOT NULL DEFAULT 0,
            text        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sentences_exercise ON sentences(exercise_id);

        CREATE TABLE IF NOT EXISTS tasks (
            id              INTEGER PRIMARY KEY,
            sentence_id     INTEGER NOT NULL REFERENCES sentences(id),
            position        INTEGER NOT NULL DEFAULT 0,
            correct_answer  TEXT NOT NULL CHECK(length(correct_answer) <= 50),
            task_input      TEXT,
            is_completed    BOOLEAN NOT NULL DEFAULT 0,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            UNIQUE(sentence_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_sentence ON tasks(sentence_id);
        ",
    )?;
    Ok(())
}

/// Shared handle to the single SQLite connection used by the HTTP server.
///
/// rusqlite is blocking, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&*conn)
        })
        .await
        .context("Storage task failed")?
    }
}

// ── Writes ──

/// Insert an exercise. `None` means the token is already taken.
pub fn insert_exercise(conn: &Connection, student_url: &str) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO exercises (student_url) VALUES (?1)",
        params![student_url],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

pub fn insert_sentence(
    conn: &Connection,
    text: &str,
    exercise_id: Option<i64>,
    position: usize,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sentences (exercise_id, position, text) VALUES (?1, ?2, ?3)",
        params![exercise_id, position as i64, text],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_task(
    conn: &Connection,
    correct_answer: &str,
    sentence_id: i64,
    position: usize,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO tasks (sentence_id, position, correct_answer) VALUES (?1, ?2, ?3)",
        params![sentence_id, position as i64, correct_answer],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record a learner's answer. A wrong answer bumps `failed_attempts`.
pub fn record_attempt(conn: &Connection, task_id: i64, input: &str, correct: bool) -> Result<()> {
    conn.execute(
        "UPDATE tasks
         SET task_input = ?2,
             is_completed = CASE WHEN ?3 THEN 1 ELSE is_completed END,
             failed_attempts = failed_attempts + CASE WHEN ?3 THEN 0 ELSE 1 END
         WHERE id = ?1",
        params![task_id, input, correct],
    )?;
    Ok(())
}

// ── Reads ──

#[derive(Debug, Clone)]
pub struct ExerciseRow {
    pub id: i64,
    pub student_url: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SentenceRow {
    pub id: i64,
    pub position: i64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub sentence_id: i64,
    pub position: i64,
    pub correct_answer: String,
    pub task_input: Option<String>,
    pub is_completed: bool,
    pub failed_attempts: i64,
}

pub fn fetch_exercise(conn: &Connection, student_url: &str) -> Result<Option<ExerciseRow>> {
    let row = conn
        .query_row(
            "SELECT id, student_url, created_at FROM exercises WHERE student_url = ?1",
            params![student_url],
            |row| {
                Ok(ExerciseRow {
                    id: row.get(0)?,
                    student_url: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn fetch_sentences(conn: &Connection, exercise_id: i64) -> Result<Vec<SentenceRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, position, text
         FROM sentences
         WHERE exercise_id = ?1
         ORDER BY position, id",
    )?;
    let rows = stmt
        .query_map(params![exercise_id], |row| {
            Ok(SentenceRow {
                id: row.get(0)?,
                position: row.get(1)?,
                text: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const TASK_COLUMNS: &str = "t.id, t.sentence_id, t.position, t.correct_answer, t.task_input, \
                            t.is_completed, t.failed_attempts";

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        sentence_id: row.get(1)?,
        position: row.get(2)?,
        correct_answer: row.get(3)?,
        task_input: row.get(4)?,
        is_completed: row.get(5)?,
        failed_attempts: row.get(6)?,
    })
}

/// All tasks of an exercise, in sentence order then gap order.
pub fn fetch_tasks(conn: &Connection, exercise_id: i64) -> Result<Vec<TaskRow>> {
    let sql = format!(
        "SELECT {}
         FROM tasks t
         JOIN sentences s ON s.id = t.sentence_id
         WHERE s.exercise_id = ?1
         ORDER BY s.position, s.id, t.position, t.id",
        TASK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![exercise_id], task_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_task(conn: &Connection, task_id: i64) -> Result<Option<TaskRow>> {
    let sql = format!("SELECT {} FROM tasks t WHERE t.id = ?1", TASK_COLUMNS);
    let row = conn
        .query_row(&sql, params![task_id], task_from_row)
        .optional()?;
    Ok(row)
}

// ── Stats ──

pub struct Stats {
    pub exercises: usize,
    pub sentences: usize,
    pub tasks: usize,
    pub completed: usize,
    pub failed_attempts: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let exercises: usize = conn.query_row("SELECT COUNT(*) FROM exercises", [], |r| r.get(0))?;
    let sentences: usize = conn.query_row("SELECT COUNT(*) FROM sentences", [], |r| r.get(0))?;
    let tasks: usize = conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?;
    let completed: usize = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE is_completed = 1",
        [],
        |r| r.get(0),
    )?;
    let failed_attempts: usize = conn.query_row(
        "SELECT COALESCE(SUM(failed_attempts), 0) FROM tasks",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        exercises,
        sentences,
        tasks,
        completed,
        failed_attempts,
    })
}

#[cfg(test)]
pub fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
