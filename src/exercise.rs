use anyhow::Context;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::parser::extract_tasks;

/// Length of the public exercise token.
pub const TOKEN_LEN: usize = 50;
/// Longest answer the `tasks.correct_answer` column accepts.
pub const MAX_ANSWER_LEN: usize = 50;
const MAX_TOKEN_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error("sentence {sentence} has an answer longer than {max} characters: {answer:?}", max = MAX_ANSWER_LEN)]
    AnswerTooLong { sentence: usize, answer: String },

    #[error("could not allocate a unique exercise token after {n} attempts", n = MAX_TOKEN_ATTEMPTS)]
    TokenExhausted,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A random token of exactly [`TOKEN_LEN`] lowercase hex characters.
///
/// One v4 UUID only gives 32 hex digits, so UUIDs are concatenated until
/// there is enough and the result is cut to length.
pub fn generate_token() -> String {
    let mut token = String::with_capacity(TOKEN_LEN + 32);
    while token.len() < TOKEN_LEN {
        token.push_str(&Uuid::new_v4().simple().to_string());
    }
    token.truncate(TOKEN_LEN);
    token
}

/// Store an exercise with its sentences and tasks, returning its public token.
///
/// Everything is written in one transaction: either the whole exercise
/// exists afterwards or none of it does.
pub fn create_exercise<S: AsRef<str>>(
    conn: &Connection,
    sentences: &[S],
) -> Result<String, ExerciseError> {
    create_exercise_with(conn, sentences, generate_token)
}

/// [`create_exercise`] with the token source supplied by the caller.
fn create_exercise_with<S, G>(
    conn: &Connection,
    sentences: &[S],
    mut next_token: G,
) -> Result<String, ExerciseError>
where
    S: AsRef<str>,
    G: FnMut() -> String,
{
    for (i, s) in sentences.iter().enumerate() {
        if let Some(answer) = extract_tasks(s.as_ref()).find(|a| a.chars().count() > MAX_ANSWER_LEN) {
            return Err(ExerciseError::AnswerTooLong {
                sentence: i,
                answer: answer.to_string(),
            });
        }
    }

    let tx = conn
        .unchecked_transaction()
        .context("Failed to open exercise transaction")?;

    let (token, exercise_id) = allocate_exercise(&tx, &mut next_token)?;
    info!("New exercise with id: {}", exercise_id);

    for (position, text) in sentences.iter().enumerate() {
        let text = text.as_ref();
        let sentence_id = db::insert_sentence(&tx, text, Some(exercise_id), position)?;
        debug!(
            "Storing tasks for sentence with id {} / exercise id: {}",
            sentence_id, exercise_id
        );
        for (task_position, answer) in extract_tasks(text).enumerate() {
            db::insert_task(&tx, answer, sentence_id, task_position)?;
        }
    }

    tx.commit().context("Failed to commit exercise")?;
    Ok(token)
}

fn allocate_exercise(
    conn: &Connection,
    next_token: &mut impl FnMut() -> String,
) -> Result<(String, i64), ExerciseError> {
    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let token = next_token();
        if let Some(id) = db::insert_exercise(conn, &token)? {
            return Ok((token, id));
        }
        debug!("Exercise token collision, regenerating");
    }
    Err(ExerciseError::TokenExhausted)
}

/// Whether `given` matches the stored answer. Surrounding whitespace is
/// ignored, case is not.
pub fn check_answer(correct: &str, given: &str) -> bool {
    correct.trim() == given.trim()
}

/// Grade a learner's answer against the persisted task.
/// `None` when the task does not exist.
pub fn grade_task(conn: &Connection, task_id: i64, answer: &str) -> anyhow::Result<Option<bool>> {
    let Some(task) = db::fetch_task(conn, task_id)? else {
        return Ok(None);
    };
    let correct = check_answer(&task.correct_answer, answer);
    db::record_attempt(conn, task_id, answer.trim(), correct)?;
    Ok(Some(correct))
}
