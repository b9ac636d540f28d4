use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::{ExerciseRow, SentenceRow, TaskRow};
use crate::parser::{segments, Segment};

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub queries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// One entry per query; `null` when the site could not be scraped.
    pub sentences: Vec<Option<Vec<String>>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub student_url: String,
    /// Number of submitted sentences.
    pub tasks: usize,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub task_id: i64,
    pub task_answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub id: i64,
    pub result: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExerciseView {
    pub student_url: String,
    pub created_at: String,
    pub sentences: Vec<SentenceView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SentenceView {
    pub id: i64,
    pub segments: Vec<SegmentView>,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentView {
    Text { text: String },
    Gap { position: usize, task_id: Option<i64> },
}

/// Task progress. The correct answer is deliberately left out.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    pub id: i64,
    pub position: i64,
    pub task_input: Option<String>,
    pub is_completed: bool,
    pub failed_attempts: i64,
}

impl ExerciseView {
    pub fn build(exercise: ExerciseRow, sentences: Vec<SentenceRow>, tasks: Vec<TaskRow>) -> Self {
        let mut by_sentence: HashMap<i64, Vec<TaskRow>> = HashMap::new();
        for task in tasks {
            by_sentence.entry(task.sentence_id).or_default().push(task);
        }

        let sentences = sentences
            .into_iter()
            .map(|s| {
                let tasks = by_sentence.remove(&s.id).unwrap_or_default();
                let segments = segments(&s.text)
                    .into_iter()
                    .map(|seg| match seg {
                        Segment::Text(text) => SegmentView::Text { text },
                        Segment::Gap { position } => SegmentView::Gap {
                            position,
                            task_id: tasks
                                .iter()
                                .find(|t| t.position == position as i64)
                                .map(|t| t.id),
                        },
                    })
                    .collect();
                SentenceView {
                    id: s.id,
                    segments,
                    tasks: tasks
                        .into_iter()
                        .map(|t| TaskView {
                            id: t.id,
                            position: t.position,
                            task_input: t.task_input,
                            is_completed: t.is_completed,
                            failed_attempts: t.failed_attempts,
                        })
                        .collect(),
                }
            })
            .collect();

        ExerciseView {
            student_url: exercise.student_url,
            created_at: exercise.created_at,
            sentences,
        }
    }
}
