#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! A [`SubmissionStore`] backed by a JSON file.
//!
//! ```json
//! {
//!   "submissions": [{ "id": 1, "pull_request": "https://github.com/o/r/pull/7",
//!                     "assignment": { "id": 3, "class_name": "10a", "index": 2 } }],
//!   "assignments": [{ "id": 3, "tasks": [{ "number": 1, "points": 10, "tests": [] }] }],
//!   "students":    [{ "account_id": 123, "number": "17" }]
//! }
//! ```
//!
//! Reviews are appended, one JSON object per line, to a file next to the
//! catalogue named `<catalogue>.reviews.jsonl`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

use crate::{
    host::{AssignmentRef, Review, StudentRef, Submission, SubmissionStore},
    types::DeclaredTask,
};

/// Tasks of one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEntry {
    /// Assignment identifier.
    pub id:    u64,
    /// Declared tasks.
    #[serde(default)]
    pub tasks: Vec<DeclaredTask>,
}

/// A registered student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentEntry {
    /// Hosting platform account id.
    pub account_id: u64,
    /// Student number within the class.
    pub number:     String,
}

/// Everything the catalogue file holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogueData {
    /// Submissions waiting to be graded.
    #[serde(default)]
    pub submissions: Vec<Submission>,
    /// Assignments and their tasks.
    #[serde(default)]
    pub assignments: Vec<AssignmentEntry>,
    /// Registered students.
    #[serde(default)]
    pub students:    Vec<StudentEntry>,
}

/// JSON-file submission store.
#[derive(Debug)]
pub struct FileCatalogue {
    /// Parsed catalogue.
    data:         CatalogueData,
    /// Where reviews are appended.
    reviews_path: PathBuf,
    /// Serializes appends from concurrent jobs.
    write_lock:   Mutex<()>,
}

impl FileCatalogue {
    /// Reads the catalogue at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Could not read catalogue {}", path.display()))?;
        let data: CatalogueData = serde_json::from_str(&text)
            .with_context(|| format!("Invalid catalogue {}", path.display()))?;

        let mut reviews = path.as_os_str().to_owned();
        reviews.push(".reviews.jsonl");
        Ok(Self::new(data, PathBuf::from(reviews)))
    }

    /// Wraps already parsed data, appending reviews to `reviews_path`.
    pub fn new(data: CatalogueData, reviews_path: PathBuf) -> Self {
        Self {
            data,
            reviews_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Tasks of the assignment `id`, ordered by task number.
    pub fn tasks_for(&self, id: u64) -> Result<Vec<DeclaredTask>> {
        let entry = self
            .data
            .assignments
            .iter()
            .find(|assignment| assignment.id == id)
            .with_context(|| format!("Assignment {id} is not in the catalogue"))?;

        let mut tasks = entry.tasks.clone();
        tasks.sort_by_key(|task| task.number);
        Ok(tasks)
    }

    /// File reviews are appended to.
    pub fn reviews_path(&self) -> &Path {
        &self.reviews_path
    }
}

#[async_trait]
impl SubmissionStore for FileCatalogue {
    async fn fetch_submission(&self, id: u64) -> Result<Submission> {
        self.data
            .submissions
            .iter()
            .find(|submission| submission.id == id)
            .cloned()
            .with_context(|| format!("Submission {id} is not in the catalogue"))
    }

    async fn fetch_declared_tasks(&self, assignment: &AssignmentRef) -> Result<Vec<DeclaredTask>> {
        self.tasks_for(assignment.id)
    }

    async fn resolve_student(&self, author_id: u64) -> Result<Option<StudentRef>> {
        Ok(self
            .data
            .students
            .iter()
            .find(|student| student.account_id == author_id)
            .map(|student| StudentRef {
                number: student.number.clone(),
            }))
    }

    async fn record_review(&self, review: &Review) -> Result<()> {
        let mut line = serde_json::to_string(review).context("Could not serialize review")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.reviews_path)
            .await
            .with_context(|| format!("Could not open {}", self.reviews_path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Could not write {}", self.reviews_path.display()))?;
        file.flush().await?;

        debug!(submission = review.submission_id, path = %self.reviews_path.display(), "review recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Catalogue with one submission, one assignment and one student.
    const CATALOGUE: &str = r#"{
        "submissions": [{
            "id": 1,
            "pull_request": "https://github.com/school/c-course/pull/7",
            "assignment": { "id": 3, "class_name": "10a", "index": 2 }
        }],
        "assignments": [{
            "id": 3,
            "tasks": [
                { "number": 2, "points": 5, "tests": [{ "expected": "ok" }] },
                { "number": 1, "title": "Sum", "points": 10,
                  "tests": [{ "input": "1 2", "expected": "3" }] }
            ]
        }],
        "students": [{ "account_id": 123, "number": "17" }]
    }"#;

    #[tokio::test]
    async fn loads_and_answers_queries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("catalogue.json");
        tokio::fs::write(&path, CATALOGUE).await?;

        let catalogue = FileCatalogue::load(&path).await?;
        let submission = catalogue.fetch_submission(1).await?;
        assert_eq!(submission.pull_request.number, 7);

        let tasks = catalogue.fetch_declared_tasks(&submission.assignment).await?;
        assert_eq!(tasks.iter().map(|t| t.number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(tasks[1].tests[0].input, "");

        let student = catalogue.resolve_student(123).await?.expect("registered");
        assert_eq!(submission.source_dir(&student), PathBuf::from("10a/2/17"));
        assert!(catalogue.resolve_student(999).await?.is_none());
        assert!(catalogue.fetch_submission(2).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn reviews_are_appended_as_json_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("catalogue.json");
        tokio::fs::write(&path, CATALOGUE).await?;
        let catalogue = FileCatalogue::load(&path).await?;

        for earned in [3, 15] {
            catalogue
                .record_review(&Review {
                    submission_id: 1,
                    earned,
                    possible: 15,
                    description: "report".into(),
                })
                .await?;
        }

        let written = tokio::fs::read_to_string(dir.path().join("catalogue.json.reviews.jsonl")).await?;
        let reviews: Vec<Review> = written
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[1].earned, 15);
        Ok(())
    }
}
