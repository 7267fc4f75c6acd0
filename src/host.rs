#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Interfaces of the systems the grading engine talks to: the store that
//! knows submissions, students and assignments, and the platform hosting
//! pull requests.

use std::{fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::DeclaredTask;

/// Identifies a pull request on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestRef {
    /// Repository owner.
    pub owner:  String,
    /// Repository name.
    pub repo:   String,
    /// Pull request number.
    pub number: u64,
}

impl FromStr for PullRequestRef {
    type Err = anyhow::Error;

    /// Parses `https://<host>/<owner>/<repo>/pull/<number>`.
    fn from_str(url: &str) -> Result<Self> {
        let parts: Vec<&str> = url
            .trim()
            .trim_end_matches('/')
            .split('/')
            .filter(|part| !part.is_empty())
            .collect();

        let [.., owner, repo, kind, number] = parts.as_slice() else {
            bail!("Not a pull request URL: {url}");
        };
        ensure!(
            *kind == "pull" || *kind == "pulls",
            "Not a pull request URL: {url}"
        );

        Ok(Self {
            owner:  owner.to_string(),
            repo:   repo.to_string(),
            number: number
                .parse()
                .with_context(|| format!("Invalid pull request number in {url}"))?,
        })
    }
}

impl Display for PullRequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl Serialize for PullRequestRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!(
            "https://github.com/{}/{}/pull/{}",
            self.owner, self.repo, self.number
        ))
    }
}

impl<'de> Deserialize<'de> for PullRequestRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        url.parse().map_err(serde::de::Error::custom)
    }
}

/// Assignment a submission belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRef {
    /// Assignment identifier in the store.
    pub id:         u64,
    /// Class the assignment was given to; first directory level.
    pub class_name: String,
    /// Index of the assignment within the class; second directory level.
    pub index:      u32,
}

/// A submission waiting to be graded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submission identifier.
    pub id:           u64,
    /// Pull request carrying the student's changes.
    pub pull_request: PullRequestRef,
    /// Assignment being answered.
    pub assignment:   AssignmentRef,
}

/// A student known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRef {
    /// Student number within the class; third directory level.
    pub number: String,
}

impl Submission {
    /// Directory, relative to the working copy, where the student's files
    /// are expected: `{class}/{assignment index}/{student number}`.
    pub fn source_dir(&self, student: &StudentRef) -> PathBuf {
        PathBuf::from(&self.assignment.class_name)
            .join(self.assignment.index.to_string())
            .join(&student.number)
    }
}

/// Grading record kept by the store for each graded submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Submission that was graded.
    pub submission_id: u64,
    /// Points earned.
    pub earned:        i64,
    /// Points available.
    pub possible:      i64,
    /// Report posted to the pull request.
    pub description:   String,
}

/// Data-access layer for submissions, assignments and students.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Loads a submission by id.
    async fn fetch_submission(&self, id: u64) -> Result<Submission>;

    /// Loads the tasks of an assignment, ordered by task number.
    async fn fetch_declared_tasks(&self, assignment: &AssignmentRef) -> Result<Vec<DeclaredTask>>;

    /// Maps a hosting-platform user id to a student, if registered.
    async fn resolve_student(&self, author_id: u64) -> Result<Option<StudentRef>>;

    /// Persists the outcome of a grading run.
    async fn record_review(&self, review: &Review) -> Result<()>;
}

/// Merge-relevant state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullRequestState {
    /// Already merged.
    pub merged:    bool,
    /// The platform reports no conflicts.
    pub mergeable: bool,
}

/// Client for the platform hosting the pull requests.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// User id of the pull request author.
    async fn author_id(&self, pr: &PullRequestRef) -> Result<u64>;

    /// The pull request as a mailbox-style patch.
    async fn patch(&self, pr: &PullRequestRef) -> Result<Vec<u8>>;

    /// Adds a comment to the pull request conversation.
    async fn post_comment(&self, pr: &PullRequestRef, body: &str) -> Result<()>;

    /// Merges the pull request.
    async fn merge(&self, pr: &PullRequestRef) -> Result<()>;

    /// Whether the platform can merge the pull request without conflicts.
    async fn is_mergeable(&self, pr: &PullRequestRef) -> Result<bool>;

    /// Whether the pull request is already merged.
    async fn is_merged(&self, pr: &PullRequestRef) -> Result<bool>;

    /// Closes the pull request without merging.
    async fn close(&self, pr: &PullRequestRef) -> Result<()>;

    /// Merge-relevant state in one call.
    async fn state(&self, pr: &PullRequestRef) -> Result<PullRequestState> {
        Ok(PullRequestState {
            merged:    self.is_merged(pr).await?,
            mergeable: self.is_mergeable(pr).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pull_request_urls() {
        let pr: PullRequestRef = "https://github.com/lifebelt/course-2024/pull/42/"
            .parse()
            .expect("valid url");
        assert_eq!(pr.owner, "lifebelt");
        assert_eq!(pr.repo, "course-2024");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.to_string(), "lifebelt/course-2024#42");
    }

    #[test]
    fn rejects_other_urls() {
        assert!("https://github.com/lifebelt/course".parse::<PullRequestRef>().is_err());
        assert!(
            "https://github.com/lifebelt/course/issues/4"
                .parse::<PullRequestRef>()
                .is_err()
        );
        assert!(
            "https://github.com/lifebelt/course/pull/four"
                .parse::<PullRequestRef>()
                .is_err()
        );
    }

    #[test]
    fn source_dir_follows_class_layout() {
        let submission = Submission {
            id:           7,
            pull_request: "https://github.com/o/r/pull/1".parse().expect("valid url"),
            assignment:   AssignmentRef {
                id:         3,
                class_name: "11b".into(),
                index:      2,
            },
        };
        let student = StudentRef {
            number: "17".into(),
        };
        assert_eq!(submission.source_dir(&student), PathBuf::from("11b/2/17"));
    }
}
