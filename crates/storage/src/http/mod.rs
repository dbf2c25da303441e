//! Adapter for the course backend's REST API.
//!
//! The backend identifies the caller from the bearer token, so the
//! `student_id` arguments of [`ProgressRepository`] are only used to fill in
//! records the server returns without one.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use course_core::model::{
    Assignment, AssignmentId, ProgressRecord, ProgressUpdate, Question, QuestionId, UserId,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::repository::{
    AssignmentRepository, ProgressRepository, QuestionRepository, Storage, StorageError,
};

mod wire;

use wire::{AssignmentWire, ProgressUpdateWire, ProgressWire, QuestionListWire};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reads `COURSE_API_URL` (required) and `COURSE_API_TOKEN`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("COURSE_API_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let token = env::var("COURSE_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        Some(Self {
            base_url,
            token,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Clone)]
pub struct HttpRepository {
    client: Client,
    config: HttpConfig,
}

fn transport(e: reqwest::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn status_error(status: StatusCode) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound,
        StatusCode::CONFLICT => StorageError::Conflict,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Forbidden,
        other => StorageError::HttpStatus(other.as_u16()),
    }
}

impl HttpRepository {
    /// Build a client for the given backend.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(transport)?;
        Ok(Self { client, config })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StorageError> {
        let response = self.authorized(builder).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, url = %response.url(), "course api request failed");
            return Err(status_error(status));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StorageError> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for HttpRepository {
    async fn fetch_assignment(&self, id: AssignmentId) -> Result<Assignment, StorageError> {
        let url = self.config.url(&format!("/api/assignments/{id}"));
        let wire: AssignmentWire = self.json(self.client.get(url)).await?;
        wire.into_assignment()
    }

    async fn release_now(&self, id: AssignmentId) -> Result<Assignment, StorageError> {
        let url = self.config.url(&format!("/api/assignments/{id}/release-now"));
        let wire: AssignmentWire = self.json(self.client.post(url)).await?;
        wire.into_assignment()
    }
}

#[async_trait::async_trait]
impl ProgressRepository for HttpRepository {
    async fn fetch_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let url = self
            .config
            .url(&format!("/api/assignments/{assignment_id}/progress"));
        match self.json::<ProgressWire>(self.client.get(url)).await {
            Ok(wire) => wire.into_record(student_id).map(Some),
            Err(StorageError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn save_progress(
        &self,
        assignment_id: AssignmentId,
        student_id: &UserId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord, StorageError> {
        let url = self
            .config
            .url(&format!("/api/assignments/{assignment_id}/progress"));
        let body = ProgressUpdateWire::from_update(update);
        let wire: ProgressWire = self.json(self.client.put(url).json(&body)).await?;
        wire.into_record(student_id)
    }
}

#[async_trait::async_trait]
impl QuestionRepository for HttpRepository {
    async fn fetch_questions_batch(
        &self,
        ids: &[QuestionId],
    ) -> Result<Vec<Question>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.config.url("/api/questions/batch");
        let body: Vec<u64> = ids.iter().map(QuestionId::value).collect();
        let wire: QuestionListWire = self.json(self.client.post(url).json(&body)).await?;
        Ok(wire.into_ordered(ids))
    }
}

impl Storage {
    /// Build a `Storage` backed by the course REST API.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the HTTP client cannot be built.
    pub fn http(config: HttpConfig) -> Result<Self, StorageError> {
        let repo = HttpRepository::new(config)?;
        let assignments: Arc<dyn AssignmentRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo);
        Ok(Self {
            assignments,
            progress,
            questions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let config = HttpConfig::new("https://courses.example.edu/");
        assert_eq!(
            config.url("/api/assignments/3/progress"),
            "https://courses.example.edu/api/assignments/3/progress"
        );
    }

    #[test]
    fn maps_statuses_onto_storage_errors() {
        assert!(matches!(status_error(StatusCode::NOT_FOUND), StorageError::NotFound));
        assert!(matches!(status_error(StatusCode::FORBIDDEN), StorageError::Forbidden));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY),
            StorageError::HttpStatus(502)
        ));
    }
}
