use crate::model::QuestionId;

/// A question as returned by the batch endpoint. Only its presence matters
/// here; content formatting belongs to the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    title: Option<String>,
    text: String,
}

impl Question {
    #[must_use]
    pub fn new(id: QuestionId, title: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            title,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}
