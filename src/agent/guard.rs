//! Topic denylist applied to questions before reasoning and to answers after.

/// Answer when no indexed passage supports a response.
pub const NO_DOCUMENTATION: &str =
    "I don't have documentation for that topic. I only have Spark, dbt, and Airflow docs.";

/// Replacement for answers that drift onto a denied technology.
pub const OFF_TOPIC_ANSWER: &str = "I can only provide information from the Spark, dbt, and \
    Airflow documentation I have indexed. I cannot answer about other technologies.";

/// Answer when the reasoning loop fails.
pub const SEARCH_FAILED: &str = "I encountered an error searching the documentation. \
    Please rephrase your question about Spark, dbt, or Airflow.";

/// Case-insensitive substring denylist, checked in configured order.
#[derive(Debug, Clone)]
pub struct TopicGuard {
    denied: Vec<String>,
}

impl TopicGuard {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denied: topics
                .into_iter()
                .map(|topic| topic.as_ref().trim().to_lowercase())
                .filter(|topic| !topic.is_empty())
                .collect(),
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.denied
    }

    /// First denied topic mentioned in `text`.
    pub fn first_denied(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.denied
            .iter()
            .find(|topic| lowered.contains(topic.as_str()))
            .map(String::as_str)
    }

    /// Canned refusal for a question that mentions a denied topic.
    pub fn precheck(&self, question: &str) -> Option<String> {
        self.first_denied(question).map(|topic| {
            format!(
                "I don't have {} documentation. I can only help with Apache Spark, dbt, and \
                 Apache Airflow based on the documents I have indexed.",
                capitalize(topic)
            )
        })
    }

    /// Replace an answer that mentions a denied topic.
    pub fn filter_answer(&self, answer: String) -> String {
        match self.first_denied(&answer) {
            Some(topic) => {
                tracing::info!(topic, "answer mentioned a denied topic, replacing");
                OFF_TOPIC_ANSWER.to_string()
            }
            None => answer,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
