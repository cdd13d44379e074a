//! Candidate model answering an exam question by question.

use crate::error::Result;
use crate::llm::{LlmClient, Message, Prompts};
use crate::rag::{RagRetriever, format_context};
use crate::sheet::{ExamSheet, Question};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts per question before an empty answer is accepted.
const MAX_EMPTY_RETRIES: usize = 3;

/// Retrieval settings for RAG answering.
#[derive(Clone)]
pub struct Retrieval {
    pub retriever: Arc<RagRetriever>,
    pub top_k: usize,
}

/// Answers an answer sheet with one candidate model.
///
/// Every question gets its own branch of the conversation: the system
/// prompt, then the context of each enclosing group, then the question.
/// Sibling questions never see each other's answers.
pub struct ExamTaker {
    client: LlmClient,
    retrieval: Option<Retrieval>,
}

impl ExamTaker {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            retrieval: None,
        }
    }

    /// Augment every question with chunks from `retrieval`.
    pub fn with_retrieval(client: LlmClient, retrieval: Retrieval) -> Self {
        Self {
            client,
            retrieval: Some(retrieval),
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Fill `answer_field` of every answerable question of a copy of
    /// `answer_sheet`.
    pub async fn answer(&self, answer_sheet: &ExamSheet) -> Result<ExamSheet> {
        let mut filled = answer_sheet.clone();
        let history = vec![Message::system(Prompts::exam_taker_system(
            self.retrieval.is_some(),
        ))];

        self.answer_questions(&mut filled.questions, &history, "")
            .await?;
        Ok(filled)
    }

    async fn answer_questions(
        &self,
        questions: &mut [Question],
        history: &[Message],
        parent_text: &str,
    ) -> Result<()> {
        for question in questions.iter_mut() {
            let mut branch = history.to_vec();

            if question.is_group() {
                let context = self.group_context(question, &mut branch).await?;
                let parent = format!("{} {}", parent_text, question.question_text)
                    .trim()
                    .to_string();
                debug!(question_id = %question.question_id, "Entering group");
                let subs = question.subquestions.as_deref_mut().unwrap_or_default();
                Box::pin(self.answer_questions(subs, &context, &parent)).await?;
                continue;
            }

            if question.is_answerable() {
                self.answer_leaf(question, branch, parent_text).await?;
            }
        }
        Ok(())
    }

    /// Extend `branch` with a group's context and the acknowledgement.
    ///
    /// Plain runs ask the model to acknowledge; RAG runs insert a fixed one.
    async fn group_context<'a>(
        &self,
        group: &Question,
        branch: &'a mut Vec<Message>,
    ) -> Result<&'a [Message]> {
        if self.retrieval.is_some() {
            branch.push(Message::user(Prompts::fill(
                Prompts::group_context_rag(),
                &[("text", group.question_text.as_str())],
            )));
            branch.push(Message::assistant("Understood."));
        } else {
            branch.push(Message::user(Prompts::fill(
                Prompts::group_context(),
                &[("text", group.question_text.as_str())],
            )));
            let reply = self.client.ask(branch).await?;
            branch.push(Message::assistant(reply));
        }
        Ok(branch)
    }

    async fn answer_leaf(
        &self,
        question: &mut Question,
        mut branch: Vec<Message>,
        parent_text: &str,
    ) -> Result<()> {
        let mut prompt =
            Prompts::fill(Prompts::question(), &[("text", question.question_text.as_str())]);

        if let Some(retrieval) = &self.retrieval {
            let query = format!("{} {}", parent_text, question.question_text);
            let chunks = retrieval
                .retriever
                .retrieve(query.trim(), retrieval.top_k)
                .await?;
            prompt.push_str(&format_context(&chunks));
            question.retrieved_chunks = Some(chunks);
        }

        branch.push(Message::user(prompt));

        for attempt in 1..=MAX_EMPTY_RETRIES {
            let reply = self.client.ask(&branch).await?;
            let reply = reply.trim();
            if !reply.is_empty() {
                question.answer_field = Some(reply.to_string());
                return Ok(());
            }
            warn!(
                model = %self.client.model(),
                question_id = %question.question_id,
                "Empty answer (attempt {}/{})",
                attempt,
                MAX_EMPTY_RETRIES
            );
        }

        question.answer_field = Some(String::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::rag::embeddings::testing::KeywordEmbedder;
    use crate::rag::VectorCollection;
    use crate::rag::store::{ChunkMetadata, StoredChunk};
    use crate::sheet::ExamMetadata;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({ "choices": [{ "message": { "content": content } }] })
    }

    fn client(server: &MockServer) -> LlmClient {
        LlmClient::new(LlmConfig {
            api_base: server.uri(),
            api_key: "k".to_string(),
            model: "test/candidate".to_string(),
            max_retries: 1,
            ..Default::default()
        })
    }

    fn exam() -> ExamSheet {
        ExamSheet::new(
            ExamMetadata::new("Informatiker", "1"),
            vec![
                Question::leaf("1", "What does TCP guarantee?"),
                Question::group(
                    "2",
                    "Networking basics",
                    vec![Question::leaf("2a", "Which protocol resolves names?")],
                ),
            ],
        )
    }

    async fn reply_when(server: &MockServer, needle: &str, content: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains(needle))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(content)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_answers_leaves_and_acknowledges_groups() {
        let server = MockServer::start().await;
        reply_when(&server, "resolves names", "DNS").await;
        reply_when(&server, "TCP guarantee", "  Reliable delivery  ").await;
        reply_when(&server, "Networking basics", "Understood").await;

        let taker = ExamTaker::new(client(&server));
        let filled = taker.answer(&exam()).await.unwrap();

        assert_eq!(filled.questions[0].answer_field.as_deref(), Some("Reliable delivery"));
        assert_eq!(filled.questions[1].answer_field, None);
        assert_eq!(
            filled.questions[1].children()[0].answer_field.as_deref(),
            Some("DNS")
        );

        // Group acknowledgement, then one request per leaf.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let last = String::from_utf8_lossy(&requests[2].body).to_string();
        assert!(last.contains("Please confirm you understood the context"));
        assert!(!last.contains("Reliable delivery"));
    }

    #[tokio::test]
    async fn test_empty_answers_are_retried_then_left_empty() {
        let server = MockServer::start().await;
        reply_when(&server, "QUESTION", "   ").await;

        let sheet = ExamSheet::new(
            ExamMetadata::default(),
            vec![Question::leaf("1", "Anything?")],
        );
        let filled = ExamTaker::new(client(&server)).answer(&sheet).await.unwrap();

        assert_eq!(filled.questions[0].answer_field.as_deref(), Some(""));
        assert_eq!(server.received_requests().await.unwrap().len(), MAX_EMPTY_RETRIES);
    }

    #[tokio::test]
    async fn test_api_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = ExamTaker::new(client(&server)).answer(&exam()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rag_answers_carry_chunks() {
        let server = MockServer::start().await;
        reply_when(&server, "QUESTION", "DNS").await;

        let mut collection = VectorCollection::new("rag_Informatiker", "keyword-test");
        collection
            .upsert(vec![StoredChunk {
                id: "dns.md_0".to_string(),
                text: "DNS maps names to addresses.".to_string(),
                metadata: ChunkMetadata {
                    source: "dns.md".to_string(),
                    chunk_index: 0,
                },
                embedding: vec![0.01, 0.01, 1.01, 0.01],
            }])
            .unwrap();
        let retrieval = Retrieval {
            retriever: Arc::new(RagRetriever::new(collection, Arc::new(KeywordEmbedder))),
            top_k: 3,
        };

        let taker = ExamTaker::with_retrieval(client(&server), retrieval);
        let filled = taker.answer(&exam()).await.unwrap();

        let leaf = &filled.questions[1].children()[0];
        assert_eq!(leaf.answer_field.as_deref(), Some("DNS"));
        let chunks = leaf.retrieved_chunks.as_ref().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, "dns.md");

        // The group acknowledgement is fixed, so only leaves hit the API.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let body = String::from_utf8_lossy(&requests[1].body).to_string();
        assert!(body.contains("QUESTION CONTEXT:\\nNetworking basics"));
        assert!(body.contains("RETRIEVED CONTEXT"));
        assert!(body.contains("--- Chunk 1 (Source: dns.md) ---"));
    }
}
