use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    ResponseFormat, ResponseFormatJsonSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::error::AppError;
use common::storage::vector::ChunkMatch;

pub const LEGAL_ANSWER_SYSTEM_PROMPT: &str = "You are a legal research assistant. Answer the \
user's question strictly from the provided context excerpts. Cite the excerpt ids you relied on \
in the references field. If the context is insufficient to answer, say so plainly instead of \
guessing. Never invent citations, statutes, or case names that do not appear in the context.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub reference: String,
}

/// Shape the model is constrained to through the JSON schema response format.
#[derive(Debug, Clone, Deserialize)]
pub struct LLMResponseFormat {
    pub answer: String,
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub references: Vec<String>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

fn round_score(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

pub fn matches_to_context(matches: &[ChunkMatch]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = matches
        .iter()
        .map(|m| {
            json!({
                "id": m.chunk_id,
                "content": m.content,
                "score": round_score(m.score),
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

pub fn create_user_message(question: &str, matches: &[ChunkMatch]) -> String {
    format!(
        r#"Context Information:
==================
{}

User Question:
==================
{}"#,
        matches_to_context(matches),
        question
    )
}

pub fn get_answer_response_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "answer": {
                "type": "string",
                "description": "The answer to the user's question, grounded in the context excerpts"
            },
            "references": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "reference": {
                            "type": "string",
                            "description": "Id of a context excerpt the answer relies on"
                        }
                    },
                    "required": ["reference"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["answer", "references"],
        "additionalProperties": false
    })
}

pub fn create_chat_request(
    user_message: String,
    model: &str,
) -> Result<CreateChatCompletionRequest, AppError> {
    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("A grounded legal answer with excerpt references".to_string()),
            name: "legal_answer".to_string(),
            schema: Some(get_answer_response_schema()),
            strict: Some(true),
        },
    };

    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(LEGAL_ANSWER_SYSTEM_PROMPT).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()
        .map_err(|e| AppError::Generation(e.to_string()))
}

pub fn process_response(
    response: CreateChatCompletionResponse,
) -> Result<GeneratedAnswer, AppError> {
    let model = response.model.clone();
    let (prompt_tokens, completion_tokens) = response
        .usage
        .as_ref()
        .map(|usage| (usage.prompt_tokens, usage.completion_tokens))
        .unwrap_or((0, 0));

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| AppError::Generation("model returned no content".to_string()))?;

    let parsed: LLMResponseFormat = serde_json::from_str(&content)
        .map_err(|e| AppError::Generation(format!("failed to parse model response: {e}")))?;

    Ok(GeneratedAnswer {
        answer: parsed.answer,
        references: parsed
            .references
            .into_iter()
            .map(|r| r.reference)
            .collect(),
        model,
        prompt_tokens,
        completion_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn matched(id: &str, score: f32) -> ChunkMatch {
        ChunkMatch {
            chunk_id: id.to_string(),
            content: format!("excerpt from {id}"),
            metadata: HashMap::new(),
            score,
        }
    }

    #[test]
    fn test_user_message_contains_context_and_question() {
        let message = create_user_message("What is adverse possession?", &[matched("c1", 0.91)]);
        assert!(message.contains("Context Information:"));
        assert!(message.contains("User Question:"));
        assert!(message.contains("What is adverse possession?"));
        assert!(message.contains("c1"));
    }

    #[test]
    fn test_context_scores_are_rounded() {
        let context = matches_to_context(&[matched("c1", 0.123_456)]);
        assert_eq!(context[0]["score"], json!(0.123));
    }

    #[test]
    fn test_schema_requires_answer_and_references() {
        let schema = get_answer_response_schema();
        assert_eq!(schema["type"], "object");
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("answer")));
        assert!(required.contains(&json!("references")));
        assert_eq!(schema["additionalProperties"], json!(false));
    }

    #[test]
    fn test_create_chat_request_sets_model_and_messages() {
        let request = create_chat_request("hello".to_string(), "gpt-4o-mini").unwrap();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 2);
    }

    #[test]
    fn test_process_response_extracts_answer_and_usage() {
        let payload = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "{\"answer\":\"Possession under claim of right.\",\"references\":[{\"reference\":\"c1\"}]}"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 5,
                "total_tokens": 15
            }
        });
        let response: CreateChatCompletionResponse = serde_json::from_value(payload).unwrap();

        let answer = process_response(response).unwrap();
        assert_eq!(answer.answer, "Possession under claim of right.");
        assert_eq!(answer.references, vec!["c1".to_string()]);
        assert_eq!(answer.model, "gpt-4o-mini");
        assert_eq!(answer.prompt_tokens, 10);
        assert_eq!(answer.completion_tokens, 5);
    }

    #[test]
    fn test_process_response_rejects_missing_content() {
        let payload = json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": null },
                "finish_reason": "stop"
            }]
        });
        let response: CreateChatCompletionResponse = serde_json::from_value(payload).unwrap();

        let err = process_response(response).unwrap_err();
        assert_eq!(err.code(), "generation_provider_error");
    }
}
