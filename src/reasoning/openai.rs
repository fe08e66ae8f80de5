#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, ImageDetail, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;
use tracing::debug;

use super::{ExtractPurpose, ExtractRequest, ReasoningService, VisualDescription, VisualRequest};
use crate::{config::OpenAiEnv, document::VisualData, error::ReasoningServiceError, payload};

/// Prompt assets embedded in the binary.
#[derive(Clone)]
struct Prompts {
    /// Shared system prompt with the response layout.
    system:     &'static str,
    /// Assignment structuring instructions.
    assignment: &'static str,
    /// Submission mapping instructions.
    submission: &'static str,
    /// Task evaluation instructions.
    evaluation: &'static str,
    /// Raster visual description instructions.
    visual:     &'static str,
    /// Vector drawing description instructions.
    vector:     &'static str,
}

impl Prompts {
    /// Load prompt templates embedded in the binary.
    fn load() -> Self {
        Self {
            system:     include_str!("prompts/system.md"),
            assignment: include_str!("prompts/assignment.md"),
            submission: include_str!("prompts/submission.md"),
            evaluation: include_str!("prompts/evaluation.md"),
            visual:     include_str!("prompts/visual.md"),
            vector:     include_str!("prompts/vector.md"),
        }
    }

    /// Instructions for one extraction purpose.
    fn for_purpose(&self, purpose: ExtractPurpose) -> &'static str {
        match purpose {
            ExtractPurpose::AssignmentStructure => self.assignment,
            ExtractPurpose::SubmissionMapping => self.submission,
            ExtractPurpose::TaskEvaluation => self.evaluation,
        }
    }
}

/// [`ReasoningService`] backed by an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiService {
    /// API client.
    client:  OpenAIClient<OpenAIConfig>,
    /// Endpoint, models and sampling settings.
    env:     OpenAiEnv,
    /// Embedded prompts.
    prompts: Prompts,
}

impl OpenAiService {
    /// Creates a client for the endpoint described by `env`.
    pub fn new(env: OpenAiEnv) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(env.api_base().to_owned())
                .with_api_key(env.api_key().to_owned()),
        );

        Self {
            client,
            env,
            prompts: Prompts::load(),
        }
    }

    /// Sends one chat completion and returns the first choice's text.
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, ReasoningServiceError> {
        let response = self
            .client
            .chat()
            .create(CreateChatCompletionRequest {
                model: model.to_owned(),
                messages,
                temperature: self.env.temperature(),
                top_p: self.env.top_p(),
                n: Some(1),
                stream: Some(false),
                reasoning_effort: Some(self.env.reasoning_effort()),
                ..Default::default()
            })
            .await
            .map_err(classify)?;

        if let Some(usage) = &response.usage {
            debug!(
                model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion finished"
            );
        }

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ReasoningServiceError::Transient("No content in OpenAI response".into()))
    }

    /// System message carrying the shared response layout.
    fn system_message(&self) -> Result<ChatCompletionRequestMessage, ReasoningServiceError> {
        Ok(ChatCompletionRequestSystemMessageArgs::default()
            .content(self.prompts.system)
            .build()
            .map_err(classify)?
            .into())
    }

    /// Parses a visual description out of raw model text.
    fn parse_description(raw: &str) -> Result<VisualDescription, ReasoningServiceError> {
        let value = payload::extract_json(raw)
            .map_err(|e| ReasoningServiceError::Permanent(e.to_string()))?;
        VisualDescription::from_payload(&value)
            .map_err(|e| ReasoningServiceError::Permanent(e.to_string()))
    }
}

#[async_trait]
impl ReasoningService for OpenAiService {
    async fn structured_extract(
        &self,
        request: &ExtractRequest,
    ) -> Result<Value, ReasoningServiceError> {
        let user = format!(
            "{}\n\n## Expected JSON shape\n\n{}\n\n## Content\n\n{}",
            self.prompts.for_purpose(request.purpose),
            request.schema_hint,
            request.context
        );
        let messages = vec![
            self.system_message()?,
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(classify)?
                .into(),
        ];

        let raw = self.complete(self.env.model(), messages).await?;
        payload::extract_json(&raw).map_err(|e| ReasoningServiceError::Permanent(e.to_string()))
    }

    async fn describe_visual(
        &self,
        request: &VisualRequest,
    ) -> Result<VisualDescription, ReasoningServiceError> {
        let (model, user) = match &request.data {
            VisualData::Raster { media_type, bytes } => {
                let data_url = format!("data:{media_type};base64,{}", STANDARD.encode(bytes));
                let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(self.prompts.visual)
                        .build()
                        .map_err(classify)?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(data_url)
                                .detail(ImageDetail::High)
                                .build()
                                .map_err(classify)?,
                        )
                        .build()
                        .map_err(classify)?
                        .into(),
                ];
                let message = ChatCompletionRequestUserMessageArgs::default()
                    .content(parts)
                    .build()
                    .map_err(classify)?;
                (self.env.vision_model(), message)
            }
            VisualData::Vector(listing) => {
                let instructions = self
                    .prompts
                    .vector
                    .replace("{KIND}", &request.kind.to_string())
                    .replace("{PAGE}", &request.page.to_string());
                let message = ChatCompletionRequestUserMessageArgs::default()
                    .content(format!("{instructions}\n\n## Operators\n\n{listing}"))
                    .build()
                    .map_err(classify)?;
                (self.env.model(), message)
            }
            VisualData::Undecodable(reason) => {
                return Err(ReasoningServiceError::Permanent(format!(
                    "{} cannot be sent to the model: {reason}",
                    request.reference
                )));
            }
        };

        let messages = vec![self.system_message()?, user.into()];
        let raw = self.complete(model, messages).await?;
        Self::parse_description(&raw)
    }
}

/// Sorts API errors into retryable and permanent failures.
fn classify(err: OpenAIError) -> ReasoningServiceError {
    match err {
        OpenAIError::Reqwest(e) => ReasoningServiceError::Transient(e.to_string()),
        OpenAIError::ApiError(api) => {
            let markers = [api.r#type.as_deref(), api.code.as_deref()];
            let retryable = markers.iter().flatten().any(|marker| {
                ["rate_limit", "server_error", "overloaded", "timeout"]
                    .iter()
                    .any(|needle| marker.contains(needle))
            });
            if retryable {
                ReasoningServiceError::Transient(api.message)
            } else {
                ReasoningServiceError::Permanent(api.message)
            }
        }
        other => ReasoningServiceError::Permanent(other.to_string()),
    }
}
