//! HTTP client for the speech and vision extraction providers.

use crate::config::get_config;
use crate::extraction::{ExtractionClient, ExtractionError, json_repair};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

/// Extraction client speaking the hosted speech and vision APIs.
///
/// Transcription posts base64 audio to a `recognize` endpoint and joins the
/// returned segments; structured extraction posts inline media plus an
/// instruction to a `generateContent` endpoint and parses the reply text as
/// JSON, repairing fenced or prose-wrapped objects when needed.
pub struct HttpExtractionClient {
    pub(crate) client: Client,
    pub(crate) transcription_url: String,
    pub(crate) transcription_recognizer: String,
    pub(crate) transcription_api_key: Option<String>,
    pub(crate) extraction_url: String,
    pub(crate) extraction_model: String,
    pub(crate) extraction_api_key: Option<String>,
}

impl HttpExtractionClient {
    /// Construct a new client using configuration derived from the environment.
    pub fn new() -> Result<Self, ExtractionError> {
        let config = get_config();
        let client = Client::builder().user_agent("medscribe/0.3").build()?;
        let transcription_url =
            normalize_base_url(&config.transcription_url).map_err(ExtractionError::InvalidUrl)?;
        let extraction_url =
            normalize_base_url(&config.extraction_url).map_err(ExtractionError::InvalidUrl)?;
        tracing::debug!(
            transcription = %transcription_url,
            extraction = %extraction_url,
            model = %config.extraction_model,
            "Initialized extraction HTTP client"
        );

        Ok(Self {
            client,
            transcription_url,
            transcription_recognizer: config.transcription_recognizer.clone(),
            transcription_api_key: config.transcription_api_key.clone(),
            extraction_url,
            extraction_model: config.extraction_model.clone(),
            extraction_api_key: config.extraction_api_key.clone(),
        })
    }

    fn keyed(
        request: reqwest::RequestBuilder,
        api_key: Option<&String>,
    ) -> reqwest::RequestBuilder {
        match api_key {
            Some(key) if !key.is_empty() => request.header("x-goog-api-key", key),
            _ => request,
        }
    }
}

#[async_trait]
impl ExtractionClient for HttpExtractionClient {
    async fn transcribe(&self, audio: &[u8], mime: &str) -> Result<String, ExtractionError> {
        let url = format_endpoint(
            &self.transcription_url,
            &format!("v2/{}:recognize", self.transcription_recognizer),
        );
        let body = json!({
            "config": { "autoDecodingConfig": {} },
            "content": BASE64.encode(audio),
        });

        tracing::debug!(mime, bytes = audio.len(), "Submitting audio for transcription");
        let response = Self::keyed(
            self.client.post(url),
            self.transcription_api_key.as_ref(),
        )
        .json(&body)
        .send()
        .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::QuotaExhausted(body));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = ExtractionError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Transcription request failed");
            return Err(error);
        }

        let payload: RecognizeResponse = response.json().await?;
        let transcript = payload
            .results
            .iter()
            .filter_map(|result| result.alternatives.first())
            .map(|alternative| alternative.transcript.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        if transcript.is_empty() {
            return Err(ExtractionError::TranscriptEmpty);
        }
        Ok(transcript)
    }

    async fn extract_structured(
        &self,
        media: &[u8],
        mime: &str,
        instruction: &str,
    ) -> Result<Value, ExtractionError> {
        let url = format_endpoint(
            &self.extraction_url,
            &format!("v1beta/models/{}:generateContent", self.extraction_model),
        );
        let body = json!({
            "contents": [{
                "parts": [
                    { "inline_data": { "mime_type": mime, "data": BASE64.encode(media) } },
                    { "text": instruction },
                ]
            }],
            "generationConfig": { "response_mime_type": "application/json" },
        });

        tracing::debug!(mime, bytes = media.len(), "Submitting media for structured extraction");
        let response = Self::keyed(self.client.post(url), self.extraction_api_key.as_ref())
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::QuotaExhausted(body));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.contains("RESOURCE_EXHAUSTED") {
                return Err(ExtractionError::QuotaExhausted(body));
            }
            let error = ExtractionError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Structured extraction request failed");
            return Err(error);
        }

        let payload: GenerateResponse = response.json().await?;
        if let Some(reason) = payload
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
        {
            return Err(ExtractionError::Blocked(reason));
        }

        let Some(candidate) = payload.candidates.first() else {
            return Err(ExtractionError::MalformedReply(
                "provider returned no candidates".into(),
            ));
        };
        if candidate
            .finish_reason
            .as_deref()
            .is_some_and(|reason| reason.eq_ignore_ascii_case("safety"))
        {
            return Err(ExtractionError::Blocked("SAFETY".into()));
        }

        let text: String = candidate
            .content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        json_repair::parse_lenient(&text).ok_or_else(|| {
            let preview: String = text.chars().take(120).collect();
            ExtractionError::MalformedReply(preview)
        })
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client_for(server: &MockServer) -> HttpExtractionClient {
        HttpExtractionClient {
            client: Client::builder()
                .user_agent("medscribe-test")
                .build()
                .expect("client"),
            transcription_url: server.base_url(),
            transcription_recognizer: "projects/demo/locations/global/recognizers/health".into(),
            transcription_api_key: Some("speech-key".into()),
            extraction_url: server.base_url(),
            extraction_model: "vision-1".into(),
            extraction_api_key: None,
        }
    }

    #[tokio::test]
    async fn transcribe_joins_segments_with_single_spaces() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/projects/demo/locations/global/recognizers/health:recognize")
                    .header("x-goog-api-key", "speech-key");
                then.status(200).json_body(json!({
                    "results": [
                        { "alternatives": [ { "transcript": "Took my blood pressure" } ] },
                        { "alternatives": [ { "transcript": "this morning, 120 over 80 " } ] },
                    ]
                }));
            })
            .await;

        let client = client_for(&server);
        let transcript = client
            .transcribe(b"audio-bytes", "audio/mp4")
            .await
            .expect("transcript");

        mock.assert();
        assert_eq!(
            transcript,
            "Took my blood pressure this morning, 120 over 80"
        );
    }

    #[tokio::test]
    async fn transcribe_with_no_segments_is_empty_transcript() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":recognize");
                then.status(200).json_body(json!({ "results": [] }));
            })
            .await;

        let client = client_for(&server);
        let err = client.transcribe(b"silence", "audio/wav").await.unwrap_err();
        assert!(matches!(err, ExtractionError::TranscriptEmpty));
    }

    #[tokio::test]
    async fn rate_limited_transcription_maps_to_quota() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":recognize");
                then.status(429).body("rate limit exceeded");
            })
            .await;

        let client = client_for(&server);
        let err = client.transcribe(b"audio", "audio/mp4").await.unwrap_err();
        assert!(matches!(err, ExtractionError::QuotaExhausted(_)));
    }

    #[tokio::test]
    async fn extraction_parses_the_candidate_text_as_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/vision-1:generateContent");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": { "parts": [
                            { "text": "{\"document_type\": \"blood test\", " },
                            { "text": "\"summary\": \"CBC panel\"}" },
                        ]},
                        "finishReason": "STOP",
                    }]
                }));
            })
            .await;

        let client = client_for(&server);
        let value = client
            .extract_structured(b"pdf-bytes", "application/pdf", "Read this record")
            .await
            .expect("structured value");

        mock.assert();
        assert_eq!(value["document_type"], "blood test");
        assert_eq!(value["summary"], "CBC panel");
    }

    #[tokio::test]
    async fn fenced_reply_is_repaired() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": { "parts": [
                            { "text": "```json\n{\"summary\": \"X-ray, no fracture\"}\n```" },
                        ]},
                    }]
                }));
            })
            .await;

        let client = client_for(&server);
        let value = client
            .extract_structured(b"img", "image/png", "Read this record")
            .await
            .expect("repaired value");
        assert_eq!(value["summary"], "X-ray, no fracture");
    }

    #[tokio::test]
    async fn safety_block_is_fatal_not_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(200).json_body(json!({
                    "candidates": [],
                    "promptFeedback": { "blockReason": "SAFETY" },
                }));
            })
            .await;

        let client = client_for(&server);
        let err = client
            .extract_structured(b"img", "image/jpeg", "Read this record")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Blocked(reason) if reason == "SAFETY"));
    }

    #[tokio::test]
    async fn unusable_reply_text_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": { "parts": [ { "text": "I cannot read this image." } ] },
                    }]
                }));
            })
            .await;

        let client = client_for(&server);
        let err = client
            .extract_structured(b"img", "image/jpeg", "Read this record")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedReply(_)));
    }

    #[tokio::test]
    async fn resource_exhausted_body_maps_to_quota() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(500).body(
                    "{\"error\": {\"status\": \"RESOURCE_EXHAUSTED\", \
                     \"message\": \"Quota exceeded for requests per day\"}}",
                );
            })
            .await;

        let client = client_for(&server);
        let err = client
            .extract_structured(b"img", "image/jpeg", "Read this record")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::QuotaExhausted(_)));
    }
}
