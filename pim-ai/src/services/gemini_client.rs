//! Gemini API client
//!
//! Identification, best-frame selection and segmentation against
//! `gemini-2.5-flash`; optional variant generation against the image model.
//! All calls are throttled to one per 2.5 s and retried with backoff.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use governor::DefaultDirectRateLimiter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::api_retry::{call_with_retry, throttle, RetryPolicy};
use super::collaborators::{
    BoundingBox, CollaboratorError, ItemIdentifier, SegmentationMask, Segmenter, VariantGenerator,
};
use crate::models::{FrameRef, Item};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TEXT_MODEL: &str = "gemini-2.5-flash";
const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const THROTTLE_INTERVAL: Duration = Duration::from_millis(2500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DATA_URL_PREFIX: &str = "data:image/png;base64,";

const IDENTIFY_PROMPT: &str = r#"Analyze these video frames from a product review/unboxing video.

Your task:
1. Identify ALL distinct products shown in these frames
2. For each product, provide a name and brief description

Return your response as a JSON array with this structure:
[
  {
    "name": "Product Name",
    "description": "Brief description of the product"
  }
]

Only include actual products (not people, backgrounds, or generic items).
Be specific - for example, "iPhone 15 Pro" not just "phone"."#;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .iter()
            .take(1)
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }

    fn first_inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }
}

/// Gemini REST client
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            limiter: throttle(THROTTLE_INTERVAL),
            retry: RetryPolicy::default(),
        })
    }

    async fn generate_once(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, CollaboratorError> {
        let url = format!("{}/{}:generateContent", self.base_url, model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(500).collect();
            return Err(if status.as_u16() == 429 {
                CollaboratorError::RateLimited(message)
            } else {
                CollaboratorError::Api {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| CollaboratorError::Parse(e.to_string()))
    }

    async fn generate(
        &self,
        label: &str,
        model: &str,
        parts: Vec<RequestPart>,
        generation_config: GenerationConfig,
    ) -> Result<GenerateContentResponse, CollaboratorError> {
        let request = GenerateContentRequest {
            contents: vec![RequestContent { role: "user", parts }],
            generation_config,
        };

        call_with_retry(label, &self.limiter, &self.retry, || self.generate_once(model, &request)).await
    }
}

async fn image_part(path: &Path) -> Result<RequestPart, CollaboratorError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(RequestPart::Inline {
        inline_data: InlineData {
            mime_type: mime_type_for(path).to_string(),
            data: BASE64.encode(bytes),
        },
    })
}

fn text_part(text: impl Into<String>) -> RequestPart {
    RequestPart::Text { text: text.into() }
}

/// MIME type from the file extension, JPEG when unknown
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Remove a surrounding Markdown code fence, if any
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn parse_json(text: &str) -> Result<Value, CollaboratorError> {
    serde_json::from_str(strip_code_fences(text)).map_err(|e| CollaboratorError::Parse(e.to_string()))
}

/// Items from an identification response; anything but a JSON array means none
pub fn parse_items(text: &str) -> Result<Vec<Item>, CollaboratorError> {
    let value = parse_json(text)?;
    let Some(entries) = value.as_array() else {
        return Ok(Vec::new());
    };

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let descriptor = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(Item {
                name: name.to_string(),
                descriptor: descriptor.trim().to_string(),
            })
        })
        .collect())
}

/// Chosen frame index, `None` when missing or outside the offered frames
pub fn parse_best_frame_index(text: &str, frame_count: usize) -> Result<Option<usize>, CollaboratorError> {
    let value = parse_json(text)?;
    Ok(value
        .get("best_frame_index")
        .and_then(Value::as_i64)
        .and_then(|idx| usize::try_from(idx).ok())
        .filter(|idx| *idx < frame_count))
}

/// First mask of a segmentation response
pub fn parse_segmentation(text: &str) -> Result<SegmentationMask, CollaboratorError> {
    let value = parse_json(text)?;
    let entry = match &value {
        Value::Array(entries) => entries
            .first()
            .ok_or_else(|| CollaboratorError::EmptyResponse("No segmentation masks returned".to_string()))?,
        other => other,
    };

    let mask = entry
        .get("mask")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mask = mask.strip_prefix(DATA_URL_PREFIX).unwrap_or(mask);
    if mask.is_empty() {
        return Err(CollaboratorError::EmptyResponse(
            "No segmentation mask returned".to_string(),
        ));
    }

    let encoded = BASE64
        .decode(mask)
        .map_err(|e| CollaboratorError::Parse(format!("Failed to decode mask: {}", e)))?;

    let bounding_box = entry.get("box_2d").and_then(Value::as_array).and_then(|coords| {
        let c: Vec<u32> = coords
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v.round().max(0.0) as u32)
            .collect();
        match c.as_slice() {
            [y0, x0, y1, x1] => Some(BoundingBox { y0: *y0, x0: *x0, y1: *y1, x1: *x1 }),
            _ => None,
        }
    });

    Ok(SegmentationMask { encoded, bounding_box })
}

fn json_config(temperature: f32) -> GenerationConfig {
    GenerationConfig {
        response_mime_type: Some("application/json"),
        temperature,
        ..GenerationConfig::default()
    }
}

#[async_trait]
impl ItemIdentifier for GeminiClient {
    async fn identify_items(&self, frames: &[FrameRef]) -> Result<Vec<Item>, CollaboratorError> {
        let mut parts = vec![text_part(IDENTIFY_PROMPT)];
        for frame in frames {
            parts.push(image_part(frame.path()).await?);
        }

        tracing::debug!(frames = frames.len(), "Gemini: identifying products");
        let response = self.generate("identify_items", TEXT_MODEL, parts, json_config(0.4)).await?;
        parse_items(&response.text())
    }

    async fn select_best_frame(
        &self,
        item_name: &str,
        frames: &[FrameRef],
    ) -> Result<Option<FrameRef>, CollaboratorError> {
        if frames.is_empty() {
            return Ok(None);
        }

        let prompt = format!(
            r#"Analyze these video frames to find the best shot of: {name}

Your task:
1. Identify which frame shows the {name} most clearly and prominently
2. The product should be well-lit, in focus, and take up a good portion of the frame
3. Avoid frames where the product is partially obscured or blurry

Return a JSON object with:
{{
  "best_frame_index": <index number 0-{last}>,
  "reason": "Brief explanation of why this frame is best"
}}"#,
            name = item_name,
            last = frames.len() - 1
        );

        let mut parts = vec![text_part(prompt)];
        for (idx, frame) in frames.iter().enumerate() {
            parts.push(text_part(format!("\n--- Frame {} ---", idx)));
            parts.push(image_part(frame.path()).await?);
        }

        let response = self.generate("select_best_frame", TEXT_MODEL, parts, json_config(0.3)).await?;
        let index = parse_best_frame_index(&response.text(), frames.len())?;
        tracing::debug!(item = item_name, ?index, "Gemini: best frame selected");
        Ok(index.map(|i| frames[i].clone()))
    }
}

#[async_trait]
impl Segmenter for GeminiClient {
    async fn segment(&self, item_name: &str, frame: &FrameRef) -> Result<SegmentationMask, CollaboratorError> {
        let prompt = format!(
            "Give the segmentation masks for the {}. Output a JSON list of segmentation masks where each \
             entry contains the 2D bounding box in the key \"box_2d\", the segmentation mask in key \"mask\", \
             and the text label in the key \"label\". Use descriptive labels.",
            item_name
        );
        let parts = vec![text_part(prompt), image_part(frame.path()).await?];

        let config = GenerationConfig {
            temperature: 0.2,
            max_output_tokens: Some(8192),
            thinking_config: Some(ThinkingConfig { thinking_budget: 0 }),
            ..GenerationConfig::default()
        };

        let response = self.generate("segment", TEXT_MODEL, parts, config).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(CollaboratorError::EmptyResponse(
                "Empty segmentation response".to_string(),
            ));
        }
        parse_segmentation(&text)
    }
}

#[async_trait]
impl VariantGenerator for GeminiClient {
    async fn generate_variant(
        &self,
        item_name: &str,
        flattened_image: &Path,
        style: &str,
    ) -> Result<Vec<u8>, CollaboratorError> {
        let prompt = format!(
            "Create a professional product photograph of this {}.\n\n\
             Requirements:\n\
             - Place the product on {}\n\
             - Ensure professional lighting and composition\n\
             - High quality, commercial photography style\n\
             - Sharp focus on the product\n\
             - Clean and attractive presentation",
            item_name, style
        );
        let parts = vec![text_part(prompt), image_part(flattened_image).await?];
        let config = GenerationConfig {
            temperature: 0.7,
            ..GenerationConfig::default()
        };

        let response = self.generate("generate_variant", IMAGE_MODEL, parts, config).await?;
        let inline = response.first_inline_data().ok_or_else(|| {
            CollaboratorError::EmptyResponse("No image returned (possibly rate limited)".to_string())
        })?;

        BASE64
            .decode(&inline.data)
            .map_err(|e| CollaboratorError::Parse(format!("Failed to decode image: {}", e)))
    }
}
