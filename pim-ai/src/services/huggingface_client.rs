//! Hugging Face inference client for variant generation
//!
//! FLUX.1-dev is text-to-image only: the flattened cutout is checked to exist
//! but the variant is generated from the item name and style prompt.

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use super::api_retry::{call_with_retry, throttle, RetryPolicy};
use super::collaborators::{CollaboratorError, VariantGenerator};

const INFERENCE_BASE_URL: &str = "https://router.huggingface.co/hf-inference/models";
const ENHANCEMENT_MODEL: &str = "black-forest-labs/FLUX.1-dev";
const THROTTLE_INTERVAL: Duration = Duration::from_millis(2000);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct TextToImageRequest<'a> {
    inputs: &'a str,
}

pub struct HuggingFaceClient {
    http: reqwest::Client,
    api_token: String,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
}

impl HuggingFaceClient {
    pub fn new(api_token: String) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_token,
            base_url: INFERENCE_BASE_URL.to_string(),
            limiter: throttle(THROTTLE_INTERVAL),
            retry: RetryPolicy::default(),
        })
    }

    async fn text_to_image(&self, prompt: &str) -> Result<Vec<u8>, CollaboratorError> {
        let url = format!("{}/{}", self.base_url, ENHANCEMENT_MODEL);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::ACCEPT, "image/png")
            .json(&TextToImageRequest { inputs: prompt })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(500).collect();
            // Model cold starts report 503 with "loading"
            return Err(if status.as_u16() == 429 || message.to_lowercase().contains("loading") {
                CollaboratorError::RateLimited(message)
            } else {
                CollaboratorError::Api {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(CollaboratorError::EmptyResponse("No image returned".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Generation prompt for one item and style
pub fn variant_prompt(item_name: &str, style: &str) -> String {
    format!(
        "Professional product photograph of {}.\n\
         Place the product on {}.\n\
         High quality commercial photography, professional studio lighting, sharp focus, \
         clean presentation, 4K resolution.",
        item_name, style
    )
}

#[async_trait]
impl VariantGenerator for HuggingFaceClient {
    async fn generate_variant(
        &self,
        item_name: &str,
        flattened_image: &Path,
        style: &str,
    ) -> Result<Vec<u8>, CollaboratorError> {
        if !tokio::fs::try_exists(flattened_image).await? {
            return Err(CollaboratorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", flattened_image.display()),
            )));
        }

        let prompt = variant_prompt(item_name, style);
        tracing::debug!(item = item_name, model = ENHANCEMENT_MODEL, "Hugging Face: generating variant");

        let image = call_with_retry("generate_variant", &self.limiter, &self.retry, || {
            self.text_to_image(&prompt)
        })
        .await?;

        tracing::debug!(item = item_name, bytes = image.len(), "Hugging Face: variant received");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_prompt_mentions_item_and_style() {
        let prompt = variant_prompt("Desk Lamp", "a modern minimalist desk setup with natural wood texture");
        assert!(prompt.starts_with("Professional product photograph of Desk Lamp."));
        assert!(prompt.contains("Place the product on a modern minimalist desk setup"));
    }

    #[test]
    fn test_request_body() {
        let json = serde_json::to_value(TextToImageRequest { inputs: "a mug" }).unwrap();
        assert_eq!(json, serde_json::json!({ "inputs": "a mug" }));
    }

    #[tokio::test]
    async fn test_missing_input_image_is_not_sent() {
        let client = HuggingFaceClient::new("hf_test".to_string()).unwrap();
        let err = client
            .generate_variant("Mug", Path::new("/nonexistent/Mug_flattened.png"), "white")
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Io(_)));
    }
}
