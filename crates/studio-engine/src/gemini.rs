use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use studio_contracts::images::decode;
use studio_contracts::{EncodedImage, StudioError};

use crate::config::GeminiConfig;
use crate::{enhance_instruction, EditOutcome, InferenceClient};

const DEFAULT_RESULT_MEDIA_TYPE: &str = "image/png";
const ERROR_BODY_MAX_CHARS: usize = 512;

/// Client for the hosted `generateContent` endpoint.
pub struct GeminiClient {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, StudioError> {
        // The blocking client defaults to a 30s timeout; only bound the call
        // when one is configured.
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| StudioError::config(format!("HTTP client setup failed: {err}")))?;
        Ok(Self { config, http })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        let trimmed = self.config.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    pub(crate) fn build_payload(
        image: &EncodedImage,
        instruction: &str,
    ) -> Result<Value, StudioError> {
        // Fail before touching the network if the input cannot be decoded.
        decode(image)?;
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.media_type(),
                            "data": image.payload(),
                        }
                    },
                    { "text": enhance_instruction(instruction) },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        }))
    }

    /// Takes the first inline image of the first candidate.
    pub(crate) fn parse_response(payload: &Value) -> Result<EditOutcome, StudioError> {
        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first());
        let parts = candidate
            .and_then(|row| row.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut texts = Vec::new();
        for part in &parts {
            let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
            if let Some(inline) = inline {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let media_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_RESULT_MEDIA_TYPE);
                return Ok(EditOutcome::Image(EncodedImage::from_base64(
                    media_type, data,
                )?));
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                let text = text.trim();
                if !text.is_empty() {
                    texts.push(text.to_string());
                }
            }
        }

        let note = if !texts.is_empty() {
            Some(texts.join(" "))
        } else if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            Some(format!("blocked: {reason}"))
        } else {
            candidate
                .and_then(|row| row.get("finishReason"))
                .and_then(Value::as_str)
                .map(|reason| format!("finish reason: {reason}"))
        };
        Ok(EditOutcome::NoImageProduced { note })
    }
}

impl InferenceClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, image: &EncodedImage, instruction: &str) -> Result<EditOutcome, StudioError> {
        let payload = Self::build_payload(image, instruction)?;
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&payload)
            .send()
            .map_err(|err| {
                // The URL carries the key as a query parameter.
                StudioError::service(format!("Gemini request failed: {}", err.without_url()))
            })?;
        let response_payload = response_json_or_error(response)?;
        Self::parse_response(&response_payload)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, StudioError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        StudioError::service(format!(
            "Gemini response body read failed: {}",
            err.without_url()
        ))
    })?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        return Err(StudioError::service(format!(
            "Gemini request failed ({code}): {}",
            clip_detail(detail.trim())
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| StudioError::service(format!("Gemini returned invalid JSON payload: {err}")))
}

fn clip_detail(detail: &str) -> String {
    match detail.char_indices().nth(ERROR_BODY_MAX_CHARS) {
        Some((cut, _)) => format!("{}…", &detail[..cut]),
        None => detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use serde_json::{json, Value};
    use studio_contracts::images::encode;
    use studio_contracts::StudioError;

    use super::{clip_detail, GeminiClient};
    use crate::config::GeminiConfig;
    use crate::{EditOutcome, InferenceClient};

    /// Serves exactly one HTTP response and hands back the request line and
    /// body it received.
    fn serve_once(status: &str, body: &str) -> anyhow::Result<(String, mpsc::Receiver<(String, String)>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                return;
            }
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).is_err() {
                    return;
                }
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            if reader.read_exact(&mut body).is_err() {
                return;
            }
            let mut stream = reader.into_inner();
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
            let _ = tx.send((
                request_line.trim_end().to_string(),
                String::from_utf8_lossy(&body).to_string(),
            ));
        });
        Ok((format!("http://{addr}/v1beta"), rx))
    }

    fn client_for(api_base: &str) -> anyhow::Result<GeminiClient> {
        let config = GeminiConfig::from_lookup(|key| match key {
            "API_KEY" => Some("test-key".to_string()),
            "GEMINI_API_BASE" => Some(api_base.to_string()),
            _ => None,
        })?;
        Ok(GeminiClient::new(config)?)
    }

    #[test]
    fn payload_carries_image_and_suffixed_instruction() -> anyhow::Result<()> {
        let image = encode(b"png-bytes", "image/png");
        let payload = GeminiClient::build_payload(&image, "add a hat")?;
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!(image.payload()));
        assert_eq!(parts[1]["text"], json!("add a hat, high quality, detailed"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
        Ok(())
    }

    #[test]
    fn parse_response_takes_first_image_part() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "aGVsbG8="}},
                    {"inlineData": {"mimeType": "image/png", "data": "d29ybGQ="}},
                ]}
            }]
        });
        let outcome = GeminiClient::parse_response(&response)?;
        let EditOutcome::Image(image) = outcome else {
            panic!("expected image outcome");
        };
        assert_eq!(image.media_type(), "image/jpeg");
        assert_eq!(image.payload(), "aGVsbG8=");
        Ok(())
    }

    #[test]
    fn parse_response_accepts_snake_case_and_defaults_media_type() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{"content": {"parts": [{"inline_data": {"data": "aGVsbG8="}}]}}]
        });
        let EditOutcome::Image(image) = GeminiClient::parse_response(&response)? else {
            panic!("expected image outcome");
        };
        assert_eq!(image.media_type(), "image/png");
        Ok(())
    }

    #[test]
    fn parse_response_without_image_reports_no_image() -> anyhow::Result<()> {
        let text_only = json!({
            "candidates": [{"content": {"parts": [{"text": "I can't edit that."}]}}]
        });
        assert_eq!(
            GeminiClient::parse_response(&text_only)?,
            EditOutcome::NoImageProduced {
                note: Some("I can't edit that.".to_string())
            }
        );

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(
            GeminiClient::parse_response(&blocked)?,
            EditOutcome::NoImageProduced {
                note: Some("blocked: SAFETY".to_string())
            }
        );

        assert_eq!(
            GeminiClient::parse_response(&json!({}))?,
            EditOutcome::NoImageProduced { note: None }
        );
        Ok(())
    }

    #[test]
    fn parse_response_rejects_undecodable_image() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "@@@"}}]}}]
        });
        let err = GeminiClient::parse_response(&response).unwrap_err();
        assert!(matches!(err, StudioError::MalformedEncoding(_)));
    }

    #[test]
    fn edit_posts_to_generate_content_and_returns_image() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "ZWRpdGVk"}}
            ]}}]
        })
        .to_string();
        let (api_base, requests) = serve_once("200 OK", &body)?;
        let client = client_for(&api_base)?;

        let outcome = client.edit(&encode(b"input", "image/png"), "add a hat")?;
        assert_eq!(
            outcome,
            EditOutcome::Image(encode(b"edited", "image/png"))
        );

        let (request_line, request_body) = requests.recv()?;
        assert!(request_line.starts_with("POST /v1beta/models/gemini-2.5-flash-image-preview:generateContent?key=test-key"));
        let sent: Value = serde_json::from_str(&request_body)?;
        assert_eq!(
            sent["contents"][0]["parts"][1]["text"],
            json!("add a hat, high quality, detailed")
        );
        Ok(())
    }

    #[test]
    fn edit_surfaces_service_error_message() -> anyhow::Result<()> {
        let body = json!({"error": {"code": 400, "message": "API key not valid."}}).to_string();
        let (api_base, _requests) = serve_once("400 Bad Request", &body)?;
        let client = client_for(&api_base)?;

        let err = client
            .edit(&encode(b"input", "image/png"), "add a hat")
            .unwrap_err();
        assert_eq!(
            err,
            StudioError::service("Gemini request failed (400): API key not valid.")
        );
        Ok(())
    }

    #[test]
    fn long_error_detail_is_clipped_on_a_char_boundary() {
        let detail = "é".repeat(600);
        let clipped = clip_detail(&detail);
        assert_eq!(clipped.chars().count(), 513);
        assert!(clipped.ends_with("é…"));
        assert_eq!(clip_detail("short"), "short");
    }

    #[test]
    fn edit_reports_transport_failure_without_leaking_key() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);
        let client = client_for(&format!("http://{addr}/v1beta"))?;

        let err = client
            .edit(&encode(b"input", "image/png"), "add a hat")
            .unwrap_err();
        assert!(matches!(err, StudioError::InferenceService(_)));
        assert!(!err.to_string().contains("test-key"));
        Ok(())
    }
}
