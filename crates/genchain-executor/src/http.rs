//! HTTP submitter for the remote generation services.
//!
//! Generation and variant jobs are posted as JSON; face-swap and animation
//! jobs are multipart uploads carrying the input images. Every request carries
//! the bearer token and the notification URL. The response is classified into
//! a [`SubmissionOutcome`] by [`classify`].

use async_trait::async_trait;
use bytes::Bytes;
use genchain_config::RemoteConfig;
use genchain_core::submitter::{SubmissionOutcome, SubmissionReceipt, SubmitRequest, Submitter};
use genchain_core::{Error, JobStatus, RemoteId, Result, Stage, StageKind};
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value, json};
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

/// Large uploads over slow links occasionally fail mid-request.
const MAX_ATTEMPTS: u32 = 3;

/// Submitter for the useapi.net family of endpoints.
pub struct HttpSubmitter {
    client: reqwest::Client,
    remote: RemoteConfig,
    token: String,
}

#[derive(Debug)]
enum Payload {
    Json(Value),
    Multipart {
        fields: Vec<(&'static str, String)>,
        files: Vec<(&'static str, String, Bytes)>,
    },
}

impl Payload {
    fn attach(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Payload::Json(body) => builder.json(body),
            Payload::Multipart { fields, files } => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(*name, value.clone());
                }
                for (name, file_name, data) in files {
                    form = form.part(*name, Part::stream(data.clone()).file_name(file_name.clone()));
                }
                builder.multipart(form)
            }
        }
    }
}

impl HttpSubmitter {
    pub fn new(remote: RemoteConfig, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), remote, token)
    }

    pub fn with_client(client: reqwest::Client, remote: RemoteConfig, token: impl Into<String>) -> Self {
        Self {
            client,
            remote,
            token: token.into(),
        }
    }

    fn prompt(&self, prompt: &str) -> String {
        match &self.remote.prompt_suffix {
            Some(suffix) => format!("{prompt}{suffix}"),
            None => prompt.to_string(),
        }
    }

    async fn prepare(&self, request: &SubmitRequest) -> Result<(Url, Payload)> {
        let reply_url = request.notify_url.to_string();

        match &request.stage {
            Stage::Generation { prompt } => Ok((
                endpoint(&self.remote.generation_url, "jobs/imagine")?,
                Payload::Json(json!({
                    "prompt": self.prompt(prompt),
                    "replyUrl": reply_url,
                })),
            )),
            Stage::Variant {
                button,
                parent,
                prompt,
                ..
            } => {
                let parent = parent.as_ref().ok_or_else(|| {
                    Error::InvalidInput(format!("variant {button} has no parent job"))
                })?;
                let mut body = Map::new();
                body.insert("jobid".to_string(), json!(parent));
                // Repeated buttons are keyed `V1-2`, `V1-3`, ...
                let button = button.split('-').next().unwrap_or(button);
                body.insert("button".to_string(), json!(button));
                if let Some(prompt) = prompt {
                    body.insert("prompt".to_string(), json!(self.prompt(prompt)));
                }
                body.insert("replyUrl".to_string(), json!(reply_url));
                Ok((
                    endpoint(&self.remote.generation_url, "jobs/button")?,
                    Payload::Json(Value::Object(body)),
                ))
            }
            Stage::FaceSwap {
                source_image,
                target_image,
            } => {
                let mut fields = vec![("replyUrl", reply_url)];
                if let Some(reference) = &request.correlation_ref {
                    fields.push(("replyRef", reference.clone()));
                }
                let files = vec![
                    read_file("saveid_image", source_image).await?,
                    read_file("swapid_image", target_image).await?,
                ];
                Ok((
                    endpoint(&self.remote.faceswap_url, "swap")?,
                    Payload::Multipart { fields, files },
                ))
            }
            Stage::Animation { image, prompt } => {
                let mut fields = Vec::new();
                if let Some(reference) = &request.correlation_ref {
                    fields.push(("replyRef", reference.clone()));
                }
                fields.push(("replyUrl", reply_url));
                if let Some(prompt) = prompt {
                    fields.push(("prompt", prompt.clone()));
                }
                let files = vec![read_file("image", image).await?];
                Ok((
                    endpoint(&self.remote.animation_url, "animate")?,
                    Payload::Multipart { fields, files },
                ))
            }
        }
    }

    async fn send(&self, url: &Url, payload: &Payload) -> Result<reqwest::Response> {
        let mut attempt = 1;
        loop {
            let builder = self
                .client
                .post(url.clone())
                .header("Authorization", format!("Bearer {}", self.token));

            match payload.attach(builder).send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(%url, attempt, error = %e, "Request failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Error::Submission(format!(
                        "POST {} failed after {} attempts: {}",
                        url, attempt, e
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit(&self, request: SubmitRequest) -> Result<SubmissionOutcome> {
        let kind = request.stage.kind();
        let (url, payload) = self.prepare(&request).await?;
        let response = self.send(&url, &payload).await?;

        let http_status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Submission(format!("reading response from {url}: {e}")))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text));

        debug!(%url, http_status, "Submission response");
        Ok(classify(kind, http_status, body))
    }
}

/// Classify a submission response.
///
/// 429 means the account is at its concurrency ceiling when the service
/// reports executing jobs (face swap always reports this way), and plain
/// rate limiting otherwise. 504 outside face swap is a queue overflow.
pub fn classify(kind: StageKind, http_status: u16, body: Value) -> SubmissionOutcome {
    let face_swap = kind == StageKind::FaceSwap;
    match http_status {
        429 if face_swap || is_truthy(body.get("executingJobs")) => SubmissionOutcome::Full,
        429 => SubmissionOutcome::RateLimited,
        504 if !face_swap => SubmissionOutcome::Overloaded(receipt(http_status, body)),
        _ => SubmissionOutcome::Responded(receipt(http_status, body)),
    }
}

fn receipt(http_status: u16, body: Value) -> SubmissionReceipt {
    let text = |key: &str| match body.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let remote_id = text("jobid").filter(|id| !id.is_empty()).map(RemoteId::from);
    let status = text("status").and_then(|s| JobStatus::from_remote(&s));
    let error = text("error").or_else(|| {
        (!(200..300).contains(&http_status)).then(|| format!("HTTP {http_status}"))
    });
    let error_details = text("errorDetails");

    SubmissionReceipt {
        remote_id,
        status,
        http_status,
        error,
        error_details,
        body: (!body.is_null()).then_some(body),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// `base` joined with `path`, keeping every segment of `base`.
fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| Error::InvalidInput(format!("endpoint {joined}: {e}")))
}

async fn read_file(field: &'static str, path: &Path) -> Result<(&'static str, String, Bytes)> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        Error::Submission(format!("reading {} for {}: {}", path.display(), field, e))
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| field.to_string());
    Ok((field, file_name, Bytes::from(data)))
}
