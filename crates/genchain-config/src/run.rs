//! Run configuration parsing.
//!
//! ```kdl
//! remote {
//!     generation "https://api.useapi.net/v2"
//!     faceswap "https://api.useapi.net/v1/faceswap"
//!     animation "https://api.useapi.net/v1/pika"
//!     prompt-suffix " --v 6 --s 900"
//! }
//! webhook "https://example.ngrok.app/" listen="0.0.0.0:8081"
//! variants "U1" "U2" "U3" "U4"
//! faceswap source="./source.jpg"
//! animation prompt="smiling and blinking"
//! timing poll-interval=10 rate-limit-pause=10 overload-pause=180
//! output state="./result.json" artifacts="./out"
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_GENERATION_URL: &str = "https://api.useapi.net/v2";
const DEFAULT_FACESWAP_URL: &str = "https://api.useapi.net/v1/faceswap";
const DEFAULT_ANIMATION_URL: &str = "https://api.useapi.net/v1/pika";
const DEFAULT_LISTEN: &str = "0.0.0.0:8081";
const DEFAULT_VARIANTS: [&str; 4] = ["U1", "U2", "U3", "U4"];

/// Everything needed to drive one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub remote: RemoteConfig,
    pub webhook: WebhookConfig,
    /// Child keys seeded under every generation node.
    pub variants: Vec<String>,
    /// Face-swap enhancement; the stage is skipped when absent.
    pub face_swap: Option<FaceSwapConfig>,
    pub animation: AnimationConfig,
    pub timing: TimingConfig,
    pub output: OutputConfig,
}

/// Remote service endpoints.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub generation_url: Url,
    pub faceswap_url: Url,
    pub animation_url: Url,
    /// Appended to every generation and variant prompt.
    pub prompt_suffix: Option<String>,
}

/// Inbound notification endpoint.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Address the remote service posts notifications to.
    pub public_url: Url,
    /// Local address the receiver binds.
    pub listen: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct FaceSwapConfig {
    /// Image providing the face.
    pub source: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct AnimationConfig {
    pub prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Interval between pending-work scans.
    pub poll_interval: Duration,
    /// Pause before retrying a rate-limited submission.
    pub rate_limit_pause: Duration,
    /// Pause after the remote side reports a queue overflow.
    pub overload_pause: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            rate_limit_pause: Duration::from_secs(10),
            overload_pause: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// File the job tree is written to after every mutation.
    pub state_file: PathBuf,
    /// Directory retrieved artifacts are stored in.
    pub artifacts_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("./result.json"),
            artifacts_dir: PathBuf::from("."),
        }
    }
}

/// Parse a run configuration from KDL text.
pub fn parse_run_config(kdl: &str) -> ConfigResult<RunConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut remote = RemoteConfig {
        generation_url: parse_url("remote generation", DEFAULT_GENERATION_URL)?,
        faceswap_url: parse_url("remote faceswap", DEFAULT_FACESWAP_URL)?,
        animation_url: parse_url("remote animation", DEFAULT_ANIMATION_URL)?,
        prompt_suffix: None,
    };
    let mut webhook = None;
    let mut variants: Option<Vec<String>> = None;
    let mut face_swap = None;
    let mut animation = AnimationConfig::default();
    let mut timing = TimingConfig::default();
    let mut output = OutputConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "remote" => parse_remote(node, &mut remote)?,
            "webhook" => webhook = Some(parse_webhook(node)?),
            "variants" => variants = Some(get_all_string_args(node)),
            "faceswap" => {
                let source = get_string_prop(node, "source")
                    .or_else(|| get_first_string_arg(node))
                    .ok_or_else(|| ConfigError::MissingField("faceswap source".to_string()))?;
                face_swap = Some(FaceSwapConfig {
                    source: PathBuf::from(source),
                });
            }
            "animation" => {
                animation.prompt =
                    get_string_prop(node, "prompt").or_else(|| get_first_string_arg(node));
            }
            "timing" => parse_timing(node, &mut timing)?,
            "output" => {
                if let Some(state) = get_string_prop(node, "state") {
                    output.state_file = PathBuf::from(state);
                }
                if let Some(artifacts) = get_string_prop(node, "artifacts") {
                    output.artifacts_dir = PathBuf::from(artifacts);
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let webhook = webhook.ok_or_else(|| ConfigError::MissingField("webhook".to_string()))?;

    let variants =
        variants.unwrap_or_else(|| DEFAULT_VARIANTS.iter().map(|v| v.to_string()).collect());
    let mut seen = HashSet::new();
    for variant in &variants {
        if !seen.insert(variant.as_str()) {
            return Err(ConfigError::Duplicate(format!("variant '{}'", variant)));
        }
    }

    Ok(RunConfig {
        remote,
        webhook,
        variants,
        face_swap,
        animation,
        timing,
        output,
    })
}

fn parse_remote(node: &KdlNode, remote: &mut RemoteConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let field = child.name().value();
        match field {
            "generation" | "faceswap" | "animation" => {
                let value = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField(format!("remote {}", field)))?;
                let url = parse_url(&format!("remote {}", field), &value)?;
                match field {
                    "generation" => remote.generation_url = url,
                    "faceswap" => remote.faceswap_url = url,
                    _ => remote.animation_url = url,
                }
            }
            "prompt-suffix" | "prompt_suffix" => {
                remote.prompt_suffix = get_first_string_arg(child);
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_webhook(node: &KdlNode) -> ConfigResult<WebhookConfig> {
    let public_url = get_first_string_arg(node)
        .or_else(|| get_string_prop(node, "url"))
        .ok_or_else(|| ConfigError::MissingField("webhook url".to_string()))?;
    let public_url = parse_url("webhook url", &public_url)?;

    let listen = get_string_prop(node, "listen").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let listen = listen.parse().map_err(|e| ConfigError::InvalidValue {
        field: "webhook listen".to_string(),
        message: format!("{}", e),
    })?;

    Ok(WebhookConfig { public_url, listen })
}

fn parse_timing(node: &KdlNode, timing: &mut TimingConfig) -> ConfigResult<()> {
    if let Some(d) = get_seconds_prop(node, "poll-interval")? {
        timing.poll_interval = d;
    }
    if let Some(d) = get_seconds_prop(node, "rate-limit-pause")? {
        timing.rate_limit_pause = d;
    }
    if let Some(d) = get_seconds_prop(node, "overload-pause")? {
        timing.overload_pause = d;
    }
    Ok(())
}

fn parse_url(field: &str, value: &str) -> ConfigResult<Url> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{}: {}", value, e),
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// A non-negative number of seconds, integer or fractional.
fn get_seconds_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<Duration>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };

    let seconds = value
        .as_integer()
        .map(|i| i as f64)
        .or_else(|| value.as_float())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: name.to_string(),
            message: "expected a number of seconds".to_string(),
        })?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("must be a non-negative number of seconds, got {}", seconds),
        });
    }

    Ok(Some(Duration::from_secs_f64(seconds)))
}
