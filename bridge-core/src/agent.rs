//! Agent abstraction: the one seam between bridge-core's transport/session
//! plumbing and what a given deployment's bot actually does. A bridge
//! accepts an [`Agent`] by injection rather than hard-coding a tool
//! catalogue or session parameters, so swapping bots never touches C10/C11.

use std::sync::Arc;

use serde_json::json;

use crate::ai_session::{AiSessionConfig, ToolSpec};
use crate::config::Config;
use crate::function_handler::{AsyncFn, FunctionHandler};

/// Supplies the AI-service session parameters and registers the callable
/// functions a call's [`FunctionHandler`] dispatches to.
pub trait Agent: Send + Sync {
    fn session_config(&self) -> AiSessionConfig;
    fn register_functions(&self, handler: &FunctionHandler);
}

/// The bundled voicebot agent: a minimal, generally useful tool catalogue
/// (`wrap_up`, `transfer_to_human`) that exercises the hang-up-inference
/// path end to end. Deployments with a richer tool catalogue provide their
/// own [`Agent`] and inject it in place of this one.
pub struct VoiceBotAgent {
    config: Arc<Config>,
}

impl VoiceBotAgent {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl Agent for VoiceBotAgent {
    fn session_config(&self) -> AiSessionConfig {
        AiSessionConfig {
            voice_id: self.config.voice_id.clone(),
            temperature: 0.8,
            max_output_tokens: 4096,
            input_sample_rate: 24_000,
            vad_enabled: self.config.vad_enabled,
            transcription_model: "whisper-1".to_string(),
            tools: vec![
                ToolSpec {
                    name: "wrap_up".to_string(),
                    description: "End the call once the caller's request has been fully handled."
                        .to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "summary": { "type": "string", "description": "One-line summary of the outcome." },
                        },
                        "required": ["summary"],
                    }),
                },
                ToolSpec {
                    name: "transfer_to_human".to_string(),
                    description: "Transfer the call to a human agent when the caller asks for one or the request is out of scope.".to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "reference": { "type": "string", "description": "Reference code the human agent can look up." },
                        },
                        "required": ["reference"],
                    }),
                },
            ],
        }
    }

    fn register_functions(&self, handler: &FunctionHandler) {
        handler.register(
            "wrap_up",
            Arc::new(AsyncFn(|args: serde_json::Value| {
                Box::pin(async move {
                    let summary = args.get("summary").and_then(serde_json::Value::as_str).unwrap_or("");
                    log::info!("[VoiceBotAgent] wrap_up: {summary}");
                    json!({ "context": { "stage": "call_complete" } })
                })
            })),
        );
        handler.register(
            "transfer_to_human",
            Arc::new(AsyncFn(|args: serde_json::Value| {
                Box::pin(async move {
                    let reference = args.get("reference").and_then(serde_json::Value::as_str).unwrap_or("unknown");
                    log::info!("[VoiceBotAgent] transfer_to_human: {reference}");
                    json!({ "context": { "stage": "human_transfer", "reference": reference } })
                })
            })),
        );
    }
}
