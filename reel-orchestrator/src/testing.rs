//! Fixtures shared by the pipeline and run service tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reel_core::domain::assignment::{AssignmentTable, ModelAssignment, ModelCandidate};
use reel_core::domain::node::{Capability, CapabilityState, Node, NodeOrigin};
use reel_core::domain::pipeline::{RunOptions, StepKind};

use crate::backend::{Backend, BackendError, BackendResponse, InvocationRequest};
use crate::pipeline::{OrchestratorSettings, PipelineOrchestrator, StepInstructions};
use crate::registry::NodeRegistry;
use crate::router::{CapabilityRouter, Target};

pub(crate) type Answer = dyn Fn(&Target, &InvocationRequest) -> Result<BackendResponse, BackendError>
    + Send
    + Sync;

/// Answers by step name, which [`NamedInstructions`] puts in `system`
pub(crate) struct ScriptedBackend {
    pub answer: Box<Answer>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(
        &self,
        target: &Target,
        request: &InvocationRequest,
    ) -> Result<BackendResponse, BackendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.answer)(target, request)
    }
}

pub(crate) struct NamedInstructions;

impl StepInstructions for NamedInstructions {
    fn instruction(&self, kind: StepKind) -> String {
        kind.name().to_string()
    }
}

pub(crate) fn text(s: &str) -> Result<BackendResponse, BackendError> {
    Ok(BackendResponse::Generated {
        text: s.to_string(),
    })
}

pub(crate) fn happy_answer(target: &Target, request: &InvocationRequest) -> Result<BackendResponse, BackendError> {
    if target.capability == Capability::Render {
        return Ok(BackendResponse::Queued {
            node_id: target.node.id.clone(),
            prompt_id: format!("job-{}", request.input),
        });
    }
    match request.system.as_str() {
        "story" => text("<think>outline</think>The keeper lights the lamp.\n\nA ship appears."),
        "segmentation" => text("Part 1\nThe keeper lights the lamp.\n\nPart 2\nA ship appears."),
        "shots" if request.input.starts_with("Part 1") => text(
            r#"{"shots": [{"description": "Lamp flares", "narration": "Night fell.", "characters": ["Keeper"]}]}"#,
        ),
        "shots" => text(
            r#"```json
{"shots": [{"description": "Ship in fog", "music_cue": "horns", "location": "Sea"}]}
```"#,
        ),
        "characters" => text(
            r#"{"characters": [{"name": "Keeper", "description": "old man"}], "locations": [{"name": "Sea", "description": "grey"}]}"#,
        ),
        "prompts" => text(r#"{"positive": "cinematic", "negative": "blurry"}"#),
        "narration" => text("Night fell over the cliffs."),
        "music" => text(r#"{"description": "low horns", "mood": "ominous", "tempo_bpm": 60}"#),
        other => panic!("unexpected step {}", other),
    }
}

pub(crate) fn registry() -> Arc<NodeRegistry> {
    let registry = Arc::new(NodeRegistry::new());
    registry.upsert(
        Node::new("n1", "10.0.0.5", NodeOrigin::Configured)
            .with_text_gen(CapabilityState::online(
                "http://10.0.0.5:11434",
                vec!["llama3".to_string()],
            ))
            .with_render(CapabilityState::online(
                "http://10.0.0.5:8188",
                vec!["sdxl".to_string()],
            )),
    );
    registry
}

pub(crate) fn assignments() -> AssignmentTable {
    StepKind::ORDER
        .into_iter()
        .map(|kind| {
            let model = if kind == StepKind::Render { "sdxl" } else { "llama3" };
            ModelAssignment::new(kind.name(), vec![ModelCandidate::new("n1", model, 1)])
        })
        .collect()
}

pub(crate) fn orchestrator(
    registry: Arc<NodeRegistry>,
    backend: ScriptedBackend,
    step_timeout: Duration,
) -> PipelineOrchestrator {
    orchestrator_with(registry, backend, step_timeout, assignments())
}

pub(crate) fn orchestrator_with(
    registry: Arc<NodeRegistry>,
    backend: ScriptedBackend,
    step_timeout: Duration,
    assignments: AssignmentTable,
) -> PipelineOrchestrator {
    let router = Arc::new(CapabilityRouter::new(registry, assignments));
    PipelineOrchestrator::new(
        router,
        Arc::new(backend),
        OrchestratorSettings {
            log_retention: 500,
            step_timeout,
        },
    )
    .with_instructions(Arc::new(NamedInstructions))
}

pub(crate) fn all_options() -> RunOptions {
    RunOptions {
        segmentation: true,
        narration: true,
        music: true,
        render: true,
    }
}
