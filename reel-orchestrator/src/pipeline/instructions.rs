//! System instructions sent with each step

use reel_core::domain::pipeline::StepKind;

/// Source of the system prompt for a step
pub trait StepInstructions: Send + Sync {
    fn instruction(&self, kind: StepKind) -> String;
}

/// Built-in instructions
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInstructions;

impl StepInstructions for DefaultInstructions {
    fn instruction(&self, kind: StepKind) -> String {
        let text = match kind {
            StepKind::Story => {
                "You are a screenwriter. Write a short, vivid story from the premise the user \
                 gives you. Answer with the story text only."
            }
            StepKind::Segmentation => {
                "Split the story into its narrative parts. Start every part with a heading \
                 line of the form `Part N` and keep the original wording."
            }
            StepKind::Shots => {
                "Break the story part into camera shots. Answer with one JSON object: \
                 {\"shots\": [{\"description\": string, \"dialogue\": string|null, \
                 \"narration\": string|null, \"music_cue\": string|null, \
                 \"characters\": [string], \"location\": string|null}]}"
            }
            StepKind::Characters => {
                "List every character and location that appears in the shots with a short \
                 visual description that stays consistent across shots. Answer with one JSON \
                 object: {\"characters\": [{\"name\": string, \"description\": string}], \
                 \"locations\": [{\"name\": string, \"description\": string}]}"
            }
            StepKind::Prompts => {
                "Write an image generation prompt for the shot. Answer with one JSON object: \
                 {\"positive\": string, \"negative\": string}"
            }
            StepKind::Narration => {
                "Rewrite the dialogue or narration of the shot as a line for a voice actor. \
                 Answer with the line only."
            }
            StepKind::Music => {
                "Describe the music for the cue. Answer with one JSON object: \
                 {\"description\": string, \"mood\": string, \"tempo_bpm\": number}"
            }
            StepKind::Render => "",
        };
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_steps_ask_for_json() {
        for kind in StepKind::ORDER {
            let text = DefaultInstructions.instruction(kind);
            assert_eq!(kind.expects_structured(), text.contains("JSON"), "{}", kind);
        }
    }
}
