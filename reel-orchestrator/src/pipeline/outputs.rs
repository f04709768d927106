//! Parsed step outputs
//!
//! Structured steps answer with one JSON object each. The shapes here are
//! lenient about missing optional fields but strict about the ones later
//! steps depend on.

use serde::{Deserialize, Serialize};

use crate::backend::{ArtifactRef, BackendError};

/// Shot breakdown of one narrative part
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotList {
    #[serde(default)]
    pub shots: Vec<Shot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    /// What the camera sees
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_cue: Option<String>,

    /// Names of the characters in frame
    #[serde(default)]
    pub characters: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Shot {
    /// Text to narrate, dialogue first
    pub fn spoken_text(&self) -> Option<&str> {
        [self.dialogue.as_deref(), self.narration.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|text| !text.is_empty())
    }

    pub fn music_cue(&self) -> Option<&str> {
        self.music_cue
            .as_deref()
            .map(str::trim)
            .filter(|cue| !cue.is_empty())
    }
}

/// Characters and locations appearing in the shots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub characters: Vec<CatalogEntry>,

    #[serde(default)]
    pub locations: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,

    /// Visual description reused in every prompt mentioning the entry
    #[serde(default)]
    pub description: String,
}

impl Catalog {
    pub fn character(&self, name: &str) -> Option<&CatalogEntry> {
        find_entry(&self.characters, name)
    }

    pub fn location(&self, name: &str) -> Option<&CatalogEntry> {
        find_entry(&self.locations, name)
    }

    /// Shot description enriched with the catalog entries it refers to
    pub fn describe(&self, shot: &Shot) -> String {
        let mut text = format!("Shot: {}", shot.description.trim());

        for name in &shot.characters {
            match self.character(name) {
                Some(entry) if !entry.description.is_empty() => {
                    text.push_str(&format!("\nCharacter {}: {}", entry.name, entry.description));
                }
                _ => text.push_str(&format!("\nCharacter {}", name)),
            }
        }

        if let Some(location) = &shot.location {
            match self.location(location) {
                Some(entry) if !entry.description.is_empty() => {
                    text.push_str(&format!("\nLocation {}: {}", entry.name, entry.description));
                }
                _ => text.push_str(&format!("\nLocation {}", location)),
            }
        }

        text
    }
}

fn find_entry<'a>(entries: &'a [CatalogEntry], name: &str) -> Option<&'a CatalogEntry> {
    let name = name.trim();
    entries.iter().find(|e| e.name.trim().eq_ignore_ascii_case(name))
}

/// Positive and negative image prompt for one shot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    pub positive: String,

    #[serde(default)]
    pub negative: String,
}

impl PromptPair {
    pub fn validate(self) -> Result<Self, BackendError> {
        if self.positive.trim().is_empty() {
            return Err(BackendError::MalformedResponse(
                "prompt pair has an empty positive prompt".to_string(),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicCue {
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_bpm: Option<u16>,
}

/// Output of one per-shot sub-unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerShot<T> {
    /// Index into [`RunArtifacts::shots`]
    pub shot: usize,
    pub value: T,
}

/// Everything a run produced, in step order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub story: Option<String>,
    pub parts: Vec<String>,
    pub shots: Vec<Shot>,
    pub catalog: Option<Catalog>,
    pub prompts: Vec<PerShot<PromptPair>>,
    pub narration: Vec<PerShot<String>>,
    pub music: Vec<PerShot<MusicCue>>,
    pub renders: Vec<PerShot<ArtifactRef>>,
}

/// Splits a segmented story into its parts
///
/// Parts are separated by blank lines or `---` rules; part headings such as
/// `Part 2` or `## Part 2: The Storm` start a new part and are dropped.
/// Falls back to the whole text when nothing separates it.
pub fn split_parts(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '-') || is_part_heading(trimmed) {
            flush(&mut current, &mut parts);
        } else {
            current.push(line);
        }
    }
    flush(&mut current, &mut parts);

    if parts.is_empty() && !text.trim().is_empty() {
        parts.push(text.trim().to_string());
    }
    parts
}

fn flush(lines: &mut Vec<&str>, parts: &mut Vec<String>) {
    let part = lines.join("\n").trim().to_string();
    if !part.is_empty() {
        parts.push(part);
    }
    lines.clear();
}

const NUMBER_WORDS: [&str; 10] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

/// `Part 3`, `## Part III: Dawn`, `Part two`
fn is_part_heading(line: &str) -> bool {
    if line.len() > 80 {
        return false;
    }
    let line = line.trim_start_matches('#').trim().to_ascii_lowercase();
    let Some(rest) = line.strip_prefix("part ") else {
        return false;
    };
    let number = rest
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or_default();

    !number.is_empty()
        && (number.chars().all(|c| c.is_ascii_digit())
            || number.chars().all(|c| matches!(c, 'i' | 'v' | 'x'))
            || NUMBER_WORDS.contains(&number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::response::parse_structured;

    #[test]
    fn test_split_parts() {
        let text = "## Part 1: Arrival\nThe ship docks.\nRain falls.\n\nPart 2\nThe storm.\n---\nAfterwards.";
        assert_eq!(
            split_parts(text),
            vec![
                "The ship docks.\nRain falls.".to_string(),
                "The storm.".to_string(),
                "Afterwards.".to_string()
            ]
        );
        assert_eq!(split_parts("One paragraph."), vec!["One paragraph.".to_string()]);
        assert!(split_parts("  \n\n").is_empty());
        assert_eq!(
            split_parts("Part of the crew was gone."),
            vec!["Part of the crew was gone.".to_string()]
        );
    }

    #[test]
    fn test_parse_shot_list_with_optional_fields() {
        let text = r#"```json
{"shots": [
  {"description": "A lighthouse at dusk", "location": "Cliff"},
  {"description": "Ann climbs the stairs", "dialogue": "Who's there?", "characters": ["Ann"], "music_cue": "low strings"}
]}
```"#;
        let list: ShotList = parse_structured(text).unwrap();

        assert_eq!(list.shots.len(), 2);
        assert_eq!(list.shots[0].spoken_text(), None);
        assert_eq!(list.shots[1].spoken_text(), Some("Who's there?"));
        assert_eq!(list.shots[1].music_cue(), Some("low strings"));
    }

    #[test]
    fn test_blank_dialogue_falls_back_to_narration() {
        let shot = Shot {
            description: "x".to_string(),
            dialogue: Some("  ".to_string()),
            narration: Some("Years passed.".to_string()),
            ..Default::default()
        };
        assert_eq!(shot.spoken_text(), Some("Years passed."));
    }

    #[test]
    fn test_catalog_describe() {
        let catalog = Catalog {
            characters: vec![CatalogEntry {
                name: "Ann".to_string(),
                description: "red coat, grey hair".to_string(),
            }],
            locations: vec![],
        };
        let shot = Shot {
            description: "Ann at the window".to_string(),
            characters: vec!["ann".to_string(), "Bob".to_string()],
            location: Some("Kitchen".to_string()),
            ..Default::default()
        };

        assert_eq!(
            catalog.describe(&shot),
            "Shot: Ann at the window\nCharacter Ann: red coat, grey hair\nCharacter Bob\nLocation Kitchen"
        );
    }

    #[test]
    fn test_empty_positive_prompt_is_rejected() {
        let pair = PromptPair {
            positive: " ".to_string(),
            negative: "blurry".to_string(),
        };
        assert!(matches!(pair.validate(), Err(BackendError::MalformedResponse(_))));
    }
}
