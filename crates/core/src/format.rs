//! Deterministic scene-to-text formatting for embeddings and for agent
//! prompts. Both functions are pure: they must depend only on their input,
//! because §8.2 (embedding determinism) and the boneyard-stability
//! invariant rely on it.

use crate::hash::strip_boneyard;
use crate::model::Scene;

/// Render `scene` the way the embedding pipeline consumes it.
///
/// If `original_text` is present, strip its boneyard and return it
/// verbatim — this is what makes two scenes with the same content hash
/// produce the same embedding input. Otherwise synthesize a compact
/// representation from the structured fields, compressing empty action
/// lines. As a last resort, fall back to the raw `content` field.
pub fn format_for_embedding(scene: &Scene) -> String {
    if let Some(ref original) = scene.original_text {
        return strip_boneyard(original);
    }

    if !scene.action.is_empty() || !scene.dialogue.is_empty() {
        let mut out = format!("Scene: {}\n", scene.heading);

        let joined_actions: Vec<&str> = scene
            .action
            .iter()
            .map(|a| a.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        out.push_str(&format!("Action: {}\n", joined_actions.join(" ")));

        for line in &scene.dialogue {
            out.push_str(&format!("{}: {}\n", line.character, line.text));
        }

        return out;
    }

    strip_boneyard(&scene.content)
}

/// Render `scene` as a human-readable sectioned document for agent
/// prompts: every non-empty structured field appears exactly once, in
/// heading/action/dialogue order.
pub fn format_for_prompt(scene: &Scene) -> String {
    let mut sections = Vec::new();

    sections.push(scene.heading.clone());

    if !scene.action.is_empty() {
        let action_text = scene
            .action
            .iter()
            .map(|a| a.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !action_text.is_empty() {
            sections.push(action_text);
        }
    }

    for line in &scene.dialogue {
        sections.push(format!("{}\n{}", line.character, line.text));
    }

    if scene.action.is_empty() && scene.dialogue.is_empty() {
        let body = strip_boneyard(&scene.content);
        if !body.trim().is_empty() {
            sections.push(body);
        }
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionLine, DialogueLine};

    fn base_scene() -> Scene {
        Scene::from_parsed(
            "INT. OFFICE - DAY",
            "INT. OFFICE - DAY\n\nAlice enters.",
            None,
        )
    }

    #[test]
    fn format_for_embedding_uses_original_text_when_present() {
        let mut scene = base_scene();
        scene.original_text = Some("INT. OFFICE - DAY\n\nAlice enters.".to_owned());
        assert_eq!(
            format_for_embedding(&scene),
            "INT. OFFICE - DAY\n\nAlice enters."
        );
    }

    #[test]
    fn format_for_embedding_strips_boneyard_from_original_text() {
        let mut scene = base_scene();
        scene.original_text = Some(
            "INT. OFFICE - DAY\n\nAlice enters.\n\n/* SCRIPTRAG-META-START\n{}\nSCRIPTRAG-META-END */"
                .to_owned(),
        );
        let formatted = format_for_embedding(&scene);
        assert!(!formatted.contains("SCRIPTRAG-META"));
    }

    #[test]
    fn format_for_embedding_is_deterministic_for_equal_hash() {
        let a = base_scene();
        let mut b = base_scene();
        b.boneyard_metadata = Some(serde_json::json!({"x": 1}));
        assert_eq!(format_for_embedding(&a), format_for_embedding(&b));
    }

    #[test]
    fn format_for_embedding_synthesizes_from_structured_fields() {
        let mut scene = base_scene();
        scene.original_text = None;
        scene.action.push(ActionLine {
            text: "Alice enters.".into(),
            order_in_scene: 0,
        });
        scene.dialogue.push(DialogueLine {
            character: "ALICE".into(),
            text: "Hello.".into(),
            order_in_scene: 0,
        });
        let formatted = format_for_embedding(&scene);
        assert!(formatted.starts_with("Scene: INT. OFFICE - DAY"));
        assert!(formatted.contains("Action: Alice enters."));
        assert!(formatted.contains("ALICE: Hello."));
    }

    #[test]
    fn format_for_prompt_includes_each_field_once() {
        let mut scene = base_scene();
        scene.action.push(ActionLine {
            text: "Alice enters.".into(),
            order_in_scene: 0,
        });
        scene.dialogue.push(DialogueLine {
            character: "ALICE".into(),
            text: "Hello.".into(),
            order_in_scene: 0,
        });
        let formatted = format_for_prompt(&scene);
        assert_eq!(formatted.matches("Alice enters.").count(), 1);
        assert_eq!(formatted.matches("Hello.").count(), 1);
        let heading_pos = formatted.find("INT. OFFICE - DAY").unwrap();
        let action_pos = formatted.find("Alice enters.").unwrap();
        let dialogue_pos = formatted.find("Hello.").unwrap();
        assert!(heading_pos < action_pos);
        assert!(action_pos < dialogue_pos);
    }
}
