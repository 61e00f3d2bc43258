//! Prompt text shared by every backend, so that output parsing never depends on who answered.

use labnarrate_contracts::labs::Lab;

pub const INVENTORY_SYSTEM: &str = "You are a technical documentation analyst. Examine these screenshots from a VMware/infrastructure lab environment. List EVERY visible element:
- Application/tool names and versions
- Panel titles and menu items
- CLI commands and their output
- IP addresses, hostnames, configuration values
- Status indicators, progress bars, error messages
- Any text visible in the interface

For each observation, note which region of the screen it appears in (top-left, top-right, bottom-left, bottom-right, center).
Only list what you can actually read or identify. If text is partially obscured, note it as \"[partial] ...\"
Be exhaustive: missing a detail is worse than listing too many.";

pub const NARRATION_INSTRUCTION: &str = "Based on the visual inventory and these frames, generate the step-by-step narration with confidence ratings.";

pub const METADATA_NARRATOR_SYSTEM: &str = "You are a Technical Lab Narrator. Based on the lab steps and objective, create a professional narration. Prefix each step with [HIGH] confidence.";

pub const SUGGESTION_SYSTEM: &str = "You help write technical lab write-ups for a portfolio. Complete the field the author is typing. Reply with at most 3 alternatives, one per line, with no numbering and no commentary.";

pub fn inventory_instruction(frame_count: usize, title: &str) -> String {
    format!(
        "Analyze these {frame_count} frames (with quadrant detail tiles) from the lab \"{title}\". List every visible element."
    )
}

/// The lab fields every narration prompt is grounded on.
pub fn metadata_context(lab: &Lab) -> String {
    let mut lines = vec![format!("Lab Title: {}", lab.title)];
    if !lab.description.trim().is_empty() {
        lines.push(format!("Description: {}", lab.description.trim()));
    }
    lines.push(format!("Objective: {}", lab.objective));
    lines.push(format!("Environment: {}", lab.environment));
    lines.push(format!("Tags: {}", lab.tags.join(", ")));
    let steps = lab
        .meaningful_steps()
        .enumerate()
        .map(|(idx, step)| format!("  {}. {step}", idx + 1))
        .collect::<Vec<String>>()
        .join("\n");
    lines.push(format!("Steps:\n{steps}"));
    lines.push(format!("Expected Outcome: {}", lab.outcome));
    lines.join("\n")
}

pub fn narration_system(lab: &Lab, metadata: &str, inventory: &str) -> String {
    format!(
        "Using the visual inventory below and this sequence of frames from a lab titled \"{title}\" with objective \"{objective}\", describe what the user did step by step.

CONTEXT (Lab Metadata):
{metadata}

VISUAL INVENTORY FROM PASS 1:
{inventory}

Rules:
- Only describe actions supported by visual evidence from the inventory
- Note what changed between consecutive frames
- Explain the technical significance of each action
- Use professional language suitable for a recruiter or hiring manager
- For each claim, prefix with confidence: [HIGH] visually confirmed, [MEDIUM] likely based on context, [LOW] inferred but not directly visible
- Structure as numbered steps
- Be specific about tools, commands, and configurations observed
- Output ONLY the narration text, no JSON wrapping",
        title = lab.title,
        objective = lab.objective,
    )
}

pub fn metadata_narrator_user(lab: &Lab) -> String {
    format!(
        "Lab: {}\nMetadata:\n{}\n\nObjective: {}\n\nPlease narrate the demonstration based on these steps.",
        lab.title,
        metadata_context(lab),
        lab.objective
    )
}

pub fn suggestion_user(field: &str, partial: &str, context: &str) -> String {
    let mut prompt = format!("Field: {field}\nCurrent value: {partial}");
    if !context.trim().is_empty() {
        prompt.push_str(&format!("\nContext: {}", context.trim()));
    }
    prompt
}

/// One suggestion per non-empty line, with list markers and wrapping quotes removed.
pub fn parse_suggestions(raw: &str, limit: usize) -> Vec<String> {
    raw.lines()
        .map(|line| strip_list_marker(line).trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty())
        .take(limit)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();
    let digits = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits > 0 {
        if let Some(rest) = trimmed[digits..].strip_prefix(['.', ')']) {
            return rest.trim();
        }
    }
    trimmed
        .strip_prefix(['-', '*', '•'])
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use labnarrate_contracts::labs::Lab;

    use super::{metadata_context, narration_system, parse_suggestions, suggestion_user};

    fn lab() -> Lab {
        Lab {
            title: "NSX Segments".to_string(),
            objective: "Create overlay segments".to_string(),
            environment: "vCenter 8".to_string(),
            tags: vec!["nsx".to_string(), "networking".to_string()],
            steps: vec!["Create T1".to_string(), " ".to_string(), "Attach segment".to_string()],
            outcome: "VMs ping across segments".to_string(),
            ..Lab::default()
        }
    }

    #[test]
    fn metadata_lists_fields_in_order() {
        let text = metadata_context(&lab());
        assert_eq!(
            text,
            "Lab Title: NSX Segments\nObjective: Create overlay segments\nEnvironment: vCenter 8\nTags: nsx, networking\nSteps:\n  1. Create T1\n  2. Attach segment\nExpected Outcome: VMs ping across segments"
        );

        let described = Lab {
            description: "Two tier".to_string(),
            ..lab()
        };
        assert!(metadata_context(&described).starts_with("Lab Title: NSX Segments\nDescription: Two tier\n"));
    }

    #[test]
    fn narration_system_embeds_inventory_and_markers() {
        let system = narration_system(&lab(), "META", "top-left: vSphere Client 8.0");
        assert!(system.contains("lab titled \"NSX Segments\""));
        assert!(system.contains("VISUAL INVENTORY FROM PASS 1:\ntop-left: vSphere Client 8.0"));
        assert!(system.contains("[HIGH] visually confirmed"));
        assert!(system.contains("CONTEXT (Lab Metadata):\nMETA"));
    }

    #[test]
    fn suggestions_drop_list_markers() {
        let raw = "1. Deploy NSX Edge\n- \"Configure BGP\"\n\n* Validate routes\nExtra";
        assert_eq!(
            parse_suggestions(raw, 3),
            vec!["Deploy NSX Edge", "Configure BGP", "Validate routes"]
        );
        assert_eq!(parse_suggestions("3-node vSAN cluster", 3), vec!["3-node vSAN cluster"]);
        assert!(suggestion_user("title", "Dep", "").ends_with("Current value: Dep"));
    }
}
