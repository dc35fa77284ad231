//! Prompt text sent to the generative model, and the download file naming.

use crate::models::{Complexity, ProcessStep, VisualizationStyle};

const CAD_TEMPLATE: &str = r#"Generate a highly detailed and precise 2D technical CAD drawing for a process step: "{step_description}".
- Use standard CAD symbols and orthographic projection.
- Ensure clean line work and precise proportional relationships.
- Include measurable dimensions and technical annotations where appropriate.
- Maintain a consistent visual style with any previous diagrams.
- Use the following color code: input materials are blue, final products are green, and utilities (like water, steam) are gray.
- Ensure pipes and equipment connections are logical and continuous from any previous step."#;

const SCHEMATIC_TEMPLATE: &str = r#"Create a clear and easy-to-understand schematic process flow diagram for: "{step_description}".
- Emphasize intuitive iconography and clear process flow indicators (arrows).
- Label all major equipment with clear, legible text.
- The diagram should be educational and documentation-friendly.
- Maintain visual consistency with any previous diagrams.
- Adhere to this color coding: input materials are represented in blue, final products in green, and utilities in gray.
- Make sure all material flows (pipes, conveyors) connect logically to components from a previous step."#;

const REALISTIC_TEMPLATE: &str = r#"Render a photorealistic 3D industrial scene visualizing the process step: "{step_description}".
- The visualization must be industrial-grade with realistic material textures (e.g., stainless steel, concrete, plastic).
- Use professional lighting to create spatial depth and a sense of realism.
- The output should be marketing and presentation-ready quality.
- Maintain scale, proportion, and visual continuity with any previously generated images.
- Apply a color system: primary input materials should be colored blue, final products green, and general utilities/structures gray.
- All connections to equipment from a previous step must be seamless and logical."#;

const CONTINUATION: &str = "\n- This is a subsequent step in a sequence. Use the provided reference image of the previous step to ensure visual and logical continuity. Equipment, pipes, and materials should flow seamlessly from the previous state into this new state.";
const FOUNDATION: &str = "\n- This is the first step in the process. Establish a clear and professional visual foundation for subsequent images.";

pub const IMAGE_ASPECT_RATIO: &str = "16:9";

fn style_template(style: VisualizationStyle) -> &'static str {
    match style {
        VisualizationStyle::Cad => CAD_TEMPLATE,
        VisualizationStyle::Schematic => SCHEMATIC_TEMPLATE,
        VisualizationStyle::Realistic => REALISTIC_TEMPLATE,
    }
}

pub fn build_image_prompt(step: &ProcessStep, style: VisualizationStyle, has_previous_image: bool) -> String {
    let mut prompt = style_template(style).replacen("{step_description}", &step.description, 1);
    prompt.push_str(if has_previous_image { CONTINUATION } else { FOUNDATION });
    prompt
}

pub fn build_decomposition_prompt(process: &str, complexity: Complexity) -> String {
    let step_count = complexity.target_step_count();
    format!(
        "Analyze the following industrial process description and decompose it into exactly {step_count} logical, sequential steps. \
        For each step, provide a concise title and a detailed technical description suitable for an engineer.\n\n\
        Process: \"{process}\"\n\n\
        Return the output as a JSON array where each object has \"title\" and \"description\" keys."
    )
}

pub fn build_script_prompt(step: &ProcessStep) -> String {
    format!(
        "Convert the following technical process step description into a professional, clear, and engaging audio narration script. \
        The script should be around 2-3 sentences and suitable for a technical presentation.\n\n\
        Technical Description: \"{}\"\n\n\
        Narration Script:",
        step.description
    )
}

/// `step_{n}_{title}.png`, `n` being 1-based, with whitespace runs collapsed to `_`
/// and characters that are unsafe in file names dropped.
pub fn download_file_name(position: usize, title: &str) -> String {
    let mut stem = String::new();
    let mut pending_gap = false;
    for c in title.trim().chars() {
        if c.is_whitespace() {
            pending_gap = true;
            continue;
        }
        if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            continue;
        }
        if pending_gap && !stem.is_empty() {
            stem.push('_');
        }
        pending_gap = false;
        stem.push(c);
    }
    if stem.is_empty() {
        format!("step_{}.png", position)
    } else {
        format!("step_{}_{}.png", position, stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepStub;

    fn step(description: &str) -> ProcessStep {
        ProcessStep::from_stub(StepStub { title: "Intake".into(), description: description.into() })
    }

    #[test]
    fn image_prompt_substitutes_description_and_continuity() {
        let first = build_image_prompt(&step("Raw water is screened"), VisualizationStyle::Schematic, false);
        assert!(first.contains("schematic process flow diagram for: \"Raw water is screened\""));
        assert!(first.ends_with(FOUNDATION));
        assert!(!first.contains("{step_description}"));

        let next = build_image_prompt(&step("Coagulant dosing"), VisualizationStyle::Cad, true);
        assert!(next.starts_with("Generate a highly detailed and precise 2D technical CAD drawing"));
        assert!(next.ends_with(CONTINUATION));
    }

    #[test]
    fn decomposition_prompt_carries_step_hint() {
        let prompt = build_decomposition_prompt("Steel rolling", Complexity::Complex);
        assert!(prompt.contains("exactly 8 logical, sequential steps"));
        assert!(prompt.contains("Process: \"Steel rolling\""));
    }

    #[test]
    fn script_prompt_embeds_description() {
        let prompt = build_script_prompt(&step("Sludge is thickened"));
        assert!(prompt.contains("2-3 sentences"));
        assert!(prompt.contains("Technical Description: \"Sludge is thickened\""));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(download_file_name(1, "Raw  Water Intake"), "step_1_Raw_Water_Intake.png");
        assert_eq!(download_file_name(3, " Filter / Backwash: stage? "), "step_3_Filter_Backwash_stage.png");
        assert_eq!(download_file_name(2, "  "), "step_2.png");
    }
}
