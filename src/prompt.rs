//! Scoring prompt construction.
//!
//! Pure string building: identical inputs always produce identical prompts.

use crate::preferences::HEALTH_MODE_KEYS_HEADER;
use crate::schema::MAX_JUSTIFICATION_CHARS;

const OCR_START: &str = "--- OCR TEXT START ---";
const OCR_END: &str = "--- OCR TEXT END ---";
const PREFERENCES_START: &str = "--- USER PREFERENCES START ---";
const PREFERENCES_END: &str = "--- USER PREFERENCES END ---";

/// Build the full instruction text for one scoring request.
///
/// `preferences` is the directive block rendered from the user's preferences;
/// `None` or a blank string means no personalization.
pub fn build_nutrition_prompt(ocr_text: &str, preferences: Option<&str>) -> String {
    let preferences = preferences.map(str::trim).filter(|p| !p.is_empty());

    let mut prompt = String::with_capacity(ocr_text.len() + 4096);

    prompt.push_str(
        "You are a nutrition analysis expert. Analyze the OCR text extracted from a photographed \
nutrition label and score how healthy the product is.\n\n\
The text below should come from a nutrition facts label or ingredient list. Only base your \
analysis on what the text actually states. If it does not look like a nutrition label, still \
answer with the required JSON and explain the concern in the justification.\n\n",
    );

    prompt.push_str(OCR_START);
    prompt.push('\n');
    prompt.push_str(ocr_text);
    prompt.push('\n');
    prompt.push_str(OCR_END);
    prompt.push_str("\n\n");

    if let Some(directive) = preferences {
        prompt.push_str(PREFERENCES_START);
        prompt.push('\n');
        prompt.push_str(directive);
        prompt.push('\n');
        prompt.push_str(PREFERENCES_END);
        prompt.push_str("\n\n");
        prompt.push_str(&preference_rules());
    }

    prompt.push_str(&scoring_instructions(preferences.is_some()));
    prompt.push_str(&output_contract());
    prompt
}

fn preference_rules() -> String {
    format!(
        r#"How to apply the user preferences:
- ALLERGIES, INTOLERANCES, DIETARY PATTERNS and AVOID INGREDIENTS are resolved by INGREDIENT CONTENT. Check the ingredient list and allergen statements ("contains", "may contain", "processed in a facility with"). A listed allergen or intolerance trigger is safety-critical: add a warning naming it and lower the general score sharply.
- HEALTH MODES are resolved by NUTRIENT VALUES (sugars, added sugars, carbohydrates, fiber, sodium, saturated and trans fat, cholesterol, protein, calories per serving). Score each active health mode only from those values.
- Never mix the two kinds. A nutrient value never violates an ingredient-based preference: high sugar does NOT make a product non-vegetarian, and a meat ingredient does NOT change a low-sodium score. Conflating them is an error.
- CUSTOM CONSTRAINTS are free text from the user; apply them where the label gives enough information and mention them in warnings when violated.
- For every key on the "{keys}" line, include an entry in "healthModeScores" under that exact key.

"#,
        keys = HEALTH_MODE_KEYS_HEADER
    )
}

fn scoring_instructions(personalized: bool) -> String {
    let mut text = format!(
        "Instructions:\n\
1. Score GENERAL HEALTHINESS as an integer from 1 to 10 (1 = very unhealthy, 10 = very healthy).\n\
2. Give a short justification (at most {max} characters) for every score.\n\
3. List concerning ingredients or values as short warnings (optional).\n\
4. Extract key nutrition facts only if they are clearly stated. Never invent or estimate a number the label does not show; omit the field instead.\n",
        max = MAX_JUSTIFICATION_CHARS
    );
    if personalized {
        text.push_str(
            "5. Score each active health mode as an integer from 1 to 10 (1 = very poor fit, 10 = excellent fit).\n",
        );
    }
    text.push('\n');
    text
}

fn output_contract() -> String {
    format!(
        r#"CRITICAL: Respond with ONE JSON object and nothing else. No markdown, no code fences, no text before or after it. It must match this schema exactly:
{{
  "generalScore": <integer 1-10>,
  "generalJustification": "<string, max {max} chars>",
  "healthModeScores": {{
    "<health mode key>": {{ "score": <integer 1-10>, "justification": "<string, max {max} chars>" }}
  }},
  "warnings": [<optional array of strings>],
  "extracted": {{
    "calories": <optional number>,
    "servingSize": <optional string>,
    "totalFat": <optional string>,
    "sodium": <optional string>,
    "totalCarbs": <optional string>,
    "sugars": <optional string>,
    "protein": <optional string>
  }}
}}

"healthModeScores" must contain exactly one entry for every key listed on the "{keys}" line and no other keys. If that line is absent, use an empty object {{}}.
Omit any "extracted" field the label does not clearly state.
Respond with ONLY the JSON object."#,
        max = MAX_JUSTIFICATION_CHARS,
        keys = HEALTH_MODE_KEYS_HEADER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::{DietaryPattern, HealthMode, UserPreferences};

    const LABEL: &str = "Nutrition Facts\nServing Size 1 cup (228g)\nCalories 250\nTotal Sugars 12g";

    #[test]
    fn test_prompt_is_pure() {
        let directive = "DIETARY PATTERNS: Vegan";
        assert_eq!(
            build_nutrition_prompt(LABEL, Some(directive)),
            build_nutrition_prompt(LABEL, Some(directive))
        );
        assert_eq!(build_nutrition_prompt(LABEL, None), build_nutrition_prompt(LABEL, None));
    }

    #[test]
    fn test_ocr_text_embedded_verbatim() {
        let long_text = format!("{}\n{}", LABEL, "Ingredients: water, sugar, ".repeat(2000));
        let prompt = build_nutrition_prompt(&long_text, None);
        assert!(prompt.contains(&format!("{}\n{}\n{}", OCR_START, long_text, OCR_END)));
    }

    #[test]
    fn test_no_preferences_section_without_directive() {
        for prefs in [None, Some(""), Some("   \n")] {
            let prompt = build_nutrition_prompt(LABEL, prefs);
            assert!(!prompt.contains(PREFERENCES_START));
            assert!(!prompt.contains("INGREDIENT CONTENT"));
            assert!(prompt.contains("generalScore"));
            assert!(prompt.contains("healthModeScores"));
        }
    }

    #[test]
    fn test_preference_rules_distinguish_ingredients_from_nutrients() {
        let mut prefs = UserPreferences::default();
        prefs.dietary_patterns.insert(DietaryPattern::Vegetarian);
        prefs.health_modes.insert(HealthMode::LowAddedSugar);
        let directive = prefs.to_directive();

        let prompt = build_nutrition_prompt(LABEL, Some(&directive));
        assert!(prompt.contains(&directive));
        assert!(prompt.contains("INGREDIENT CONTENT"));
        assert!(prompt.contains("NUTRIENT VALUES"));
        assert!(prompt.contains("high sugar does NOT make a product non-vegetarian"));
        assert!(prompt.contains("HEALTH MODE KEYS (REQUIRED IN JSON): lowAddedSugar"));
    }

    #[test]
    fn test_output_contract_forbids_fences_and_fabrication() {
        let prompt = build_nutrition_prompt(LABEL, None);
        assert!(prompt.contains("no code fences"));
        assert!(prompt.contains("Never invent or estimate a number"));
        assert!(prompt.ends_with("Respond with ONLY the JSON object."));
    }
}
