//! Deterministic prompt generation.
//!
//! Every prompt is a pure function of session state and the intake
//! definition, so the same state always produces the same wording. Fields
//! may carry a bespoke template in the definition; the generic fallback
//! guarantees a producible prompt for every field, even unrecognized ones.

use crate::domain::catalog::{Category, FieldSpec, IntakeDefinition};

/// Upper bound on fields named in a single prompt; beyond this the prompt
/// says how many remain instead of listing them all
pub const MAX_NAMED_FIELDS: usize = 3;

const FALLBACK_TEMPLATE: &str = "Please tell me about your {label}.";

/// Prompt for a single field: its bespoke template, or the fallback
pub fn field_prompt(spec: &FieldSpec) -> String {
    let template = spec.prompt.as_deref().unwrap_or(FALLBACK_TEMPLATE);
    template.replace("{label}", &spec.label)
}

/// Prompt naming the missing fields of the current scope.
///
/// One missing field uses its own template; two or three are listed by
/// label; more than three name the first few and state that more remain.
pub fn missing_prompt(missing: &[&FieldSpec]) -> String {
    match missing {
        [] => completion_prompt(),
        [single] => field_prompt(single),
        _ => {
            let named: Vec<&str> = missing
                .iter()
                .take(MAX_NAMED_FIELDS)
                .map(|f| f.label.as_str())
                .collect();
            let listed = join_labels(&named);
            let remaining = missing.len().saturating_sub(MAX_NAMED_FIELDS);

            if remaining == 0 {
                format!("Could you share your {}?", listed)
            } else {
                format!(
                    "Could you share your {}? There are {} more after that.",
                    listed, remaining
                )
            }
        }
    }
}

/// Prompt introducing the next category after completing one
pub fn transition_prompt(
    completed: &Category,
    next: &Category,
    missing: &[&FieldSpec],
) -> String {
    format!(
        "That covers {}. Let's move on to {}. {}",
        completed.title,
        next.title,
        missing_prompt(missing)
    )
}

/// Prompt once every required field everywhere is satisfied
pub fn completion_prompt() -> String {
    "That's everything I need. Review your answers and submit when you're ready.".to_string()
}

/// Opening prompt for a fresh session
pub fn greeting(
    definition: &IntakeDefinition,
    starting_category: usize,
    missing: &[&FieldSpec],
) -> String {
    match definition.category_at(starting_category) {
        Some(category) => format!(
            "Let's get your intake started with {}. {}",
            category.title,
            missing_prompt(missing)
        ),
        None => missing_prompt(missing),
    }
}

/// Free-form phrasing: missing fields grouped by category, first group
/// named, remaining groups counted
pub fn freeform_missing_prompt(
    definition: &IntakeDefinition,
    missing: &[&FieldSpec],
) -> String {
    if missing.is_empty() {
        return completion_prompt();
    }

    // Group in category order; `missing` is already in definition order.
    let mut groups: Vec<(&Category, Vec<&FieldSpec>)> = Vec::new();
    for category in &definition.categories {
        let fields: Vec<&FieldSpec> = missing
            .iter()
            .filter(|f| f.category == category.key)
            .copied()
            .collect();
        if !fields.is_empty() {
            groups.push((category, fields));
        }
    }

    let (first_category, first_fields) = match groups.first() {
        Some(g) => (g.0, &g.1),
        None => return missing_prompt(missing),
    };

    let named: Vec<&str> = first_fields
        .iter()
        .take(MAX_NAMED_FIELDS)
        .map(|f| f.label.as_str())
        .collect();
    let mut prompt = format!(
        "I still need a few details for {}: your {}.",
        first_category.title,
        join_labels(&named)
    );

    let hidden_in_first = first_fields.len().saturating_sub(MAX_NAMED_FIELDS);
    if hidden_in_first > 0 {
        prompt.push_str(&format!(" There are {} more in that section.", hidden_in_first));
    }

    if groups.len() > 1 {
        prompt.push_str(&format!(
            " After that, {} other section(s) still need answers.",
            groups.len() - 1
        ));
    }

    prompt
}

/// "a", "a and b", "a, b, and c"
fn join_labels(labels: &[&str]) -> String {
    match labels {
        [] => String::new(),
        [one] => (*one).to_string(),
        [a, b] => format!("{} and {}", a, b),
        many => {
            let head = &many[..many.len() - 1];
            format!("{}, and {}", head.join(", "), many[many.len() - 1])
        }
    }
}
