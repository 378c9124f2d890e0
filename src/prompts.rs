use serde_json::{json, Value};

use crate::model::AdInput;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a world-class advertising copywriter specialized in conversion-driven ad copy for social media and search ads. You always deliver structured, high-quality copy.";

/// One entry of the response contract: a required string field and its description.
pub struct CopyField {
    pub name: &'static str,
    pub description: &'static str,
}

/// Order here is the order the model is asked to emit the fields in.
pub const COPY_FIELDS: [CopyField; 3] = [
    CopyField { name: "professional", description: "Professional and formal advertisement copy." },
    CopyField { name: "casual", description: "Fun, relatable, and casual advertisement copy." },
    CopyField { name: "urgent", description: "High-urgency, sales-focused advertisement copy with strong CTA." },
];

pub fn render_user_prompt(input: &AdInput) -> String {
    format!(
        "Generate three different styles of advertisement copy for the following product:\n\
         Product Name: {product}\n\
         Target Audience: {audience}\n\
         Key Features: {features}\n\
         \n\
         Please provide:\n\
         1) A Professional style (formal, authoritative, trustworthy).\n\
         2) A Fun/Casual style (witty, relatable, friendly).\n\
         3) An Urgent/Sales-focused style (scarcity, strong call-to-action, energetic).",
        product = input.product_name,
        audience = input.target_audience,
        features = input.key_features,
    )
}

/// Gemini `responseSchema` for [`crate::model::AdCopy`].
pub fn response_schema() -> Value {
    let mut properties = serde_json::Map::new();
    for f in &COPY_FIELDS {
        properties.insert(
            f.name.to_string(),
            json!({ "type": "STRING", "description": f.description }),
        );
    }
    let names: Vec<&str> = COPY_FIELDS.iter().map(|f| f.name).collect();
    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": names,
        "propertyOrdering": names,
    })
}
