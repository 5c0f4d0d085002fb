#![deny(missing_docs)]
//! Deterministic prompt compiler.
//!
//! A compiled prompt is a pure function of (intent, context, non-opaque
//! inputs in declaration order, retry feedback in attempt order, opaque
//! field names): byte-identical across runs, with a stable 12-hex hash.
//!
//! Assembly order, newline-separated:
//!
//! 1. the intent line;
//! 2. context annotations in declaration order, skipping empty ones;
//! 3. `Inputs:` followed by one `  name: value` line per non-opaque input;
//! 4. on retry attempts only, `Previous attempt failed:` with one bullet per
//!    accumulated reason and a closing `Fix these issues specifically.`;
//! 5. when opaque fields exist, `See attached data for: <sorted names>`.
//!
//! The output schema never appears in the prompt — it travels through the
//! provider's structured-output channel. Opaque values travel as a JSON
//! attachment appended to the same user message after a `Data:` delimiter,
//! which keeps the stable prefix cache-valid across attachment bodies.

use serde_json::Value;
use sha2::{Digest, Sha256};
use sinew_core::{Inputs, MessageBlock, SinewError};
use std::collections::BTreeSet;

/// System message for every step execution.
pub const SYSTEM_PROMPT: &str =
    "You are executing a typed function. Your output must conform to the specified contract.";

/// Everything the compiler needs for one attempt.
#[derive(Debug)]
pub struct PromptSpec<'a> {
    /// The step's intent line.
    pub intent: &'a str,
    /// Context annotations, in declaration order.
    pub context: &'a [String],
    /// Concrete input bindings.
    pub inputs: &'a Inputs,
    /// Names of opaque parameters.
    pub opaque_fields: &'a BTreeSet<String>,
    /// Accumulated failure reasons; empty on the first attempt.
    pub retry_reasons: &'a [String],
}

/// A compiled prompt, split so providers with prompt-prefix caching can
/// cache the stable slice while retry feedback varies behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPrompt {
    stable: String,
    feedback: Option<String>,
    opaque_note: Option<String>,
    attachment: Option<Value>,
}

impl CompiledPrompt {
    /// The stable slice: intent, context, and input bindings.
    pub fn stable(&self) -> &str {
        &self.stable
    }

    /// The retry-feedback section, present only on retry attempts.
    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    /// The opaque data bindings, when any parameter is opaque.
    pub fn attachment(&self) -> Option<&Value> {
        self.attachment.as_ref()
    }

    /// The full prompt text, exactly as hashed.
    pub fn text(&self) -> String {
        let mut parts = vec![self.stable.as_str()];
        if let Some(feedback) = &self.feedback {
            parts.push(feedback);
        }
        if let Some(note) = &self.opaque_note {
            parts.push(note);
        }
        parts.join("\n")
    }

    /// First 12 hex characters of SHA-256 over the full prompt text.
    pub fn hash(&self) -> String {
        prompt_hash(&self.text())
    }

    /// The user message as provider blocks.
    ///
    /// With `cacheable` set, the stable slice becomes a cache-tagged block
    /// and the volatile tail (feedback, opaque note, attachment) follows in
    /// a plain block; otherwise everything is one plain block. Either way
    /// the concatenated block texts are identical.
    pub fn user_blocks(&self, cacheable: bool) -> Vec<MessageBlock> {
        let mut tail = String::new();
        if let Some(feedback) = &self.feedback {
            tail.push('\n');
            tail.push_str(feedback);
        }
        if let Some(note) = &self.opaque_note {
            tail.push('\n');
            tail.push_str(note);
        }
        if let Some(attachment) = &self.attachment {
            tail.push_str("\n\nData:\n");
            tail.push_str(&attachment.to_string());
        }

        if cacheable {
            let mut blocks = vec![MessageBlock::cached(self.stable.clone())];
            if !tail.is_empty() {
                blocks.push(MessageBlock::text(tail));
            }
            blocks
        } else {
            vec![MessageBlock::text(format!("{}{tail}", self.stable))]
        }
    }

    /// The system message as a provider block.
    pub fn system_block(cacheable: bool) -> MessageBlock {
        if cacheable {
            MessageBlock::cached(SYSTEM_PROMPT)
        } else {
            MessageBlock::text(SYSTEM_PROMPT)
        }
    }
}

/// First 12 hex characters of SHA-256 over a prompt string.
pub fn prompt_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Reject intent or context text that references an opaque field inline.
///
/// An opaque value interpolated into the prompt would leak into the cached
/// prompt prefix, defeating the point of the attachment channel.
pub fn check_opaque_references(
    location: &str,
    intent: &str,
    context: &[String],
    opaque_fields: &BTreeSet<String>,
) -> Result<(), SinewError> {
    for text in std::iter::once(intent).chain(context.iter().map(String::as_str)) {
        for name in opaque_fields {
            if text.contains(&format!("{{{name}}}")) {
                return Err(SinewError::compile(
                    location,
                    format!(
                        "opaque field '{name}' must not appear in intent or context text; \
                         opaque fields travel as structured attachments only"
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Render one input value for inline prompt display. Strings render bare;
/// other values render as compact JSON (composites as an object of their
/// public fields).
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Assemble the prompt for one attempt.
pub fn compile(spec: &PromptSpec<'_>) -> Result<CompiledPrompt, SinewError> {
    check_opaque_references("prompt", spec.intent, spec.context, spec.opaque_fields)?;

    let mut stable_lines: Vec<String> = vec![spec.intent.to_string()];
    for ctx in spec.context {
        if !ctx.is_empty() {
            stable_lines.push(ctx.clone());
        }
    }

    let non_opaque: Vec<(&str, &Value)> = spec
        .inputs
        .iter()
        .filter(|(name, _)| !spec.opaque_fields.contains(*name))
        .collect();
    if !non_opaque.is_empty() {
        stable_lines.push("Inputs:".into());
        for (name, value) in &non_opaque {
            stable_lines.push(format!("  {name}: {}", render_value(value)));
        }
    }

    let feedback = if spec.retry_reasons.is_empty() {
        None
    } else {
        let mut lines = vec!["Previous attempt failed:".to_string()];
        for reason in spec.retry_reasons {
            lines.push(format!("  - {reason}"));
        }
        lines.push("Fix these issues specifically.".into());
        Some(lines.join("\n"))
    };

    let (opaque_note, attachment) = if spec.opaque_fields.is_empty() {
        (None, None)
    } else {
        let names: Vec<&str> = spec.opaque_fields.iter().map(String::as_str).collect();
        let data: serde_json::Map<String, Value> = spec
            .inputs
            .iter()
            .filter(|(name, _)| spec.opaque_fields.contains(*name))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        (
            Some(format!("See attached data for: {}", names.join(", "))),
            Some(Value::Object(data)),
        )
    };

    Ok(CompiledPrompt {
        stable: stable_lines.join("\n"),
        feedback,
        opaque_note,
        attachment,
    })
}
