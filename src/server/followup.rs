//! Follow-up email composition
//!
//! Agents may carry their own subject and body templates with `{{key}}`
//! placeholders. The `{{summary}}` placeholder is filled by the LLM from the
//! transcript; without an LLM (or when it fails) a plain sentence built from
//! the extracted requirements takes its place.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::Agent;
use super::openai::OpenAiClient;

const DEFAULT_SUBJECT: &str = "Thanks for speaking with {{agent_name}}";

const DEFAULT_BODY: &str = "Hi {{name}},

Thank you for taking the time to talk with us today.

{{summary}}

{{demo_line}}

Best regards,
{{agent_name}}";

const SUMMARY_SYSTEM_PROMPT: &str = "You write the middle paragraph of a short follow-up email after a sales call. \
Summarise what the customer asked for and the agreed next step in two or three friendly sentences. \
Reply with the paragraph only, no greeting or sign-off.";

/// Transcripts are cut to this many characters before going to the LLM.
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct FollowupContext {
    pub name: Option<String>,
    pub company: Option<String>,
    pub requirements: Option<String>,
    pub agent_name: String,
    pub demo_time: Option<DateTime<Utc>>,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowupEmail {
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Default)]
pub struct FollowupComposer {
    openai: Option<Arc<OpenAiClient>>,
}

impl FollowupComposer {
    pub fn new(openai: Option<Arc<OpenAiClient>>) -> Self {
        Self { openai }
    }

    pub async fn compose(&self, agent: &Agent, ctx: &FollowupContext) -> FollowupEmail {
        let summary = match self.llm_summary(ctx).await {
            Some(summary) => summary,
            None => fallback_summary(ctx),
        };
        render_email(agent, ctx, &summary)
    }

    async fn llm_summary(&self, ctx: &FollowupContext) -> Option<String> {
        let openai = self.openai.as_ref()?;
        if ctx.transcript.trim().is_empty() {
            return None;
        }

        let transcript: String = ctx.transcript.chars().take(MAX_TRANSCRIPT_CHARS).collect();
        let prompt = format!(
            "Customer: {}\nCompany: {}\nTranscript:\n{}",
            ctx.name.as_deref().unwrap_or("unknown"),
            ctx.company.as_deref().unwrap_or("unknown"),
            transcript
        );
        match openai.complete(SUMMARY_SYSTEM_PROMPT, &prompt).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!("Failed to generate follow-up summary, using template text: {}", e);
                None
            }
        }
    }
}

fn fallback_summary(ctx: &FollowupContext) -> String {
    match ctx.requirements.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(requirements) => format!("As discussed, you are looking for: {}.", requirements.trim_end_matches('.')),
        None => "We appreciate your interest and will be in touch shortly.".to_string(),
    }
}

pub fn render_email(agent: &Agent, ctx: &FollowupContext, summary: &str) -> FollowupEmail {
    let demo_line = match ctx.demo_time {
        Some(time) => format!("Your demo is booked for {}. A calendar invite is on its way.", time.format("%A, %d %B %Y at %H:%M UTC")),
        None => String::new(),
    };

    let mut values = HashMap::new();
    values.insert("name", ctx.name.clone().unwrap_or_else(|| "there".to_string()));
    values.insert("company", ctx.company.clone().unwrap_or_default());
    values.insert("requirements", ctx.requirements.clone().unwrap_or_default());
    values.insert("agent_name", ctx.agent_name.clone());
    values.insert("summary", summary.to_string());
    values.insert("demo_line", demo_line);
    values.insert(
        "demo_time",
        ctx.demo_time.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string()).unwrap_or_default(),
    );

    let subject = agent.followup_subject_template.as_deref().unwrap_or(DEFAULT_SUBJECT);
    let body = agent.followup_body_template.as_deref().unwrap_or(DEFAULT_BODY);

    FollowupEmail {
        subject: render_template(subject, &values).trim().to_string(),
        body: collapse_blank_lines(&render_template(body, &values)),
    }
}

/// Replace `{{key}}` placeholders. Unknown keys render empty; an unclosed
/// `{{` is kept as literal text.
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                if let Some(value) = values.get(key) {
                    out.push_str(value);
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() && out.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last() == Some(&"") {
        out.pop();
    }
    out.join("\n")
}
