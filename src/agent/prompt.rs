use std::fmt::Write;

use crate::tools::SEARCH_KNOWLEDGE;

pub struct PromptContext<'a> {
    /// Business the receptionist answers for, if known.
    pub business_name: Option<&'a str>,
    /// Names of the tools declared to the engine.
    pub tool_names: &'a [&'a str],
}

pub trait PromptSection: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, ctx: &PromptContext<'_>) -> String;
}

#[derive(Default)]
pub struct SystemPromptBuilder {
    sections: Vec<Box<dyn PromptSection>>,
}

impl SystemPromptBuilder {
    /// The default receptionist template.
    pub fn with_defaults() -> Self {
        Self {
            sections: vec![
                Box::new(IdentitySection),
                Box::new(GroundingSection),
                Box::new(KnowledgeSection),
                Box::new(CallHandlingSection),
            ],
        }
    }

    pub fn add_section(mut self, section: Box<dyn PromptSection>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        let mut output = String::new();
        for section in &self.sections {
            let part = section.build(ctx);
            if part.trim().is_empty() {
                tracing::trace!(section = section.name(), "Prompt section empty, skipped");
                continue;
            }
            output.push_str(part.trim_end());
            output.push_str("\n\n");
        }
        output.trim_end().to_string()
    }
}

/// Default receptionist instructions, used when the tenant has none.
pub fn default_instructions(business_name: Option<&str>) -> String {
    let tool_names = [SEARCH_KNOWLEDGE];
    let ctx = PromptContext {
        business_name,
        tool_names: &tool_names,
    };
    SystemPromptBuilder::with_defaults().build(&ctx)
}

pub struct IdentitySection;
pub struct GroundingSection;
pub struct KnowledgeSection;
pub struct CallHandlingSection;

impl PromptSection for IdentitySection {
    fn name(&self) -> &str {
        "identity"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> String {
        let mut out = String::from("## Role\n\n");
        match ctx.business_name {
            Some(name) => {
                let _ = write!(
                    out,
                    "You are the phone receptionist for {name}. You are speaking with a caller on a live telephone line."
                );
            }
            None => out.push_str(
                "You are a business phone receptionist. You are speaking with a caller on a live telephone line.",
            ),
        }
        out
    }
}

impl PromptSection for GroundingSection {
    fn name(&self) -> &str {
        "grounding"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> String {
        "## Accuracy\n\n- Never invent business facts: hours, prices, addresses, staff, services or policies.\n- If you do not have verified information, say so and offer to take a message.\n- Do not promise appointments, refunds or call-backs you cannot confirm.".into()
    }
}

impl PromptSection for KnowledgeSection {
    fn name(&self) -> &str {
        "knowledge"
    }

    fn build(&self, ctx: &PromptContext<'_>) -> String {
        if !ctx.tool_names.contains(&SEARCH_KNOWLEDGE) {
            return String::new();
        }
        format!(
            "## Knowledge Base\n\nBefore answering any factual question about the business, call `{SEARCH_KNOWLEDGE}` with the caller's question as the query. Answer only from the returned results. If the results are empty, tell the caller you don't have that information."
        )
    }
}

impl PromptSection for CallHandlingSection {
    fn name(&self) -> &str {
        "call_handling"
    }

    fn build(&self, _ctx: &PromptContext<'_>) -> String {
        "## Call Handling\n\n- Keep replies short and conversational; this is a voice call.\n- Ask one question at a time.\n- If the caller wants a booking or a call-back, collect their name and the service they need.\n- Stop speaking immediately when the caller interrupts.".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExtraSection;

    impl PromptSection for ExtraSection {
        fn name(&self) -> &str {
            "extra"
        }

        fn build(&self, _ctx: &PromptContext<'_>) -> String {
            "## Extra\n\nSpeak Spanish if asked.".into()
        }
    }

    #[test]
    fn default_template_forbids_fabrication_and_requires_search() {
        let prompt = default_instructions(None);
        assert!(prompt.contains("Never invent business facts"));
        assert!(prompt.contains("call `search_knowledge`"));
        assert!(prompt.contains("business phone receptionist"));
    }

    #[test]
    fn business_name_appears_in_identity() {
        let prompt = default_instructions(Some("Acme Dental"));
        assert!(prompt.contains("receptionist for Acme Dental"));
    }

    #[test]
    fn knowledge_section_skipped_without_tool() {
        let ctx = PromptContext {
            business_name: None,
            tool_names: &[],
        };
        let prompt = SystemPromptBuilder::with_defaults().build(&ctx);
        assert!(!prompt.contains("## Knowledge Base"));
        assert!(prompt.contains("## Accuracy"));
    }

    #[test]
    fn builder_appends_custom_sections() {
        let ctx = PromptContext {
            business_name: None,
            tool_names: &[],
        };
        let prompt = SystemPromptBuilder::default()
            .add_section(Box::new(ExtraSection))
            .build(&ctx);
        assert_eq!(prompt, "## Extra\n\nSpeak Spanish if asked.");
    }
}
