//! Handlebars templates for the completion prompts

use anyhow::Result;
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;

const ROUTER_PROMPT_TEMPLATE: &str = include_str!("templates/router_prompt.hbs");
const CLARIFICATION_PROMPT_TEMPLATE: &str = include_str!("templates/clarification_prompt.hbs");

/// Holds the handlebars templates
pub struct Templates {
    handlebars: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Arc<Self>> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // Prompts are plain text; HTML escaping would mangle quotes
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_template_string("router_prompt.hbs", ROUTER_PROMPT_TEMPLATE)?;
        handlebars
            .register_template_string("clarification_prompt.hbs", CLARIFICATION_PROMPT_TEMPLATE)?;

        Ok(Arc::new(Self { handlebars }))
    }

    /// Render a template by name with the given data
    pub fn render<T: Serialize>(&self, template_name: &str, data: &T) -> Result<String> {
        Ok(self.handlebars.render(template_name, data)?)
    }
}

/// Data for the direct-answer/agent routing instruction
#[derive(Serialize)]
pub struct RouterPrompt<'a> {
    pub sentinel: &'a str,
}

impl RouterPrompt<'_> {
    pub fn render(&self, templates: &Templates) -> Result<String> {
        templates.render("router_prompt.hbs", self)
    }
}

/// Data for the clarification normalization instruction
#[derive(Serialize)]
pub struct ClarificationPrompt {
    pub max_choices: Option<usize>,
}

impl ClarificationPrompt {
    pub fn render(&self, templates: &Templates) -> Result<String> {
        templates.render("clarification_prompt.hbs", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_prompt_names_sentinel() {
        let templates = Templates::new().unwrap();
        let prompt = RouterPrompt { sentinel: "AGENT" }.render(&templates).unwrap();
        assert!(prompt.contains("ONLY reply with: AGENT"));
        assert!(prompt.contains("Direct Response Mode"));
    }

    #[test]
    fn test_clarification_prompt_is_not_html_escaped() {
        let templates = Templates::new().unwrap();
        let prompt = ClarificationPrompt { max_choices: Some(4) }
            .render(&templates)
            .unwrap();
        assert!(prompt.contains(r#"keep "yes" over "y""#));
        assert!(prompt.contains("at most 4 choices"));

        let prompt = ClarificationPrompt { max_choices: None }
            .render(&templates)
            .unwrap();
        assert!(!prompt.contains("at most"));
    }
}
