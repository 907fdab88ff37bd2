//! Outbound replies handed from the bot core to a transport

use serde::{Deserialize, Serialize};

/// One selectable option. The value is what comes back when the user picks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectableOption {
    pub label: String,
    pub value: String,
}

impl SelectableOption {
    /// An option that carries its own label as the callback value
    pub fn same(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            value: label.clone(),
            label,
        }
    }
}

/// Ordered set of options rendered as buttons (or a numbered list)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectableOptions {
    pub options: Vec<SelectableOption>,
}

impl SelectableOptions {
    pub fn from_choices<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: choices.into_iter().map(SelectableOption::same).collect(),
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|o| o.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Look up an option by its 1-based position
    pub fn nth(&self, position: usize) -> Option<&SelectableOption> {
        position.checked_sub(1).and_then(|i| self.options.get(i))
    }
}

/// A reply: text plus optional selectable options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub text: String,
    pub options: Option<SelectableOptions>,
}

impl OutboundReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: None,
        }
    }

    pub fn with_options(text: impl Into<String>, options: SelectableOptions) -> Self {
        Self {
            text: text.into(),
            options: Some(options),
        }
    }

    /// Rich rendering is used only when there is something to select
    pub fn is_rich(&self) -> bool {
        self.options.as_ref().is_some_and(|o| !o.is_empty())
    }

    /// Plain-text fallback that lists the options under the text
    pub fn to_plain_text(&self) -> String {
        match &self.options {
            Some(options) if !options.is_empty() => {
                let mut text = self.text.clone();
                for (i, label) in options.labels().enumerate() {
                    text.push_str(&format!("\n{}. {}", i + 1, label));
                }
                text
            }
            _ => self.text.clone(),
        }
    }

    /// Plain text for platforms that cannot map a number back to an option:
    /// one option value per line, to be typed back as is
    pub fn to_typed_text(&self) -> String {
        match &self.options {
            Some(options) if !options.is_empty() => {
                let mut text = self.text.clone();
                for option in &options.options {
                    text.push('\n');
                    text.push_str(&option.value);
                }
                text
            }
            _ => self.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_carry_label_as_value() {
        let options = SelectableOptions::from_choices(["yes", "no"]);
        assert_eq!(options.len(), 2);
        assert_eq!(options.options[1].label, "no");
        assert_eq!(options.options[1].value, "no");
        assert_eq!(options.nth(1).map(|o| o.value.as_str()), Some("yes"));
        assert!(options.nth(0).is_none());
        assert!(options.nth(3).is_none());
    }

    #[test]
    fn test_plain_text_fallback() {
        let reply = OutboundReply::with_options(
            "Confirm sending the email",
            SelectableOptions::from_choices(["yes", "no"]),
        );
        assert!(reply.is_rich());
        assert_eq!(reply.to_plain_text(), "Confirm sending the email\n1. yes\n2. no");
        assert_eq!(reply.to_typed_text(), "Confirm sending the email\nyes\nno");

        let plain = OutboundReply::text("Paris.");
        assert!(!plain.is_rich());
        assert_eq!(plain.to_plain_text(), "Paris.");
        assert_eq!(plain.to_typed_text(), "Paris.");
    }
}
