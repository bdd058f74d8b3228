//! Outgoing message building blocks: text templates and photo media groups.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n+").expect("static regex"))
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("static regex"))
}

/// Text template written as an indented multi-line literal.
///
/// Rendering trims the template, strips per-line indentation, collapses runs
/// of blank lines into a paragraph break and runs of spaces into one, then
/// substitutes `{{name}}` placeholders.
#[derive(Clone, Debug)]
pub struct OutgoingMessageTemplate {
    template: String,
}

impl OutgoingMessageTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, params: &HashMap<&str, String>) -> String {
        let normalized = self
            .template
            .trim()
            .lines()
            .map(|l| spaces_re().replace_all(l.trim(), " ").into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        let mut text = blank_lines_re()
            .replace_all(&normalized, "\n\n")
            .into_owned();

        for (name, value) in params {
            text = text.replace(&format!("{{{{{name}}}}}"), value);
        }

        text
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingPhoto {
    pub path: PathBuf,
    pub file_name: String,
}

/// An album of local photos sent with a single `sendMediaGroup`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMediaGroup {
    pub photos: Vec<OutgoingPhoto>,
}

impl OutgoingMediaGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_photo(&mut self, uploads_dir: &Path, file_name: &str) -> &mut Self {
        self.photos.push(OutgoingPhoto {
            path: uploads_dir.join(file_name),
            file_name: file_name.to_string(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    /// Screenshots explaining how to add the bot to a group as an admin.
    pub fn bot_setup_instruction(static_dir: &Path) -> Self {
        let mut group = Self::new();
        for i in 1..=5 {
            group.add_photo(static_dir, &format!("titus_bot_{i}.png"));
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_normalizes_indentation_and_substitutes() {
        let tpl = OutgoingMessageTemplate::new(
            r#"
            Welcome!

               This   is {{name}}.


            More at: {{siteUrl}}
        "#,
        );
        let mut params = HashMap::new();
        params.insert("name", "Titus".to_string());
        params.insert("siteUrl", "https://example.org".to_string());

        assert_eq!(
            tpl.render(&params),
            "Welcome!\n\nThis is Titus.\n\nMore at: https://example.org"
        );
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let tpl = OutgoingMessageTemplate::new("Hi {{who}}");
        assert_eq!(tpl.render(&HashMap::new()), "Hi {{who}}");
    }

    #[test]
    fn setup_instruction_has_five_photos() {
        let group = OutgoingMediaGroup::bot_setup_instruction(Path::new("static"));
        assert_eq!(group.photos.len(), 5);
        assert_eq!(group.photos[0].path, PathBuf::from("static/titus_bot_1.png"));
        assert_eq!(group.photos[4].file_name, "titus_bot_5.png");
    }
}
