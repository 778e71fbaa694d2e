//! Name-based text/binary classification.
//!
//! A file is text when its name ends in one of the allow-listed extensions.
//! Content is never sniffed; the writer only overrides a text verdict when
//! the bytes turn out not to be UTF-8.

/// Extensions packed through the text codec unless configured otherwise.
pub const DEFAULT_TEXT_EXTENSIONS: &[&str] = &[
    ".js", ".ts", ".tsx", ".d.ts", ".json", ".html",
    ".css", ".cjs", ".mjz", ".md", ".xml", ".ejs",
    ".txt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Text,
    Binary,
}

impl Classification {
    #[inline]
    pub fn is_binary(self) -> bool { self == Classification::Binary }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    /// Lowercase, each with a leading dot.
    extensions: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT_EXTENSIONS.iter().copied())
    }
}

impl Classifier {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut c = Self { extensions: Vec::new() };
        c.extend(extensions);
        c
    }

    /// Add extensions; accepts `md`, `.md` and `.MD` alike.
    pub fn extend<I, S>(&mut self, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in extensions {
            let ext = ext.as_ref().trim().to_lowercase();
            if ext.is_empty() || ext == "." { continue; }
            let ext = if ext.starts_with('.') { ext } else { format!(".{ext}") };
            if !self.extensions.contains(&ext) {
                self.extensions.push(ext);
            }
        }
    }

    pub fn extensions(&self) -> &[String] { &self.extensions }

    /// Classify a forward-slash relative path by its file name.
    pub fn classify(&self, path: &str) -> Classification {
        let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        // A bare dotfile such as ".md" has no extension.
        let stem_len = name.trim_start_matches('.').len();
        let is_text = self.extensions.iter().any(|ext| {
            name.ends_with(ext.as_str()) && name.len() > ext.len() && stem_len >= ext.len()
        });
        if is_text { Classification::Text } else { Classification::Binary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_list_matches_known_text_files() {
        let c = Classifier::default();
        assert_eq!(c.classify("a.txt"), Classification::Text);
        assert_eq!(c.classify("a.ini"), Classification::Binary);
        assert_eq!(c.classify("index.html"), Classification::Text);
        assert_eq!(c.classify("src/app/Main.TSX"), Classification::Text);
        assert_eq!(c.classify("types/lib.d.ts"), Classification::Text);
        assert_eq!(c.classify("img/logo.png"), Classification::Binary);
        assert_eq!(c.classify("Makefile"), Classification::Binary);
    }

    #[test]
    fn dotfiles_are_not_extensions() {
        let c = Classifier::default();
        assert_eq!(c.classify(".md"), Classification::Binary);
        assert_eq!(c.classify("docs/.json"), Classification::Binary);
        assert_eq!(c.classify("docs/..json"), Classification::Binary);
        assert_eq!(c.classify("docs/.hidden.json"), Classification::Text);
    }

    #[test]
    fn extra_extensions_are_normalised() {
        let mut c = Classifier::default();
        c.extend(["yaml", ".CSV", "  ", ".", "TXT"]);
        assert_eq!(c.classify("notes/a.yaml"), Classification::Text);
        assert_eq!(c.classify("data.csv"), Classification::Text);
        assert_eq!(c.extensions().len(), DEFAULT_TEXT_EXTENSIONS.len() + 2);
    }
}
