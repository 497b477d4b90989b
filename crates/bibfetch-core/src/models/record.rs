use std::path::Path;

use serde::{Deserialize, Serialize};

/// One `name = value` pair of a BibTeX entry. Names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    /// `value` is a macro expression (`jan`, `jan # " 1"`) written without braces.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bare: bool,
}

/// A bibliographic record: entry type, citation key and its fields in input order.
///
/// Field names are case-insensitive at every accessor; `DOI`, `Doi` and `doi`
/// all address the same field, which is kept under its lowercase name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibRecord {
    pub entry_type: String,
    pub citation_key: String,
    fields: Vec<Field>,
}

impl BibRecord {
    pub fn new(entry_type: impl Into<String>, citation_key: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            citation_key: citation_key.into(),
            fields: Vec::new(),
        }
    }

    /// Record synthesized from a bare title (text list, clipboard).
    ///
    /// It has no entry type or citation key and is never written to a `.bib` file.
    pub fn from_title(title: &str) -> Self {
        let mut record = Self::default();
        record.set("title", title.trim());
        record
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Set a field, replacing any existing value regardless of the key's casing.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.put(name, value.into(), false);
    }

    /// Set a field to a macro expression that stays unexpanded on write.
    pub fn set_bare(&mut self, name: &str, expression: impl Into<String>) {
        self.put(name, expression.into(), true);
    }

    fn put(&mut self, name: &str, value: String, bare: bool) {
        match self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(name))
        {
            Some(field) => {
                field.value = value;
                field.bare = bare;
            }
            None => self.fields.push(Field {
                name: name.to_ascii_lowercase(),
                value,
                bare,
            }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))?;
        Some(self.fields.remove(pos).value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (f.name.as_str(), f.value.as_str()))
    }

    pub fn raw_fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn title(&self) -> Option<&str> {
        non_empty(self.get("title"))
    }

    pub fn doi(&self) -> Option<&str> {
        non_empty(self.get("doi"))
    }

    pub fn file(&self) -> Option<&str> {
        non_empty(self.get("file"))
    }

    pub fn set_file(&mut self, path: &Path) {
        self.set("file", path.to_string_lossy());
    }

    /// Authors in order, split on the BibTeX ` and ` separator.
    pub fn authors(&self) -> Vec<String> {
        let Some(raw) = non_empty(self.get("author")) else {
            return Vec::new();
        };
        let mut authors = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for token in raw.split_whitespace() {
            if token == "and" {
                if !current.is_empty() {
                    authors.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(token);
            }
        }
        if !current.is_empty() {
            authors.push(current.join(" "));
        }
        authors
    }

    pub fn set_authors<S: AsRef<str>>(&mut self, authors: &[S]) {
        let joined = authors
            .iter()
            .map(|a| a.as_ref().trim())
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join(" and ");
        if joined.is_empty() {
            self.remove("author");
        } else {
            self.set("author", joined);
        }
    }

    /// Whether the record carries both an entry type and a citation key.
    pub fn is_serializable(&self) -> bool {
        !self.entry_type.trim().is_empty() && !self.citation_key.trim().is_empty()
    }

    /// Human-readable name for logs and reports.
    pub fn label(&self) -> String {
        if !self.citation_key.trim().is_empty() {
            return self.citation_key.clone();
        }
        self.title()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| "<untitled>".to_string())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
