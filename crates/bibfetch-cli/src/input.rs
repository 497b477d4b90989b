use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bibfetch_core::CoreError;

/// Where the titles (or records) of one run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Titles(Vec<String>),
    Bib(PathBuf),
}

impl Input {
    pub fn describe(&self) -> String {
        match self {
            Self::Titles(titles) => format!("{} title(s)", titles.len()),
            Self::Bib(path) => path.display().to_string(),
        }
    }
}

/// Unusable input exits with the configuration error code.
fn invalid(message: String) -> anyhow::Error {
    CoreError::Config(message).into()
}

/// One title per line; surrounding whitespace trimmed, blank lines dropped.
pub fn split_titles(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

pub fn single_title(title: &str) -> Result<Input> {
    let title = title.trim();
    if title.is_empty() {
        return Err(invalid("empty title".to_string()));
    }
    Ok(Input::Titles(vec![title.to_string()]))
}

pub fn read_title_list(path: &Path) -> Result<Input> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| invalid(format!("cannot read title list {}: {e}", path.display())))?;
    let titles = split_titles(&text);
    if titles.is_empty() {
        return Err(invalid(format!("no titles in {}", path.display())));
    }
    Ok(Input::Titles(titles))
}

pub fn bib_file(path: &Path) -> Result<Input> {
    if !path.is_file() {
        return Err(invalid(format!("BibTeX file not found: {}", path.display())));
    }
    Ok(Input::Bib(path.to_path_buf()))
}

/// Clipboard text as one title, or one title per line with `per_line`.
pub fn clipboard_titles(per_line: bool) -> Result<Input> {
    let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
    let text = clipboard.get_text().context("clipboard holds no text")?;
    titles_from_clipboard_text(&text, per_line)
}

fn titles_from_clipboard_text(text: &str, per_line: bool) -> Result<Input> {
    if per_line {
        let titles = split_titles(text);
        if titles.is_empty() {
            return Err(invalid("clipboard is empty".to_string()));
        }
        return Ok(Input::Titles(titles));
    }
    let title = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return Err(invalid("clipboard is empty".to_string()));
    }
    Ok(Input::Titles(vec![title]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blank_lines_are_discarded() {
        assert_eq!(
            split_titles("  Deep learning \n\n\t\nAttention is all you need\r\n"),
            vec!["Deep learning", "Attention is all you need"]
        );
    }

    #[test]
    fn title_list_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("titles.txt");
        std::fs::write(&path, "First paper\n\nSecond paper\n").unwrap();
        assert_eq!(
            read_title_list(&path).unwrap(),
            Input::Titles(vec!["First paper".into(), "Second paper".into()])
        );
    }

    #[test]
    fn empty_or_missing_list_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "\n   \n").unwrap();
        assert!(read_title_list(&path).is_err());
        assert!(read_title_list(&dir.path().join("missing.txt")).is_err());
        assert!(bib_file(&dir.path().join("missing.bib")).is_err());
        assert!(single_title("   ").is_err());
    }

    #[test]
    fn clipboard_text_is_one_title_unless_split() {
        assert_eq!(
            titles_from_clipboard_text("Deep\nlearning\n", false).unwrap(),
            Input::Titles(vec!["Deep learning".into()])
        );
        assert_eq!(
            titles_from_clipboard_text("Deep\n\nlearning\n", true).unwrap(),
            Input::Titles(vec!["Deep".into(), "learning".into()])
        );
        assert!(titles_from_clipboard_text(" \n", true).is_err());
    }
}
