use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Root configuration, loaded from `bibfetch.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where downloaded PDFs (and ad-hoc `.bib` files) go. Created if absent.
    pub output_dir: PathBuf,
    pub doi_getter: String,
    pub paper_resource: String,
    pub bibtex_getter: String,
    pub modes: Vec<String>,
    pub input: InputConfig,
    pub network: NetworkConfig,
    pub crossref: CrossrefConfig,
    pub scihub: SciHubConfig,
    pub scholar: ScholarConfig,
    pub bibsonomy: BibsonomyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InputKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_to_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Title,
    Txt,
    Bib,
    Clipboard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub min_interval_ms: u64,
    pub concurrency: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossrefConfig {
    pub base_url: String,
    pub rows: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polite_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SciHubConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScholarConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BibsonomyConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output").join("pdfs"),
            doi_getter: "crossref".to_string(),
            paper_resource: "scihub".to_string(),
            bibtex_getter: "scholar".to_string(),
            modes: vec!["pdf".to_string()],
            input: InputConfig::default(),
            network: NetworkConfig::default(),
            crossref: CrossrefConfig::default(),
            scihub: SciHubConfig::default(),
            scholar: ScholarConfig::default(),
            bibsonomy: BibsonomyConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            min_interval_ms: 100,
            concurrency: 4,
            user_agent: "bibfetch/0.1".to_string(),
        }
    }
}

impl Default for CrossrefConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.crossref.org".to_string(),
            rows: 20,
            polite_email: None,
        }
    }
}

impl Default for SciHubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sci-hub.se/".to_string(),
        }
    }
}

impl Default for ScholarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://scholar.google.com".to_string(),
        }
    }
}

impl Default for BibsonomyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.bibsonomy.org/api".to_string(),
            username: None,
            api_key: None,
        }
    }
}

// ─── Backend selection ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoiBackend {
    Crossref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfBackend {
    SciHub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BibtexBackendKind {
    Scholar,
    Bibsonomy { username: String, api_key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Pdf,
    Bibtex,
}

impl FromStr for DoiBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossref" => Ok(Self::Crossref),
            _ => Err(CoreError::UnknownBackend {
                kind: "doi_getter",
                name: s.to_string(),
                supported: "crossref",
            }),
        }
    }
}

impl FromStr for PdfBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scihub" | "sci-hub" => Ok(Self::SciHub),
            _ => Err(CoreError::UnknownBackend {
                kind: "paper_resource",
                name: s.to_string(),
                supported: "scihub",
            }),
        }
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "bibtex" | "bib" => Ok(Self::Bibtex),
            _ => Err(CoreError::UnknownBackend {
                kind: "mode",
                name: s.to_string(),
                supported: "pdf, bibtex",
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Bibtex => write!(f, "bibtex"),
        }
    }
}

/// Backend names resolved against the closed set of supported implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBackends {
    pub doi: DoiBackend,
    pub pdf: PdfBackend,
    /// Only resolved when `modes` includes `bibtex`.
    pub bibtex: Option<BibtexBackendKind>,
    pub modes: Vec<Mode>,
}

impl ValidatedBackends {
    pub fn has_mode(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Config file path: `$BIBFETCH_CONFIG`, then `./bibfetch.toml`, then
    /// `~/.config/bibfetch/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("BIBFETCH_CONFIG") {
            return PathBuf::from(path);
        }

        let local = PathBuf::from("bibfetch.toml");
        if local.exists() {
            return local;
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("bibfetch")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Resolve backend names. Unknown names fail here, before any request is made.
    pub fn validate(&self) -> Result<ValidatedBackends> {
        let doi = self.doi_getter.parse()?;
        let pdf = self.paper_resource.parse()?;

        let mut modes = Vec::new();
        for name in &self.modes {
            let mode: Mode = name.parse()?;
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }
        if modes.is_empty() {
            return Err(CoreError::Config(
                "at least one mode (pdf, bibtex) is required".to_string(),
            ));
        }

        let bibtex = if modes.contains(&Mode::Bibtex) {
            Some(self.bibtex_backend()?)
        } else {
            None
        };

        if self.network.concurrency == 0 {
            return Err(CoreError::Config(
                "network.concurrency must be at least 1".to_string(),
            ));
        }

        Ok(ValidatedBackends {
            doi,
            pdf,
            bibtex,
            modes,
        })
    }

    fn bibtex_backend(&self) -> Result<BibtexBackendKind> {
        match self.bibtex_getter.trim().to_ascii_lowercase().as_str() {
            "scholar" | "gscholar" => Ok(BibtexBackendKind::Scholar),
            "bibsonomy" => {
                let username = non_blank(self.bibsonomy.username.as_deref());
                let api_key = non_blank(self.bibsonomy.api_key.as_deref());
                match (username, api_key) {
                    (Some(username), Some(api_key)) => Ok(BibtexBackendKind::Bibsonomy {
                        username: username.to_string(),
                        api_key: api_key.to_string(),
                    }),
                    _ => Err(CoreError::Config(
                        "bibsonomy requires both bibsonomy.username and bibsonomy.api_key"
                            .to_string(),
                    )),
                }
            }
            _ => Err(CoreError::UnknownBackend {
                kind: "bibtex_getter",
                name: self.bibtex_getter.clone(),
                supported: "scholar, bibsonomy",
            }),
        }
    }

    /// Create the output directory if it is missing and return it.
    pub fn ensure_output_dir(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(&self.output_dir)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
