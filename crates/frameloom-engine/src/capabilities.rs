//! Host capability providers.
//!
//! Login and timeline export behave differently on the desktop shell and in
//! a browser. The host picks one [`Capabilities`] bundle at startup and the
//! pipeline only talks to the traits.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use frameloom_contracts::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reconcile::ReconciledView;

const SESSION_TOKEN_KEY: &str = "session.token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    Desktop,
    Browser,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desktop => write!(f, "desktop"),
            Self::Browser => write!(f, "browser"),
        }
    }
}

impl std::str::FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "browser" | "web" => Ok(Self::Browser),
            other => anyhow::bail!("unknown host '{other}' (expected desktop or browser)"),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn host(&self) -> Host;
    fn bearer_token(&self) -> Option<String>;
    fn sign_in(&self, token: &str) -> Result<()>;
    fn sign_out(&self) -> Result<()>;
}

/// Desktop sessions survive restarts through the injected store.
pub struct DesktopAuth {
    store: Arc<dyn KeyValueStore>,
}

impl DesktopAuth {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl AuthProvider for DesktopAuth {
    fn host(&self) -> Host {
        Host::Desktop
    }

    fn bearer_token(&self) -> Option<String> {
        self.store
            .get(SESSION_TOKEN_KEY)
            .and_then(|value| value.as_str().map(str::trim).map(str::to_string))
            .filter(|token| !token.is_empty())
    }

    fn sign_in(&self, token: &str) -> Result<()> {
        self.store
            .set(SESSION_TOKEN_KEY, Value::String(token.trim().to_string()))
            .context("failed to persist desktop session token")
    }

    fn sign_out(&self) -> Result<()> {
        self.store.remove(SESSION_TOKEN_KEY)
    }
}

/// Browser sessions only live as long as the page.
#[derive(Default)]
pub struct BrowserAuth {
    token: Mutex<Option<String>>,
}

impl BrowserAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token.filter(|value| !value.trim().is_empty())),
        }
    }
}

impl AuthProvider for BrowserAuth {
    fn host(&self) -> Host {
        Host::Browser
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.lock().ok()?.clone()
    }

    fn sign_in(&self, token: &str) -> Result<()> {
        *self
            .token
            .lock()
            .map_err(|_| anyhow::anyhow!("browser session lock poisoned"))? =
            Some(token.trim().to_string());
        Ok(())
    }

    fn sign_out(&self) -> Result<()> {
        *self
            .token
            .lock()
            .map_err(|_| anyhow::anyhow!("browser session lock poisoned"))? = None;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineClip {
    pub segment_key: String,
    pub narration: String,
    pub image_storage_key: Option<String>,
    pub video_storage_key: Option<String>,
    pub video_url: Option<String>,
}

/// Edit-ready ordering of a project's primary shots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineManifest {
    pub project_id: String,
    pub art_style: String,
    pub clips: Vec<TimelineClip>,
}

impl TimelineManifest {
    pub fn from_view(project_id: &str, view: &ReconciledView) -> Self {
        let clips = view
            .segments
            .iter()
            .map(|segment| {
                let primary = view.primary_image(&segment.id);
                let video = view.video_for(&segment.id, primary.map(|image| image.id.as_str()));
                TimelineClip {
                    segment_key: segment.id.clone(),
                    narration: segment.narration.clone(),
                    image_storage_key: primary.map(|image| image.storage_key.clone()),
                    video_storage_key: video.map(|video| video.storage_key.clone()),
                    video_url: video.and_then(|video| video.url.clone()),
                }
            })
            .collect();
        Self {
            project_id: project_id.to_string(),
            art_style: view.art_style.clone().unwrap_or_default(),
            clips,
        }
    }

    /// Export file name; anything outside `[A-Za-z0-9_-]` in the project id
    /// becomes `_` so the name cannot leave the export directory.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .project_id
            .trim()
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        if stem.is_empty() {
            return "timeline-project.json".to_string();
        }
        format!("timeline-{stem}.json")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(PathBuf),
    Download { file_name: String, bytes: Vec<u8> },
}

pub trait TimelineExporter: Send + Sync {
    fn export(&self, manifest: &TimelineManifest) -> Result<ExportOutcome>;
}

pub struct DesktopExporter {
    out_dir: PathBuf,
}

impl DesktopExporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl TimelineExporter for DesktopExporter {
    fn export(&self, manifest: &TimelineManifest) -> Result<ExportOutcome> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.out_dir.join(manifest.file_name());
        let payload = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, payload + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(ExportOutcome::Written(path))
    }
}

#[derive(Default)]
pub struct BrowserExporter;

impl TimelineExporter for BrowserExporter {
    fn export(&self, manifest: &TimelineManifest) -> Result<ExportOutcome> {
        Ok(ExportOutcome::Download {
            file_name: manifest.file_name(),
            bytes: serde_json::to_vec_pretty(manifest)?,
        })
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub auth: Arc<dyn AuthProvider>,
    pub exporter: Arc<dyn TimelineExporter>,
}

impl Capabilities {
    /// Resolve the provider pair for `host`. `token` seeds a browser
    /// session; desktop sessions come from `store`.
    pub fn for_host(
        host: Host,
        store: Arc<dyn KeyValueStore>,
        export_dir: impl Into<PathBuf>,
        token: Option<String>,
    ) -> Result<Self> {
        match host {
            Host::Desktop => {
                let auth = DesktopAuth::new(store);
                if let Some(token) = token.filter(|value| !value.trim().is_empty()) {
                    auth.sign_in(&token)?;
                }
                Ok(Self {
                    auth: Arc::new(auth),
                    exporter: Arc::new(DesktopExporter::new(export_dir)),
                })
            }
            Host::Browser => Ok(Self {
                auth: Arc::new(BrowserAuth::new(token)),
                exporter: Arc::new(BrowserExporter),
            }),
        }
    }

    pub fn host(&self) -> Host {
        self.auth.host()
    }
}

#[cfg(test)]
mod tests {
    use frameloom_contracts::store::MemoryStore;

    use super::*;

    fn manifest() -> TimelineManifest {
        TimelineManifest {
            project_id: "42".to_string(),
            art_style: "ink".to_string(),
            clips: vec![TimelineClip {
                segment_key: "1".to_string(),
                narration: "Waves roll in.".to_string(),
                image_storage_key: Some("images/1.png".to_string()),
                video_storage_key: None,
                video_url: None,
            }],
        }
    }

    #[test]
    fn desktop_auth_persists_through_the_store() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let caps = Capabilities::for_host(Host::Desktop, store.clone(), "exports", None)?;
        assert_eq!(caps.host(), Host::Desktop);
        assert_eq!(caps.auth.bearer_token(), None);

        caps.auth.sign_in(" tok-1 ")?;
        let reopened = DesktopAuth::new(store.clone());
        assert_eq!(reopened.bearer_token().as_deref(), Some("tok-1"));

        reopened.sign_out()?;
        assert_eq!(caps.auth.bearer_token(), None);
        assert!(store.snapshot().is_empty());
        Ok(())
    }

    #[test]
    fn browser_auth_keeps_the_token_in_memory() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let caps =
            Capabilities::for_host(Host::Browser, store.clone(), "unused", Some("abc".into()))?;
        assert_eq!(caps.auth.bearer_token().as_deref(), Some("abc"));
        caps.auth.sign_out()?;
        assert_eq!(caps.auth.bearer_token(), None);
        assert!(store.snapshot().is_empty());
        Ok(())
    }

    #[test]
    fn desktop_export_writes_a_manifest_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let exporter = DesktopExporter::new(temp.path().join("exports"));
        let outcome = exporter.export(&manifest())?;
        let ExportOutcome::Written(path) = outcome else {
            anyhow::bail!("expected a written file");
        };
        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("timeline-42.json"));
        let parsed: TimelineManifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(parsed, manifest());
        Ok(())
    }

    #[test]
    fn export_names_stay_inside_the_export_dir() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("exports");
        let exporter = DesktopExporter::new(&out_dir);
        let mut escaping = manifest();
        escaping.project_id = "../../etc/passwd".to_string();
        assert_eq!(escaping.file_name(), "timeline-______etc_passwd.json");

        let ExportOutcome::Written(path) = exporter.export(&escaping)? else {
            anyhow::bail!("expected a written file");
        };
        assert_eq!(path.parent(), Some(out_dir.as_path()));

        escaping.project_id = "  ".to_string();
        assert_eq!(escaping.file_name(), "timeline-project.json");
        Ok(())
    }

    #[test]
    fn browser_export_returns_download_bytes() -> Result<()> {
        let outcome = BrowserExporter.export(&manifest())?;
        let ExportOutcome::Download { file_name, bytes } = outcome else {
            anyhow::bail!("expected a download payload");
        };
        assert_eq!(file_name, "timeline-42.json");
        let parsed: TimelineManifest = serde_json::from_slice(&bytes)?;
        assert_eq!(parsed.clips.len(), 1);
        Ok(())
    }

    #[test]
    fn host_parses_from_config_strings() -> Result<()> {
        assert_eq!("Desktop".parse::<Host>()?, Host::Desktop);
        assert_eq!("web".parse::<Host>()?, Host::Browser);
        assert!("tv".parse::<Host>().is_err());
        Ok(())
    }
}
