//! Microsoft Edge executable discovery
//!
//! Each release channel has well-known install locations per platform and,
//! on Linux, a launcher name on PATH. `Default` takes the first channel that
//! is installed, in the order Stable, Beta, Dev, Canary.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::common::config::BrowserFlavor;
use crate::common::{Error, Result};

use super::ExecutableLocator;

/// Channels tried, in order, for [`BrowserFlavor::Default`]
pub const DEFAULT_ORDER: [BrowserFlavor; 4] = [
    BrowserFlavor::Stable,
    BrowserFlavor::Beta,
    BrowserFlavor::Dev,
    BrowserFlavor::Canary,
];

/// Well-known install paths for a channel on this platform
pub fn platform_candidate_paths(flavor: BrowserFlavor) -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let suffix = match flavor {
            BrowserFlavor::Stable | BrowserFlavor::Default => "Edge",
            BrowserFlavor::Beta => "Edge Beta",
            BrowserFlavor::Dev => "Edge Dev",
            BrowserFlavor::Canary => "Edge SxS",
        };
        let mut roots = Vec::new();
        if flavor == BrowserFlavor::Canary {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                roots.push(PathBuf::from(local));
            }
        } else {
            for var in ["ProgramFiles(x86)", "ProgramFiles"] {
                if let Ok(root) = std::env::var(var) {
                    roots.push(PathBuf::from(root));
                }
            }
        }
        roots
            .into_iter()
            .map(|root| {
                root.join("Microsoft")
                    .join(suffix)
                    .join("Application")
                    .join("msedge.exe")
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        let app = match flavor {
            BrowserFlavor::Stable | BrowserFlavor::Default => "Microsoft Edge",
            BrowserFlavor::Beta => "Microsoft Edge Beta",
            BrowserFlavor::Dev => "Microsoft Edge Dev",
            BrowserFlavor::Canary => "Microsoft Edge Canary",
        };
        vec![PathBuf::from(format!(
            "/Applications/{app}.app/Contents/MacOS/{app}"
        ))]
    }

    #[cfg(target_os = "linux")]
    {
        match flavor {
            BrowserFlavor::Stable | BrowserFlavor::Default => {
                vec![PathBuf::from("/opt/microsoft/msedge/msedge")]
            }
            BrowserFlavor::Beta => vec![PathBuf::from("/opt/microsoft/msedge-beta/msedge")],
            BrowserFlavor::Dev => vec![PathBuf::from("/opt/microsoft/msedge-dev/msedge")],
            // No Canary channel on Linux
            BrowserFlavor::Canary => Vec::new(),
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        let _ = flavor;
        Vec::new()
    }
}

/// Launcher names looked up on PATH for a channel
pub fn path_names(flavor: BrowserFlavor) -> &'static [&'static str] {
    match flavor {
        BrowserFlavor::Stable | BrowserFlavor::Default => &["microsoft-edge-stable", "microsoft-edge"],
        BrowserFlavor::Beta => &["microsoft-edge-beta"],
        BrowserFlavor::Dev => &["microsoft-edge-dev"],
        BrowserFlavor::Canary => &[],
    }
}

/// Locates Edge installs, optionally from an explicit candidate table
#[derive(Debug, Clone, Default)]
pub struct EdgeLocator {
    candidates: Option<HashMap<BrowserFlavor, Vec<PathBuf>>>,
}

impl EdgeLocator {
    /// Search the platform's install locations and PATH
    pub fn new() -> Self {
        Self::default()
    }

    /// Search only the given paths (no PATH lookup)
    pub fn with_candidates(candidates: HashMap<BrowserFlavor, Vec<PathBuf>>) -> Self {
        Self {
            candidates: Some(candidates),
        }
    }

    fn candidates(&self, flavor: BrowserFlavor) -> Vec<PathBuf> {
        match &self.candidates {
            Some(table) => table.get(&flavor).cloned().unwrap_or_default(),
            None => platform_candidate_paths(flavor),
        }
    }

    /// Look up one concrete channel, recording what was searched
    fn find_channel(&self, flavor: BrowserFlavor, searched: &mut Vec<String>) -> Option<PathBuf> {
        for path in self.candidates(flavor) {
            searched.push(path.display().to_string());
            if path.is_file() {
                return Some(path);
            }
        }

        if self.candidates.is_none() {
            for name in path_names(flavor) {
                searched.push(format!("PATH:{name}"));
                if let Ok(path) = which::which(name) {
                    return Some(path);
                }
            }
        }

        None
    }

    /// Every installed channel, in preference order
    pub fn discover_all(&self) -> Vec<(BrowserFlavor, PathBuf)> {
        let mut searched = Vec::new();
        DEFAULT_ORDER
            .iter()
            .filter_map(|flavor| {
                self.find_channel(*flavor, &mut searched)
                    .map(|path| (*flavor, path))
            })
            .collect()
    }
}

impl ExecutableLocator for EdgeLocator {
    fn locate(&self, flavor: BrowserFlavor) -> Result<PathBuf> {
        let order: &[BrowserFlavor] = match flavor {
            BrowserFlavor::Default => &DEFAULT_ORDER,
            BrowserFlavor::Stable => &[BrowserFlavor::Stable],
            BrowserFlavor::Beta => &[BrowserFlavor::Beta],
            BrowserFlavor::Dev => &[BrowserFlavor::Dev],
            BrowserFlavor::Canary => &[BrowserFlavor::Canary],
        };

        let mut searched = Vec::new();
        for channel in order {
            if let Some(path) = self.find_channel(*channel, &mut searched) {
                tracing::debug!(flavor = %channel, path = %path.display(), "Found browser");
                return Ok(path);
            }
        }

        Err(Error::browser_not_found(&flavor.to_string(), &searched))
    }
}
