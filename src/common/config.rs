//! Launch configuration and user settings
//!
//! Two sources feed one [`LaunchConfig`]: the persisted launch configuration
//! entry (JSON, camelCase, as stored in `launch.json`) and the user settings
//! file (TOML). Settings always win over the launch configuration.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, default_user_data_dir};
use super::{Error, Result};

/// Debug type this tool registers for in launch configurations
pub const DEBUG_TYPE: &str = "pcf";

/// Which Edge release channel to launch
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
pub enum BrowserFlavor {
    /// First channel found, trying Stable, Beta, Dev, Canary in order
    #[default]
    Default,
    Stable,
    Beta,
    Dev,
    Canary,
}

impl std::fmt::Display for BrowserFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Stable => write!(f, "Stable"),
            Self::Beta => write!(f, "Beta"),
            Self::Dev => write!(f, "Dev"),
            Self::Canary => write!(f, "Canary"),
        }
    }
}

/// Where the control lives inside the hosted application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLocation {
    /// The control is the whole page, addressed by app id
    FullScreen { app_id: String, control_name: String },
    /// The control sits on a named tab of a form
    Tab { tab_name: String, control_name: String },
}

impl ControlLocation {
    pub fn control_name(&self) -> &str {
        match self {
            Self::FullScreen { control_name, .. } | Self::Tab { control_name, .. } => control_name,
        }
    }

    pub fn is_full_screen(&self) -> bool {
        matches!(self, Self::FullScreen { .. })
    }
}

/// One launch configuration entry as persisted by the IDE
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfiguration {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub debug_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_full_screen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_flavor: Option<BrowserFlavor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_default_user_data_profile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_args: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct LaunchFile {
    configurations: Vec<DebugConfiguration>,
}

impl DebugConfiguration {
    /// Parse either a bare configuration object or a whole `launch.json`.
    ///
    /// From a launch file the entry named `name` is taken, or the first entry
    /// of our debug type when no name is given.
    pub fn from_json(text: &str, name: Option<&str>) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::ConfigParse(e.to_string()))?;

        if value.get("configurations").is_none() {
            return serde_json::from_value(value).map_err(|e| Error::ConfigParse(e.to_string()));
        }

        let file: LaunchFile =
            serde_json::from_value(value).map_err(|e| Error::ConfigParse(e.to_string()))?;
        file.configurations
            .into_iter()
            .find(|c| match name {
                Some(name) => c.name.as_deref() == Some(name),
                None => c.debug_type.as_deref() == Some(DEBUG_TYPE),
            })
            .ok_or_else(|| {
                Error::InvalidConfig(match name {
                    Some(name) => format!("no configuration named '{name}'"),
                    None => format!("no configuration of type '{DEBUG_TYPE}'"),
                })
            })
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path, name: Option<&str>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&content, name)
    }

    /// Overlay user settings; a value present in settings always wins
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(port) = settings.port {
            self.port = Some(port);
        }
        if let Some(url) = &settings.default_url {
            self.url = Some(url.clone());
        }
        if let Some(app_id) = &settings.app_id {
            self.app_id = Some(app_id.clone());
        }
        if let Some(dir) = &settings.user_data_dir {
            self.user_data_dir = Some(dir.clone());
        }
        if let Some(web_root) = &settings.web_root {
            self.web_root = Some(web_root.clone());
        }
        if let Some(flavor) = settings.browser_flavor {
            self.browser_flavor = Some(flavor);
        }
        if !settings.browser_args.is_empty() {
            self.browser_args = Some(settings.browser_args.clone());
        }
        if let Some(use_default) = settings.use_default_browser_profile {
            self.use_default_user_data_profile = Some(use_default);
        }
        self
    }

    /// Check required fields and the full-screen/tab shape
    pub fn validate(&self) -> Result<()> {
        let debug_type = required(&self.debug_type, "type")?;
        if debug_type != DEBUG_TYPE {
            return Err(Error::InvalidConfig(format!(
                "type must be '{DEBUG_TYPE}', got '{debug_type}'"
            )));
        }
        let request = required(&self.request, "request")?;
        if request != "launch" {
            return Err(Error::InvalidConfig(format!(
                "request must be 'launch', got '{request}'"
            )));
        }
        required(&self.name, "name")?;
        required(&self.url, "url")?;
        required(&self.web_root, "webRoot")?;
        required(&self.file, "file")?;
        required(&self.port, "port")?;
        required(&self.control_name, "controlName")?;

        match *required(&self.render_full_screen, "renderFullScreen")? {
            true if is_blank(&self.app_id) => Err(Error::InvalidConfig(
                "renderFullScreen is true but appId is missing".to_string(),
            )),
            false if is_blank(&self.tab_name) => Err(Error::InvalidConfig(
                "renderFullScreen is false but tabName is missing".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &'static str) -> Result<&'a T> {
    value.as_ref().ok_or(Error::MissingField(field))
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

/// User settings, read from `config.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub default_url: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub web_root: Option<PathBuf>,
    #[serde(default)]
    pub browser_flavor: Option<BrowserFlavor>,
    #[serde(default)]
    pub browser_args: Vec<String>,
    /// Feature switch for the whole debugger
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub use_default_browser_profile: Option<bool>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: None,
            default_url: None,
            app_id: None,
            user_data_dir: None,
            web_root: None,
            browser_flavor: None,
            browser_args: Vec::new(),
            enabled: default_enabled(),
            use_default_browser_profile: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default config file
    ///
    /// Returns default settings if the file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                return Self::from_toml(&content);
            }
        }
        Ok(Self::default())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Settings =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        settings.browser_args = settings
            .browser_args
            .iter()
            .map(|arg| arg.trim().to_string())
            .filter(|arg| !arg.is_empty())
            .collect();
        Ok(settings)
    }
}

/// Delays and retry counts, in milliseconds unless named otherwise
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    /// Backoff between control navigation attempts
    #[serde(default = "default_navigation_retry")]
    pub navigation_retry_ms: u64,

    /// Wait after a bundle change before reloading it
    #[serde(default = "default_file_settle")]
    pub file_settle_ms: u64,

    /// Backoff between native debugger attach attempts
    #[serde(default = "default_attach_retry")]
    pub attach_retry_ms: u64,

    /// Attach attempts before giving up
    #[serde(default = "default_attach_retries")]
    pub attach_retries: u32,

    /// How long a terminated native session may stay gone before the
    /// whole debug session stops
    #[serde(default = "default_termination_grace")]
    pub termination_grace_ms: u64,

    /// How long to wait for the form's tab list to render
    #[serde(default = "default_selector_timeout")]
    pub selector_timeout_ms: u64,

    /// How long a freshly spawned browser may take to open its DevTools port
    #[serde(default = "default_browser_start")]
    pub browser_start_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_retry_ms: default_navigation_retry(),
            file_settle_ms: default_file_settle(),
            attach_retry_ms: default_attach_retry(),
            attach_retries: default_attach_retries(),
            termination_grace_ms: default_termination_grace(),
            selector_timeout_ms: default_selector_timeout(),
            browser_start_secs: default_browser_start(),
        }
    }
}

fn default_navigation_retry() -> u64 {
    1000
}
fn default_file_settle() -> u64 {
    500
}
fn default_attach_retry() -> u64 {
    1000
}
fn default_attach_retries() -> u32 {
    5
}
fn default_termination_grace() -> u64 {
    3000
}
fn default_selector_timeout() -> u64 {
    30_000
}
fn default_browser_start() -> u64 {
    15
}

impl Timeouts {
    pub fn navigation_retry(&self) -> Duration {
        Duration::from_millis(self.navigation_retry_ms)
    }

    pub fn file_settle(&self) -> Duration {
        Duration::from_millis(self.file_settle_ms)
    }

    pub fn attach_retry(&self) -> Duration {
        Duration::from_millis(self.attach_retry_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn browser_start(&self) -> Duration {
        Duration::from_secs(self.browser_start_secs)
    }
}

/// Normalize `file` to a plain relative path under `web_root`
fn relative_to_web_root(web_root: &Path, file: &Path) -> Result<PathBuf> {
    let outside = || {
        Error::InvalidConfig(format!(
            "file {} is outside webRoot {}",
            file.display(),
            web_root.display()
        ))
    };

    let relative = if file.is_absolute() {
        file.strip_prefix(web_root).map_err(|_| outside())?
    } else {
        file
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside())
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "file {} does not name a bundle",
            file.display()
        )));
    }
    Ok(normalized)
}

/// Fully resolved configuration for one debug attempt
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub name: String,
    pub url: String,
    pub web_root: PathBuf,
    /// Bundle path relative to `web_root`
    pub file: PathBuf,
    pub browser_flavor: BrowserFlavor,
    pub port: u16,
    pub user_data_dir: Option<PathBuf>,
    pub use_default_profile: bool,
    pub browser_args: Vec<String>,
    pub location: ControlLocation,
    pub timeouts: Timeouts,
}

impl LaunchConfig {
    /// Merge settings over the launch configuration and validate the result
    pub fn resolve(config: &DebugConfiguration, settings: &Settings) -> Result<Self> {
        if !settings.enabled {
            return Err(Error::Disabled);
        }

        let merged = config.clone().with_settings(settings);
        merged.validate()?;

        // validate() guarantees every field below is present
        let missing = |field| Error::MissingField(field);
        let control_name = merged.control_name.ok_or_else(|| missing("controlName"))?;
        let location = if merged.render_full_screen.unwrap_or_default() {
            ControlLocation::FullScreen {
                app_id: merged.app_id.ok_or_else(|| missing("appId"))?,
                control_name,
            }
        } else {
            ControlLocation::Tab {
                tab_name: merged.tab_name.ok_or_else(|| missing("tabName"))?,
                control_name,
            }
        };

        let web_root = merged.web_root.ok_or_else(|| missing("webRoot"))?;
        let file = merged.file.ok_or_else(|| missing("file"))?;
        let file = relative_to_web_root(&web_root, &file)?;

        Ok(Self {
            name: merged.name.ok_or_else(|| missing("name"))?,
            url: merged.url.ok_or_else(|| missing("url"))?,
            web_root,
            file,
            browser_flavor: merged.browser_flavor.unwrap_or_default(),
            port: merged.port.ok_or_else(|| missing("port"))?,
            user_data_dir: merged.user_data_dir,
            use_default_profile: merged.use_default_user_data_profile.unwrap_or(false),
            browser_args: merged
                .browser_args
                .unwrap_or_default()
                .into_iter()
                .map(|arg| arg.trim().to_string())
                .filter(|arg| !arg.is_empty())
                .collect(),
            location,
            timeouts: settings.timeouts.clone(),
        })
    }

    /// Absolute path of the bundle on disk
    pub fn bundle_path(&self) -> PathBuf {
        self.web_root.join(&self.file)
    }

    /// Glob, relative to `web_root`, that the bundle watcher matches
    pub fn bundle_glob(&self) -> String {
        self.file.to_string_lossy().replace('\\', "/")
    }

    /// Profile directory this tool manages, or `None` when the browser
    /// should use its own default profile
    pub fn managed_user_data_dir(&self) -> Option<PathBuf> {
        if self.use_default_profile {
            return None;
        }
        self.user_data_dir.clone().or_else(default_user_data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab_config() -> DebugConfiguration {
        DebugConfiguration::from_json(
            r#"{
                "type": "pcf",
                "request": "launch",
                "name": "Debug control",
                "url": "https://ORG_URL.crm.dynamics.com/main.aspx?pagetype=entityrecord",
                "webRoot": "/work/control",
                "file": "out/controls/Sample/bundle.js",
                "port": 9222,
                "controlName": "Sample",
                "renderFullScreen": false,
                "tabName": "General"
            }"#,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_tab_config() {
        let config = LaunchConfig::resolve(&tab_config(), &Settings::default()).unwrap();
        assert_eq!(
            config.location,
            ControlLocation::Tab {
                tab_name: "General".to_string(),
                control_name: "Sample".to_string()
            }
        );
        assert_eq!(config.port, 9222);
        assert_eq!(config.browser_flavor, BrowserFlavor::Default);
        assert_eq!(
            config.bundle_path(),
            PathBuf::from("/work/control/out/controls/Sample/bundle.js")
        );
        assert_eq!(config.bundle_glob(), "out/controls/Sample/bundle.js");
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let mut config = tab_config();
        config.web_root = None;
        let err = LaunchConfig::resolve(&config, &Settings::default()).unwrap_err();
        assert!(matches!(err, Error::MissingField("webRoot")));
    }

    #[test]
    fn test_inconsistent_shapes_are_rejected() {
        let mut tab = tab_config();
        tab.tab_name = Some("  ".to_string());
        assert!(matches!(tab.validate(), Err(Error::InvalidConfig(_))));

        let mut full = tab_config();
        full.render_full_screen = Some(true);
        assert!(matches!(full.validate(), Err(Error::InvalidConfig(_))));

        full.app_id = Some("f96ac8ee-529f-4510-af5f-ad7a2f5a3b27".to_string());
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_settings_override_launch_config() {
        let settings = Settings::from_toml(
            r#"
port = 9333
default_url = "https://other.crm.dynamics.com"
browser_flavor = "Beta"
browser_args = ["  --auto-open-devtools-for-tabs ", ""]

[timeouts]
attach_retries = 2
"#,
        )
        .unwrap();

        let config = LaunchConfig::resolve(&tab_config(), &settings).unwrap();
        assert_eq!(config.port, 9333);
        assert_eq!(config.url, "https://other.crm.dynamics.com");
        assert_eq!(config.browser_flavor, BrowserFlavor::Beta);
        assert_eq!(config.browser_args, vec!["--auto-open-devtools-for-tabs"]);
        assert_eq!(config.timeouts.attach_retries, 2);
        assert_eq!(config.timeouts.navigation_retry_ms, 1000);
    }

    #[test]
    fn test_disabled_settings_reject_launch() {
        let settings = Settings::from_toml("enabled = false").unwrap();
        let err = LaunchConfig::resolve(&tab_config(), &settings).unwrap_err();
        assert!(matches!(err, Error::Disabled));
    }

    #[test]
    fn test_launch_file_picks_our_entry() {
        let text = r#"{
            "version": "0.2.0",
            "configurations": [
                { "type": "node", "request": "launch", "name": "Other" },
                { "type": "pcf", "request": "launch", "name": "Mine", "port": 9222 }
            ]
        }"#;
        let config = DebugConfiguration::from_json(text, None).unwrap();
        assert_eq!(config.name.as_deref(), Some("Mine"));

        let err = DebugConfiguration::from_json(text, Some("Missing")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_default_profile_disables_managed_dir() {
        let mut config = LaunchConfig::resolve(&tab_config(), &Settings::default()).unwrap();
        config.user_data_dir = Some(PathBuf::from("/tmp/x"));
        assert_eq!(config.managed_user_data_dir(), Some(PathBuf::from("/tmp/x")));

        config.use_default_profile = true;
        assert_eq!(config.managed_user_data_dir(), None);
    }

    fn with_file(file: &str) -> DebugConfiguration {
        let mut config = tab_config();
        config.file = Some(PathBuf::from(file));
        config
    }

    #[test]
    fn test_file_is_normalized_under_web_root() {
        let settings = Settings::default();
        for file in [
            "./out/controls/Sample/bundle.js",
            "out/./controls/Sample/bundle.js",
            "/work/control/out/controls/Sample/bundle.js",
            "/work/control/./out/controls/Sample/bundle.js",
        ] {
            let config = LaunchConfig::resolve(&with_file(file), &settings).unwrap();
            assert_eq!(config.file, PathBuf::from("out/controls/Sample/bundle.js"), "{file}");
            assert_eq!(config.bundle_glob(), "out/controls/Sample/bundle.js");
            assert_eq!(
                config.bundle_path(),
                PathBuf::from("/work/control/out/controls/Sample/bundle.js")
            );
        }
    }

    #[test]
    fn test_file_outside_web_root_is_rejected() {
        let settings = Settings::default();
        for file in [
            "/elsewhere/out/bundle.js",
            "../sibling/out/bundle.js",
            "out/../../bundle.js",
            ".",
        ] {
            let err = LaunchConfig::resolve(&with_file(file), &settings).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{file}");
        }
    }
}
