use std::path::{Path, PathBuf};

use toml::value::Table;
use toml::Value;
use tracing::{debug, warn};

/// Section of the settings file owned by the console.
const SECTION: &str = "console";

const DEFAULT_THEME: &str = "Light Theme";
const DEFAULT_CODE_FONT: &str = "Consolas";
const DEFAULT_EXPANDER_ICON: &str = "KEYBOARD_ARROW_DOWN";

/// Local key-value settings, persisted as TOML under the user's home
/// directory.
///
/// Every recognized option is an explicit typed field with its own parse
/// rule and default; a value that fails to parse logs a warning and falls
/// back to that field's default, never to an unrelated one. Unrecognized
/// keys are preserved across write-backs.
///
/// The cache/query layer only ever reads `https_proxy` and writes back the
/// last-used profile/realm; both are convenience side calls, so persistence
/// failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct Settings {
    pub current_theme: String,
    pub details_font_size: u32,
    pub heading_font_size: u32,
    pub json_indent: u32,
    pub https_proxy: String,
    pub window_height: f64,
    pub window_width: f64,
    pub code_font: String,
    pub code_font_size: u32,
    /// Icon name, normalized to upper case on read.
    pub expander_icon: String,
    /// Last-used credential profile, restored on next start.
    pub profile: String,
    /// Last-used realm, restored on next start.
    pub realm: String,
    path: PathBuf,
    raw: Table,
}

impl Settings {
    /// Load from the default location (`~/.cinder/cinder.toml`). A missing
    /// or unreadable file yields pure defaults.
    pub fn load_default() -> Self {
        Self::load_from(default_path())
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw = read_table(&path);
        let section = raw
            .get(SECTION)
            .and_then(Value::as_table)
            .cloned()
            .unwrap_or_default();

        Self {
            current_theme: str_field(&section, "current_theme", DEFAULT_THEME),
            details_font_size: u32_field(&section, "details_font_size", 10),
            heading_font_size: u32_field(&section, "heading_font_size", 11),
            json_indent: u32_field(&section, "json_indent", 4),
            https_proxy: str_field(&section, "https_proxy", ""),
            window_height: f64_field(&section, "window_height", 800.0),
            window_width: f64_field(&section, "window_width", 1400.0),
            code_font: str_field(&section, "code_font", DEFAULT_CODE_FONT),
            code_font_size: u32_field(&section, "code_font_size", 11),
            expander_icon: str_field(&section, "expander_icon", DEFAULT_EXPANDER_ICON)
                .to_uppercase(),
            profile: str_field(&section, "profile", ""),
            realm: str_field(&section, "realm", ""),
            path,
            raw,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the last-used profile and persist. Fire-and-forget.
    pub fn set_profile(&mut self, profile: &str) {
        self.profile = profile.to_string();
        self.persist();
    }

    /// Record the last-used realm and persist. Fire-and-forget.
    pub fn set_realm(&mut self, realm: &str) {
        self.realm = realm.to_string();
        self.persist();
    }

    /// Write all known fields back, preserving unknown keys. Failures are
    /// logged and dropped; the console never depends on the file.
    pub fn persist(&mut self) {
        let section = self
            .raw
            .entry(SECTION.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        let Some(table) = section.as_table_mut() else {
            warn!("settings section '{SECTION}' is not a table; skipping write-back");
            return;
        };
        table.insert("current_theme".into(), Value::from(self.current_theme.clone()));
        table.insert(
            "details_font_size".into(),
            Value::from(self.details_font_size as i64),
        );
        table.insert(
            "heading_font_size".into(),
            Value::from(self.heading_font_size as i64),
        );
        table.insert("json_indent".into(), Value::from(self.json_indent as i64));
        table.insert("https_proxy".into(), Value::from(self.https_proxy.clone()));
        table.insert("window_height".into(), Value::from(self.window_height));
        table.insert("window_width".into(), Value::from(self.window_width));
        table.insert("code_font".into(), Value::from(self.code_font.clone()));
        table.insert(
            "code_font_size".into(),
            Value::from(self.code_font_size as i64),
        );
        table.insert(
            "expander_icon".into(),
            Value::from(self.expander_icon.clone()),
        );
        table.insert("profile".into(), Value::from(self.profile.clone()));
        table.insert("realm".into(), Value::from(self.realm.clone()));

        let rendered = match toml::to_string(&self.raw) {
            Ok(s) => s,
            Err(err) => {
                warn!("failed to serialize settings: {err}");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("failed to create settings dir {}: {err}", parent.display());
                return;
            }
        }
        if let Err(err) = std::fs::write(&self.path, rendered) {
            warn!("failed to write settings to {}: {err}", self.path.display());
        }
    }
}

fn default_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".cinder").join("cinder.toml"))
        .unwrap_or_else(|| PathBuf::from(".cinder/cinder.toml"))
}

fn read_table(path: &Path) -> Table {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!("no settings file at {}; using defaults", path.display());
            return Table::new();
        }
    };
    match contents.parse::<Table>() {
        Ok(table) => table,
        Err(err) => {
            warn!("failed to parse {}: {err}; using defaults", path.display());
            Table::new()
        }
    }
}

fn str_field(section: &Table, key: &str, default: &str) -> String {
    match section.get(key) {
        None => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            warn!("settings key '{key}' has non-string value {other}; using default");
            default.to_string()
        }
    }
}

fn u32_field(section: &Table, key: &str, default: u32) -> u32 {
    let parsed = match section.get(key) {
        None => return default,
        Some(Value::Integer(n)) => u32::try_from(*n).ok(),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        Some(_) => None,
    };
    parsed.unwrap_or_else(|| {
        warn!("settings key '{key}' is not a valid integer; using default {default}");
        default
    })
}

fn f64_field(section: &Table, key: &str, default: f64) -> f64 {
    let parsed = match section.get(key) {
        None => return default,
        Some(Value::Float(f)) => Some(*f),
        Some(Value::Integer(n)) => Some(*n as f64),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    parsed.unwrap_or_else(|| {
        warn!("settings key '{key}' is not a valid number; using default {default}");
        default
    })
}
