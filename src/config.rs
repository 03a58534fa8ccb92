use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Core terminal configuration, loaded from `<config_dir>/vtcore/config.json`.
///
/// Everything the core needs before a session exists lives here — font/theme
/// fields are carried through even though glyph rendering itself is out of
/// scope (§1), because the cell builder still needs to know the identity
/// strings and policy knobs that affect wire behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub font: FontConfig,
    pub terminal: TerminalConfig,
    pub theme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontConfig {
    pub family: String,
    pub size: f32,
    pub line_height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub scrollback_lines: usize,
    /// Default cursor-blink preference. When `Some`, an explicit user choice
    /// gates DEC mode 12 (`\e[?12h`/`\e[?12l`) from overriding it — §4.2.
    pub cursor_blink: Option<bool>,
    pub cursor_shape: String,
    pub option_as_meta: bool,
    pub shell: Option<String>,
    /// `TERM` advertised to the child process.
    pub term: String,
    /// `TERM_PROGRAM` advertised to the child process.
    pub term_program: String,
    /// OSC 4/10/11/12 color report width: `none` suppresses replies
    /// entirely, `8-bit` reports each channel as `rr`, `16-bit` multiplies
    /// each channel by 257 and reports `rrrr` (§4.2).
    pub color_report_format: ColorReportFormat,
    pub clipboard_read: ClipboardPolicy,
    pub clipboard_write: ClipboardPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorReportFormat {
    None,
    EightBit,
    SixteenBit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClipboardPolicy {
    Allow,
    Deny,
    Ask,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            font: FontConfig {
                family: "JetBrains Mono, Menlo, Monaco, monospace".to_string(),
                size: 14.0,
                line_height: 1.4,
            },
            terminal: TerminalConfig {
                scrollback_lines: 10_000,
                cursor_blink: None,
                cursor_shape: "block".to_string(),
                option_as_meta: true,
                shell: None,
                term: "xterm-vtcore".to_string(),
                term_program: "vtcore".to_string(),
                color_report_format: ColorReportFormat::SixteenBit,
                clipboard_read: ClipboardPolicy::Allow,
                clipboard_write: ClipboardPolicy::Allow,
            },
            theme: "dark".to_string(),
        }
    }
}

impl CoreConfig {
    /// Load config from the standard config path, falling back to defaults
    /// on any read/parse failure (logged, per §7's "config derivation error
    /// on reload" policy: retain the previous — here, default — config).
    pub fn load() -> Self {
        let path = config_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> crate::error::CoreResult<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::CoreError::Io)?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(crate::error::CoreError::ConfigParse)?;
        std::fs::write(&path, content).map_err(|source| crate::error::CoreError::ConfigSave {
            path,
            source,
        })?;
        Ok(())
    }
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("vtcore")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_forced_blink_preference() {
        assert_eq!(CoreConfig::default().terminal.cursor_blink, None);
    }

    #[test]
    fn default_color_report_format_is_sixteen_bit() {
        assert_eq!(
            CoreConfig::default().terminal.color_report_format,
            ColorReportFormat::SixteenBit
        );
    }
}
