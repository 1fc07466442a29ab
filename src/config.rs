//! Configuration loading and validation
//!
//! `SPEC_FULL.md` §4.10 / §6. Mirrors the YAML shape the original pipe
//! implementation accepted (`examples/original_source/mcp_pipe.py`
//! `load_config`), but as a typed `serde_yaml` struct instead of a bare
//! dict, with validation and mode resolution split out as a pure function
//! so it is testable without any file I/O.

use std::path::Path;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Resolved downstream mode and its mode-specific target(s), after
/// validation (`SPEC_FULL.md` §4.10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Spawn `script_path` with `script_args` and speak line-delimited JSON
    /// over its stdio.
    Stdio {
        /// Path (or bare name, resolved via `PATH`) to the child executable.
        script_path: String,
        /// Extra arguments passed to the child executable.
        script_args: Vec<String>,
    },
    /// Speak SSE (GET) + POST against `sse_url`.
    Sse {
        /// The long-lived SSE GET stream URL.
        sse_url: String,
    },
    /// Speak streamable HTTP (POST with SSE-framed response) against a single URL.
    StreamableHttp {
        /// The single POST endpoint used for both directions.
        streamable_url: String,
    },
}

/// Raw YAML configuration shape, deserialized before validation.
///
/// `#[serde(default)]` is applied to every field the original treated as
/// optional so that a missing key never causes an opaque deserialization
/// failure -- validation reports which specific key is missing instead.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BridgeConfig {
    /// Upstream WebSocket URL. Required.
    #[serde(default)]
    pub mcp_endpoint: Option<String>,
    /// One of `stdio`, `sse`, `streamable_http`. Defaults to `stdio`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Required when `mode` is `stdio`.
    #[serde(default)]
    pub script_path: Option<String>,
    /// Optional extra arguments for the `stdio` child executable.
    #[serde(default)]
    pub script_args: Vec<String>,
    /// Required when `mode` is `sse`.
    #[serde(default)]
    pub sse_url: Option<String>,
    /// Required when `mode` is `streamable_http`.
    #[serde(default)]
    pub streamable_url: Option<String>,
}

impl BridgeConfig {
    /// Load and parse a YAML configuration file from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)?;
        Ok(config)
    }

    /// Validate this configuration and resolve it to `(endpoint, mode)`.
    /// Performs no I/O; independently testable (`SPEC_FULL.md` §4.10).
    pub fn validate(&self) -> Result<(String, Mode)> {
        let endpoint = self
            .mcp_endpoint
            .clone()
            .ok_or_else(|| BridgeError::Config("missing required key `mcp_endpoint`".to_string()))?;

        let mode_name = self.mode.as_deref().unwrap_or("stdio");
        let mode = match mode_name {
            "stdio" => {
                let script_path = self.script_path.clone().ok_or_else(|| {
                    BridgeError::Config("missing required key `script_path` for mode `stdio`".to_string())
                })?;
                Mode::Stdio {
                    script_path,
                    script_args: self.script_args.clone(),
                }
            }
            "sse" => {
                let sse_url = self.sse_url.clone().ok_or_else(|| {
                    BridgeError::Config("missing required key `sse_url` for mode `sse`".to_string())
                })?;
                Mode::Sse { sse_url }
            }
            "streamable_http" => {
                let streamable_url = self.streamable_url.clone().ok_or_else(|| {
                    BridgeError::Config(
                        "missing required key `streamable_url` for mode `streamable_http`".to_string(),
                    )
                })?;
                Mode::StreamableHttp { streamable_url }
            }
            other => return Err(BridgeError::UnsupportedMode(other.to_string())),
        };

        Ok((endpoint, mode))
    }
}

/// Build a `stdio`-mode configuration directly from a CLI target path plus
/// the `MCP_ENDPOINT` environment variable, bypassing YAML entirely
/// (`SPEC_FULL.md` §4.9, §6).
pub fn stdio_config_from_cli(script_path: String, mcp_endpoint: String) -> (String, Mode) {
    (
        mcp_endpoint,
        Mode::Stdio {
            script_path,
            script_args: Vec::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_missing_endpoint() {
        let config = BridgeConfig::default();
        let error = config.validate().unwrap_err();
        assert!(matches!(error, BridgeError::Config(_)));
        assert!(error.to_string().contains("mcp_endpoint"));
    }

    #[test]
    fn test_validate_sse_missing_sse_url() {
        let config = BridgeConfig {
            mcp_endpoint: Some("wss://example/mcp".to_string()),
            mode: Some("sse".to_string()),
            ..Default::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("sse_url"));
    }

    #[test]
    fn test_validate_streamable_http_missing_url() {
        let config = BridgeConfig {
            mcp_endpoint: Some("wss://example/mcp".to_string()),
            mode: Some("streamable_http".to_string()),
            ..Default::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("streamable_url"));
    }

    #[test]
    fn test_validate_unsupported_mode() {
        let config = BridgeConfig {
            mcp_endpoint: Some("wss://example/mcp".to_string()),
            mode: Some("carrier_pigeon".to_string()),
            ..Default::default()
        };
        let error = config.validate().unwrap_err();
        assert!(matches!(error, BridgeError::UnsupportedMode(_)));
    }

    #[test]
    fn test_validate_stdio_defaults_when_mode_omitted() {
        let config = BridgeConfig {
            mcp_endpoint: Some("wss://example/mcp".to_string()),
            script_path: Some("./server.py".to_string()),
            ..Default::default()
        };
        let (endpoint, mode) = config.validate().unwrap();
        assert_eq!(endpoint, "wss://example/mcp");
        assert_eq!(
            mode,
            Mode::Stdio {
                script_path: "./server.py".to_string(),
                script_args: vec![],
            }
        );
    }

    #[test]
    fn test_validate_sse_success() {
        let config = BridgeConfig {
            mcp_endpoint: Some("wss://example/mcp".to_string()),
            mode: Some("sse".to_string()),
            sse_url: Some("https://example/sse".to_string()),
            ..Default::default()
        };
        let (_, mode) = config.validate().unwrap();
        assert_eq!(
            mode,
            Mode::Sse {
                sse_url: "https://example/sse".to_string()
            }
        );
    }

    #[test]
    fn test_load_parses_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "mcp_endpoint: wss://example/mcp\nmode: stdio\nscript_path: ./server.py\n",
        )
        .unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        let (endpoint, mode) = config.validate().unwrap();
        assert_eq!(endpoint, "wss://example/mcp");
        assert_eq!(
            mode,
            Mode::Stdio {
                script_path: "./server.py".to_string(),
                script_args: vec![],
            }
        );
    }
}
