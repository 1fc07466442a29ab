//! Command-line interface definition
//!
//! `SPEC_FULL.md` §4.9/§6: a single positional `target` plus an optional
//! `--debug` flag, mirroring the original `__main__` argument handling in
//! `examples/original_source/mcp_pipe.py`.

use clap::Parser;

/// Bridge an upstream MCP WebSocket onto a stdio, SSE, or streamable-HTTP
/// downstream.
#[derive(Parser, Debug)]
#[command(name = "mcp-pipe", version, about)]
pub struct Cli {
    /// Either a path to a child script (stdio mode, `MCP_ENDPOINT` read from
    /// the environment) or a `.yaml`/`.yml` configuration file.
    pub target: String,

    /// Raise the bridge's own tracing filter to `debug`.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Whether `target` names a YAML configuration file by its extension.
    pub fn target_is_config_file(&self) -> bool {
        self.target.ends_with(".yaml") || self.target.ends_with(".yml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_config_file_yaml() {
        let cli = Cli {
            target: "config.yaml".to_string(),
            debug: false,
        };
        assert!(cli.target_is_config_file());
    }

    #[test]
    fn test_target_is_config_file_yml() {
        let cli = Cli {
            target: "config.yml".to_string(),
            debug: false,
        };
        assert!(cli.target_is_config_file());
    }

    #[test]
    fn test_target_is_not_config_file_for_script_path() {
        let cli = Cli {
            target: "./server.py".to_string(),
            debug: false,
        };
        assert!(!cli.target_is_config_file());
    }
}
