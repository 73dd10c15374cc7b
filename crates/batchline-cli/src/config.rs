//! Configuration file loading.

use std::path::Path;

use anyhow::Context;
use batchline_client::ClientConfig;

/// Read a TOML configuration file, or use the defaults if there is none.
pub fn load(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing config file {}", path.display()))
}

fn parse(text: &str) -> anyhow::Result<ClientConfig> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections() {
        let config = parse(
            r#"
            [multiplexer]
            default_url = "https://mail.example.com/grommunio.php"
            subsystem_prefix = "cli"

            [multiplexer.request_headers]
            X-Requested-With = "batchline"

            [prober]
            initial_interval_ms = 500

            [http]
            timeout_ms = 30000
            "#,
        )
        .unwrap();

        assert_eq!(config.multiplexer.default_url, "https://mail.example.com/grommunio.php");
        assert_eq!(config.multiplexer.subsystem_prefix, "cli");
        assert_eq!(
            config.multiplexer.request_headers.get("X-Requested-With").map(String::as_str),
            Some("batchline")
        );
        assert_eq!(config.prober.initial_interval_ms, 500);
        assert_eq!(config.prober.max_interval_ms, 300_000);
        assert_eq!(config.http.timeout_ms, Some(30_000));
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(parse("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(parse("[prober]\ninitial_interval_ms = \"soon\"").is_err());
    }
}
