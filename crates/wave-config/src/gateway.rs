// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

/// Programmatic gateway overrides (the highest-priority config layer).
#[derive(Debug, Clone, Default)]
pub struct GatewayOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Fully resolved gateway configuration for one request.
///
/// `api_key`/`base_url` stay optional: the HTTP client reports a useful
/// error at call time rather than construction time, so test doubles and
/// offline use never need a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Parse the `WAVE_CUSTOM_HEADERS` format: newline-separated `Key: Value`
/// pairs.  Lines without a colon are skipped.
pub fn parse_custom_headers(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}

fn env_or(settings_env: &HashMap<String, String>, key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| settings_env.get(key).cloned().filter(|v| !v.is_empty()))
}

/// Resolve the gateway configuration from, in priority order: programmatic
/// overrides, process environment (`WAVE_API_KEY`/`WAVE_BASE_URL`, legacy
/// `AIGW_TOKEN`/`AIGW_URL`), then the settings-file env block.
///
/// Resolution happens on every call so a live env change takes effect on
/// the next request without reconstruction.
pub fn resolve_gateway(
    programmatic: &GatewayOverrides,
    settings_env: &HashMap<String, String>,
) -> GatewayConfig {
    let api_key = programmatic
        .api_key
        .clone()
        .or_else(|| env_or(settings_env, "WAVE_API_KEY"))
        .or_else(|| env_or(settings_env, "AIGW_TOKEN"));
    let base_url = programmatic
        .base_url
        .clone()
        .or_else(|| env_or(settings_env, "WAVE_BASE_URL"))
        .or_else(|| env_or(settings_env, "AIGW_URL"));

    // Header precedence is per key: programmatic over env over settings.
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut push_layer = |layer: Vec<(String, String)>| {
        for (k, v) in layer {
            if !headers.iter().any(|(existing, _)| existing == &k) {
                headers.push((k, v));
            }
        }
    };
    push_layer(programmatic.headers.clone());
    if let Ok(raw) = std::env::var("WAVE_CUSTOM_HEADERS") {
        push_layer(parse_custom_headers(&raw));
    }
    if let Some(raw) = settings_env.get("WAVE_CUSTOM_HEADERS") {
        push_layer(parse_custom_headers(raw));
    }

    GatewayConfig {
        api_key,
        base_url,
        headers,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_headers_parse_key_value_lines() {
        let headers = parse_custom_headers("X-One: a\nX-Two:  b c \nnot-a-header\n: empty");
        assert_eq!(
            headers,
            vec![
                ("X-One".to_string(), "a".to_string()),
                ("X-Two".to_string(), "b c".to_string()),
            ]
        );
    }

    #[test]
    fn programmatic_key_wins_over_settings_env() {
        let programmatic = GatewayOverrides {
            api_key: Some("prog-key".into()),
            ..Default::default()
        };
        let mut settings_env = HashMap::new();
        settings_env.insert("WAVE_API_KEY".to_string(), "settings-key".to_string());
        let cfg = resolve_gateway(&programmatic, &settings_env);
        assert_eq!(cfg.api_key.as_deref(), Some("prog-key"));
    }

    #[test]
    fn settings_env_used_when_nothing_else_set() {
        let mut settings_env = HashMap::new();
        settings_env.insert("AIGW_URL".to_string(), "https://gw.example".to_string());
        let cfg = resolve_gateway(&GatewayOverrides::default(), &settings_env);
        assert_eq!(cfg.base_url.as_deref(), Some("https://gw.example"));
    }

    #[test]
    fn settings_custom_headers_are_lowest_priority() {
        let programmatic = GatewayOverrides {
            headers: vec![("X-Shared".to_string(), "prog".to_string())],
            ..Default::default()
        };
        let mut settings_env = HashMap::new();
        settings_env.insert(
            "WAVE_CUSTOM_HEADERS".to_string(),
            "X-Shared: settings\nX-Only-Settings: yes".to_string(),
        );
        let cfg = resolve_gateway(&programmatic, &settings_env);
        assert!(cfg
            .headers
            .contains(&("X-Shared".to_string(), "prog".to_string())));
        assert!(cfg
            .headers
            .contains(&("X-Only-Settings".to_string(), "yes".to_string())));
    }

    #[test]
    fn empty_settings_values_are_ignored() {
        let mut settings_env = HashMap::new();
        settings_env.insert("WAVE_API_KEY".to_string(), String::new());
        let cfg = resolve_gateway(&GatewayOverrides::default(), &settings_env);
        assert_eq!(cfg.api_key, None);
    }
}
