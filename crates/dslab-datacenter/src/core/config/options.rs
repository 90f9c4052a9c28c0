//! Config value parsing utils.

use std::collections::HashMap;

/// Parses config value string, which consists of two parts - name and options.
/// Example: `Random[seed=7]` parts are name `Random` and options string `seed=7`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_value() {
        assert_eq!(
            parse_config_value("Migration[upper=0.8, lower=0.2]"),
            ("Migration".to_string(), Some("upper=0.8, lower=0.2".to_string()))
        );
        assert_eq!(parse_config_value("FirstFit"), ("FirstFit".to_string(), None));

        let options = parse_options("upper=0.8, lower=0.2");
        assert_eq!(options.get("upper").unwrap(), "0.8");
        assert_eq!(options.get("lower").unwrap(), "0.2");
        assert_eq!(options.get("seed"), None);
    }
}
