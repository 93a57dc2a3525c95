//! CLI commands

pub mod convert;
pub mod version;

/// Parse a `key=value` argument
pub fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values() {
        assert_eq!(
            parse_key_value("team=payments"),
            Ok(("team".to_string(), "payments".to_string()))
        );
        assert_eq!(
            parse_key_value("url=a=b"),
            Ok(("url".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_key_value("empty="), Ok(("empty".to_string(), String::new())));
        assert!(parse_key_value("=x").is_err());
        assert!(parse_key_value("plain").is_err());
    }
}
