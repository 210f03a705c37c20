use std::time::Duration;

use tracing::warn;

/// Parsing contract used by the `config_group!` macro: take the optional
/// environment value for a named setting and either parse it or fall back to
/// the compiled-in default, warning on garbage rather than failing startup.
pub trait ParsableConfigValue: Sized {
    fn parse_value(s: &str) -> Option<Self>;

    fn parse(name: &str, maybe_env_value: Option<String>, default_value: Self) -> Self {
        match maybe_env_value {
            None => default_value,
            Some(s) => match Self::parse_value(s.trim()) {
                Some(v) => v,
                None => {
                    warn!(setting = name, value = %s, "Unparsable config override, using default");
                    default_value
                },
            },
        }
    }
}

macro_rules! impl_via_fromstr {
    ($($t:ty),+) => {
        $(
            impl ParsableConfigValue for $t {
                fn parse_value(s: &str) -> Option<Self> {
                    s.parse().ok()
                }
            }
        )+
    };
}

impl_via_fromstr!(usize, u32, u64, i64, f64, String);

impl ParsableConfigValue for bool {
    fn parse_value(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

/// Durations accept a bare number of milliseconds or a `s`/`ms`/`m` suffix.
impl ParsableConfigValue for Duration {
    fn parse_value(s: &str) -> Option<Self> {
        if let Some(v) = s.strip_suffix("ms") {
            return v.trim().parse().ok().map(Duration::from_millis);
        }
        if let Some(v) = s.strip_suffix('s') {
            return v.trim().parse().ok().map(Duration::from_secs);
        }
        if let Some(v) = s.strip_suffix('m') {
            return v.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
        }
        s.parse().ok().map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_durations() {
        assert_eq!(Duration::parse_value("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(Duration::parse_value("30s"), Some(Duration::from_secs(30)));
        assert_eq!(Duration::parse_value("2m"), Some(Duration::from_secs(120)));
        assert_eq!(Duration::parse_value("1500"), Some(Duration::from_millis(1500)));
        assert_eq!(Duration::parse_value("abc"), None);
    }

    #[test]
    fn test_parse_bools() {
        assert_eq!(bool::parse_value("TRUE"), Some(true));
        assert_eq!(bool::parse_value("off"), Some(false));
        assert_eq!(bool::parse_value("maybe"), None);
    }

    #[test]
    fn test_fallback_to_default_on_garbage() {
        let v = usize::parse("max_parallel", Some("not-a-number".into()), 7);
        assert_eq!(v, 7);
        let v = usize::parse("max_parallel", Some("12".into()), 7);
        assert_eq!(v, 12);
        let v = usize::parse("max_parallel", None, 7);
        assert_eq!(v, 7);
    }
}
