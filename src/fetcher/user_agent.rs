//! The `User-Agent` archive requests identify themselves with.

use std::fmt;

/// Sent unless the settings say otherwise.
pub const HARVESTER_USER_AGENT: &str = concat!(
    "vine-harvest/",
    env!("CARGO_PKG_VERSION"),
    " (archive preservation)"
);

/// Sent in `impersonate` mode, for mirrors that turn away non-browser clients.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Setting value that selects [`UserAgent::Browser`].
const IMPERSONATE: &str = "impersonate";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UserAgent {
    #[default]
    Harvester,
    Browser,
    Custom(String),
}

impl UserAgent {
    /// Interpret the `user_agent` setting. Unset or blank means the harvester
    /// default; `impersonate` (any case) means a desktop browser.
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting.map(str::trim) {
            None | Some("") => UserAgent::Harvester,
            Some(s) if s.eq_ignore_ascii_case(IMPERSONATE) => UserAgent::Browser,
            Some(s) => UserAgent::Custom(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserAgent::Harvester => HARVESTER_USER_AGENT,
            UserAgent::Browser => BROWSER_USER_AGENT,
            UserAgent::Custom(s) => s,
        }
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_or_blank_setting_uses_harvester_agent() {
        assert_eq!(UserAgent::from_setting(None), UserAgent::Harvester);
        assert_eq!(UserAgent::from_setting(Some("  ")), UserAgent::Harvester);
        assert!(UserAgent::default()
            .as_str()
            .starts_with("vine-harvest/"));
    }

    #[test]
    fn test_impersonate_selects_browser_agent() {
        let agent = UserAgent::from_setting(Some("Impersonate"));
        assert_eq!(agent, UserAgent::Browser);
        assert!(agent.to_string().contains("Firefox/"));
    }

    #[test]
    fn test_custom_agent_passes_through_trimmed() {
        let agent = UserAgent::from_setting(Some(" mirror-sync/2.1 "));
        assert_eq!(agent, UserAgent::Custom("mirror-sync/2.1".to_string()));
        assert_eq!(agent.as_str(), "mirror-sync/2.1");
    }
}
