/// Extension identity, as reported by the host `version` command and the
/// startup banner.
pub const EXTENSION_NAME: &str = "VibeDbg";
pub const EXTENSION_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const EXTENSION_DESCRIPTION: &str = "AI-powered WinDbg debugging extension";

pub fn banner() -> String {
    format!("{EXTENSION_NAME} v{EXTENSION_VERSION}\n{EXTENSION_DESCRIPTION}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn banner_carries_name_and_version() {
        let banner = banner();
        assert!(banner.starts_with("VibeDbg v"));
        assert!(banner.contains(EXTENSION_VERSION));
    }
}
