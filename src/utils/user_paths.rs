use std::path::PathBuf;

/// Expand a leading `~` or `~/` to the current user's home directory.
pub fn expand_home_path(raw: impl AsRef<str>) -> PathBuf {
    let raw = raw.as_ref();
    if raw == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_prefix() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_home_path("~/keys/id_ed25519"),
            PathBuf::from("/home/tester/keys/id_ed25519")
        );
        assert_eq!(expand_home_path("/abs/path"), PathBuf::from("/abs/path"));
    }
}
