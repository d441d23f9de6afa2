//! Process configuration, resolved once at startup and threaded through
//! constructors. Components never read the environment directly.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

pub const ENV_TOKEN: &str = "TRACKLE_TOKEN";
pub const ENV_WEBHOOK_SECRET: &str = "TRACKLE_WEBHOOK_SECRET";
pub const ENV_DATA_DIR: &str = "TRACKLE_DATA_DIR";
pub const ENV_LANG: &str = "TRACKLE_LANG";

const DEFAULT_LANG: &str = "en";

#[derive(Clone)]
pub struct Config {
    /// Provider API token. Required for any remote call; its absence is a
    /// configuration error surfaced before network activity.
    pub token: Option<SecretString>,
    /// Shared secret for webhook signature verification, exposed only at
    /// the verification call site.
    pub webhook_secret: Option<SecretString>,
    pub data_dir: PathBuf,
    /// Default translation language for registrations.
    pub lang: String,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".trackle"));

        Self {
            token: std::env::var(ENV_TOKEN).ok().filter(|t| !t.is_empty()).map(SecretString::from),
            webhook_secret: std::env::var(ENV_WEBHOOK_SECRET)
                .ok()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            data_dir,
            lang: std::env::var(ENV_LANG).ok().filter(|l| !l.is_empty()).unwrap_or_else(|| DEFAULT_LANG.into()),
        }
    }

    pub fn paths(&self) -> Paths {
        Paths::under(&self.data_dir)
    }
}

/// On-disk layout under the data directory.
#[derive(Clone, Debug)]
pub struct Paths {
    pub base: PathBuf,
    pub db: PathBuf,
    pub inbox: PathBuf,
    pub processed: PathBuf,
}

impl Paths {
    pub fn under(base: &Path) -> Self {
        Self {
            base: base.to_owned(),
            db: base.join("trackle.sqlite3"),
            inbox: base.join("inbox"),
            processed: base.join("processed"),
        }
    }

    /// Create the directory tree if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(&self.inbox)?;
        std::fs::create_dir_all(&self.processed)?;
        Ok(())
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_layout() {
        let paths = Paths::under(Path::new("/data/trackle"));
        assert_eq!(paths.db, Path::new("/data/trackle/trackle.sqlite3"));
        assert_eq!(paths.inbox, Path::new("/data/trackle/inbox"));
        assert_eq!(paths.processed, Path::new("/data/trackle/processed"));
    }

    #[test]
    fn webhook_secret_stays_wrapped_until_exposed() {
        use secrecy::ExposeSecret;

        let config = Config {
            token: None,
            webhook_secret: Some(SecretString::from("s3cr3t")),
            data_dir: PathBuf::from("/tmp"),
            lang: DEFAULT_LANG.into(),
        };
        let exposed = config.webhook_secret.as_ref().map(ExposeSecret::expose_secret);
        assert_eq!(exposed, Some("s3cr3t"));
    }

    #[test]
    fn ensure_creates_tree() {
        let base = std::env::temp_dir().join(format!("trackle-config-test-{}", std::process::id()));
        let paths = Paths::under(&base);
        paths.ensure().unwrap();
        assert!(paths.inbox.is_dir());
        assert!(paths.processed.is_dir());
        let _ = std::fs::remove_dir_all(&base);
    }
}
