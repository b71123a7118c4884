use std::fs::File;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LostFoundConfig {
    pub http_address: String,

    // sqlite database url
    pub database: String,

    // directory holding uploaded photos
    pub storage: PathBuf,

    // url prefix under which stored objects are served
    #[serde(default = "public_media_prefix_default")]
    pub public_media_prefix: String,

    #[serde(default = "page_size_default")]
    pub page_size: NonZeroU32,

    pub users: Vec<UserConfig>,

    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// The login name of this user
    pub name: String,

    /// The password encrypted using htpasswd.
    /// For example: `htpasswd -n -B -C 7 ignored | cut -d: -f2-`
    pub passwd: String,
}

pub fn load(path: impl AsRef<Path>) -> Result<LostFoundConfig> {
    let fp = File::open(path)?;
    let config = serde_yaml::from_reader(fp)?;
    Ok(config)
}

fn public_media_prefix_default() -> String {
    "/media".to_owned()
}

fn page_size_default() -> NonZeroU32 {
    NonZeroU32::new(20).unwrap_or(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let config: LostFoundConfig = serde_yaml::from_str(r#"
            httpAddress: "127.0.0.1:3000"
            database: "sqlite://lostfound.db"
            storage: "./objects"
            users:
              - name: alice
                passwd: "$apr1$abc$def"
        "#).unwrap();

        assert_eq!(config.page_size.get(), 20);
        assert_eq!(config.public_media_prefix, "/media");
        assert_eq!(config.users[0].name, "alice");
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn rejects_zero_page_size() {
        let config = serde_yaml::from_str::<LostFoundConfig>(r#"
            httpAddress: "127.0.0.1:3000"
            database: "sqlite://lostfound.db"
            storage: "./objects"
            pageSize: 0
            users: []
        "#);

        assert!(config.is_err());
    }
}
