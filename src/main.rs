use anyhow::{Context, Result};
use tracing::info;

use crate::lostfound::objects::FsObjectStore;
use crate::lostfound::store::IncidentStore;
use crate::lostfound_web::User;

pub mod lostfound;
pub mod lostfound_web;
mod telemetry;

const CONFIG_ENV: &str = "LOSTFOUND_CONFIG";
const CONFIG_DEFAULT: &str = "./lostfound.config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_DEFAULT.to_owned());

    let config = lostfound::config::load(&config_path)
        .with_context(|| format!("load config from {:?}", config_path))?;

    let _telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    info!("Open database {:?}", config.database);
    let db = lostfound::db::connect(&config.database).await?;

    let store = IncidentStore::new(db.clone());
    let objects = FsObjectStore::new(&config.storage, &config.public_media_prefix);
    let gazetteer = lostfound_geo::gazetteer()?.clone();

    info!("Known towns: {}", gazetteer.towns().len());

    let users = config.users.iter().map(User::from).collect();

    lostfound_web::serve(lostfound_web::Options {
        store,
        objects,
        gazetteer,
        page_size: config.page_size,
        addr: config.http_address,
        db,
        users,
    }).await?;

    Ok(())
}
