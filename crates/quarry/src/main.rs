use anyhow::Context;
use quarry::{MySqlStore, QueryEngine, QueryParams, ServiceConfig, StoreOptions};
use quarry_shared::ObservabilitySystem;
use std::sync::Arc;
use tracing::{error, info};

const USAGE: &str = "usage: quarry <list-name> [query-string]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let name = args.next().context(USAGE)?;
    let query_string = args.next().unwrap_or_default();

    let config = match std::env::var("QUARRY_CONFIG") {
        Ok(path) => ServiceConfig::load_from_file(path)?,
        Err(_) => ServiceConfig::load()?,
    };
    ObservabilitySystem::init(&config.observability)?;

    let lists = config.load_lists()?;
    let Some(list) = lists.get(&name) else {
        let known: Vec<&str> = lists.keys().map(String::as_str).collect();
        anyhow::bail!("unknown list `{name}`; configured lists: {}", known.join(", "));
    };

    let db = &config.database;
    let store = MySqlStore::new(StoreOptions {
        url: db.url.clone(),
        max_connections: db.max_connections,
        acquire_timeout: db.connection_timeout(),
        idle_timeout: db.idle_timeout(),
        group_concat_max_len: db.group_concat_max_len,
    });
    let engine = QueryEngine::new(Arc::new(store), config.query.clone());

    info!(list = %name, "running list query");
    let params = QueryParams::from_query_string(&query_string);
    match engine.list(list, &params).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            error!(list = %name, error = %e, "list query failed");
            Err(e.into())
        }
    }
}
