use std::time::Duration;

use dragon_config::{AppContext, Config};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct DatabaseSection {
    host: String,
    port: u16,
}

fn main() -> Result<(), dragon_config::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // DEMO__APP__DEBUG=true overrides the file.
    let ctx = AppContext::builder()
        .with_config(
            Config::builder()
                .with_file("defaults", "demos/default.toml", true)
                .with_file("local", "demos/local.toml", false)
                .with_env("env", "DEMO", "__")
                .with_priority("local", 5)
                .with_priority("env", 10)
                .with_reload(Duration::from_secs(1)),
        )
        .build()?;

    let config = ctx.config();
    config.add_observer("demo", "app.debug", |old, new| {
        println!("app.debug changed: {old} -> {new}");
    })?;

    let database: DatabaseSection = config.extract("database")?;
    println!(
        "App: {} (debug={})",
        config.get_string("app.name", "unnamed"),
        config.get_bool("app.debug", false)
    );
    println!("Database: {}:{}", database.host, database.port);
    println!("Sources: {:?}", ctx.sources().stored());

    // Edits to demos/local.toml show up on the next reload tick.
    std::thread::sleep(Duration::from_secs(3));

    ctx.close()
}
