//! Two units, `db` and `web`, where `web` depends on `db`.
//!
//! Run with `cargo run --example units` and stop it with Ctrl-C. Settings
//! can be overridden through the environment, e.g. `KT_WEB_PORT=9090`.

use std::time::Duration;

use serde::Deserialize;
use unitboot::prelude::*;

#[derive(Debug, Deserialize)]
struct DbConfig {
    #[serde(default = "default_url")]
    url: String,
    #[serde(default = "default_pool")]
    pool: u32,
}

fn default_url() -> String {
    "postgres://localhost/demo".to_string()
}

fn default_pool() -> u32 {
    4
}

impl Validate for DbConfig {
    fn validate(&self) -> Result<(), String> {
        if self.pool == 0 {
            return Err("pool must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WebConfig {
    #[serde(default = "default_port")]
    port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Validate for WebConfig {}

const SEED: &str = r#"
[app.log]
level = "info"

[db]
url = "postgres://localhost/orders"

[web]
port = 8080
"#;

#[tokio::main]
async fn main() -> Result<(), BootError> {
    let options = BootOptions::new().with_config(ConfigOptions::new().with_data(SEED));
    let mut boot = Bootstrap::new(Application::new("orders")).with_options(options);

    boot.register(UnitSpec::new("db", |ctx: UnitContext| async move {
        let db: DbConfig = ctx.decode_config("db")?;
        tracing::info!(url = %db.url, pool = db.pool, "Connected");
        Ok::<_, BoxError>(Runner::new(async move {
            ctx.cancelled().await;
            tracing::info!("Closing connections");
            ExitResult::success()
        }))
    }))?;

    boot.register(
        UnitSpec::new("web", |ctx: UnitContext| async move {
            let web: WebConfig = ctx.decode_config("web")?;
            Ok::<_, BoxError>(Runner::new(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(5));
                loop {
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = ticker.tick() => tracing::info!(port = web.port, "Serving"),
                    }
                }
                ExitResult::success()
            }))
        })
        .depends_on(["db"]),
    )?;

    let report = boot.run(CancellationToken::new()).await?;
    for exit in &report.exits {
        println!("{}: code {} {:?}", exit.unit, exit.code, exit.error);
    }
    Ok(())
}
