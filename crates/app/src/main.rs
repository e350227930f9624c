use anyhow::Context;

use stratum_app::Configuration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Configuration::load();
    if config.environment() == "development" {
        stratum_observability::init_compact();
    } else {
        stratum_observability::init();
    }

    let port = match std::env::args().nth(1) {
        Some(arg) => Some(
            arg.parse::<u16>()
                .with_context(|| format!("invalid port argument `{arg}`"))?,
        ),
        None => None,
    };

    let root = std::env::current_dir().context("failed to resolve application root")?;
    let app = stratum_app::demo::build_app(root, config)?;

    app.start(port).await?;
    Ok(())
}
