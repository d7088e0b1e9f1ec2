use anyhow::Result;
use clap::Parser;

mod cli_args;
mod logging;

use cli_args::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    logging::init();

    let config = std::sync::Arc::new(args.server_config()?);
    tracing::info!(
        workdir = %config.workdir.display(),
        shell = %config.shell_path.display(),
        compat = config.anthropic_compat,
        "starting boris"
    );

    if args.stdio {
        boris_server::stdio::run_stdio(config).await
    } else {
        boris_server::http::run_http(config, args.http_options()).await
    }
}
