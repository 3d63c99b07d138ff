use clap::Parser;
use faceindex::Opts;
use faceindex::cli::SubCommandExtend;
use faceindex::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Index(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
        SubCommand::CheckPerms(config) => config.run(&opts).await,
    }
}
