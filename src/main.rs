use clap::Parser;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = cardiac_lib::cli::Cli::parse();
    cardiac_lib::cli::run(cli)
}
