use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = scout_api::Args::parse();
	scout_api::run(args).await
}
