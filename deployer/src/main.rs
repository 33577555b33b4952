use clap::{Parser, Subcommand};
use deployer::{assemble_params, build_payload, run, DeployConfig};
use platform::SageMakerSession;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Train a scikit-learn model on SageMaker, probe it on a temporary endpoint")]
struct Cli {
    /// TOML configuration file (every field has a default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Region override
    #[arg(long, global = true)]
    region: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload, train, deploy, predict once and delete the endpoint
    Run,
    /// Upload the dataset and print the training and output locations
    Upload,
    /// Print the prediction payload built from the local dataset
    Payload,
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = DeployConfig::load(cli.config.as_deref(), cli.region)?;

    match cli.command {
        Commands::Run => {
            let session = SageMakerSession::connect(config.platform_config()).await?;
            let prediction = run(&session, &session, &config).await?;
            info!(endpoint = %prediction.endpoint_name, "Run complete");
            println!("{}", prediction);
        }
        Commands::Upload => {
            let session = SageMakerSession::connect(config.platform_config()).await?;
            let params = assemble_params(&session, &config).await?;
            println!("training: {}", params.training_path);
            println!("output:   {}", params.output_path);
        }
        Commands::Payload => {
            print!("{}", build_payload(&config)?);
        }
        Commands::Config => {
            println!("# account = {}", config.account);
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
