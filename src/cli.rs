use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Context, Result};
use tokio::{io::AsyncReadExt, sync::mpsc};

use crate::{
    batch::{split_urls, Batch, BatchResult, RemainingRecord},
    config::AppConfig,
    gamdl::Gamdl,
    render,
};

#[derive(Debug, Parser)]
#[command(name = "amdl", version, about = "Download Apple Music URLs with gamdl, retrying failures")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download every URL in FILE (or stdin), one URL per line
    Download {
        file: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Download whatever is left in the download record from an earlier batch
    Resume {
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Check whether gamdl can be launched
    Check,
}

#[derive(Debug, clap::Args)]
pub struct OutputArgs {
    /// Directory to download into. Defaults to the configured download folder
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Print the batch result as JSON instead of a list of failed URLs
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub async fn execute(self, config: &AppConfig) -> Result<ExitCode> {
        match self.command {
            Command::Download { file, output } => {
                let url_text = match file {
                    Some(path) => tokio::fs::read_to_string(&path)
                        .await
                        .wrap_err_with(|| format!("failed to read {}", path.display()))?,
                    None => {
                        let mut text = String::new();
                        tokio::io::stdin()
                            .read_to_string(&mut text)
                            .await
                            .wrap_err("failed to read urls from stdin")?;
                        text
                    }
                };

                if split_urls(&url_text).is_empty() {
                    bail!("no urls given");
                }

                run_batch(config, &url_text, output).await
            }
            Command::Resume { output } => {
                let urls = RemainingRecord::load(config.record_path()).await?;

                if urls.is_empty() {
                    info!("download record is empty, nothing to resume");
                    return Ok(ExitCode::SUCCESS);
                }

                info!("resuming {} urls from the download record", urls.len());

                run_batch(config, &urls.join("\n"), output).await
            }
            Command::Check => {
                let gamdl = Gamdl::from_config(config);

                if gamdl.is_installed().await {
                    println!("{} is installed", config.tool);
                    Ok(ExitCode::SUCCESS)
                } else {
                    println!("{} is not installed", config.tool);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

async fn run_batch(config: &AppConfig, url_text: &str, args: OutputArgs) -> Result<ExitCode> {
    let gamdl = Gamdl::from_config(config);

    if !gamdl.is_installed().await {
        warn!(
            "{} does not seem to be installed, please install it first",
            config.tool
        );
    }

    let output_path = match args.output {
        Some(path) => {
            tokio::fs::create_dir_all(&path)
                .await
                .wrap_err("failed to create output folder")?;
            path
        }
        None => config.ensure_download_folder()?,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = render::spawn(rx);

    let result = Batch::from_config(config, &gamdl, &tx)
        .run(url_text, &output_path)
        .await;

    drop(tx);
    renderer.await.wrap_err("progress renderer stopped unexpectedly")?;

    report(&result, args.json)?;

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Failed URLs go to stdout, one per line, ready to be fed back in.
fn report(result: &BatchResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.success {
        info!("all downloads finished");
    } else {
        error!("{} urls failed to download", result.error_urls.len());
        for url in &result.error_urls {
            println!("{url}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download() {
        let cli = Cli::try_parse_from(["amdl", "download", "urls.txt", "-o", "/music", "--json"])
            .unwrap();

        let Command::Download { file, output } = cli.command else {
            panic!("expected download command");
        };
        assert_eq!(file, Some(PathBuf::from("urls.txt")));
        assert_eq!(output.output, Some(PathBuf::from("/music")));
        assert!(output.json);
    }

    #[test]
    fn test_parse_resume_and_check() {
        let cli = Cli::try_parse_from(["amdl", "resume"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Resume {
                output: OutputArgs {
                    output: None,
                    json: false
                }
            }
        ));

        let cli = Cli::try_parse_from(["amdl", "check"]).unwrap();
        assert!(matches!(cli.command, Command::Check));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;

        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_resume_with_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::test_config(dir.path());

        Cli {
            command: Command::Resume {
                output: OutputArgs {
                    output: None,
                    json: false,
                },
            },
        }
        .execute(&config)
        .await
        .unwrap();

        // returned before any batch was set up
        assert!(!dir.path().join("download").exists());
    }
}
