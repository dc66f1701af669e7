use clap::Parser;
use sedori_cli::Cli;
use sedori_types::SedoriError;

#[tokio::main]
async fn main() {
    // clap exits with code 2 on argument errors
    let cli = Cli::parse();
    let pretty = cli.pretty;

    match sedori_cli::run(cli).await {
        Ok(document) => {
            let rendered = if pretty {
                serde_json::to_string_pretty(&document)
            } else {
                serde_json::to_string(&document)
            };
            match rendered {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("Failed to render result document: {e}");
                    std::process::exit(1);
                }
            }
        }
        Err(SedoriError::Config(message)) => {
            eprintln!("Configuration error: {message}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
