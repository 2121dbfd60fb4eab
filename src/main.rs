use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, process};

use mail_sink::config::Config;
use mail_sink::core::Core;
use mail_sink::{scheduler, UnwrapFailure};

enum Input {
    Stdin,
    File(PathBuf),
    Directory(PathBuf),
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let (config_path, input) = parse_args();

    // Read configuration parameters
    let config = Config::parse(
        &fs::read_to_string(&config_path)
            .failed(&format!("Could not read configuration file {config_path:?}")),
    )
    .failed("Invalid configuration file");

    // Enable logging
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(
                config
                    .value("log-level")
                    .failed("Failed to parse log level")
                    .unwrap_or(tracing::Level::INFO),
            )
            .finish(),
    )
    .failed("Failed to set subscriber");

    // A configuration problem halts before any file is touched
    let engine = config.parse_engine().failed("Configuration error");
    let core = Arc::new(Core::new(engine).await.failed("Initialization error"));

    match input {
        Input::Stdin => {
            let mut raw = Vec::new();
            std::io::stdin()
                .read_to_end(&mut raw)
                .failed("Failed to read mail from stdin");
            scheduler::run_buffer(core, "stdin", &raw)
                .await
                .failed("Configuration error");
        }
        Input::File(path) => {
            scheduler::run_batch(core, vec![path])
                .await
                .failed("Configuration error");
        }
        Input::Directory(path) => {
            let mut files = Vec::new();
            for entry in fs::read_dir(&path)
                .failed(&format!("Could not read directory {path:?}"))
                .flatten()
            {
                let entry_path = entry.path();
                if entry_path.extension().map_or(false, |ext| ext == "msg")
                    && entry.file_type().map_or(false, |t| t.is_file())
                {
                    files.push(entry_path);
                }
            }
            files.sort();
            scheduler::run_batch(core, files)
                .await
                .failed("Configuration error");
        }
    }

    Ok(())
}

fn parse_args() -> (PathBuf, Input) {
    let mut config_path = PathBuf::from("mail-sink.ini");
    let mut input = Input::Stdin;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--config=") {
            config_path = PathBuf::from(value.trim());
        } else if arg == "--config" {
            config_path = PathBuf::from(args.next().unwrap_or_else(|| print_help()));
        } else if arg == "-f" {
            input = Input::File(PathBuf::from(args.next().unwrap_or_else(|| print_help())));
        } else if arg == "-d" {
            input = Input::Directory(PathBuf::from(
                args.next().unwrap_or_else(|| print_help()),
            ));
        } else {
            print_help();
        }
    }

    (config_path, input)
}

fn print_help() -> ! {
    eprintln!("NAME");
    eprintln!("   mail-sink [--config=<file>] [-f file | -d dir]");
    eprintln!("   Consume inbound mail, generating opens, clicks, OOBs and FBLs");
    eprintln!();
    eprintln!("Parameters");
    eprintln!("    (no params)  - ingest a single mail from stdin");
    eprintln!("    -f file      - ingest a single mail file in RFC822 format");
    eprintln!("    -d directory - ingest and remove all *.msg files in the directory");
    process::exit(1);
}
