use clap::{Arg, ArgAction, ArgMatches, Command};
use ssage::commands::{self, Assistant, CommandFailed, Options};
use ssage::config::Config;
use ssage::metrics::MetricsStore;
use ssage::provider::ProviderRegistry;
use ssage::{history, ollama, ui};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("ssage")
        .about("Shell Sage - Your AI Terminal Assistant")
        .long_about(
            "Shell Sage uses local AI to help you explain commands, fix errors from your history, and analyze logs.\n\nProviders are pluggable: use --provider to select a backend (default: ollama).",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("model")
            .long("model")
            .short('m')
            .global(true)
            .help("LLM model to use (e.g. llama3, mistral)")
            .num_args(1))
        .arg(Arg::new("lang")
            .long("lang")
            .short('l')
            .global(true)
            .help("Response language (e.g. 'es' for Spanish, 'fr' for French)")
            .num_args(1))
        .arg(Arg::new("provider")
            .long("provider")
            .short('p')
            .global(true)
            .help("AI provider to use (e.g. ollama)")
            .num_args(1))
        .arg(Arg::new("copy")
            .long("copy")
            .short('c')
            .global(true)
            .help("Copy the suggested command or explanation to clipboard")
            .action(ArgAction::SetTrue))
        .subcommand(Command::new("explain")
            .about("Explain a shell command")
            .arg(Arg::new("command")
                .help("The command to explain")
                .required(true)
                .num_args(1..)
                .trailing_var_arg(true)))
        .subcommand(Command::new("tip")
            .about("Get a quick, useful terminal tip from the AI"))
        .subcommand(Command::new("fix")
            .about("Analyze recent shell history and suggest a fix for the last error"))
        .subcommand(Command::new("analyze")
            .about("Analyze an error log file and summarize critical issues")
            .arg(Arg::new("file")
                .help("Log file to analyze")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)))
            .arg(Arg::new("full")
                .long("full")
                .help("Send the whole file even when it is large")
                .action(ArgAction::SetTrue)))
        .subcommand(Command::new("config")
            .about("Show or change configuration")
            .subcommand(Command::new("set")
                .about("Set a configuration value (empty value clears it)")
                .arg(Arg::new("key").required(true))
                .arg(Arg::new("value").required(true))))
        .subcommand(Command::new("stats")
            .about("Show usage statistics"))
}

/// JSON logs go to `~/.ssage.log` so they never mix with command output.
fn init_tracing() {
    let log_file = dirs::home_dir().and_then(|home| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(home.join(".ssage.log"))
            .ok()
    });

    match log_file {
        Some(file) => {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("warn"))
                .with_writer(io::stderr)
                .init();
        }
    }
}

fn handle_config(matches: &ArgMatches) -> anyhow::Result<()> {
    let path = Config::get_config_path()?;
    let mut config = Config::load_from(&path)?;

    if let Some(set) = matches.subcommand_matches("set") {
        let key = set.get_one::<String>("key").map(String::as_str).unwrap_or_default();
        let value = set.get_one::<String>("value").map(String::as_str).unwrap_or_default();
        config.set(key, value)?;
        config.save_to(&path)?;
        println!("✅ {} saved", key);
        return Ok(());
    }

    config.show_config_info(&path, &mut io::stdout())
}

fn handle_stats() -> anyhow::Result<()> {
    let store = MetricsStore::default_path()
        .map(|path| MetricsStore::load_from(&path))
        .unwrap_or_default();
    ui::show_stats_with_io(&store, &mut io::stdout())
}

async fn run(matches: ArgMatches) -> anyhow::Result<()> {
    let Some((name, sub)) = matches.subcommand() else {
        return Ok(());
    };
    match name {
        "config" => return handle_config(sub),
        "stats" => return handle_stats(),
        _ => {}
    }

    // A broken config file should not stop the AI commands.
    let config = Config::load().unwrap_or_else(|e| {
        warn!("Ignoring config: {:#}", e);
        Config::default()
    });
    // Global flags are propagated down to the subcommand's matches.
    let model = sub.get_one::<String>("model").cloned().unwrap_or_default();
    let lang = sub
        .get_one::<String>("lang")
        .cloned()
        .unwrap_or_else(|| config.lang_or_default().to_string());
    let provider = sub.get_one::<String>("provider").map(String::as_str);

    let mut registry = ProviderRegistry::new();
    ollama::register(&mut registry);

    let pipeline = match commands::build_pipeline(&registry, provider, &model) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            ui::show_error(&e);
            return Err(CommandFailed.into());
        }
    };
    let assistant = Assistant::new(pipeline, Options::new(&lang, sub.get_flag("copy")));
    let mut out = io::stdout();
    let mut input = io::stdin().lock();

    info!(command = name, "Dispatching");
    match name {
        "explain" => {
            let command_line = sub
                .get_many::<String>("command")
                .unwrap_or_default()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            assistant.explain(&command_line, &mut out).await
        }
        "tip" => assistant.tip(&mut out).await,
        "fix" => {
            let history = history::recent_commands(commands::HISTORY_LIMIT);
            assistant.fix(history, &mut input, &mut out).await
        }
        "analyze" => {
            let Some(file) = sub.get_one::<PathBuf>("file") else {
                return Ok(());
            };
            assistant.analyze(file, sub.get_flag("full"), &mut input, &mut out).await
        }
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(cli().get_matches()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<CommandFailed>().is_none() {
                ui::show_error(&e);
            }
            ExitCode::FAILURE
        }
    }
}
