use clap::{CommandFactory, Parser};
use colored::*;
use std::sync::Arc;
use tracing::{error, info};

use chatstorm::cli::Args;
use chatstorm::telemetry::init_tracing;
use chatstorm::voice::{BrowserRecognizer, SpeechRecognizer};
use chatstorm::web::{self, ServeOptions};
use chatstorm::{terminal, ChatApp, Result};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return;
    }

    init_tracing(args.log_level.as_deref());

    if let Err(e) = run(args).await {
        error!(error = %e, "chatstorm failed");
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.load_config()?;
    info!(
        category = %config.spam.category,
        speed = config.spam.speed,
        autostart = config.spam.autostart,
        "config loaded"
    );

    if args.terminal {
        let (app, script) = terminal::build_app(&config, args.seed);
        let app = Arc::new(app);
        if config.spam.autostart {
            app.start_spam();
        }
        return terminal::run(app, script).await;
    }

    let app = Arc::new(ChatApp::new(&config, args.seed, |link| {
        Box::new(BrowserRecognizer::new(link)) as Box<dyn SpeechRecognizer>
    }));
    if config.spam.autostart {
        app.start_spam();
    }

    let options = ServeOptions {
        port: args.port,
        open_browser: args.open_browser(),
        emote_dir: config.emotes.dir.clone(),
    };
    tokio::select! {
        result = web::serve(app.clone(), options) => result,
        _ = tokio::signal::ctrl_c() => {
            app.stop_spam();
            info!("shutting down");
            Ok(())
        }
    }
}
