use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shop_bot::application::errors::BotError;
use shop_bot::application::messaging::{Context, Dispatcher, HandlerGroup, HandlerResult, LoggingMiddleware};
use shop_bot::application::modules::ModuleLoader;
use shop_bot::builtin;
use shop_bot::domain::traits::Bot;
use shop_bot::infrastructure::adapters::console::ConsoleAdapter;
use shop_bot::infrastructure::adapters::telegram::TelegramAdapter;
use shop_bot::infrastructure::config::Config;
use shop_bot::infrastructure::database::Database;
use shop_bot::infrastructure::sources::DylibSource;
use shop_bot::infrastructure::web::{self, WebEngine};

#[derive(Parser)]
#[command(name = "shop-bot")]
#[command(about = "Telegram shop bot with pluggable feature modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bot token (overrides config)
    #[arg(short, long)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot and the admin panel
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
    /// Manage feature modules
    Modules {
        #[command(subcommand)]
        action: ModuleCommand,
    },
}

#[derive(Subcommand)]
enum ModuleCommand {
    /// List discovered and registered modules
    List,
    /// Enable a module
    Enable { id: String },
    /// Disable a module
    Disable { id: String },
    /// Delete a module, its data and its files
    Delete { id: String },
    /// Import a module from a zip archive
    Import {
        path: PathBuf,
        /// Enable right after import
        #[arg(long)]
        enable: bool,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => run_bot(&cli.config, cli.token),
        Commands::Version => {
            println!("shop-bot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
        Commands::Modules { action } => run_module_command(&cli.config, action),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(config_path: &str, token_override: Option<String>) -> Config {
    let mut config = if Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        Config::default()
    };
    config.apply_env();

    if let Some(token) = token_override {
        let tg = config.adapters.telegram.get_or_insert_with(Default::default);
        tg.token = Some(token);
        tg.enabled = true;
    }
    config
}

fn open_loader(config: &Config) -> Result<Arc<ModuleLoader>, BotError> {
    let db = Database::new(&config.database.path)?;
    tracing::info!("Database initialized: {}", config.database.path.display());

    let loader = ModuleLoader::new(&config.modules.directory, Arc::new(db))
        .with_source(Arc::new(builtin::registry()))
        .with_source(Arc::new(DylibSource::new()));
    Ok(Arc::new(loader))
}

/// Seed configured admins; existing users keep their role
fn seed_admins(db: &Database, admins: &[String]) {
    for telegram_id in admins {
        match db.get_user_by_telegram_id(telegram_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = db.add_user(telegram_id, None, "admin") {
                    tracing::warn!("Failed to seed admin {}: {}", telegram_id, e);
                }
            }
            Err(e) => tracing::warn!("Failed to look up admin {}: {}", telegram_id, e),
        }
    }
}

/// Host commands: /start, /help, /version
fn core_group(bot_name: String, loader: Arc<ModuleLoader>) -> HandlerGroup {
    let start_name = bot_name.clone();
    let group = HandlerGroup::new("core")
        .on_command("start", move |_ctx: Context| {
            let name = start_name.clone();
            async move { Ok(Some(format!("Welcome to {}! Send /help to see what I can do.", name))) }
        })
        .on_command("help", move |_ctx: Context| {
            let loader = Arc::clone(&loader);
            async move { help_text(loader).await }
        })
        .on_command("version", move |_ctx: Context| {
            let name = bot_name.clone();
            async move { Ok(Some(format!("{} v{}", name, env!("CARGO_PKG_VERSION")))) }
        });
    group.message.add_middleware(Arc::new(LoggingMiddleware));
    group
}

async fn help_text(loader: Arc<ModuleLoader>) -> HandlerResult {
    let items = tokio::task::spawn_blocking(move || loader.get_menu_items())
        .await
        .map_err(|e| BotError::Internal(e.to_string()))??;

    let mut text = String::from("Commands:\n/start - Start the bot\n/help - Show this message\n/version - Show bot version");
    if !items.is_empty() {
        text.push_str("\n\nModules:");
        for item in items {
            text.push_str(&format!("\n- {}", item.label));
        }
    }
    Ok(Some(text))
}

fn run_bot(config_path: &str, token_override: Option<String>) -> Result<(), BotError> {
    let config = load_config(config_path, token_override);
    config.validate().map_err(|e| BotError::Config(e.to_string()))?;
    tracing::info!("Starting shop-bot: {}", config.bot.name);

    let loader = open_loader(&config)?;
    seed_admins(loader.database(), &config.admins);

    let dispatcher = Arc::new(Dispatcher::new("root", config.bot.prefix.clone()));
    dispatcher
        .include_group(Arc::new(core_group(config.bot.name.clone(), Arc::clone(&loader))))
        .map_err(|e| BotError::Internal(e.to_string()))?;

    let engine = Arc::new(WebEngine::new(vec![config.web.templates.clone()]));

    // Binding replays modules enabled in a previous run
    loader.set_dispatcher(Arc::clone(&dispatcher));
    loader.set_web_engine(Arc::clone(&engine));
    tracing::info!("Module system ready: {} module(s) discovered", loader.discover_modules().len());

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BotError::Internal(format!("Failed to start runtime: {}", e)))?;

    rt.block_on(async move {
        if config.web.enabled {
            let app = web::app(Arc::clone(&engine), Arc::clone(&loader), config.web.admin_token.clone());
            let bind = config.web.bind.clone();
            tokio::spawn(async move {
                if let Err(e) = web::serve(&bind, app).await {
                    tracing::error!("Admin panel stopped: {}", e);
                }
            });
        }

        let bot_task = async {
            if let Some(token) = config.telegram_token() {
                let bot = Arc::new(TelegramAdapter::new(token));
                dispatcher.set_bot(Arc::clone(&bot) as Arc<dyn Bot>);
                bot.run(Arc::clone(&dispatcher)).await
            } else if config.console_enabled() {
                let bot = Arc::new(ConsoleAdapter::new());
                dispatcher.set_bot(Arc::clone(&bot) as Arc<dyn Bot>);
                bot.run(Arc::clone(&dispatcher)).await
            } else {
                tracing::info!("No bot adapter enabled, serving the panel only");
                std::future::pending::<Result<(), BotError>>().await
            }
        };

        tokio::select! {
            result = bot_task => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                Ok(())
            }
        }
    })
}

fn run_module_command(config_path: &str, action: ModuleCommand) -> Result<(), BotError> {
    let config = load_config(config_path, None);
    let loader = open_loader(&config)?;

    match action {
        ModuleCommand::List => {
            let modules = loader.list_modules()?;
            if modules.is_empty() {
                println!("No modules found in {}", loader.modules_dir().display());
            }
            for module in modules {
                let error = module.error_message.map(|e| format!(" ({})", e)).unwrap_or_default();
                println!("{:<24} {:<10} {:<9}{}", module.id, module.version, module.status, error);
            }
        }
        ModuleCommand::Enable { id } => {
            loader.enable_module(&id, false)?;
            println!("Module enabled: {}", id);
        }
        ModuleCommand::Disable { id } => {
            loader.disable_module(&id)?;
            println!("Module disabled: {}", id);
        }
        ModuleCommand::Delete { id } => {
            loader.delete_module(&id)?;
            println!("Module deleted: {}", id);
        }
        ModuleCommand::Import { path, enable } => {
            let id = loader.import_module_from_zip(&path, enable || config.modules.auto_enable_imports)?;
            println!("Module imported: {}", id);
        }
    }
    Ok(())
}

fn init_config() -> Result<(), BotError> {
    let yaml = Config::default()
        .to_yaml()
        .map_err(|e| BotError::Config(e.to_string()))?;
    println!("{}", yaml);
    println!("\nSave this to config.yaml and adjust as needed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_core_group_answers_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let loader = Arc::new(ModuleLoader::new(tmp.path(), db));

        let dispatcher = Dispatcher::new("root", "/");
        dispatcher
            .include_group(Arc::new(core_group("shop-bot".to_string(), loader)))
            .unwrap();

        let outcome = dispatcher.process_text("1", "/version").await.unwrap();
        match outcome {
            shop_bot::application::messaging::DispatchOutcome::Handled { group, response } => {
                assert_eq!(group, "core");
                assert!(response.unwrap().starts_with("shop-bot v"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let outcome = dispatcher.process_text("1", "/help").await.unwrap();
        assert!(matches!(
            outcome,
            shop_bot::application::messaging::DispatchOutcome::Handled { response: Some(_), .. }
        ));
    }

    #[test]
    fn test_seed_admins_keeps_existing_role() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("1", Some("boss"), "owner").unwrap();
        seed_admins(&db, &["1".to_string(), "2".to_string()]);

        assert_eq!(db.get_user_by_telegram_id("1").unwrap().unwrap().role, "owner");
        assert_eq!(db.get_user_by_telegram_id("2").unwrap().unwrap().role, "admin");
    }
}
