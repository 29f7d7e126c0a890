use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use inbox_triage::accounts::AccountManager;
use inbox_triage::auth::TokenRefresher;
use inbox_triage::categories::{CategoryManager, CategoryUpdate};
use inbox_triage::classifier::Classifier;
use inbox_triage::cli::{self, AccountCommand, CategoryCommand, Cli, Commands, EmailCommand};
use inbox_triage::client::{install_crypto_provider, GmailMailboxClient, MailboxClient};
use inbox_triage::config::Config;
use inbox_triage::counters::{recount_categories, CategoryCounters};
use inbox_triage::emails::EmailManager;
use inbox_triage::error::TriageError;
use inbox_triage::llm::AnthropicClient;
use inbox_triage::models::Credentials;
use inbox_triage::pipeline::{IngestionPipeline, StopSignal};
use inbox_triage::storage::{CategoryFilter, EmailQuery, MemoryStore, SqliteStore, Store};
use inbox_triage::unsubscribe::{BrowserAutomation, MailSender, SmtpMailSender, UnsubscribeOrchestrator};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: inbox-triage --help");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directives = if verbose {
        "inbox_triage=debug,info"
    } else {
        "inbox_triage=info,warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    // stdout is reserved for command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(cli: &Cli, config: &Config) -> Result<Arc<dyn Store>> {
    let path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.storage.database_path.clone());

    if path.as_os_str() == ":memory:" {
        tracing::warn!("Using in-memory storage; nothing will be saved");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(SqliteStore::open(&path)?))
}

async fn mailbox_client(config: &Config) -> Result<Arc<dyn MailboxClient>> {
    let refresher = TokenRefresher::from_config(&config.oauth, reqwest::Client::new()).await?;
    let client = GmailMailboxClient::new(
        refresher,
        config.sync.query.clone(),
        config.sync.fetch_concurrency,
    )?;
    Ok(Arc::new(client))
}

fn print_output<T: Serialize + ?Sized>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        let text = text();
        if text.ends_with('\n') {
            print!("{}", text);
        } else {
            println!("{}", text);
        }
    }
    Ok(())
}

async fn run() -> Result<()> {
    install_crypto_provider();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Commands::InitConfig { output, force } = &cli.command {
        if output.exists() && !force {
            return Err(TriageError::Config(format!(
                "Configuration file already exists at {:?}. Use --force to overwrite.",
                output
            ))
            .into());
        }
        Config::create_example(output).await?;
        println!("Created example configuration file at: {:?}", output);
        println!("\nKey settings to review:");
        println!("  - ai.model / ai.api_key_env: language model used for triage");
        println!("  - smtp.*: relay used for mailto unsubscribe requests");
        println!("  - storage.counter_mode: 'best_effort' or 'strict'");
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    let store = open_store(&cli, &config)?;
    let counters = CategoryCounters::new(store.clone(), config.storage.counter_mode);

    match cli.command {
        Commands::InitConfig { .. } => Ok(()),

        Commands::Account(command) => {
            let manager = AccountManager::new(store.clone(), counters);
            match command {
                AccountCommand::Connect {
                    user,
                    email,
                    access_token,
                    refresh_token,
                    expires_in,
                } => {
                    let credentials = Credentials {
                        access_token: Some(access_token),
                        refresh_token,
                        expires_at: expires_in.map(|s| Utc::now() + Duration::seconds(s)),
                    };
                    let account = manager.connect_account(&user, &email, credentials).await?;
                    println!(
                        "Connected {} ({}){}",
                        account.email_address,
                        account.id,
                        if account.is_primary { " as primary" } else { "" }
                    );
                    Ok(())
                }
                AccountCommand::List { user, output } => {
                    let accounts = manager.list_accounts(&user).await?;
                    print_output(output.json, &accounts, || cli::render_accounts(&accounts))
                }
                AccountCommand::Disconnect { user, account_id } => {
                    let removed = manager.disconnect_account(&user, &account_id).await?;
                    println!("Disconnected {} and removed {} emails", account_id, removed);
                    Ok(())
                }
            }
        }

        Commands::Category(command) => {
            let manager = CategoryManager::new(store.clone());
            match command {
                CategoryCommand::Create {
                    user,
                    name,
                    description,
                    color,
                } => {
                    let category = manager
                        .create_category(&user, &name, &description, color.as_deref())
                        .await?;
                    println!("Created category {} ({})", category.name, category.id);
                    Ok(())
                }
                CategoryCommand::List { user, output } => {
                    let categories = manager.list_categories(&user).await?;
                    print_output(output.json, &categories, || cli::render_categories(&categories))
                }
                CategoryCommand::Update {
                    user,
                    category_id,
                    name,
                    description,
                    color,
                } => {
                    let category = manager
                        .update_category(
                            &user,
                            &category_id,
                            CategoryUpdate {
                                name,
                                description,
                                color,
                            },
                        )
                        .await?;
                    println!("Updated category {}", category.name);
                    Ok(())
                }
                CategoryCommand::Delete { user, category_id } => {
                    let reassigned = manager.delete_category(&user, &category_id).await?;
                    println!(
                        "Deleted category {}; {} emails are now uncategorized",
                        category_id, reassigned
                    );
                    Ok(())
                }
            }
        }

        Commands::Sync {
            user,
            account,
            output,
        } => {
            let generator = Arc::new(AnthropicClient::from_config(&config.ai)?);
            let classifier = Classifier::new(generator, &config.ai);
            let pipeline = IngestionPipeline::new(
                store.clone(),
                mailbox_client(&config).await?,
                classifier,
                config.storage.counter_mode,
                config.sync.max_results,
            );

            let stop = StopSignal::new();
            let ctrl_c_stop = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after the current message");
                    ctrl_c_stop.stop();
                }
            });

            let outcomes = pipeline
                .sync_account(&user, account.as_deref(), &stop)
                .await?;
            print_output(output.json, &outcomes, || cli::render_sync(&outcomes))
        }

        Commands::Emails(command) => match command {
            EmailCommand::List {
                user,
                account,
                category,
                limit,
                skip,
                output,
            } => {
                let mut query = EmailQuery::for_user(&user).page(limit, skip);
                if let Some(account) = account {
                    query = query.account(account);
                }
                if let Some(category) = category {
                    query = query.category(match cli::parse_category_arg(&category) {
                        Some(id) => CategoryFilter::Category(id),
                        None => CategoryFilter::Uncategorized,
                    });
                }
                let emails = store.list_emails(&query).await?;
                print_output(output.json, &emails, || cli::render_emails(&emails))
            }
            EmailCommand::Recategorize {
                user,
                email_id,
                category,
            } => {
                let manager = EmailManager::new(store.clone(), mailbox_client(&config).await?, counters);
                let target = cli::parse_category_arg(&category);
                let email = manager
                    .recategorize_email(&user, &email_id, target.as_deref())
                    .await?;
                println!(
                    "Email {} is now in {}",
                    email.id,
                    email.category_id.as_deref().unwrap_or("uncategorized")
                );
                Ok(())
            }
            EmailCommand::Archive { user, ids } => {
                let manager = EmailManager::new(store.clone(), mailbox_client(&config).await?, counters);
                let ok = manager.archive_emails(&user, &ids).await?;
                println!(
                    "{}",
                    if ok {
                        "Archived."
                    } else {
                        "Archived with provider errors; see log."
                    }
                );
                Ok(())
            }
            EmailCommand::Delete { user, ids } => {
                let manager = EmailManager::new(store.clone(), mailbox_client(&config).await?, counters);
                let ok = manager.delete_emails(&user, &ids).await?;
                println!(
                    "{}",
                    if ok {
                        "Deleted."
                    } else {
                        "Deleted locally; some provider trash calls failed, see log."
                    }
                );
                Ok(())
            }
        },

        Commands::Unsubscribe { user, ids, output } => {
            let mailer: Option<Arc<dyn MailSender>> = match SmtpMailSender::from_config(&config.smtp)? {
                Some(sender) => Some(Arc::new(sender)),
                None => {
                    tracing::warn!("SMTP relay not configured; mailto unsubscribes will fail");
                    None
                }
            };
            let orchestrator = UnsubscribeOrchestrator::new(
                store.clone(),
                Arc::new(BrowserAutomation::chrome(&config.unsubscribe)),
                mailer,
                &config.unsubscribe,
            );
            let report = orchestrator.unsubscribe(&user, &ids).await?;
            print_output(output.json, &report, || cli::render_unsubscribe(&report))
        }

        Commands::Recount { user, output } => {
            let corrections = recount_categories(store.as_ref(), &user).await?;
            print_output(output.json, &corrections, || cli::render_recount(&corrections))
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(triage_err) = error.downcast_ref::<TriageError>() {
        match triage_err {
            TriageError::Auth(_) => {
                eprintln!("\nHint: The mailbox credential is missing or was revoked.");
                eprintln!("      Reconnect the account: inbox-triage account connect ...");
            }
            TriageError::RateLimitExceeded { .. } | TriageError::Server { .. } => {
                eprintln!("\nHint: This may be a temporary provider error.");
                eprintln!("      Try running the command again.");
            }
            TriageError::Config(_) => {
                eprintln!("\nHint: Check your configuration file and environment variables.");
                eprintln!("      Run: inbox-triage init-config --force");
            }
            _ => {}
        }
    }
}
