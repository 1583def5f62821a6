use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use proxy_harvester::{
    fetch::{CachingFetcher, HttpFetcher},
    pipeline::{run_harvest, run_health_check, select_random_working, RetirementPolicy},
    validator::HttpValidator,
    Anonymity, Config, Protocol, ProxyFilter, Store,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Harvests public proxy lists, validates endpoints and keeps a live inventory
#[derive(Parser)]
#[command(name = "proxy-harvester")]
#[command(about = "Harvests public proxy lists, validates endpoints and keeps a live inventory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path
    #[arg(short, long, default_value = "proxies.db")]
    database: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and seed the built-in sources
    Init,
    /// List configured sources and their pages
    Sources,
    /// Register a new source site
    AddSource {
        /// Display name of the site
        name: String,
        /// Short source code used for adapter dispatch (e.g. SSLP)
        code: String,
        /// Base URL of the site
        url: String,
    },
    /// Register a page under an existing source
    AddPage {
        /// Source code the page belongs to
        code: String,
        /// Page path, including the leading slash
        path: String,
        /// Page needs a JS-capable renderer
        #[arg(long)]
        has_js: bool,
    },
    /// Harvest all active sources
    Harvest {
        /// Number of concurrent validations
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
        /// Probe timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// URLs to test proxies against (can specify multiple)
        #[arg(long)]
        test_url: Vec<String>,
        /// Renderer endpoint for JS pages
        #[arg(long)]
        renderer: Option<String>,
    },
    /// Re-validate the inventory and retire dead entries
    Check {
        /// Number of concurrent validations
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
        /// Probe timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// URLs to test proxies against (can specify multiple)
        #[arg(long)]
        test_url: Vec<String>,
        /// What to do with dead entries: delete or mark-dead
        #[arg(long, default_value = "delete")]
        policy: String,
    },
    /// Pick a random working proxy from the inventory
    GetProxy {
        /// Ignore the anonymity filter
        #[arg(long)]
        any: bool,
        /// Anonymity codes to accept (UNK, NOA, ANM, HIA)
        #[arg(short, long)]
        anonymity: Vec<String>,
        /// Restrict to one protocol (http, https, socks4, socks5)
        #[arg(short, long)]
        protocol: Option<String>,
        /// Probe timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// URLs to test proxies against (can specify multiple)
        #[arg(long)]
        test_url: Vec<String>,
    },
    /// Show recent runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let store = Store::new(&cli.database).await?;

    match cli.command {
        Commands::Init => {
            store.seed_known_sources().await?;
            println!("Database ready at {}", cli.database);
        }
        Commands::Sources => {
            let sources = store.all_sources().await?;
            if sources.is_empty() {
                println!("No sources configured. Run `init` to seed the built-in ones.");
            }
            for source in sources {
                let status = if source.is_active { "active" } else { "inactive" };
                println!("[{}] {} - {} ({})", source.code, source.name, source.url, status);
                for page in store.active_pages(source.id).await? {
                    let js = if page.has_js { " (js)" } else { "" };
                    println!("    {}{}", page.path, js);
                }
            }
        }
        Commands::AddSource { name, code, url } => {
            let source = store.add_source(&name, &code, &url).await?;
            println!("Source added: [{}] {}", source.code, source.name);
        }
        Commands::AddPage { code, path, has_js } => {
            let source = store
                .source_by_code(&code)
                .await?
                .ok_or_else(|| anyhow!("No source with code: {}", code))?;
            let page = store.add_page(source.id, &path, has_js).await?;
            println!("Page added: {}{}", source.url.trim_end_matches('/'), page.path);
        }
        Commands::Harvest {
            concurrency,
            timeout,
            test_url,
            renderer,
        } => {
            let config = build_config(concurrency, timeout, test_url, renderer, None)?;
            let fetcher =
                CachingFetcher::new(HttpFetcher::new(config.fetcher_config())?, config.cache_ttl);
            let validator = HttpValidator::new(config.validator_config());

            let outcome = run_harvest(&store, &fetcher, &validator, config.concurrency).await?;
            report_run(&store, outcome.run_id).await?;
        }
        Commands::Check {
            concurrency,
            timeout,
            test_url,
            policy,
        } => {
            let config = build_config(concurrency, timeout, test_url, None, Some(&policy))?;
            let validator = HttpValidator::new(config.validator_config());

            let outcome =
                run_health_check(&store, &validator, config.concurrency, config.retirement).await?;
            report_run(&store, outcome.run_id).await?;
        }
        Commands::GetProxy {
            any,
            anonymity,
            protocol,
            timeout,
            test_url,
        } => {
            let config = build_config(10, timeout, test_url, None, None)?;
            let validator = HttpValidator::new(config.validator_config());

            let mut filter = if any { ProxyFilter::any() } else { ProxyFilter::default() };
            if !anonymity.is_empty() {
                let classes = anonymity
                    .iter()
                    .map(|code| {
                        Anonymity::from_code(code)
                            .ok_or_else(|| anyhow!("Invalid anonymity code: {}", code))
                    })
                    .collect::<Result<Vec<_>>>()?;
                filter.anonymity = Some(classes);
            }
            if let Some(protocol) = protocol {
                filter.protocol = Some(
                    Protocol::from_code(&protocol)
                        .ok_or_else(|| anyhow!("Invalid proxy protocol: {}", protocol))?,
                );
            }

            match select_random_working(&store, &validator, &filter).await? {
                Some(proxy) => println!(
                    "{}:{} ({}, {}, {})",
                    proxy.ip, proxy.port, proxy.protocol, proxy.anonymity, proxy.country
                ),
                None => println!("No working proxy found."),
            }
        }
        Commands::Runs { limit } => {
            let runs = store.recent_runs(limit).await?;
            if runs.is_empty() {
                println!("No runs recorded.");
            }
            for run in runs {
                let status = match (run.is_finished(), run.is_success) {
                    (false, _) => "running",
                    (true, true) => "ok",
                    (true, false) => "failed",
                };
                print!(
                    "#{} {} {} {} proxies={}",
                    run.id,
                    run.kind,
                    run.created_at.format("%Y-%m-%d %H:%M:%S"),
                    status,
                    run.proxies
                );
                if let Some(error) = &run.error {
                    print!(" error={}", error);
                }
                println!();
            }
        }
    }

    Ok(())
}

fn build_config(
    concurrency: usize,
    timeout: u64,
    test_urls: Vec<String>,
    renderer: Option<String>,
    policy: Option<&str>,
) -> Result<Config> {
    let mut config = Config {
        concurrency,
        probe_timeout: Duration::from_secs(timeout),
        renderer_url: renderer,
        ..Config::default()
    };
    if !test_urls.is_empty() {
        config.test_urls = test_urls;
    }
    if let Some(policy) = policy {
        config.retirement = RetirementPolicy::parse(policy).ok_or_else(|| {
            anyhow!("Invalid retirement policy: {}. Use: delete, mark-dead", policy)
        })?;
    }
    Ok(config)
}

async fn report_run(store: &Store, run_id: i64) -> Result<()> {
    if let Some(run) = store.get_run(run_id).await? {
        let status = if run.is_success { "ok" } else { "failed" };
        println!("Run #{} {}: {} proxies={}", run.id, run.kind, status, run.proxies);
        if let Some(error) = &run.error {
            println!("  error: {}", error);
        }
    }
    Ok(())
}
