use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use funnelwatch::browser::webdriver::WebDriverFactory;
use funnelwatch::config::{AppConfig, LoggingConfig};
use funnelwatch::export::{self, ExportFormat};
use funnelwatch::model::{now_millis, TestResult};
use funnelwatch::probes::{FunnelProbe, ProbeTarget};
use funnelwatch::scheduler::MonitoringSchedule;
use funnelwatch::storage::{self, NewSite};
use funnelwatch::stream::ProgressSink;
use funnelwatch::Services;

#[derive(Parser)]
#[command(
    name = "funnelwatch",
    about = "Headless-browser health monitoring for marketing landing pages",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $FUNNELWATCH_CONFIG, then ./funnelwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + queue worker + scheduled monitoring)
    Serve {
        /// Bind address (overrides [server] bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Probe a URL once without storing anything
    Probe {
        /// Page to probe
        #[arg(long)]
        url: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Probe a registered site and store the result
    Test {
        /// Site id
        #[arg(long)]
        site: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Manage monitored sites
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },

    /// Run a full monitoring sweep now, or preview the schedule
    Monitor {
        /// Only list the scheduled runs in the next N hours
        #[arg(long)]
        preview_hours: Option<u64>,
    },

    /// Export stored results
    Export {
        #[arg(long, value_enum, default_value = "csv")]
        format: FormatArg,

        /// Trailing window in days
        #[arg(long, default_value = "30")]
        days: u32,

        /// Restrict to one site id
        #[arg(long)]
        site: Option<String>,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SitesAction {
    /// List all sites
    List,

    /// Add a new site
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        /// Landing page URL
        #[arg(long)]
        url: String,

        /// Check frequency label
        #[arg(long, default_value = "daily")]
        frequency: String,
    },

    /// Remove a site
    Remove {
        /// Site id
        #[arg(long)]
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting funnelwatch daemon");
            funnelwatch::serve(config).await?;
        }
        Commands::Probe { url, json } => {
            let sessions = Arc::new(WebDriverFactory::new(&config.probe));
            let probe = FunnelProbe::new(sessions, config.probe.clone())?;
            let target = ProbeTarget::new("adhoc", &url);
            let result = probe.run(&target, &ProgressSink::detached("adhoc")).await;
            print_result(&result, json)?;
        }
        Commands::Test { site, json } => {
            let services = Services::build(config)?;
            let result = services.runner.run_direct(&site).await?;
            print_result(&result, json)?;
        }
        Commands::Sites { action } => {
            let store = storage::open_store(&config.store)?;
            match action {
                SitesAction::List => {
                    let sites = store.list_sites().await?;
                    if sites.is_empty() {
                        println!("No sites found.");
                    } else {
                        println!("{:<20} | {:<25} | {:<10} | URL", "ID", "Name", "Frequency");
                        println!("{:-<20}-|-{:-<25}-|-{:-<10}-|-{:-<30}", "", "", "", "");
                        for s in sites {
                            println!(
                                "{:<20} | {:<25} | {:<10} | {}",
                                s.id, s.display_name, s.check_frequency, s.url
                            );
                        }
                    }
                }
                SitesAction::Add { name, url, frequency } => {
                    funnelwatch::probes::funnel::validate_url(&url)
                        .map_err(|e| anyhow::anyhow!(e))?;
                    let site = store
                        .add_site(NewSite {
                            display_name: name,
                            url,
                            check_frequency: frequency,
                        })
                        .await?;
                    println!("Site '{}' added with id {}.", site.display_name, site.id);
                }
                SitesAction::Remove { id } => {
                    store.remove_site(&id).await?;
                    println!("Site '{}' removed.", id);
                }
            }
        }
        Commands::Monitor { preview_hours } => {
            if let Some(hours) = preview_hours {
                let schedule = MonitoringSchedule::parse(&config.monitoring.cron)?;
                let runs = schedule.preview(chrono::Utc::now(), hours);
                if runs.is_empty() {
                    println!("No runs scheduled in next {} hours.", hours);
                } else {
                    println!("Upcoming runs (next {} hours, {}):", hours, schedule.expression());
                    for time in runs {
                        println!("{}", time.to_rfc3339());
                    }
                }
            } else {
                let services = Services::build(config)?;
                let worker = services.spawn_queue_worker();
                let summary = services
                    .runner
                    .sweep(&services.queue, services.sweep_delay())
                    .await;
                worker.abort();
                let summary = summary?;

                println!("\n=== funnelwatch Monitoring Summary ===");
                println!("Tests:       {}", summary.total_tests);
                println!("Successful:  {}", summary.successful_tests);
                println!("Failed:      {}", summary.failed_tests);
                println!("Critical:    {}", summary.critical_issues);
                println!("Avg. score:  {}", summary.average_performance);
                for issue in &summary.tunnels_with_issues {
                    println!(" - {} [{}] {}", issue.name, issue.status, issue.url);
                }
                println!("======================================\n");
            }
        }
        Commands::Export {
            format,
            days,
            site,
            output,
        } => {
            let format = ExportFormat::from(format);
            let store = storage::open_store(&config.store)?;
            let now = now_millis();
            let results = store
                .results_since(
                    funnelwatch::analysis::stats::window_start(days, now),
                    site.as_deref(),
                )
                .await?;
            let count = results.len();

            let body = match format {
                ExportFormat::Csv => export::to_csv(&results)?,
                ExportFormat::Json => serde_json::to_string_pretty(&export::to_document(
                    results,
                    days,
                    site.as_deref(),
                    now,
                ))?,
            };

            match output {
                Some(path) => {
                    std::fs::write(&path, body)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), records = count, "Export written");
                }
                None => print!("{}", body),
            }
        }
    }

    Ok(())
}

fn print_result(result: &TestResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("\n=== funnelwatch Test Report ===");
    println!("URL:          {}", result.url);
    println!("Status:       {}", result.status);
    println!("Score:        {}", result.performance_score);
    println!("Load time:    {} ms", result.load_time_ms);
    if let Some(ms) = result.mobile_load_time_ms {
        println!("Mobile load:  {} ms", ms);
    }
    println!("Forms valid:  {}", result.forms_valid);
    println!("CTAs valid:   {}", result.ctas_valid);
    if !result.tracking_pixels.is_empty() {
        println!("Tracking:     {}", result.tracking_pixels.join(", "));
    }
    if !result.errors.is_empty() {
        println!("\nErrors:");
        for issue in &result.errors {
            println!(" - [{}] {}", issue.kind, issue.message);
        }
    }
    if !result.warnings.is_empty() {
        println!("\nWarnings:");
        for issue in &result.warnings {
            println!(" - [{}] {}", issue.kind, issue.message);
        }
    }
    println!("===============================\n");
    Ok(())
}
