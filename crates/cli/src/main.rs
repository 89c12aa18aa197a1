#[cfg(feature = "api-http")]
use bookdesk_core::api::HttpLibraryApi;
use bookdesk_core::api::{LibraryApi, MockLibraryApi};
use bookdesk_core::page::{BookPage, PageError, PageView};
use bookdesk_core::render::{render_view, RenderOptions};
use bookdesk_core::repl::run_repl;
use bookdesk_core::types::{book_id_from_path, AppConfig, BookId, JsonEnvelope, Layout, Session};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
#[cfg(feature = "api-http")]
use std::time::Duration;
use toml::map::Entry;
use toml::Value;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = ".bookdesk.toml";

#[derive(Debug, Parser)]
#[command(
    name = "bookdesk",
    version,
    about = "Browse, check out and review books from a library API"
)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,
    /// Use the built-in in-memory library instead of the HTTP API.
    #[arg(long, global = true)]
    mock: bool,
    /// Seed the in-memory library from a TOML or JSON fixture (implies --mock).
    #[arg(long = "mock-data", global = true)]
    mock_data: Option<PathBuf>,
    #[arg(long = "base-url", global = true)]
    base_url: Option<String>,
    /// Bearer token; overrides the configured token env var.
    #[arg(long, global = true)]
    token: Option<String>,
    #[arg(long, global = true)]
    mobile: bool,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    InitConfig {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Load and render a book page (`42` or `/checkout/42`).
    Show { book: String },
    Checkout { book: String },
    Review {
        book: String,
        #[arg(long)]
        rating: f64,
        #[arg(long)]
        description: Option<String>,
    },
    Interactive { book: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.cmd {
        init_config_file(Path::new(CONFIG_FILE), force)?;
        println!("initialized .bookdesk.toml");
        return Ok(());
    }

    let mut cfg = load_config()?;
    if let Some(url) = &cli.base_url {
        cfg.api.base_url = url.clone();
    }
    if cli.mobile {
        cfg.display.layout = Layout::Mobile;
    }

    tracing::debug!(
        base_url = %cfg.api.base_url,
        mock = cli.mock || cli.mock_data.is_some(),
        layout = ?cfg.display.layout,
        "configuration resolved"
    );

    let api = build_api(&cfg, cli.mock, cli.mock_data.as_deref())?;
    let session = resolve_session(&cfg, cli.token.clone(), |k| std::env::var(k).ok());
    let options = RenderOptions {
        layout: cfg.display.layout,
        max_loans: cfg.display.max_loans,
    };

    match cli.cmd {
        Commands::InitConfig { .. } => {}
        Commands::Show { book } => {
            let page = load_page(api, parse_book(&book)?, session).await;
            print_page(&page, options, cli.json, "show", "page loaded")?;
        }
        Commands::Checkout { book } => {
            let mut page = load_page(api, parse_book(&book)?, session).await;
            page.checkout().await.map_err(render_page_error)?;
            page.settle().await;
            print_page(&page, options, cli.json, "checkout", "book checked out")?;
        }
        Commands::Review {
            book,
            rating,
            description,
        } => {
            let mut page = load_page(api, parse_book(&book)?, session).await;
            page.submit_review(rating, description)
                .await
                .map_err(render_page_error)?;
            page.settle().await;
            print_page(&page, options, cli.json, "review", "review submitted")?;
        }
        Commands::Interactive { book } => {
            let page = BookPage::new(api, parse_book(&book)?, session);
            run_repl(page, options).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_book(raw: &str) -> anyhow::Result<BookId> {
    book_id_from_path(raw)
        .ok_or_else(|| anyhow::anyhow!("cannot read a book id from `{raw}`; pass 42 or /checkout/42"))
}

async fn load_page(
    api: Box<dyn LibraryApi>,
    book_id: BookId,
    session: Session,
) -> BookPage<Box<dyn LibraryApi>> {
    let mut page = BookPage::new(api, book_id, session);
    page.mount();
    page.settle().await;
    page
}

fn print_page(
    page: &BookPage<Box<dyn LibraryApi>>,
    options: RenderOptions,
    json_output: bool,
    phase: &str,
    message: &str,
) -> anyhow::Result<()> {
    let view = page.view();
    if json_output {
        let envelope = match &view {
            PageView::Ready(snapshot) => JsonEnvelope {
                status: "ok".to_string(),
                phase: phase.to_string(),
                message: message.to_string(),
                details: serde_json::to_value(snapshot)?,
            },
            PageView::Error(error) => JsonEnvelope {
                status: "error".to_string(),
                phase: phase.to_string(),
                message: error.clone(),
                details: json!({
                    "book_id": page.book_id(),
                    "failed_units": page
                        .unit_errors()
                        .into_iter()
                        .map(|(unit, _)| unit)
                        .collect::<Vec<_>>(),
                }),
            },
            PageView::Loading => JsonEnvelope {
                status: "pending".to_string(),
                phase: phase.to_string(),
                message: "page did not finish loading".to_string(),
                details: json!({"book_id": page.book_id()}),
            },
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print!("{}", render_view(&view, options));
    }
    Ok(())
}

fn build_api(
    cfg: &AppConfig,
    mock: bool,
    mock_data: Option<&Path>,
) -> anyhow::Result<Box<dyn LibraryApi>> {
    if let Some(path) = mock_data {
        return Ok(Box::new(MockLibraryApi::from_path(path)?));
    }
    if mock {
        return Ok(Box::new(MockLibraryApi::sample()));
    }

    #[cfg(feature = "api-http")]
    {
        let timeout = Duration::from_millis(cfg.api.timeout_ms);
        Ok(Box::new(HttpLibraryApi::new(&cfg.api.base_url, timeout)?))
    }
    #[cfg(not(feature = "api-http"))]
    {
        let _ = cfg;
        Ok(Box::new(MockLibraryApi::sample()))
    }
}

fn resolve_session<F>(cfg: &AppConfig, token_flag: Option<String>, env_get: F) -> Session
where
    F: Fn(&str) -> Option<String>,
{
    token_flag
        .or_else(|| env_get(&cfg.auth.token_env_var))
        .filter(|t| !t.trim().is_empty())
        .map(Session::bearer)
        .unwrap_or_else(Session::anonymous)
}

/// Config files in ascending precedence: home first, then the working directory.
fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE));
    home.into_iter().chain([PathBuf::from(CONFIG_FILE)]).collect()
}

fn load_config() -> anyhow::Result<AppConfig> {
    let mut layers = Vec::new();
    for path in config_paths() {
        layers.extend(read_layer(&path)?);
    }
    resolve_config(layers, |k| std::env::var(k).ok())
}

/// Folds file layers (lowest precedence first) over the defaults, then env.
fn resolve_config<F>(layers: Vec<Value>, env_get: F) -> anyhow::Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = Value::try_from(AppConfig::default())?;
    for layer in layers {
        overlay(&mut merged, layer);
    }
    let mut cfg: AppConfig = merged
        .try_into()
        .context("invalid bookdesk configuration")?;
    apply_env_overrides(&mut cfg, env_get);
    Ok(cfg)
}

/// A missing file is no layer at all.
fn read_layer(path: &Path) -> anyhow::Result<Option<Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    raw.parse::<Value>()
        .map(Some)
        .with_context(|| format!("parsing {}", path.display()))
}

/// Tables merge key by key; any other value replaces what is below it.
fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Table(below), Value::Table(above)) => {
            for (key, value) in above {
                match below.entry(key) {
                    Entry::Occupied(mut slot) => overlay(slot.get_mut(), value),
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides<F>(cfg: &mut AppConfig, env_get: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env_get("BOOKDESK_BASE_URL") {
        cfg.api.base_url = v;
    }
    if let Some(v) = env_get("BOOKDESK_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        cfg.api.timeout_ms = v;
    }
    if let Some(v) = env_get("BOOKDESK_TOKEN_ENV_VAR") {
        cfg.auth.token_env_var = v;
    }
    if let Some(v) = env_get("BOOKDESK_LAYOUT").and_then(|v| parse_layout(&v)) {
        cfg.display.layout = v;
    }
    if let Some(v) = env_get("BOOKDESK_MAX_LOANS").and_then(|v| v.parse::<u32>().ok()) {
        cfg.display.max_loans = v;
    }
}

fn parse_layout(raw: &str) -> Option<Layout> {
    match raw.to_ascii_lowercase().as_str() {
        "desktop" | "wide" => Some(Layout::Desktop),
        "mobile" | "narrow" => Some(Layout::Mobile),
        _ => None,
    }
}

fn init_config_file(path: &Path, force: bool) -> anyhow::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => anyhow::bail!(
            "{} already exists; re-run with --force to overwrite",
            path.display()
        ),
        Err(err) => return Err(err).with_context(|| format!("creating {}", path.display())),
    };
    file.write_all(config_template().as_bytes())?;
    Ok(())
}

fn config_template() -> &'static str {
    r#"# bookdesk configuration
# precedence: CLI > env > local .bookdesk.toml > home ~/.bookdesk.toml > defaults

[api]
base_url = "http://localhost:8083"
# request timeout in milliseconds; 0 keeps the transport default
timeout_ms = 10000

[auth]
# name of the env var holding the bearer token
token_env_var = "BOOKDESK_TOKEN"

[display]
# layout options: desktop, mobile
layout = "desktop"
max_loans = 5
"#
}

fn render_page_error(err: PageError) -> anyhow::Error {
    match err {
        PageError::Unauthenticated => anyhow::anyhow!(
            "sign in required; pass --token or set the configured token env var"
        ),
        PageError::Api(api) if api.is_retryable() => {
            anyhow::anyhow!("{api}; the library api may be temporarily unavailable, try again")
        }
        other => anyhow::anyhow!(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn layer(raw: &str) -> Value {
        raw.parse::<Value>().expect("layer parse")
    }

    #[test]
    fn config_precedence_env_local_home_defaults() {
        let home = layer(
            r#"
            [api]
            base_url = "http://home.invalid"
            timeout_ms = 1234

            [display]
            max_loans = 3
            "#,
        );
        let local = layer(
            r#"
            [api]
            base_url = "http://local.invalid"

            [display]
            layout = "mobile"
            "#,
        );
        let env = HashMap::from([(
            "BOOKDESK_BASE_URL".to_string(),
            "http://env.invalid".to_string(),
        )]);

        let cfg = resolve_config(vec![home, local], |k| env.get(k).cloned())
            .expect("resolve config");

        assert_eq!(cfg.api.base_url, "http://env.invalid");
        assert_eq!(cfg.api.timeout_ms, 1234);
        assert_eq!(cfg.display.layout, Layout::Mobile);
        assert_eq!(cfg.display.max_loans, 3);
        assert_eq!(cfg.auth.token_env_var, "BOOKDESK_TOKEN");
    }

    #[test]
    fn mistyped_layer_is_rejected() {
        let err = resolve_config(vec![layer("[display]\nmax_loans = \"five\"")], |_| None)
            .expect_err("string loan limit");
        assert!(err.to_string().contains("invalid bookdesk configuration"));
    }

    #[test]
    fn template_parses_into_defaults() {
        let cfg = resolve_config(vec![layer(config_template())], |_| None).expect("resolve");
        assert_eq!(cfg.api.base_url, AppConfig::default().api.base_url);
        assert_eq!(cfg.display.max_loans, 5);
    }

    #[test]
    fn missing_config_file_is_no_layer() {
        let path = std::env::temp_dir().join("bookdesk-no-such-dir").join(CONFIG_FILE);
        assert!(read_layer(&path).expect("missing file").is_none());
    }

    #[test]
    fn init_config_requires_force_to_overwrite() {
        let base = std::env::temp_dir().join(format!(
            "bookdesk-cli-test-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time")
                .as_nanos()
        ));
        fs::create_dir_all(&base).expect("create temp dir");
        let cfg_path = base.join(".bookdesk.toml");

        init_config_file(&cfg_path, false).expect("must create first config");
        let err = init_config_file(&cfg_path, false).expect_err("must reject overwrite");
        assert!(err.to_string().contains("--force"));

        init_config_file(&cfg_path, true).expect("force overwrite should succeed");
        let content = fs::read_to_string(&cfg_path).expect("read config");
        assert!(content.contains("[display]"));

        fs::remove_dir_all(&base).expect("cleanup temp dir");
    }

    #[test]
    fn session_prefers_flag_then_configured_env_var() {
        let mut cfg = AppConfig::default();
        cfg.auth.token_env_var = "LIB_TOKEN".to_string();
        let env = HashMap::from([("LIB_TOKEN".to_string(), "from-env".to_string())]);

        let session = resolve_session(&cfg, Some("from-flag".to_string()), |k| env.get(k).cloned());
        assert_eq!(session.token(), Some("from-flag"));

        let session = resolve_session(&cfg, None, |k| env.get(k).cloned());
        assert_eq!(session.token(), Some("from-env"));

        let session = resolve_session(&cfg, None, |_| None);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn review_command_parses_flags() {
        let cli = Cli::try_parse_from([
            "bookdesk",
            "--mock",
            "review",
            "/checkout/42",
            "--rating",
            "4.5",
            "--description",
            "great read",
        ])
        .expect("cli parse");

        assert!(cli.mock);
        match cli.cmd {
            Commands::Review {
                book,
                rating,
                description,
            } => {
                assert_eq!(parse_book(&book).expect("book id"), 42);
                assert_eq!(rating, 4.5);
                assert_eq!(description.as_deref(), Some("great read"));
            }
            _ => panic!("expected review command"),
        }
    }

    #[test]
    fn unreadable_book_id_is_rejected() {
        let err = parse_book("/checkout/abc").expect_err("must reject");
        assert!(err.to_string().contains("/checkout/42"));
    }

    #[tokio::test]
    async fn mock_show_renders_sample_book() {
        let cfg = AppConfig::default();
        let api = build_api(&cfg, true, None).expect("mock api");
        let page = load_page(api, 1, Session::anonymous()).await;
        match page.view() {
            PageView::Ready(snapshot) => {
                assert_eq!(snapshot.book.id, 1);
                assert_eq!(snapshot.average_rating, 4.5);
            }
            other => panic!("expected ready page, got {other:?}"),
        }
    }
}
